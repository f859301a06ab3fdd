//! Lazily built, resettable bridge holder
//!
//! Hosts that want a single shared bridge install a factory once and call
//! [`BridgeSlot::instance`] wherever they need it. The slot is an ordinary
//! value; share it the way the host shares any other state.

use crate::bridge::Bridge;
use crate::error::{BridgeError, Result};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::info;

type Factory = Arc<dyn Fn() -> Result<Bridge> + Send + Sync>;

#[derive(Default)]
pub struct BridgeSlot {
    factory: parking_lot::Mutex<Option<Factory>>,
    current: Mutex<Option<Bridge>>,
}

impl BridgeSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the factory used by the next [`instance`](Self::instance) that
    /// has to build a bridge. A bridge that is already built is kept.
    pub fn install<F>(&self, factory: F)
    where
        F: Fn() -> Result<Bridge> + Send + Sync + 'static,
    {
        *self.factory.lock() = Some(Arc::new(factory));
    }

    /// The current bridge, built on first use.
    ///
    /// A bridge that was shut down directly is replaced by a fresh one.
    pub async fn instance(&self) -> Result<Bridge> {
        let mut current = self.current.lock().await;
        if let Some(bridge) = current.as_ref() {
            if !bridge.is_shut_down() {
                return Ok(bridge.clone());
            }
        }

        let factory = self
            .factory
            .lock()
            .clone()
            .ok_or(BridgeError::NotInitialized)?;
        let bridge = factory()?;
        *current = Some(bridge.clone());
        Ok(bridge)
    }

    /// Shut down the current bridge, if any. The next `instance` builds a
    /// new one.
    pub async fn reset(&self) -> Result<()> {
        let mut current = self.current.lock().await;
        if let Some(bridge) = current.take() {
            info!("resetting bridge instance");
            bridge.shutdown().await?;
        }
        Ok(())
    }

    pub async fn is_built(&self) -> bool {
        self.current.lock().await.is_some()
    }
}
