//! Native engine boundary
//!
//! The engine is a black box that runs on its own threads. The bridge calls
//! into it synchronously through [`Engine`] and hears back through the
//! [`Notifier`](crate::notifier::Notifier) it hands over in [`Engine::init`].
//!
//! Engine guarantees the bridge relies on:
//! - an id returned by `allocate_chain` stays valid until `remove_chain`,
//! - exactly one `chain_initialized` callback per allocated id, possibly
//!   before `allocate_chain` has returned,
//! - `remove_chain` is safe for ids whose initialization failed.

use crate::error::{BridgeError, Result};
use crate::notifier::Notifier;
use chainbridge_types::{ChainId, LogLevel};
use std::sync::Arc;

/// Arguments of [`Engine::allocate_chain`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AllocateChain {
    pub spec: Vec<u8>,
    /// Empty when there is no snapshot
    pub database_content: Vec<u8>,
    pub parents: Vec<ChainId>,
    /// 0 disables JSON-RPC for the chain
    pub max_pending_requests: u32,
    pub max_subscriptions: u32,
}

/// Primitive operations of the native engine.
///
/// All methods are synchronous and may be called from any thread.
pub trait Engine: Send + Sync + 'static {
    /// Process-wide setup. Called once, before any other method.
    fn init(&self, log_level: LogLevel, notifier: Notifier);

    /// Allocate a chain. The id is live at once; initialization finishes
    /// later through `Notifier::chain_initialized`.
    fn allocate_chain(&self, request: AllocateChain) -> ChainId;

    fn remove_chain(&self, chain: ChainId);

    /// Submit a request: `0` accepted, `1` queue full, anything else is a
    /// contract violation.
    fn send_request(&self, request: &[u8], chain: ChainId) -> u32;

    /// Pop the next response, if any.
    fn poll_response(&self, chain: ChainId) -> Option<Vec<u8>>;

    /// Terminal, process-wide teardown.
    fn shutdown(&self);
}

/// Run an engine call on tokio's blocking pool.
///
/// Panics raised by the engine are resumed on the calling task.
pub(crate) async fn call_blocking<T, F>(engine: &Arc<dyn Engine>, call: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce(&dyn Engine) -> T + Send + 'static,
{
    let engine = Arc::clone(engine);
    match tokio::task::spawn_blocking(move || call(engine.as_ref())).await {
        Ok(value) => Ok(value),
        Err(err) if err.is_panic() => std::panic::resume_unwind(err.into_panic()),
        Err(err) => Err(BridgeError::Runtime(err.to_string())),
    }
}
