//! Inbound engine callbacks
//!
//! The engine reports back through a [`Notifier`]. Both callbacks may arrive
//! on any thread, including threads the tokio runtime does not own, and must
//! return quickly: `chain_initialized` hands its work to a runtime task and
//! `chain_has_new_data` only sets a wake slot.

use crate::mailbox::Mailbox;
use crate::registry::ChainRegistry;
use chainbridge_types::{ChainId, CreationOutcome};
use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::task::AbortHandle;
use tracing::{debug, error, trace};

/// State shared between the bridge and the callbacks it handed out
#[derive(Debug, Default)]
pub(crate) struct CallbackState {
    pub(crate) mailbox: Mailbox<ChainId, CreationOutcome>,
    pub(crate) registry: ChainRegistry,
    closed: AtomicBool,
    tasks: Mutex<Vec<AbortHandle>>,
}

impl CallbackState {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Stop accepting callbacks and cancel outcomes still waiting for a reader.
    pub(crate) fn close(&self) {
        let mut tasks = self.tasks.lock();
        self.closed.store(true, Ordering::Release);
        for task in tasks.drain(..) {
            task.abort();
        }
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    #[cfg(test)]
    pub(crate) fn pending_tasks(&self) -> usize {
        let mut tasks = self.tasks.lock();
        tasks.retain(|task| !task.is_finished());
        tasks.len()
    }
}

/// Callback sink handed to [`Engine::init`](crate::engine::Engine::init)
#[derive(Clone)]
pub struct Notifier {
    state: Arc<CallbackState>,
    runtime: Handle,
}

impl fmt::Debug for Notifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Notifier")
            .field("closed", &self.state.is_closed())
            .finish_non_exhaustive()
    }
}

impl Notifier {
    pub(crate) fn new(state: Arc<CallbackState>, runtime: Handle) -> Self {
        Self { state, runtime }
    }

    /// A chain finished initializing. `error` is `None` on success.
    ///
    /// The outcome is held until the creating task is waiting for it, so a
    /// callback that races ahead of `allocate_chain` returning is not lost.
    pub fn chain_initialized(&self, chain: ChainId, error: Option<String>) {
        let outcome = CreationOutcome::from_callback(error);

        let mut tasks = self.state.tasks.lock();
        if self.state.is_closed() {
            debug!(chain = %chain, "initialization callback after shutdown ignored");
            return;
        }
        tasks.retain(|task| !task.is_finished());

        let state = Arc::clone(&self.state);
        let task = self.runtime.spawn(async move {
            if !state.mailbox.wait_until_awaited(&chain).await {
                debug!(chain = %chain, "creation abandoned; outcome discarded");
                state.mailbox.forget(&chain);
                return;
            }
            trace!(chain = %chain, ready = outcome.is_ready(), "delivering creation outcome");
            if let Err(err) = state.mailbox.set(&chain, outcome) {
                error!(chain = %chain, error = %err, "duplicate initialization callback");
            }
        });
        tasks.push(task.abort_handle());
    }

    /// The engine has responses queued for `chain`.
    pub fn chain_has_new_data(&self, chain: ChainId) {
        if self.state.is_closed() {
            return;
        }
        self.state.registry.wake(chain);
    }
}
