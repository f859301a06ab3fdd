//! Single-slot wake signal for a chain's response loop

use tokio::sync::Notify;

/// Edge-to-level adapter between engine notifications and the poll loop.
///
/// `wake` never fails and never blocks. If nobody is waiting, the wake is
/// stored and the next `wait` returns at once; any number of wakes before
/// that `wait` collapse into one. This closes the gap between "poll found
/// nothing" and "start waiting".
#[derive(Debug, Default)]
pub struct WakeSlot {
    notify: Notify,
}

impl WakeSlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn wake(&self) {
        self.notify.notify_one();
    }

    /// Arm the slot and wait for the next (or an already stored) wake.
    pub async fn wait(&self) {
        self.notify.notified().await;
    }
}
