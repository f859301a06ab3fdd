//! Registry of live chains
//!
//! Maps a chain id to the pieces the host needs while the chain is live: its
//! wake slot, the handle of its response loop and the loop's fault flag. A
//! chain is in the registry until it is removed or the bridge shuts down; it
//! serves requests only while its loop has not failed.
//!
//! Every operation holds the lock only for the map access itself.

use crate::wake::WakeSlot;
use chainbridge_types::ChainId;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, trace};

/// Host-side state of one registered chain
#[derive(Debug)]
pub struct ChainEntry {
    wake: Arc<WakeSlot>,
    faulted: Arc<AtomicBool>,
    task: JoinHandle<()>,
}

impl ChainEntry {
    /// `faulted` is raised by the response loop behind `task` when it fails.
    pub fn new(wake: Arc<WakeSlot>, faulted: Arc<AtomicBool>, task: JoinHandle<()>) -> Self {
        Self { wake, faulted, task }
    }

    pub fn is_faulted(&self) -> bool {
        self.faulted.load(Ordering::Acquire)
    }

    pub fn wake(&self) {
        self.wake.wake();
    }

    /// Cancel the response loop and wait until it is gone.
    pub async fn stop(self) {
        self.task.abort();
        // A cancelled task resolves with a JoinError; a loop that already
        // ended on a fault has logged its own error.
        let _ = self.task.await;
    }

    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }
}

#[derive(Debug, Default)]
pub struct ChainRegistry {
    chains: Mutex<HashMap<ChainId, ChainEntry>>,
}

impl ChainRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a chain.
    ///
    /// # Panics
    ///
    /// If `id` is already registered. The engine never hands out a live id
    /// twice, so this is a broken invariant rather than a runtime condition.
    pub fn insert(&self, id: ChainId, entry: ChainEntry) {
        let previous = self.chains.lock().insert(id, entry);
        assert!(previous.is_none(), "{id} registered twice");
    }

    /// Wake the response loop of `id`.
    ///
    /// Unknown ids are ignored: a notification may race ahead of
    /// registration (the loop polls on its own first pass) or behind removal
    /// (nobody is left to observe it).
    pub fn wake(&self, id: ChainId) -> bool {
        let wake = self
            .chains
            .lock()
            .get(&id)
            .map(|entry| Arc::clone(&entry.wake));
        match wake {
            Some(wake) => {
                trace!(chain = %id, "waking response loop");
                wake.wake();
                true
            }
            None => {
                debug!(chain = %id, "notification for unregistered chain dropped");
                false
            }
        }
    }

    pub fn remove(&self, id: ChainId) -> Option<ChainEntry> {
        self.chains.lock().remove(&id)
    }

    /// Remove every chain at once.
    pub fn drain(&self) -> Vec<(ChainId, ChainEntry)> {
        self.chains.lock().drain().collect()
    }

    pub fn contains(&self, id: ChainId) -> bool {
        self.chains.lock().contains_key(&id)
    }

    /// Registered and its response loop has not failed
    pub fn is_serving(&self, id: ChainId) -> bool {
        self.chains
            .lock()
            .get(&id)
            .is_some_and(|entry| !entry.is_faulted())
    }

    pub fn ids(&self) -> Vec<ChainId> {
        let mut ids: Vec<_> = self.chains.lock().keys().copied().collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.chains.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.chains.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::timeout;

    fn parked_entry() -> (Arc<WakeSlot>, ChainEntry) {
        let wake = Arc::new(WakeSlot::new());
        let task = tokio::spawn(std::future::pending::<()>());
        let faulted = Arc::new(AtomicBool::new(false));
        (wake.clone(), ChainEntry::new(wake, faulted, task))
    }

    #[tokio::test]
    async fn test_wake_unknown_chain_is_noop() {
        let registry = ChainRegistry::new();
        assert!(!registry.wake(ChainId(1)));
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_wake_reaches_registered_slot() {
        let registry = ChainRegistry::new();
        let (wake, entry) = parked_entry();
        registry.insert(ChainId(1), entry);

        assert!(registry.wake(ChainId(1)));
        timeout(Duration::from_secs(5), wake.wait()).await.unwrap();
    }

    #[tokio::test]
    async fn test_remove_then_wake_is_noop() {
        let registry = ChainRegistry::new();
        let (_wake, entry) = parked_entry();
        registry.insert(ChainId(2), entry);

        let entry = registry.remove(ChainId(2)).unwrap();
        assert!(registry.remove(ChainId(2)).is_none());
        assert!(!registry.wake(ChainId(2)));

        assert!(entry.is_running());
        entry.stop().await;
    }

    #[tokio::test]
    async fn test_drain_empties_registry() {
        let registry = ChainRegistry::new();
        for id in [3, 1, 2] {
            let (_wake, entry) = parked_entry();
            registry.insert(ChainId(id), entry);
        }
        assert_eq!(registry.ids(), vec![ChainId(1), ChainId(2), ChainId(3)]);

        let drained = registry.drain();
        assert_eq!(drained.len(), 3);
        assert!(registry.is_empty());

        for (_, entry) in drained {
            entry.stop().await;
        }
    }

    #[tokio::test]
    async fn test_faulted_chain_stays_registered_but_not_serving() {
        let registry = ChainRegistry::new();
        let faulted = Arc::new(AtomicBool::new(false));
        let task = tokio::spawn(async {});
        registry.insert(
            ChainId(4),
            ChainEntry::new(Arc::new(WakeSlot::new()), Arc::clone(&faulted), task),
        );
        assert!(registry.is_serving(ChainId(4)));

        faulted.store(true, Ordering::Release);
        assert!(registry.contains(ChainId(4)));
        assert!(!registry.is_serving(ChainId(4)));
        assert!(!registry.is_serving(ChainId(5)));

        let entry = registry.remove(ChainId(4)).unwrap();
        assert!(entry.is_faulted());
        entry.stop().await;
    }

    #[tokio::test]
    #[should_panic(expected = "registered twice")]
    async fn test_duplicate_insert_panics() {
        let registry = ChainRegistry::new();
        let (_a, first) = parked_entry();
        let (_b, second) = parked_entry();
        registry.insert(ChainId(1), first);
        registry.insert(ChainId(1), second);
    }
}
