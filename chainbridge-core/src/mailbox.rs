//! Keyed single-shot mailbox
//!
//! A map from key to a cell that is set exactly once. Readers that arrive
//! before the value suspend until it is set; readers that arrive after get it
//! immediately. The writer side can wait until at least one reader has shown
//! up, which lets an engine callback hold its result until the creating task
//! is listening.
//!
//! The map lock is only held to get or create a cell; all waiting happens on
//! the cell itself.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use thiserror::Error;
use tokio::sync::Notify;

/// A cell was set twice. The engine contract allows one result per key.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("mailbox cell already set")]
pub struct AlreadySet;

struct Cell<V> {
    value: OnceLock<V>,
    value_set: Notify,
    awaited: AtomicBool,
    abandoned: AtomicBool,
    awaited_set: Notify,
}

impl<V> Cell<V> {
    fn new() -> Self {
        Self {
            value: OnceLock::new(),
            value_set: Notify::new(),
            awaited: AtomicBool::new(false),
            abandoned: AtomicBool::new(false),
            awaited_set: Notify::new(),
        }
    }
}

pub struct Mailbox<K, V> {
    cells: Mutex<HashMap<K, Arc<Cell<V>>>>,
}

impl<K, V> fmt::Debug for Mailbox<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Mailbox")
            .field("cells", &self.cells.lock().len())
            .finish()
    }
}

impl<K, V> Default for Mailbox<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> Mailbox<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new() -> Self {
        Self {
            cells: Mutex::new(HashMap::new()),
        }
    }

    fn cell(&self, key: &K) -> Arc<Cell<V>> {
        Self::cell_in(&mut self.cells.lock(), key)
    }

    fn cell_in(cells: &mut HashMap<K, Arc<Cell<V>>>, key: &K) -> Arc<Cell<V>> {
        cells
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Cell::new()))
            .clone()
    }

    /// Wait for the value of `key`.
    ///
    /// Every concurrent caller resolves on the same `set`. Marks the key as
    /// awaited before suspending.
    pub async fn get(&self, key: &K) -> V {
        let cell = self.cell(key);

        if !cell.awaited.swap(true, Ordering::AcqRel) {
            cell.awaited_set.notify_waiters();
        }

        loop {
            let notified = cell.value_set.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(value) = cell.value.get() {
                return value.clone();
            }
            notified.await;
        }
    }

    /// Set the value of `key`, waking every pending reader.
    ///
    /// Setting an abandoned key drops its cell.
    pub fn set(&self, key: &K, value: V) -> Result<(), AlreadySet> {
        let cell = {
            let mut cells = self.cells.lock();
            let cell = Self::cell_in(&mut cells, key);
            cell.value.set(value).map_err(|_| AlreadySet)?;
            if cell.abandoned.load(Ordering::Acquire) {
                cells.remove(key);
            }
            cell
        };
        cell.value_set.notify_waiters();
        Ok(())
    }

    /// Suspend until some caller has started `get(key)`.
    ///
    /// Returns `false` if the key was abandoned instead; the value should
    /// then be discarded.
    pub async fn wait_until_awaited(&self, key: &K) -> bool {
        let cell = self.cell(key);

        loop {
            let notified = cell.awaited_set.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if cell.abandoned.load(Ordering::Acquire) {
                return false;
            }
            if cell.awaited.load(Ordering::Acquire) {
                return true;
            }
            notified.await;
        }
    }

    /// Give up on `key` from the reader side.
    ///
    /// A writer waiting in [`wait_until_awaited`](Self::wait_until_awaited)
    /// is released with `false`, and so is one that arrives later. The cell
    /// is dropped right away if it already holds a value, otherwise once the
    /// writer calls [`forget`](Self::forget) or [`set`](Self::set).
    pub fn abandon(&self, key: &K) {
        let cell = {
            let mut cells = self.cells.lock();
            let cell = Self::cell_in(&mut cells, key);
            cell.abandoned.store(true, Ordering::Release);
            if cell.value.get().is_some() {
                cells.remove(key);
            }
            cell
        };
        cell.awaited_set.notify_waiters();
    }

    /// Drop the cell for `key` once the correlating workflow is done with it.
    ///
    /// Readers still suspended on the old cell keep it alive and still
    /// resolve if it gets set.
    pub fn forget(&self, key: &K) -> bool {
        self.cells.lock().remove(key).is_some()
    }

    pub fn is_awaited(&self, key: &K) -> bool {
        self.cells
            .lock()
            .get(key)
            .is_some_and(|cell| cell.awaited.load(Ordering::Acquire))
    }

    /// Number of live cells
    pub fn len(&self) -> usize {
        self.cells.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.lock().is_empty()
    }
}
