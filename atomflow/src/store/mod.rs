//! Reactive cell store.
//!
//! This module provides the state container the rest of the crate builds
//! on: typed [`Cell`]s holding clonable values, a [`Store`] with get/set
//! semantics, and synchronous change notification. Reads through an
//! [`EffectScope`] are dependency-tracked so [`Effect`]s re-run when the
//! cells they touched change.
//!
//! # Notification model
//!
//! Writes notify watchers synchronously on the writing thread, after the
//! value is stored and with no internal locks held. Watchers must not
//! write cells they themselves watch; an effect that retriggers itself
//! while running is suppressed rather than re-entered.

mod effect;

pub use effect::{Effect, EffectScope};

use std::any::Any;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;

/// Identifier of a cell, unique within the process.
pub type CellId = u64;

/// Identifier of a registered watcher.
pub(crate) type WatcherId = u64;

static NEXT_CELL_ID: AtomicU64 = AtomicU64::new(1);

/// A typed reactive value slot.
///
/// A `Cell` is a handle, not storage: the value lives in whichever
/// [`Store`] it is read or written through. Until first written, reads
/// return a clone of the initial value the cell was declared with.
/// Cloning a `Cell` clones the handle; both clones address the same slot.
pub struct Cell<T> {
    id: CellId,
    initial: T,
}

impl<T: Clone + Send + Sync + 'static> Cell<T> {
    /// Declares a new cell with the given initial value.
    pub fn new(initial: T) -> Self {
        Self {
            id: NEXT_CELL_ID.fetch_add(1, Ordering::Relaxed),
            initial,
        }
    }

    /// The cell's unique identifier.
    pub fn id(&self) -> CellId {
        self.id
    }
}

impl<T: Clone> Clone for Cell<T> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            initial: self.initial.clone(),
        }
    }
}

impl<T> fmt::Debug for Cell<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cell").field("id", &self.id).finish()
    }
}

/// Read access to cells.
///
/// Implemented by [`Store`] (plain reads) and [`EffectScope`] (reads that
/// register the cell as a dependency of the running effect). Code that
/// should work in both positions takes `&impl AtomReader`.
pub trait AtomReader {
    /// Returns the current value of `cell`.
    fn get<T: Clone + Send + Sync + 'static>(&self, cell: &Cell<T>) -> T;
}

struct Watcher {
    id: WatcherId,
    notify: Arc<dyn Fn(&Store) + Send + Sync>,
}

struct StoreInner {
    values: DashMap<CellId, Arc<dyn Any + Send + Sync>>,
    watchers: DashMap<CellId, Vec<Watcher>>,
    next_watcher_id: AtomicU64,
}

/// The reactive state container.
///
/// Cheaply clonable; all clones share the same state. Values are stored
/// type-erased and keyed by cell id.
#[derive(Clone)]
pub struct Store {
    inner: Arc<StoreInner>,
}

impl Store {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(StoreInner {
                values: DashMap::new(),
                watchers: DashMap::new(),
                next_watcher_id: AtomicU64::new(1),
            }),
        }
    }

    /// Returns the current value of `cell`, or a clone of its initial
    /// value if it has never been written in this store.
    pub fn get<T: Clone + Send + Sync + 'static>(&self, cell: &Cell<T>) -> T {
        match self.inner.values.get(&cell.id) {
            Some(entry) => match entry.value().clone().downcast::<T>() {
                Ok(value) => (*value).clone(),
                // A cell id is bound to one type at declaration, so this
                // arm is unreachable unless ids are forged.
                Err(_) => cell.initial.clone(),
            },
            None => cell.initial.clone(),
        }
    }

    /// Writes `value` into `cell` and synchronously notifies watchers.
    pub fn set<T: Clone + Send + Sync + 'static>(&self, cell: &Cell<T>, value: T) {
        self.inner.values.insert(cell.id, Arc::new(value));
        self.notify(cell.id);
    }

    /// Registers `callback` to run whenever `cell` is written.
    ///
    /// The subscription stays active until explicitly removed via
    /// [`Subscription::unsubscribe`].
    pub fn subscribe<T: Clone + Send + Sync + 'static>(
        &self,
        cell: &Cell<T>,
        callback: impl Fn(&Store) + Send + Sync + 'static,
    ) -> Subscription {
        let watcher = self.add_watcher(cell.id, callback);
        Subscription {
            store: self.clone(),
            cell: cell.id,
            watcher,
        }
    }

    pub(crate) fn add_watcher(
        &self,
        cell: CellId,
        callback: impl Fn(&Store) + Send + Sync + 'static,
    ) -> WatcherId {
        let id = self.inner.next_watcher_id.fetch_add(1, Ordering::Relaxed);
        self.inner.watchers.entry(cell).or_default().push(Watcher {
            id,
            notify: Arc::new(callback),
        });
        id
    }

    pub(crate) fn remove_watcher(&self, cell: CellId, id: WatcherId) {
        if let Some(mut list) = self.inner.watchers.get_mut(&cell) {
            list.retain(|w| w.id != id);
        }
    }

    fn notify(&self, cell: CellId) {
        // Clone the callback list and release the map guard before
        // invoking: watchers may re-register themselves on this cell.
        let callbacks: Vec<_> = match self.inner.watchers.get(&cell) {
            Some(list) => list.iter().map(|w| Arc::clone(&w.notify)).collect(),
            None => return,
        };
        for callback in callbacks {
            callback(self);
        }
    }
}

impl Default for Store {
    fn default() -> Self {
        Self::new()
    }
}

impl AtomReader for Store {
    fn get<T: Clone + Send + Sync + 'static>(&self, cell: &Cell<T>) -> T {
        Store::get(self, cell)
    }
}

impl fmt::Debug for Store {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Store")
            .field("cells", &self.inner.values.len())
            .finish()
    }
}

/// Handle to an active [`Store::subscribe`] registration.
pub struct Subscription {
    store: Store,
    cell: CellId,
    watcher: WatcherId,
}

impl Subscription {
    /// Removes the subscription; the callback will not run again.
    pub fn unsubscribe(self) {
        self.store.remove_watcher(self.cell, self.watcher);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn get_returns_initial_before_first_write() {
        let store = Store::new();
        let cell = Cell::new(41);

        assert_eq!(store.get(&cell), 41);
    }

    #[test]
    fn set_then_get_round_trips() {
        let store = Store::new();
        let cell = Cell::new(String::new());

        store.set(&cell, "hello".to_string());

        assert_eq!(store.get(&cell), "hello");
    }

    #[test]
    fn values_are_scoped_to_a_store() {
        let store_a = Store::new();
        let store_b = Store::new();
        let cell = Cell::new(0);

        store_a.set(&cell, 7);

        assert_eq!(store_a.get(&cell), 7);
        assert_eq!(store_b.get(&cell), 0);
    }

    #[test]
    fn cloned_cells_address_the_same_slot() {
        let store = Store::new();
        let cell = Cell::new(0);
        let alias = cell.clone();

        store.set(&cell, 5);

        assert_eq!(store.get(&alias), 5);
    }

    #[test]
    fn subscribe_runs_on_every_write() {
        let store = Store::new();
        let cell = Cell::new(0);
        let hits = Arc::new(AtomicUsize::new(0));

        let hits_clone = hits.clone();
        let _sub = store.subscribe(&cell, move |_| {
            hits_clone.fetch_add(1, Ordering::SeqCst);
        });

        store.set(&cell, 1);
        store.set(&cell, 2);

        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn unsubscribe_stops_notifications() {
        let store = Store::new();
        let cell = Cell::new(0);
        let hits = Arc::new(AtomicUsize::new(0));

        let hits_clone = hits.clone();
        let sub = store.subscribe(&cell, move |_| {
            hits_clone.fetch_add(1, Ordering::SeqCst);
        });

        store.set(&cell, 1);
        sub.unsubscribe();
        store.set(&cell, 2);

        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn watcher_can_read_the_store_it_was_notified_by() {
        let store = Store::new();
        let source = Cell::new(0);
        let mirror = Cell::new(0);

        let source_clone = source.clone();
        let mirror_clone = mirror.clone();
        let _sub = store.subscribe(&source, move |store| {
            let value = store.get(&source_clone);
            store.set(&mirror_clone, value * 2);
        });

        store.set(&source, 21);

        assert_eq!(store.get(&mirror), 42);
    }
}
