//! Dependency-tracked reactive effects.
//!
//! An [`Effect`] runs a body against an [`EffectScope`], records which
//! cells the body read, and re-runs whenever any of them is written.
//! Before each re-run (and on dispose) the cleanup registered by the
//! previous run executes. Lifecycle is explicit: effects start when
//! constructed and stop only when [`Effect::dispose`] is called.

use std::sync::{Arc, Mutex};

use super::{AtomReader, Cell, CellId, Store, WatcherId};

type EffectBody = Box<dyn FnMut(&mut EffectScope<'_>) + Send>;
type CleanupFn = Box<dyn FnOnce(&Store) + Send>;

/// Tracked view of a [`Store`] handed to an effect body.
///
/// Reads through the scope register dependencies; writes are plain
/// untracked store writes. The body may register one cleanup closure,
/// which runs before the next re-run and on dispose.
pub struct EffectScope<'a> {
    store: &'a Store,
    deps: Mutex<Vec<CellId>>,
    cleanup: Option<CleanupFn>,
}

impl<'a> EffectScope<'a> {
    fn new(store: &'a Store) -> Self {
        Self {
            store,
            deps: Mutex::new(Vec::new()),
            cleanup: None,
        }
    }

    /// Writes `value` into `cell` without registering a dependency.
    pub fn set<T: Clone + Send + Sync + 'static>(&self, cell: &Cell<T>, value: T) {
        self.store.set(cell, value);
    }

    /// The underlying store, for untracked access and for cloning into
    /// spawned work.
    pub fn store(&self) -> &Store {
        self.store
    }

    /// Registers a cleanup closure for this run.
    ///
    /// Runs before the effect's next re-run, or on dispose. A later call
    /// replaces an earlier one within the same run.
    pub fn on_cleanup(&mut self, cleanup: impl FnOnce(&Store) + Send + 'static) {
        self.cleanup = Some(Box::new(cleanup));
    }

    fn finish(self) -> (Vec<CellId>, Option<CleanupFn>) {
        let mut deps = self.deps.into_inner().unwrap_or_default();
        deps.sort_unstable();
        deps.dedup();
        (deps, self.cleanup)
    }
}

impl AtomReader for EffectScope<'_> {
    fn get<T: Clone + Send + Sync + 'static>(&self, cell: &Cell<T>) -> T {
        if let Ok(mut deps) = self.deps.lock() {
            deps.push(cell.id());
        }
        self.store.get(cell)
    }
}

struct EffectState {
    // Taken out of the state while the body runs; a notification arriving
    // mid-run (the body writing one of its own dependencies) finds it
    // absent and is suppressed instead of recursing.
    body: Option<EffectBody>,
    cleanup: Option<CleanupFn>,
    watchers: Vec<(CellId, WatcherId)>,
    disposed: bool,
}

struct EffectInner {
    store: Store,
    state: Mutex<EffectState>,
}

/// A running reactive effect.
///
/// The body runs once at construction and again after any tracked cell
/// changes. Dropping the handle does not stop the effect; call
/// [`Effect::dispose`].
pub struct Effect {
    inner: Arc<EffectInner>,
}

impl Effect {
    /// Starts an effect on `store`, running `body` immediately.
    pub fn new(store: &Store, body: impl FnMut(&mut EffectScope<'_>) + Send + 'static) -> Self {
        let inner = Arc::new(EffectInner {
            store: store.clone(),
            state: Mutex::new(EffectState {
                body: Some(Box::new(body)),
                cleanup: None,
                watchers: Vec::new(),
                disposed: false,
            }),
        });
        EffectInner::run(&inner);
        Self { inner }
    }

    /// Stops the effect: unregisters all watchers and runs the pending
    /// cleanup. Idempotent.
    pub fn dispose(&self) {
        let (watchers, cleanup) = {
            let mut state = match self.inner.state.lock() {
                Ok(state) => state,
                Err(_) => return,
            };
            if state.disposed {
                return;
            }
            state.disposed = true;
            state.body = None;
            (std::mem::take(&mut state.watchers), state.cleanup.take())
        };
        for (cell, id) in watchers {
            self.inner.store.remove_watcher(cell, id);
        }
        if let Some(cleanup) = cleanup {
            cleanup(&self.inner.store);
        }
    }
}

impl EffectInner {
    fn run(this: &Arc<Self>) {
        // Detach from the previous run's dependencies before re-running.
        let (mut body, cleanup, old_watchers) = {
            let mut state = match this.state.lock() {
                Ok(state) => state,
                Err(_) => return,
            };
            if state.disposed {
                return;
            }
            let Some(body) = state.body.take() else {
                return;
            };
            (
                body,
                state.cleanup.take(),
                std::mem::take(&mut state.watchers),
            )
        };
        for (cell, id) in old_watchers {
            this.store.remove_watcher(cell, id);
        }
        if let Some(cleanup) = cleanup {
            cleanup(&this.store);
        }

        let mut scope = EffectScope::new(&this.store);
        body(&mut scope);
        let (deps, cleanup) = scope.finish();

        let mut state = match this.state.lock() {
            Ok(state) => state,
            Err(_) => return,
        };
        if state.disposed {
            // Disposed while the body ran: honor the new cleanup and stay
            // detached.
            drop(state);
            if let Some(cleanup) = cleanup {
                cleanup(&this.store);
            }
            return;
        }
        state.body = Some(body);
        state.cleanup = cleanup;
        for dep in deps {
            let weak = Arc::downgrade(this);
            let watcher = this.store.add_watcher(dep, move |_| {
                if let Some(inner) = weak.upgrade() {
                    EffectInner::run(&inner);
                }
            });
            state.watchers.push((dep, watcher));
        }
    }
}
