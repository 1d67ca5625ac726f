//! Query construct.
//!
//! A query wraps an async operation with a reactive cache key: whenever
//! the resolved key becomes available or changes, the query triggers a
//! call on the manager cached under that key. Derived state (`data`,
//! `status`, `error`, the flight flags, the pending future) is read
//! through the routing layer with fallbacks while the key is unresolved.
//!
//! Queries are built by [`QueryClient::query`](crate::client::QueryClient::query)
//! and begin fetching as soon as their key resolves — for a query without
//! a key source, immediately at construction.

use std::sync::Arc;

use crate::cache::ManagerCache;
use crate::error::CallFailure;
use crate::key::{CacheKeyResolver, KeyState};
use crate::manager::{AsyncCallback, CallStatus, ExecutionManager, PendingCall};
use crate::routing::ManagerRouter;
use crate::store::{AtomReader, Cell, Effect, Store};

/// Options for building a query.
#[derive(Default)]
pub struct QueryOptions {
    cache_key: Option<Cell<KeyState>>,
    label: Option<String>,
}

impl QueryOptions {
    /// Default options: synthesized unique cache key, no label.
    pub fn new() -> Self {
        Self::default()
    }

    /// Uses `source` as the reactive cache-key source.
    pub fn cache_key(mut self, source: Cell<KeyState>) -> Self {
        self.cache_key = Some(source);
        self
    }

    /// Labels the query in log output.
    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }
}

/// Handle to a running query.
///
/// Accessors take any [`AtomReader`]: pass the store for plain reads, or
/// an effect scope to make the surrounding effect re-run when the value
/// (or the resolved key behind it) changes.
pub struct QueryHandle<R: Clone + Send + Sync + 'static> {
    router: Arc<ManagerRouter<R, ()>>,
    resolver: CacheKeyResolver,
    trigger: Effect,
    label: Option<String>,
}

impl<R: Clone + Send + Sync + 'static> QueryHandle<R> {
    pub(crate) fn new(
        store: &Store,
        cache: Arc<ManagerCache>,
        callback: AsyncCallback<R, ()>,
        options: QueryOptions,
    ) -> Self {
        let resolver = CacheKeyResolver::new(store, options.cache_key);
        let router = Arc::new(ManagerRouter::new(
            resolver.resolved_cell().clone(),
            cache,
            callback,
        ));

        // Refetch whenever the resolved key appears or changes; while the
        // key is unresolved the dispatch skips and nothing runs.
        let trigger = Effect::new(store, {
            let router = Arc::clone(&router);
            let label = options.label.clone();
            move |scope| {
                let store = scope.store().clone();
                let dispatched = router.dispatch(&*scope, |manager| manager.call(&store, ()));
                if dispatched.is_some() {
                    tracing::debug!(label = label.as_deref().unwrap_or("query"), "query triggered");
                }
            }
        });

        Self {
            router,
            resolver,
            trigger,
            label: options.label,
        }
    }

    /// Last successful result, `None` while unresolved or before the
    /// first success.
    pub fn data(&self, reader: &impl AtomReader) -> Option<R> {
        self.router.select(reader, ExecutionManager::data_cell, None)
    }

    /// Lifecycle status, `Init` while the key is unresolved.
    pub fn status(&self, reader: &impl AtomReader) -> CallStatus {
        self.router
            .select(reader, ExecutionManager::status_cell, CallStatus::Init)
    }

    /// Last failure, `None` while unresolved or after a clean call.
    pub fn error(&self, reader: &impl AtomReader) -> Option<CallFailure> {
        self.router.select(reader, ExecutionManager::error_cell, None)
    }

    /// True during the first call's flight; also true while the key is
    /// still unresolved (the first load has not finished).
    pub fn is_loading(&self, reader: &impl AtomReader) -> bool {
        self.router
            .select(reader, ExecutionManager::is_loading_cell, true)
    }

    /// True during any call's flight; also true while the key is still
    /// unresolved.
    pub fn is_fetching(&self, reader: &impl AtomReader) -> bool {
        self.router
            .select(reader, ExecutionManager::is_fetching_cell, true)
    }

    /// Future of the most recent call, `None` while unresolved or before
    /// the first call.
    pub fn pending(&self, reader: &impl AtomReader) -> Option<PendingCall<R>> {
        self.router
            .select(reader, ExecutionManager::pending_cell, None)
    }

    /// Starts a fresh call on the current manager, superseding any call
    /// in flight. Skipped (returning `None`) while the key is unresolved.
    pub fn refetch(&self, store: &Store) -> Option<PendingCall<R>> {
        tracing::debug!(label = self.label.as_deref().unwrap_or("query"), "refetch requested");
        self.router.dispatch(store, |manager| manager.call(store, ()))
    }

    /// Aborts the in-flight call, if any. Skipped while unresolved.
    pub fn abort(&self, store: &Store) {
        self.router.dispatch(store, |manager| manager.abort(store));
    }

    /// Stops the query: the key resolver and the refetch trigger are
    /// disposed and the resolved key resets to `None`. Cached manager
    /// state is untouched (it lives in the cache until evicted).
    pub fn detach(&self) {
        self.trigger.dispose();
        self.resolver.dispose();
    }
}
