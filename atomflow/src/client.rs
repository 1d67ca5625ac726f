//! Client facade.
//!
//! [`QueryClient`] is the wiring root: it owns the reactive store and a
//! single bounded manager cache, and builds queries and mutations against
//! them. Tests (and applications that want isolation) construct their
//! own client; nothing in the crate is process-global.

use std::future::Future;
use std::sync::Arc;

use futures::future::FutureExt;

use crate::cache::ManagerCache;
use crate::config::ClientConfig;
use crate::manager::{AsyncCallback, CallContext, CallResult};
use crate::mutation::MutationHandle;
use crate::query::{QueryHandle, QueryOptions};
use crate::store::Store;

/// Owns the store and manager cache; builds queries and mutations.
///
/// Cheap to clone is not a goal — share it behind whatever the
/// application already uses for wiring. All queries built from one
/// client share its cache and therefore its capacity bound.
pub struct QueryClient {
    store: Store,
    cache: Arc<ManagerCache>,
}

impl QueryClient {
    /// Creates a client with the default configuration.
    pub fn new() -> Self {
        Self::with_config(ClientConfig::default())
    }

    /// Creates a client from `config`.
    pub fn with_config(config: ClientConfig) -> Self {
        Self {
            store: Store::new(),
            cache: Arc::new(ManagerCache::new(config.cache_capacity)),
        }
    }

    /// The client's reactive store.
    pub fn store(&self) -> &Store {
        &self.store
    }

    /// The client's manager cache, for capacity and stats inspection.
    pub fn cache(&self) -> &Arc<ManagerCache> {
        &self.cache
    }

    /// Builds a query.
    ///
    /// The query starts fetching as soon as its cache key resolves; with
    /// default options the key is synthesized and the first fetch begins
    /// immediately. Must be called within a tokio runtime.
    pub fn query<R, F, Fut>(&self, callback: F, options: QueryOptions) -> QueryHandle<R>
    where
        R: Clone + Send + Sync + 'static,
        F: Fn(CallContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = CallResult<R>> + Send + 'static,
    {
        let callback: AsyncCallback<R, ()> =
            Arc::new(move |context, _payload: ()| callback(context).boxed());
        QueryHandle::new(&self.store, Arc::clone(&self.cache), callback, options)
    }

    /// Builds a mutation.
    ///
    /// Nothing runs until [`MutationHandle::dispatch`] is invoked.
    pub fn mutation<R, P, F, Fut>(&self, callback: F) -> MutationHandle<R, P>
    where
        R: Clone + Send + Sync + 'static,
        P: Send + 'static,
        F: Fn(CallContext, P) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = CallResult<R>> + Send + 'static,
    {
        let callback: AsyncCallback<R, P> =
            Arc::new(move |context, payload| callback(context, payload).boxed());
        MutationHandle::new(callback)
    }
}

impl Default for QueryClient {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for QueryClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryClient")
            .field("cache", &self.cache)
            .finish()
    }
}
