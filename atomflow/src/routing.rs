//! Execution routing.
//!
//! A [`ManagerRouter`] bridges the resolved cache-key cell to a manager
//! held in the bounded cache. Dependents read manager sub-state through
//! [`ManagerRouter::select`] (with a fallback while no key is resolved)
//! and act on the manager through [`ManagerRouter::dispatch`] (a silent
//! skip while no key is resolved). When read through an effect scope,
//! both register the resolved-key cell as a dependency, so dependents
//! re-derive whenever the key changes.

use std::sync::Arc;

use crate::cache::ManagerCache;
use crate::manager::{AsyncCallback, ExecutionManager};
use crate::store::{AtomReader, Cell};

/// Routes the currently resolved cache key to its cached manager.
///
/// The cache instance is supplied by the caller; routers built by the
/// same client share one cache and therefore one capacity bound.
pub struct ManagerRouter<R, P = ()> {
    resolved: Cell<Option<String>>,
    cache: Arc<ManagerCache>,
    callback: AsyncCallback<R, P>,
}

impl<R, P> ManagerRouter<R, P>
where
    R: Clone + Send + Sync + 'static,
    P: Send + 'static,
{
    /// Creates a router over `resolved`, backed by `cache`.
    ///
    /// `callback` seeds managers created for keys this router resolves;
    /// a manager that already exists for a key keeps the callback it was
    /// created with.
    pub fn new(
        resolved: Cell<Option<String>>,
        cache: Arc<ManagerCache>,
        callback: AsyncCallback<R, P>,
    ) -> Self {
        Self {
            resolved,
            cache,
            callback,
        }
    }

    /// The manager for the currently resolved key, or `None` while the
    /// key is unresolved. Creates the manager lazily on first access.
    pub fn manager(&self, reader: &impl AtomReader) -> Option<Arc<ExecutionManager<R, P>>> {
        let key = reader.get(&self.resolved)?;
        let callback = self.callback.clone();
        Some(
            self.cache
                .get_or_create(&key, move || ExecutionManager::new(callback)),
        )
    }

    /// Reads `selector`'s cell on the resolved manager, or `fallback`
    /// while no key is resolved.
    pub fn select<T, F>(&self, reader: &impl AtomReader, selector: F, fallback: T) -> T
    where
        T: Clone + Send + Sync + 'static,
        F: for<'m> Fn(&'m ExecutionManager<R, P>) -> &'m Cell<T>,
    {
        match self.manager(reader) {
            Some(manager) => reader.get(selector(&manager)),
            None => fallback,
        }
    }

    /// Runs `action` against the resolved manager, or skips silently
    /// (returning `None`) while no key is resolved.
    pub fn dispatch<T>(
        &self,
        reader: &impl AtomReader,
        action: impl FnOnce(&ExecutionManager<R, P>) -> T,
    ) -> Option<T> {
        let manager = self.manager(reader)?;
        Some(action(&manager))
    }
}
