//! Mutation construct.
//!
//! A mutation owns exactly one execution manager — no cache-key
//! indirection and no automatic trigger. Work runs only when dispatched,
//! with a caller-supplied payload, and the same derived state as a query
//! is read directly off the manager's cells.

use std::sync::Arc;

use crate::error::CallFailure;
use crate::manager::{AsyncCallback, CallStatus, ExecutionManager, PendingCall};
use crate::store::{AtomReader, Store};

/// Handle to a mutation.
///
/// Built by [`QueryClient::mutation`](crate::client::QueryClient::mutation).
pub struct MutationHandle<R, P = ()>
where
    R: Clone + Send + Sync + 'static,
    P: Send + 'static,
{
    manager: Arc<ExecutionManager<R, P>>,
}

impl<R, P> MutationHandle<R, P>
where
    R: Clone + Send + Sync + 'static,
    P: Send + 'static,
{
    pub(crate) fn new(callback: AsyncCallback<R, P>) -> Self {
        Self {
            manager: Arc::new(ExecutionManager::new(callback)),
        }
    }

    /// Runs the mutation with `payload`, superseding any dispatch still
    /// in flight. Returns the call's future; awaiting it yields the
    /// callback's own result.
    pub fn dispatch(&self, store: &Store, payload: P) -> PendingCall<R> {
        self.manager.call(store, payload)
    }

    /// Aborts the in-flight dispatch, if any.
    pub fn abort(&self, store: &Store) {
        self.manager.abort(store);
    }

    /// Last successful result.
    pub fn data(&self, reader: &impl AtomReader) -> Option<R> {
        reader.get(self.manager.data_cell())
    }

    /// Lifecycle status.
    pub fn status(&self, reader: &impl AtomReader) -> CallStatus {
        reader.get(self.manager.status_cell())
    }

    /// Last failure.
    pub fn error(&self, reader: &impl AtomReader) -> Option<CallFailure> {
        reader.get(self.manager.error_cell())
    }

    /// True during the first dispatch's flight.
    pub fn is_loading(&self, reader: &impl AtomReader) -> bool {
        reader.get(self.manager.is_loading_cell())
    }

    /// True during any dispatch's flight.
    pub fn is_fetching(&self, reader: &impl AtomReader) -> bool {
        reader.get(self.manager.is_fetching_cell())
    }

    /// Future of the most recent dispatch.
    pub fn pending(&self, reader: &impl AtomReader) -> Option<PendingCall<R>> {
        reader.get(self.manager.pending_cell())
    }
}
