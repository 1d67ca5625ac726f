//! Async execution manager.
//!
//! An [`ExecutionManager`] owns the lifecycle of one asynchronous
//! operation: its status, last result, last error, in-flight shared
//! future, and cancellation token. All of that state lives in reactive
//! cells, so observers see every transition.
//!
//! # Call lifecycle
//!
//! [`ExecutionManager::call`] cancels any in-flight call's token, flips
//! the in-flight flags, runs the user callback, and returns a clonable
//! [`PendingCall`] future that resolves with the callback's own result.
//! The very first call reports `Loading`; every later call reports
//! `Fetching`. Cancellation is cooperative: the callback must observe its
//! signal and resolve with [`CallError::Aborted`], which settles the
//! future without touching status or error state.

use std::future::Future;
use std::sync::Arc;
use std::task::Poll;

use futures::future::{BoxFuture, FutureExt, Shared};
use tokio_util::sync::CancellationToken;

use crate::error::{CallError, CallFailure};
use crate::store::{Cell, Store};

/// Result type produced by a call's future.
pub type CallResult<R> = Result<R, CallError>;

/// The async operation a manager executes.
///
/// Invoked with a [`CallContext`] (store access plus the call's
/// cancellation signal) and the dispatch payload.
pub type AsyncCallback<R, P> =
    Arc<dyn Fn(CallContext, P) -> BoxFuture<'static, CallResult<R>> + Send + Sync>;

// =============================================================================
// Call Status
// =============================================================================

/// Lifecycle status of a manager's most recent call.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum CallStatus {
    /// No call has been made (or the last one was explicitly aborted).
    #[default]
    Init,

    /// The first-ever call is in flight.
    Loading,

    /// A subsequent call (or refetch) is in flight.
    Fetching,

    /// The most recent call completed successfully.
    Success,

    /// The most recent call failed.
    Error,
}

impl CallStatus {
    /// Returns true while a call is in flight.
    pub fn is_in_flight(&self) -> bool {
        matches!(self, Self::Loading | Self::Fetching)
    }

    /// Returns true once a call has settled with a result or error.
    pub fn is_settled(&self) -> bool {
        matches!(self, Self::Success | Self::Error)
    }
}

impl std::fmt::Display for CallStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Init => write!(f, "init"),
            Self::Loading => write!(f, "loading"),
            Self::Fetching => write!(f, "fetching"),
            Self::Success => write!(f, "success"),
            Self::Error => write!(f, "error"),
        }
    }
}

// =============================================================================
// Call Context
// =============================================================================

/// Capabilities handed to the user callback.
///
/// Carries untracked store access (the callback may read or write
/// arbitrary other cells as a side channel) and the call's cancellation
/// signal.
#[derive(Clone)]
pub struct CallContext {
    store: Store,
    cancellation: CancellationToken,
}

impl CallContext {
    pub(crate) fn new(store: Store, cancellation: CancellationToken) -> Self {
        Self {
            store,
            cancellation,
        }
    }

    /// Reads a cell from the store.
    pub fn get<T: Clone + Send + Sync + 'static>(&self, cell: &Cell<T>) -> T {
        self.store.get(cell)
    }

    /// Writes a cell in the store.
    pub fn set<T: Clone + Send + Sync + 'static>(&self, cell: &Cell<T>, value: T) {
        self.store.set(cell, value)
    }

    /// The underlying store handle.
    pub fn store(&self) -> &Store {
        &self.store
    }

    /// This call's cancellation signal.
    ///
    /// Await `cancellation().cancelled()` or poll [`Self::is_cancelled`]
    /// and resolve with [`CallError::Aborted`] to honor cancellation.
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancellation
    }

    /// Returns true once this call has been superseded or aborted.
    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }
}

// =============================================================================
// Pending Call
// =============================================================================

/// Clonable future for an in-flight (or settled) call.
///
/// Every clone resolves with the same [`CallResult`]. The manager keeps
/// one clone in its `pending` cell and drives another to completion on
/// the runtime, so state settles even if no caller awaits.
pub struct PendingCall<R: Clone> {
    inner: Shared<BoxFuture<'static, CallResult<R>>>,
}

impl<R: Clone> PendingCall<R> {
    fn new(future: BoxFuture<'static, CallResult<R>>) -> Self {
        Self {
            inner: future.shared(),
        }
    }
}

impl<R: Clone> Clone for PendingCall<R> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<R: Clone> Future for PendingCall<R> {
    type Output = CallResult<R>;

    fn poll(
        self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> Poll<Self::Output> {
        std::pin::Pin::new(&mut self.get_mut().inner).poll(cx)
    }
}

impl<R: Clone> std::fmt::Debug for PendingCall<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingCall")
            .field("settled", &self.inner.peek().is_some())
            .finish()
    }
}

// =============================================================================
// Execution Manager
// =============================================================================

/// State holder for one asynchronous operation, keyed by cache key when
/// reached through the routing layer.
///
/// All observable state lives in cells; the manager itself is immutable
/// and safe to share behind an `Arc`.
pub struct ExecutionManager<R: Clone, P = ()> {
    callback: AsyncCallback<R, P>,
    status: Cell<CallStatus>,
    is_loading: Cell<bool>,
    is_fetching: Cell<bool>,
    is_initialized: Cell<bool>,
    data: Cell<Option<R>>,
    error: Cell<Option<CallFailure>>,
    cancellation: Cell<Option<CancellationToken>>,
    pending: Cell<Option<PendingCall<R>>>,
}

impl<R, P> ExecutionManager<R, P>
where
    R: Clone + Send + Sync + 'static,
    P: Send + 'static,
{
    /// Creates a manager bound to `callback`.
    pub fn new(callback: AsyncCallback<R, P>) -> Self {
        Self {
            callback,
            status: Cell::new(CallStatus::Init),
            is_loading: Cell::new(false),
            is_fetching: Cell::new(false),
            is_initialized: Cell::new(false),
            data: Cell::new(None),
            error: Cell::new(None),
            cancellation: Cell::new(None),
            pending: Cell::new(None),
        }
    }

    /// Creates a manager from a plain async closure.
    pub fn from_fn<F, Fut>(callback: F) -> Self
    where
        F: Fn(CallContext, P) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = CallResult<R>> + Send + 'static,
    {
        Self::new(Arc::new(move |context, payload| {
            callback(context, payload).boxed()
        }))
    }

    /// Starts a call.
    ///
    /// May be invoked while a previous call is still in flight; the
    /// previous call's token is cancelled first (best-effort, not
    /// awaited). Must be invoked within a tokio runtime: the call's
    /// future is driven by a spawned task so state settles even when the
    /// returned [`PendingCall`] is dropped unawaited.
    pub fn call(&self, store: &Store, payload: P) -> PendingCall<R> {
        if let Some(previous) = store.get(&self.cancellation) {
            previous.cancel();
        }

        store.set(&self.is_fetching, true);
        store.set(&self.error, None);

        let initialized = store.get(&self.is_initialized);
        if !initialized {
            store.set(&self.is_loading, true);
            store.set(&self.status, CallStatus::Loading);
        } else {
            store.set(&self.status, CallStatus::Fetching);
        }

        let token = CancellationToken::new();
        store.set(&self.cancellation, Some(token.clone()));
        tracing::debug!(initialized, "call started");

        let context = CallContext::new(store.clone(), token.child_token());
        let future = (self.callback)(context, payload);

        let settle = SettleState {
            store: store.clone(),
            status: self.status.clone(),
            is_loading: self.is_loading.clone(),
            is_fetching: self.is_fetching.clone(),
            is_initialized: self.is_initialized.clone(),
            data: self.data.clone(),
            error: self.error.clone(),
            initialized,
        };
        let pending = PendingCall::new(
            async move {
                let result = future.await;
                settle.apply(&result);
                result
            }
            .boxed(),
        );

        store.set(&self.pending, Some(pending.clone()));

        let driver = pending.clone();
        tokio::spawn(async move {
            let _ = driver.await;
        });

        pending
    }

    /// Aborts the in-flight call, if any.
    ///
    /// Cancels the current token and forces the status back to `Init`
    /// with both flags cleared. `is_initialized` is deliberately left
    /// alone: a later call still reports `Fetching`, not `Loading`.
    /// No-op when no token has ever been set.
    pub fn abort(&self, store: &Store) {
        let Some(token) = store.get(&self.cancellation) else {
            return;
        };
        token.cancel();
        store.set(&self.status, CallStatus::Init);
        store.set(&self.is_fetching, false);
        store.set(&self.is_loading, false);
        tracing::debug!("call aborted");
    }

    /// Cell holding the lifecycle status.
    pub fn status_cell(&self) -> &Cell<CallStatus> {
        &self.status
    }

    /// Cell that is true only during the very first call's flight.
    pub fn is_loading_cell(&self) -> &Cell<bool> {
        &self.is_loading
    }

    /// Cell that is true during any call's flight.
    pub fn is_fetching_cell(&self) -> &Cell<bool> {
        &self.is_fetching
    }

    /// Cell that latches true after the first successful completion.
    pub fn is_initialized_cell(&self) -> &Cell<bool> {
        &self.is_initialized
    }

    /// Cell holding the last successful result.
    pub fn data_cell(&self) -> &Cell<Option<R>> {
        &self.data
    }

    /// Cell holding the last normalized failure.
    pub fn error_cell(&self) -> &Cell<Option<CallFailure>> {
        &self.error
    }

    /// Cell holding the most recent call's future.
    pub fn pending_cell(&self) -> &Cell<Option<PendingCall<R>>> {
        &self.pending
    }

    #[cfg(test)]
    pub(crate) fn cancellation_cell(&self) -> &Cell<Option<CancellationToken>> {
        &self.cancellation
    }
}

/// Cells a finished call writes back into, captured at call start.
struct SettleState<R: Clone> {
    store: Store,
    status: Cell<CallStatus>,
    is_loading: Cell<bool>,
    is_fetching: Cell<bool>,
    is_initialized: Cell<bool>,
    data: Cell<Option<R>>,
    error: Cell<Option<CallFailure>>,
    // Whether the manager was initialized when the call started; decides
    // the loading-flag teardown and the first-success latch.
    initialized: bool,
}

impl<R: Clone + Send + Sync + 'static> SettleState<R> {
    fn apply(&self, result: &CallResult<R>) {
        match result {
            Ok(value) => {
                self.store.set(&self.data, Some(value.clone()));
                self.store.set(&self.status, CallStatus::Success);
                if !self.initialized {
                    self.store.set(&self.is_initialized, true);
                }
                tracing::debug!("call succeeded");
            }
            // An aborted call is not an error: leave status and error
            // state for the superseding call to own.
            Err(CallError::Aborted) => {
                tracing::debug!("call settled as aborted");
            }
            Err(CallError::Failed(failure)) => {
                self.store.set(&self.error, Some(failure.clone()));
                self.store.set(&self.status, CallStatus::Error);
                tracing::debug!(error = %failure, "call failed");
            }
        }
        self.store.set(&self.is_fetching, false);
        if !self.initialized {
            self.store.set(&self.is_loading, false);
        }
    }
}
