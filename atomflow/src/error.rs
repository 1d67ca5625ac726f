//! Error types for call execution.
//!
//! Failures fall into two categories: cancellation (a benign race outcome,
//! never surfaced as an error state) and callback failures, which are
//! normalized into a uniform representation before being published to
//! reactive observers. Callers awaiting a call still receive the exact
//! error value.

use std::fmt;
use std::sync::Arc;

use thiserror::Error;

/// Error returned by a call's future.
///
/// `Aborted` is the distinguished cancellation identity: a callback that
/// observes its cancellation signal should resolve with it. An aborted
/// call rejects its awaiters but leaves the manager's status and error
/// state untouched.
#[derive(Debug, Clone, Error)]
pub enum CallError {
    /// The call was cancelled via its cancellation signal.
    #[error("call aborted")]
    Aborted,

    /// The callback failed with a real error.
    #[error(transparent)]
    Failed(#[from] CallFailure),
}

impl CallError {
    /// Builds a callback failure from a plain message.
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(CallFailure::new(message))
    }

    /// Wraps an arbitrary error as a callback failure, keeping it as the
    /// source for error-chain inspection.
    pub fn wrap<E>(source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Failed(CallFailure::with_source(source))
    }

    /// Returns true if this error is the cancellation identity.
    pub fn is_aborted(&self) -> bool {
        matches!(self, Self::Aborted)
    }
}

/// Uniform representation of a callback failure.
///
/// Holds a display message and, when wrapping a concrete error, the
/// original error as source. Clonable so it can live inside a shared
/// call future and in reactive state at the same time.
#[derive(Debug, Clone)]
pub struct CallFailure {
    message: String,
    source: Option<Arc<dyn std::error::Error + Send + Sync>>,
}

impl CallFailure {
    /// Creates a failure from a message, with no underlying source.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            source: None,
        }
    }

    /// Creates a failure wrapping a concrete error.
    ///
    /// The message is taken from the error's `Display` output.
    pub fn with_source<E>(source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self {
            message: source.to_string(),
            source: Some(Arc::new(source)),
        }
    }

    /// The failure message.
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for CallFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for CallFailure {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_deref()
            .map(|e| e as &(dyn std::error::Error + 'static))
    }
}

impl From<String> for CallFailure {
    fn from(message: String) -> Self {
        Self::new(message)
    }
}

impl From<&str> for CallFailure {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}
