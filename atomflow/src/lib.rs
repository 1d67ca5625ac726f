//! atomflow - async query/mutation state over reactive cells
//!
//! This library wraps asynchronous operations with derived reactive
//! status flags (loading/fetching/success/error), result caching keyed
//! by a dynamic cache key, and cooperative cancellation.
//!
//! # High-Level API
//!
//! Build a [`client::QueryClient`] and declare queries and mutations
//! against it:
//!
//! ```ignore
//! use atomflow::client::QueryClient;
//! use atomflow::query::QueryOptions;
//!
//! let client = QueryClient::new();
//! let user = client.query(
//!     |ctx| async move { fetch_user(ctx.cancellation()).await },
//!     QueryOptions::new().label("user"),
//! );
//!
//! // The first fetch starts as soon as the cache key resolves.
//! let value = user.pending(client.store()).unwrap().await?;
//! ```

pub mod cache;
pub mod client;
pub mod config;
pub mod error;
pub mod id;
pub mod key;
pub mod manager;
pub mod mutation;
pub mod query;
pub mod routing;
pub mod store;

pub use cache::{CacheStats, ManagerCache};
pub use client::QueryClient;
pub use config::ClientConfig;
pub use error::{CallError, CallFailure};
pub use key::{CacheKey, CacheKeyResolver, KeySegment, KeyState};
pub use manager::{CallContext, CallResult, CallStatus, ExecutionManager, PendingCall};
pub use mutation::MutationHandle;
pub use query::{QueryHandle, QueryOptions};
pub use store::{AtomReader, Cell, Effect, Store, Subscription};

/// Version of the atomflow library.
///
/// Defined in `Cargo.toml` and injected at compile time.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
