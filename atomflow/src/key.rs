//! Cache key derivation.
//!
//! A cache key is an ordered sequence of string/number segments joined
//! with `.` into the string the manager cache is indexed by. The key
//! source is reactive and may hold either a ready key or a future of
//! one; [`CacheKeyResolver`] tracks the source and publishes the joined
//! string into a resolved cell, or `None` while nothing is resolved yet.
//! Queries built without a key source get a process-unique default key,
//! synthesized once per resolver.

use std::fmt;

use futures::future::{BoxFuture, FutureExt, Shared};

use crate::id::unique_id;
use crate::store::{AtomReader, Cell, Effect, EffectScope, Store};

/// Prefix of synthesized default cache keys.
pub const DEFAULT_KEY_PREFIX: &str = "__default__";

/// One segment of a cache key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum KeySegment {
    /// Textual segment.
    Text(String),
    /// Numeric segment.
    Number(i64),
}

impl fmt::Display for KeySegment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text(text) => write!(f, "{text}"),
            Self::Number(number) => write!(f, "{number}"),
        }
    }
}

impl From<&str> for KeySegment {
    fn from(text: &str) -> Self {
        Self::Text(text.to_string())
    }
}

impl From<String> for KeySegment {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

impl From<i32> for KeySegment {
    fn from(number: i32) -> Self {
        Self::Number(i64::from(number))
    }
}

impl From<i64> for KeySegment {
    fn from(number: i64) -> Self {
        Self::Number(number)
    }
}

impl From<u32> for KeySegment {
    fn from(number: u32) -> Self {
        Self::Number(i64::from(number))
    }
}

/// An ordered sequence of key segments identifying a logical query target.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CacheKey(Vec<KeySegment>);

impl CacheKey {
    /// Creates an empty key.
    pub fn new() -> Self {
        Self(Vec::new())
    }

    /// Appends a segment, chainable.
    pub fn segment(mut self, segment: impl Into<KeySegment>) -> Self {
        self.0.push(segment.into());
        self
    }

    /// Joins the segments with `.` into the cache index string.
    pub fn to_key_string(&self) -> String {
        self.0
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(".")
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_key_string())
    }
}

impl From<Vec<KeySegment>> for CacheKey {
    fn from(segments: Vec<KeySegment>) -> Self {
        Self(segments)
    }
}

/// Clonable future of a cache key, for asynchronous key sources.
pub type SharedKeyFuture = Shared<BoxFuture<'static, CacheKey>>;

/// Value of a reactive cache-key source cell.
#[derive(Clone)]
pub enum KeyState {
    /// The key is available now.
    Ready(CacheKey),
    /// The key is still being produced.
    Pending(SharedKeyFuture),
}

impl KeyState {
    /// Wraps a ready key.
    pub fn ready(key: CacheKey) -> Self {
        Self::Ready(key)
    }

    /// Wraps a future producing the key.
    pub fn pending(
        future: impl std::future::Future<Output = CacheKey> + Send + 'static,
    ) -> Self {
        Self::Pending(future.boxed().shared())
    }
}

impl fmt::Debug for KeyState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ready(key) => f.debug_tuple("Ready").field(key).finish(),
            Self::Pending(_) => f.write_str("Pending"),
        }
    }
}

/// Outcome of deriving a key string from one key-source value.
///
/// Pure: no store access, no side effects. The resolver applies the
/// reactive plumbing around it.
pub enum KeyResolution {
    /// The key string is available now.
    Resolved(String),
    /// The string will be available once this future settles.
    Pending(SharedKeyFuture),
}

impl KeyResolution {
    /// Derives the resolution for a key-source value.
    pub fn resolve(state: &KeyState) -> Self {
        match state {
            KeyState::Ready(key) => Self::Resolved(key.to_key_string()),
            KeyState::Pending(future) => Self::Pending(future.clone()),
        }
    }
}

/// Reactive resolver publishing the current cache-key string.
///
/// While the source is unresolved (a pending future, or the resolver has
/// been disposed) the resolved cell holds `None` and no manager lookup
/// should be attempted.
pub struct CacheKeyResolver {
    resolved: Cell<Option<String>>,
    effect: Effect,
}

impl CacheKeyResolver {
    /// Starts resolving `source`, or synthesizes a stable default key
    /// when no source is given.
    ///
    /// Requires a tokio runtime when the source can hold pending keys:
    /// their publication is awaited on a spawned task. If the source
    /// changes again before a pending key settles, the stale publication
    /// still lands when it does; the last write observed wins.
    pub fn new(store: &Store, source: Option<Cell<KeyState>>) -> Self {
        let resolved: Cell<Option<String>> = Cell::new(None);
        let default_key = format!("{DEFAULT_KEY_PREFIX}.{}", unique_id());

        let effect = Effect::new(store, {
            let resolved = resolved.clone();
            move |scope: &mut EffectScope<'_>| {
                match &source {
                    Some(source_cell) => match KeyResolution::resolve(&scope.get(source_cell)) {
                        KeyResolution::Resolved(key) => publish(scope.store(), &resolved, key),
                        KeyResolution::Pending(future) => {
                            let store = scope.store().clone();
                            let resolved = resolved.clone();
                            tokio::spawn(async move {
                                let key = future.await.to_key_string();
                                publish(&store, &resolved, key);
                            });
                        }
                    },
                    None => publish(scope.store(), &resolved, default_key.clone()),
                }

                let resolved = resolved.clone();
                scope.on_cleanup(move |store| store.set(&resolved, None));
            }
        });

        Self { resolved, effect }
    }

    /// Cell holding the resolved key string, `None` while unresolved.
    pub fn resolved_cell(&self) -> &Cell<Option<String>> {
        &self.resolved
    }

    /// Stops tracking the source and resets the resolved key to `None`.
    pub fn dispose(&self) {
        self.effect.dispose();
    }
}

/// Publishes `key` unless it is already the resolved value, so repeated
/// re-derivations of an unchanged key do not retrigger dependents.
fn publish(store: &Store, resolved: &Cell<Option<String>>, key: String) {
    if store.get(resolved).as_deref() == Some(key.as_str()) {
        return;
    }
    tracing::debug!(key = %key, "cache key resolved");
    store.set(resolved, Some(key));
}
