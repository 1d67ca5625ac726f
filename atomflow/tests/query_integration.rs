//! Integration tests for the query construct.
//!
//! These tests verify the complete query workflow including:
//! - Automatic fetching when the cache key resolves or changes
//! - Fallback state while the key is unresolved
//! - Manager sharing and bounding through the client's cache
//! - Refetch supersession and abort
//! - Reactive observation of derived state through effects

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use atomflow::client::QueryClient;
use atomflow::config::ClientConfig;
use atomflow::error::CallError;
use atomflow::key::{CacheKey, KeyState};
use atomflow::manager::CallStatus;
use atomflow::query::QueryOptions;
use atomflow::store::{Cell, Effect};
use tokio::sync::Notify;

// =============================================================================
// Test Helpers
// =============================================================================

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

/// Polls `condition` until it holds or two seconds elapse.
async fn wait_for(condition: impl Fn() -> bool) {
    for _ in 0..200 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not met within timeout");
}

// =============================================================================
// Integration Tests
// =============================================================================

#[tokio::test]
async fn query_with_default_key_fetches_at_construction() {
    init_tracing();
    let client = QueryClient::new();

    let query = client.query(
        |_ctx| async { Ok("Success!".to_string()) },
        QueryOptions::new().label("greeting"),
    );

    // The synthesized key resolves synchronously, so the first call's
    // future is already pending.
    let pending = query.pending(client.store()).expect("fetch should have started");
    assert_eq!(pending.await.unwrap(), "Success!");

    assert_eq!(query.status(client.store()), CallStatus::Success);
    assert_eq!(query.data(client.store()), Some("Success!".to_string()));
    assert!(!query.is_fetching(client.store()));
    assert!(!query.is_loading(client.store()));
}

#[tokio::test]
async fn unresolved_key_surfaces_fallbacks_and_skips_dispatch() {
    let client = QueryClient::new();
    let calls = Arc::new(AtomicUsize::new(0));

    // A key source that never settles keeps the query unresolved.
    let source = Cell::new(KeyState::pending(futures::future::pending::<CacheKey>()));
    let calls_clone = calls.clone();
    let query = client.query(
        move |_ctx| {
            let calls = calls_clone.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(1)
            }
        },
        QueryOptions::new().cache_key(source),
    );

    assert_eq!(query.data(client.store()), None);
    assert_eq!(query.status(client.store()), CallStatus::Init);
    assert!(query.is_loading(client.store()));
    assert!(query.is_fetching(client.store()));
    assert!(query.pending(client.store()).is_none());
    assert!(query.error(client.store()).is_none());

    // Refetch and abort are silently skipped, and the callback never ran.
    assert!(query.refetch(client.store()).is_none());
    query.abort(client.store());
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn query_fetches_once_a_pending_key_settles() {
    let client = QueryClient::new();
    let (tx, rx) = tokio::sync::oneshot::channel::<CacheKey>();

    let source = Cell::new(KeyState::pending(async move {
        rx.await.expect("key sender dropped")
    }));
    let query = Arc::new(client.query(
        |_ctx| async { Ok("keyed".to_string()) },
        QueryOptions::new().cache_key(source),
    ));

    assert_eq!(query.data(client.store()), None);

    tx.send(CacheKey::new().segment("user").segment(7)).unwrap();

    let (query_clone, store) = (query.clone(), client.store().clone());
    wait_for(move || query_clone.data(&store) == Some("keyed".to_string())).await;
    assert!(client.cache().contains("user.7"));
}

#[tokio::test]
async fn key_change_refetches_under_the_new_key() {
    let client = QueryClient::new();
    let calls = Arc::new(AtomicUsize::new(0));

    let source = Cell::new(KeyState::ready(CacheKey::new().segment("a").segment(1)));
    let calls_clone = calls.clone();
    let query = Arc::new(client.query(
        move |_ctx| {
            let n = calls_clone.fetch_add(1, Ordering::SeqCst) + 1;
            async move { Ok(format!("fetch-{n}")) }
        },
        QueryOptions::new().cache_key(source.clone()),
    ));

    query.pending(client.store()).unwrap().await.unwrap();
    assert_eq!(query.data(client.store()), Some("fetch-1".to_string()));

    client
        .store()
        .set(&source, KeyState::ready(CacheKey::new().segment("b").segment(2)));

    let (query_clone, store) = (query.clone(), client.store().clone());
    wait_for(move || query_clone.data(&store) == Some("fetch-2".to_string())).await;

    // Both managers stay cached under their own keys.
    assert!(client.cache().contains("a.1"));
    assert!(client.cache().contains("b.2"));
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn rewriting_the_source_refetches_even_when_the_key_is_unchanged() {
    let client = QueryClient::new();
    let calls = Arc::new(AtomicUsize::new(0));

    let source = Cell::new(KeyState::ready(CacheKey::new().segment("stable")));
    let calls_clone = calls.clone();
    let query = client.query(
        move |_ctx| {
            calls_clone.fetch_add(1, Ordering::SeqCst);
            async { Ok(0) }
        },
        QueryOptions::new().cache_key(source.clone()),
    );

    query.pending(client.store()).unwrap().await.unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    // The resolver resets to unresolved before re-deriving, so a source
    // write republishes the key and retriggers the fetch, equal key or
    // not. Only one manager ever exists for the key.
    client
        .store()
        .set(&source, KeyState::ready(CacheKey::new().segment("stable")));

    query.pending(client.store()).unwrap().await.unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_eq!(client.cache().len(), 1);
}

#[tokio::test]
async fn queries_sharing_a_key_share_one_manager() {
    let client = QueryClient::new();
    let second_ran = Arc::new(AtomicUsize::new(0));

    let key = || Cell::new(KeyState::ready(CacheKey::new().segment("shared")));
    let first = client.query(
        |_ctx| async { Ok("from-first".to_string()) },
        QueryOptions::new().cache_key(key()),
    );
    first.pending(client.store()).unwrap().await.unwrap();

    // The manager under "shared" keeps the callback it was created with;
    // the second query's callback is never installed.
    let second_ran_clone = second_ran.clone();
    let second = client.query(
        move |_ctx| {
            second_ran_clone.fetch_add(1, Ordering::SeqCst);
            async { Ok("from-second".to_string()) }
        },
        QueryOptions::new().cache_key(key()),
    );

    second.pending(client.store()).unwrap().await.unwrap();
    assert_eq!(second.data(client.store()), Some("from-first".to_string()));
    assert_eq!(second_ran.load(Ordering::SeqCst), 0);
    assert_eq!(client.cache().len(), 1);
}

#[tokio::test]
async fn cache_capacity_bounds_managers_across_queries() {
    let client = QueryClient::with_config(ClientConfig { cache_capacity: 2 });

    for name in ["one", "two", "three"] {
        let query = client.query(
            |_ctx| async { Ok(0) },
            QueryOptions::new().cache_key(Cell::new(KeyState::ready(
                CacheKey::new().segment(name),
            ))),
        );
        query.pending(client.store()).unwrap().await.unwrap();
    }

    assert_eq!(client.cache().len(), 2);
    assert!(!client.cache().contains("one"));
    assert!(client.cache().contains("two"));
    assert!(client.cache().contains("three"));
    assert_eq!(client.cache().stats().evictions, 1);
}

#[tokio::test]
async fn refetch_supersedes_an_in_flight_call() {
    let client = QueryClient::new();
    let gate = Arc::new(Notify::new());
    let calls = Arc::new(AtomicUsize::new(0));

    let (gate_clone, calls_clone) = (gate.clone(), calls.clone());
    let query = client.query(
        move |ctx| {
            let gate = gate_clone.clone();
            let n = calls_clone.fetch_add(1, Ordering::SeqCst) + 1;
            async move {
                if n == 1 {
                    tokio::select! {
                        _ = gate.notified() => Ok("first".to_string()),
                        _ = ctx.cancellation().cancelled() => Err(CallError::Aborted),
                    }
                } else {
                    Ok("second".to_string())
                }
            }
        },
        QueryOptions::new(),
    );

    let first = query.pending(client.store()).unwrap();
    let second = query.refetch(client.store()).unwrap();

    assert!(matches!(first.await, Err(CallError::Aborted)));
    assert_eq!(second.await.unwrap(), "second");
    assert_eq!(query.data(client.store()), Some("second".to_string()));
    assert_eq!(query.status(client.store()), CallStatus::Success);
}

#[tokio::test]
async fn abort_through_the_handle_resets_status() {
    let client = QueryClient::new();

    let query = client.query(
        |ctx| async move {
            ctx.cancellation().cancelled().await;
            Err::<u32, _>(CallError::Aborted)
        },
        QueryOptions::new(),
    );

    assert_eq!(query.status(client.store()), CallStatus::Loading);
    query.abort(client.store());

    assert_eq!(query.status(client.store()), CallStatus::Init);
    assert!(!query.is_fetching(client.store()));
    assert!(!query.is_loading(client.store()));
}

#[tokio::test]
async fn failing_query_surfaces_the_normalized_error() {
    let client = QueryClient::new();

    let query = client.query(
        |_ctx| async { Err::<u32, _>(CallError::failed("Test Error")) },
        QueryOptions::new(),
    );

    let result = query.pending(client.store()).unwrap().await;
    assert!(matches!(result, Err(CallError::Failed(_))));

    assert_eq!(query.status(client.store()), CallStatus::Error);
    assert_eq!(
        query.error(client.store()).unwrap().message(),
        "Test Error"
    );
}

#[tokio::test]
async fn detach_resets_to_fallback_state() {
    let client = QueryClient::new();

    let query = client.query(|_ctx| async { Ok(5) }, QueryOptions::new());
    query.pending(client.store()).unwrap().await.unwrap();
    assert_eq!(query.data(client.store()), Some(5));

    query.detach();

    // The resolved key is gone, so reads fall back; the manager itself
    // stays cached.
    assert_eq!(query.data(client.store()), None);
    assert_eq!(query.status(client.store()), CallStatus::Init);
    assert_eq!(client.cache().len(), 1);
}

#[tokio::test]
async fn effects_observe_status_transitions() {
    init_tracing();
    let client = QueryClient::new();
    let gate = Arc::new(Notify::new());

    let gate_clone = gate.clone();
    let query = Arc::new(client.query(
        move |ctx| {
            let gate = gate_clone.clone();
            async move {
                tokio::select! {
                    _ = gate.notified() => Ok("done".to_string()),
                    _ = ctx.cancellation().cancelled() => Err(CallError::Aborted),
                }
            }
        },
        QueryOptions::new().label("observed"),
    ));

    let transitions = Arc::new(Mutex::new(Vec::new()));
    let (query_clone, transitions_clone) = (query.clone(), transitions.clone());
    let observer = Effect::new(client.store(), move |scope| {
        transitions_clone
            .lock()
            .unwrap()
            .push(query_clone.status(&*scope));
    });

    gate.notify_one();
    query.pending(client.store()).unwrap().await.unwrap();

    let seen = transitions.lock().unwrap().clone();
    assert_eq!(seen.first(), Some(&CallStatus::Loading));
    assert_eq!(seen.last(), Some(&CallStatus::Success));

    observer.dispose();
}
