#![allow(clippy::unwrap_used)]
// End-to-end tests: subscriptions, mutations and the registry wired together.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use pretty_assertions::assert_eq;

use medquery_core::{
    KeyRegistry, ListParams, MutationCallbacks, MutationController, QueryError, QueryKey,
    QueryStatus, ResourceKeys, ResourceKind, Subscription, WriteOp, invalidation_patterns,
    query_key,
};

// ── Helpers ─────────────────────────────────────────────────────────

/// Fetcher that counts its calls and echoes the key it was asked for.
fn echo_fetcher(
    calls: &Arc<AtomicUsize>,
) -> impl Fn(&QueryKey) -> std::future::Ready<Result<String, QueryError>> + Send + Sync + 'static
{
    let calls = Arc::clone(calls);
    move |key: &QueryKey| {
        calls.fetch_add(1, Ordering::SeqCst);
        std::future::ready(Ok(key.to_string()))
    }
}

fn counter() -> Arc<AtomicUsize> {
    Arc::new(AtomicUsize::new(0))
}

// ── Fan-out ─────────────────────────────────────────────────────────

#[tokio::test]
async fn mutation_refreshes_list_and_detail_once_each() {
    let registry = KeyRegistry::new();
    let (list_calls, detail_calls) = (counter(), counter());

    let list = Subscription::new(&registry, query_key!["x", "list"], echo_fetcher(&list_calls))
        .unwrap();
    let detail = Subscription::new(
        &registry,
        query_key!["x", "detail", "1"],
        echo_fetcher(&detail_calls),
    )
    .unwrap();
    list.settled().await;
    detail.settled().await;

    let save = MutationController::new(|n: u32| async move { Ok::<_, QueryError>(n) })
        .invalidates(&registry, |_, _| vec![query_key!["x"]]);
    save.invoke(7, MutationCallbacks::new()).await;

    list.settled().await;
    detail.settled().await;
    assert_eq!(list_calls.load(Ordering::SeqCst), 2);
    assert_eq!(detail_calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn unrelated_family_is_untouched() {
    let registry = KeyRegistry::new();
    let calls = counter();
    let conditions = Subscription::new(
        &registry,
        ResourceKeys::all(ResourceKind::Conditions).with("list"),
        echo_fetcher(&calls),
    )
    .unwrap();
    conditions.settled().await;

    let refreshed = registry.invalidate_all(&invalidation_patterns(
        ResourceKind::Allergies,
        &WriteOp::Create,
    ));
    assert_eq!(refreshed, 0);
    assert!(!conditions.is_fetching());
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn update_refreshes_detail_once_despite_two_matching_patterns() {
    let registry = KeyRegistry::new();
    let calls = counter();
    let detail = Subscription::new(
        &registry,
        ResourceKeys::detail(ResourceKind::Allergies, "a1"),
        echo_fetcher(&calls),
    )
    .unwrap();
    detail.settled().await;

    let update = MutationController::new(|id: String| async move { Ok::<_, QueryError>(id) })
        .invalidates(&registry, |id: &String, _| {
            invalidation_patterns(ResourceKind::Allergies, &WriteOp::Update { id: id.clone() })
        });
    update.invoke_and_wait("a1".into()).await.unwrap();

    detail.settled().await;
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

// ── Failures ────────────────────────────────────────────────────────

#[tokio::test]
async fn failed_mutation_invalidates_nothing() {
    let registry = KeyRegistry::new();
    let calls = counter();
    let list = Subscription::new(&registry, query_key!["x", "list"], echo_fetcher(&calls)).unwrap();
    list.settled().await;

    let errors = counter();
    let e = Arc::clone(&errors);
    let delete = MutationController::new(|_: String| async {
        Err::<(), _>(QueryError::api(403, "not your record"))
    })
    .invalidates(&registry, |_, _| vec![query_key!["x"]])
    .on_error(move |err| {
        assert!(err.is_permission_error());
        e.fetch_add(1, Ordering::SeqCst);
    });

    delete.invoke("x1".into(), MutationCallbacks::new()).await;

    assert_eq!(errors.load(Ordering::SeqCst), 1);
    assert!(!delete.is_pending());
    assert!(!list.is_fetching());
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn refetch_failure_keeps_last_good_data() {
    let registry = KeyRegistry::new();
    let calls = counter();
    let c = Arc::clone(&calls);
    let sub = Subscription::new(&registry, query_key!["vitalSigns"], move |_: &QueryKey| {
        let n = c.fetch_add(1, Ordering::SeqCst);
        async move {
            if n == 0 {
                Ok(vec![72_u32, 74])
            } else {
                Err(QueryError::api(503, "maintenance"))
            }
        }
    })
    .unwrap();
    sub.settled().await;

    registry.invalidate(&query_key!["vitalSigns"]);
    let state = sub.settled().await;

    assert_eq!(state.status, QueryStatus::Failed);
    assert_eq!(*state.data.unwrap(), vec![72, 74]);
    assert_eq!(
        state.error.unwrap().user_message(),
        "The service is temporarily unavailable. Please try again later."
    );
}

#[tokio::test]
async fn panicking_callback_does_not_block_subscribers() {
    let registry = KeyRegistry::new();
    registry.register(query_key!["x", "broken"], || panic!("callback exploded"));

    let calls = counter();
    let sub = Subscription::new(&registry, query_key!["x", "ok"], echo_fetcher(&calls)).unwrap();
    sub.settled().await;

    assert_eq!(registry.invalidate(&query_key!["x"]), 2);
    sub.settled().await;
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

// ── Key changes and teardown ────────────────────────────────────────

#[tokio::test]
async fn paging_moves_the_registration() {
    let registry = KeyRegistry::new();
    let calls = counter();
    let mut params = ListParams::default();
    let page_one = ResourceKeys::list(ResourceKind::Allergies, &params);

    let mut sub = Subscription::new(&registry, page_one.clone(), echo_fetcher(&calls)).unwrap();
    sub.settled().await;

    params.set_page(2);
    let page_two = ResourceKeys::list(ResourceKind::Allergies, &params);
    assert!(sub.set_key(page_two.clone()));
    let state = sub.settled().await;

    assert!(!registry.contains(&page_one));
    assert!(registry.contains(&page_two));
    assert_eq!(*state.data.unwrap(), page_two.to_string());
    assert_eq!(calls.load(Ordering::SeqCst), 2);

    // Same parameters rebuilt from scratch: no move, no fetch.
    let rebuilt = ResourceKeys::list(ResourceKind::Allergies, &ListParams::default().with_page(2));
    assert!(!sub.set_key(rebuilt));
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn dropping_every_subscription_empties_the_registry() {
    let registry = KeyRegistry::new();
    let calls = counter();
    let a = Subscription::new(&registry, query_key!["x", "list"], echo_fetcher(&calls)).unwrap();
    let b = Subscription::new(&registry, query_key!["x", "list"], echo_fetcher(&calls)).unwrap();
    assert_eq!(registry.callback_count(&query_key!["x", "list"]), 2);

    drop(a);
    assert_eq!(registry.callback_count(&query_key!["x", "list"]), 1);
    drop(b);
    assert_eq!(registry.entry_count(), 0);
    assert_eq!(registry.invalidate(&QueryKey::new()), 0);
}

// ── Ordering ────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn latest_of_overlapping_refetches_wins() {
    let registry = KeyRegistry::new();
    let calls = counter();
    let c = Arc::clone(&calls);
    // First call is slow, later calls fast: an early refetch resolves after
    // a later one.
    let sub = Subscription::new(&registry, query_key!["sleep"], move |_: &QueryKey| {
        let n = c.fetch_add(1, Ordering::SeqCst) + 1;
        async move {
            let delay = match n {
                2 => 200,
                _ => 10,
            };
            tokio::time::sleep(Duration::from_millis(delay)).await;
            Ok::<_, QueryError>(n)
        }
    })
    .unwrap();
    sub.settled().await;

    registry.invalidate(&query_key!["sleep"]);
    registry.invalidate(&query_key!["sleep"]);
    let state = sub.settled().await;

    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert_eq!(*state.data.unwrap(), 3);

    // The slow second fetch lands afterwards and must not overwrite.
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(*sub.data().unwrap(), 3);
}
