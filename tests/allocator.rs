//! Allocation engine integration tests.
//!
//! These run against the development dialect (in-memory SQLite), where the
//! guarded conditional update is the sole oversubscription defence.

use std::sync::Arc;
use std::time::Duration;

use tokenplane::alloc::{AllocError, Allocator, AllocatorConfig, Strategy, StrategyRegistry};
use tokenplane::db::{seed_nodes, store, Database, DbConfig};

async fn setup(nodes: i64, budget: i64, strategy: Strategy) -> (Database, Allocator) {
    let db = Database::connect(&DbConfig {
        database_url: "sqlite::memory:".to_string(),
        max_connections: 1,
        min_connections: 1,
        acquire_timeout: Duration::from_secs(30),
    })
    .await
    .expect("connect to in-memory store");
    db.ensure_schema().await.expect("bootstrap schema");
    seed_nodes(&db, nodes, budget).await.expect("seed nodes");

    let registry = Arc::new(StrategyRegistry::new(strategy));
    let allocator = Allocator::new(
        db.clone(),
        registry,
        AllocatorConfig {
            node_budget: budget,
            large_request_ratio: 0.5,
            max_retries: 8,
        },
    );
    (db, allocator)
}

async fn set_used(db: &Database, node_id: i64, used: i64) {
    sqlx::query("UPDATE nodes SET used = $1 WHERE id = $2")
        .bind(used)
        .bind(node_id)
        .execute(db.pool())
        .await
        .expect("preset node usage");
}

async fn remaining_total(db: &Database) -> i64 {
    store::list_nodes(db.pool())
        .await
        .expect("list nodes")
        .iter()
        .map(|n| n.remaining())
        .sum()
}

async fn reserved_total(db: &Database) -> i64 {
    sqlx::query_scalar::<_, i64>("SELECT COALESCE(SUM(tokens), 0) FROM reservations")
        .fetch_one(db.pool())
        .await
        .expect("sum reservations")
}

#[tokio::test]
async fn test_basic_alloc_and_free() {
    let (db, alloc) = setup(2, 300, Strategy::Best).await;

    alloc.allocate("req-1", 80).await.unwrap();
    assert_eq!(remaining_total(&db).await, 520);

    alloc.allocate("req-2", 120).await.unwrap();
    assert_eq!(remaining_total(&db).await, 400);

    alloc.free("req-1").await.unwrap();
    assert_eq!(remaining_total(&db).await, 480);

    alloc.allocate("req-3", 200).await.unwrap();
    assert_eq!(remaining_total(&db).await, 280);

    alloc.free("req-2").await.unwrap();
    assert_eq!(remaining_total(&db).await, 400);

    alloc.allocate("req-4", 300).await.unwrap();
    assert_eq!(remaining_total(&db).await, 100);

    alloc.free("req-3").await.unwrap();
    assert_eq!(remaining_total(&db).await, 300);

    alloc.allocate("req-5", 250).await.unwrap();
    assert_eq!(remaining_total(&db).await, 50);

    alloc.free("req-4").await.unwrap();
    assert_eq!(remaining_total(&db).await, 350);

    alloc.free("req-5").await.unwrap();
    assert_eq!(remaining_total(&db).await, 600);
}

#[tokio::test]
async fn test_request_above_any_capacity_is_invalid() {
    let (_db, alloc) = setup(1, 100, Strategy::Best).await;
    let err = alloc.allocate("too-big", 200).await.unwrap_err();
    assert!(matches!(err, AllocError::Invalid(_)));
}

#[tokio::test]
async fn test_overloaded_when_no_node_has_room() {
    let (db, alloc) = setup(1, 100, Strategy::Best).await;
    alloc.allocate("first", 60).await.unwrap();
    let err = alloc.allocate("second", 60).await.unwrap_err();
    assert!(matches!(err, AllocError::Overloaded));
    // No state change on overload.
    assert_eq!(remaining_total(&db).await, 40);
    assert_eq!(reserved_total(&db).await, 60);
}

#[tokio::test]
async fn test_idempotent_repeat_returns_same_placement() {
    let (db, alloc) = setup(1, 300, Strategy::Best).await;
    let first = alloc.allocate("same", 50).await.unwrap();
    let second = alloc.allocate("same", 50).await.unwrap();
    assert_eq!(first, second);
    assert_eq!(remaining_total(&db).await, 250);
}

#[tokio::test]
async fn test_repeat_with_different_token_count_keeps_original() {
    let (db, alloc) = setup(1, 300, Strategy::Best).await;
    let first = alloc.allocate("same", 50).await.unwrap();
    // The stored reservation wins; the repeat does not change state.
    let second = alloc.allocate("same", 200).await.unwrap();
    assert_eq!(first, second);
    assert_eq!(remaining_total(&db).await, 250);
    assert_eq!(reserved_total(&db).await, 50);
}

#[tokio::test]
async fn test_free_unknown_and_double_free() {
    let (db, alloc) = setup(1, 300, Strategy::Best).await;
    assert!(matches!(
        alloc.free("missing").await.unwrap_err(),
        AllocError::NotFound
    ));

    alloc.allocate("once", 40).await.unwrap();
    let release = alloc.free("once").await.unwrap();
    assert_eq!(release.node_id, 1);
    assert_eq!(remaining_total(&db).await, 300);
    assert!(matches!(
        alloc.free("once").await.unwrap_err(),
        AllocError::NotFound
    ));
}

#[tokio::test]
async fn test_empty_request_id_is_invalid() {
    let (_db, alloc) = setup(1, 300, Strategy::Best).await;
    assert!(matches!(
        alloc.allocate("", 10).await.unwrap_err(),
        AllocError::Invalid(_)
    ));
    assert!(matches!(
        alloc.allocate("x", 0).await.unwrap_err(),
        AllocError::Invalid(_)
    ));
    assert!(matches!(
        alloc.free("").await.unwrap_err(),
        AllocError::Invalid(_)
    ));
}

#[tokio::test]
async fn test_best_fit_picks_smallest_sufficient_node() {
    let (db, alloc) = setup(3, 300, Strategy::Best).await;
    set_used(&db, 1, 250).await;
    set_used(&db, 2, 100).await;
    // Remaining: 50, 200, 300. A request for 120 fits nodes 2 and 3;
    // best-fit takes the tighter node 2.
    let placement = alloc.allocate("bf", 120).await.unwrap();
    assert_eq!(placement.node_id, 2);
    assert_eq!(placement.remaining_quota, 80);
}

#[tokio::test]
async fn test_best_fit_ties_break_by_lowest_id() {
    let (_db, alloc) = setup(2, 300, Strategy::Best).await;
    let placement = alloc.allocate("tie", 100).await.unwrap();
    assert_eq!(placement.node_id, 1);
    assert_eq!(placement.remaining_quota, 200);
}

#[tokio::test]
async fn test_largest_picks_most_remaining_node() {
    let (db, alloc) = setup(3, 300, Strategy::Largest).await;
    set_used(&db, 1, 250).await;
    set_used(&db, 2, 100).await;
    let placement = alloc.allocate("wf", 120).await.unwrap();
    assert_eq!(placement.node_id, 3);
    assert_eq!(placement.remaining_quota, 180);
}

#[tokio::test]
async fn test_large_request_overrides_best_fit() {
    let (db, alloc) = setup(2, 300, Strategy::Best).await;
    set_used(&db, 1, 140).await;
    // Remaining: 160, 300. 150 tokens is at the 0.5 threshold, so the
    // fragmentation override places it worst-fit on node 2 even though
    // best-fit would prefer node 1.
    let placement = alloc.allocate("large", 150).await.unwrap();
    assert_eq!(placement.node_id, 2);
    assert_eq!(placement.remaining_quota, 150);
}

#[tokio::test]
async fn test_below_threshold_follows_active_strategy() {
    let (db, alloc) = setup(2, 300, Strategy::Best).await;
    set_used(&db, 1, 140).await;
    // 149 tokens is just below the 0.5 threshold, so best-fit applies:
    // remaining 160 beats remaining 300.
    let placement = alloc.allocate("small", 149).await.unwrap();
    assert_eq!(placement.node_id, 1);
    assert_eq!(placement.remaining_quota, 11);
}

#[tokio::test]
async fn test_placement_sequence_with_recovery() {
    let (_db, alloc) = setup(2, 300, Strategy::Best).await;

    let p1 = alloc.allocate("r1", 100).await.unwrap();
    assert_eq!((p1.node_id, p1.remaining_quota), (1, 200));

    let p2 = alloc.allocate("r2", 100).await.unwrap();
    assert_eq!((p2.node_id, p2.remaining_quota), (1, 100));

    let p3 = alloc.allocate("r3", 250).await.unwrap();
    assert_eq!((p3.node_id, p3.remaining_quota), (2, 50));

    assert!(matches!(
        alloc.allocate("r4", 200).await.unwrap_err(),
        AllocError::Overloaded
    ));

    let release = alloc.free("r2").await.unwrap();
    assert_eq!(release.node_id, 1);

    let p4 = alloc.allocate("r4", 200).await.unwrap();
    assert_eq!((p4.node_id, p4.remaining_quota), (1, 0));
}

#[tokio::test]
async fn test_concurrent_allocations_never_oversubscribe() {
    let (db, alloc) = setup(2, 300, Strategy::Best).await;
    let tokens_each = 30i64;

    let mut join_set = tokio::task::JoinSet::new();
    for i in 0..40 {
        let alloc = alloc.clone();
        join_set.spawn(async move { alloc.allocate(&format!("rid-{i}"), tokens_each).await });
    }

    let mut successes = 0;
    let mut overloaded = 0;
    while let Some(result) = join_set.join_next().await {
        match result.expect("task panicked") {
            Ok(_) => successes += 1,
            Err(AllocError::Overloaded) => overloaded += 1,
            Err(e) => panic!("unexpected allocation error: {e}"),
        }
    }

    // 1200 tokens requested against 600 available.
    assert_eq!(successes, 20);
    assert_eq!(overloaded, 20);

    let nodes = store::list_nodes(db.pool()).await.unwrap();
    for node in &nodes {
        assert!(node.used <= node.capacity);
        assert_eq!(node.used, node.capacity);
    }
    assert_eq!(reserved_total(&db).await, 600);
}

#[tokio::test]
async fn test_concurrent_same_request_id_reserves_once() {
    let (db, alloc) = setup(2, 300, Strategy::Best).await;

    let mut join_set = tokio::task::JoinSet::new();
    for _ in 0..10 {
        let alloc = alloc.clone();
        join_set.spawn(async move { alloc.allocate("dup", 50).await });
    }

    let mut placements = Vec::new();
    while let Some(result) = join_set.join_next().await {
        placements.push(result.expect("task panicked").expect("allocation failed"));
    }

    let first = placements[0];
    assert!(placements.iter().all(|p| p.node_id == first.node_id));
    assert_eq!(reserved_total(&db).await, 50);
    assert_eq!(remaining_total(&db).await, 550);
}

#[tokio::test]
async fn test_seed_is_idempotent_and_preserves_usage() {
    let (db, alloc) = setup(2, 300, Strategy::Best).await;
    alloc.allocate("keep", 120).await.unwrap();

    // Re-running the seed must neither touch used counters nor add rows.
    let inserted = seed_nodes(&db, 2, 300).await.unwrap();
    assert_eq!(inserted, 0);
    assert_eq!(remaining_total(&db).await, 480);

    // Growing the pool only appends new rows.
    let inserted = seed_nodes(&db, 3, 300).await.unwrap();
    assert_eq!(inserted, 1);
    let nodes = store::list_nodes(db.pool()).await.unwrap();
    assert_eq!(nodes.len(), 3);
    assert_eq!(nodes[2].id, 3);
    assert_eq!(nodes[2].used, 0);
}
