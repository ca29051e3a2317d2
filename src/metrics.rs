//! Read-only metrics over nodes and reservations.
//!
//! The snapshot is computed from two pool-level reads; it need not be
//! linearisable with concurrent allocations.

use serde::Serialize;

use crate::alloc::Strategy;
use crate::db::store;
use crate::db::{Database, DbError};

/// Per-node utilisation figures.
#[derive(Debug, Clone, Serialize)]
pub struct NodeMetrics {
    pub id: i64,
    pub capacity: i64,
    pub used: i64,
    pub remaining: i64,
    pub utilization: f64,
}

/// Pool-wide totals.
#[derive(Debug, Clone, Serialize)]
pub struct Totals {
    pub capacity: i64,
    pub used: i64,
    pub remaining: i64,
}

/// Snapshot returned by the metrics endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub nodes: Vec<NodeMetrics>,
    pub totals: Totals,
    pub active_reservations: i64,
    pub strategy: Strategy,
    pub utilization: f64,
    pub imbalance_gini: f64,
}

/// Summarise the current pool state.
pub async fn snapshot(db: &Database, strategy: Strategy) -> Result<MetricsSnapshot, DbError> {
    let rows = store::list_nodes(db.pool()).await?;
    let active_reservations = store::count_reservations(db.pool()).await?;

    let capacity: i64 = rows.iter().map(|n| n.capacity).sum();
    let used: i64 = rows.iter().map(|n| n.used).sum();
    let imbalance_gini = gini(&rows.iter().map(|n| n.used as f64).collect::<Vec<_>>());

    let nodes = rows
        .into_iter()
        .map(|n| NodeMetrics {
            id: n.id,
            capacity: n.capacity,
            used: n.used,
            remaining: n.remaining(),
            utilization: ratio(n.used, n.capacity),
        })
        .collect();

    Ok(MetricsSnapshot {
        nodes,
        totals: Totals {
            capacity,
            used,
            remaining: capacity - used,
        },
        active_reservations,
        strategy,
        utilization: ratio(used, capacity),
        imbalance_gini,
    })
}

fn ratio(used: i64, capacity: i64) -> f64 {
    if capacity > 0 {
        used as f64 / capacity as f64
    } else {
        0.0
    }
}

/// Gini coefficient over per-node usage, as a load-imbalance indicator.
/// 0.0 is perfectly even, approaching 1.0 as load concentrates on one node.
fn gini(values: &[f64]) -> f64 {
    let mut vals: Vec<f64> = values.iter().copied().filter(|v| *v >= 0.0).collect();
    if vals.is_empty() {
        return 0.0;
    }
    vals.sort_by(|a, b| a.total_cmp(b));

    let n = vals.len() as f64;
    let sum: f64 = vals.iter().sum();
    if sum == 0.0 {
        return 0.0;
    }

    let weighted: f64 = vals
        .iter()
        .enumerate()
        .map(|(i, v)| (i as f64 + 1.0) * v)
        .sum();
    (2.0 * weighted) / (n * sum) - (n + 1.0) / n
}
