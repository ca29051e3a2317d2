//! Idempotent node seeding.

use tracing::info;

use super::{Database, DbError};

/// Ensure node rows `1..=nodes` exist, each seeded with `capacity = budget`
/// and `used = 0`.
///
/// Existing rows are never touched: capacity is immutable post-seed and
/// `used` is owned by the allocator. Safe to run on every startup.
pub async fn seed_nodes(db: &Database, nodes: i64, budget: i64) -> Result<u64, DbError> {
    let mut inserted = 0u64;

    for id in 1..=nodes {
        let result = sqlx::query(
            "INSERT INTO nodes (id, capacity, used) VALUES ($1, $2, 0) \
             ON CONFLICT (id) DO NOTHING",
        )
        .bind(id)
        .bind(budget)
        .execute(db.pool())
        .await
        .map_err(DbError::Query)?;

        inserted += result.rows_affected();
    }

    if inserted > 0 {
        info!(inserted, budget, "Seeded node rows");
    }

    Ok(inserted)
}
