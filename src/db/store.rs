//! Row gateway over the nodes and reservations tables.
//!
//! Every function that takes a transaction participates in the caller's
//! transaction boundary; the allocator composes them into its protocol.
//! Pool-level reads are for the metrics aggregator and need not be
//! linearizable with concurrent allocations.

use sqlx::any::AnyRow;
use sqlx::{Any, AnyPool, Row, Transaction};

use super::{DbError, Dialect};

/// A row from the nodes table.
#[derive(Debug, Clone)]
pub struct NodeRow {
    pub id: i64,
    pub capacity: i64,
    pub used: i64,
}

impl NodeRow {
    /// Tokens still available on this node.
    pub fn remaining(&self) -> i64 {
        self.capacity - self.used
    }
}

impl<'r> sqlx::FromRow<'r, AnyRow> for NodeRow {
    fn from_row(row: &'r AnyRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            capacity: row.try_get("capacity")?,
            used: row.try_get("used")?,
        })
    }
}

/// A row from the reservations table.
#[derive(Debug, Clone)]
pub struct ReservationRow {
    pub request_id: String,
    pub node_id: i64,
    pub tokens: i64,
}

impl<'r> sqlx::FromRow<'r, AnyRow> for ReservationRow {
    fn from_row(row: &'r AnyRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            request_id: row.try_get("request_id")?,
            node_id: row.try_get("node_id")?,
            tokens: row.try_get("tokens")?,
        })
    }
}

/// Candidate ordering for node selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CandidateOrder {
    /// Best-fit: smallest sufficient remaining capacity first.
    RemainingAsc,
    /// Worst-fit: largest remaining capacity first.
    RemainingDesc,
}

/// Outcome of inserting a reservation row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    /// Another transaction holds the same request id.
    Conflict,
}

/// Look up a reservation by request id.
pub async fn find_reservation(
    tx: &mut Transaction<'_, Any>,
    request_id: &str,
) -> Result<Option<ReservationRow>, DbError> {
    sqlx::query_as::<_, ReservationRow>(
        "SELECT request_id, node_id, tokens FROM reservations WHERE request_id = $1",
    )
    .bind(request_id)
    .fetch_optional(&mut **tx)
    .await
    .map_err(DbError::Query)
}

/// Look up a reservation by request id, locking the row on dialects that
/// support row locks.
pub async fn find_reservation_locked(
    tx: &mut Transaction<'_, Any>,
    dialect: Dialect,
    request_id: &str,
) -> Result<Option<ReservationRow>, DbError> {
    let sql = if dialect.supports_skip_locked() {
        "SELECT request_id, node_id, tokens FROM reservations WHERE request_id = $1 FOR UPDATE"
    } else {
        "SELECT request_id, node_id, tokens FROM reservations WHERE request_id = $1"
    };
    sqlx::query_as::<_, ReservationRow>(sql)
        .bind(request_id)
        .fetch_optional(&mut **tx)
        .await
        .map_err(DbError::Query)
}

/// Fetch a node by id within the transaction.
pub async fn node_by_id(
    tx: &mut Transaction<'_, Any>,
    id: i64,
) -> Result<Option<NodeRow>, DbError> {
    sqlx::query_as::<_, NodeRow>("SELECT id, capacity, used FROM nodes WHERE id = $1")
        .bind(id)
        .fetch_optional(&mut **tx)
        .await
        .map_err(DbError::Query)
}

/// Lock a node row ahead of a release on dialects that support row locks.
pub async fn lock_node(
    tx: &mut Transaction<'_, Any>,
    dialect: Dialect,
    id: i64,
) -> Result<(), DbError> {
    if dialect.supports_skip_locked() {
        sqlx::query("SELECT id FROM nodes WHERE id = $1 FOR UPDATE")
            .bind(id)
            .execute(&mut **tx)
            .await
            .map_err(DbError::Query)?;
    }
    Ok(())
}

/// Select and lock the preferred candidate node able to host `token_count`.
///
/// On Postgres the row is locked with `FOR UPDATE SKIP LOCKED`, so competing
/// transactions are routed to the next-preferable candidate instead of
/// blocking on the same row. On SQLite the read is plain; the conditional
/// update guard is the sole oversubscription defence there.
pub async fn lock_candidate(
    tx: &mut Transaction<'_, Any>,
    dialect: Dialect,
    token_count: i64,
    order: CandidateOrder,
) -> Result<Option<NodeRow>, DbError> {
    let direction = match order {
        CandidateOrder::RemainingAsc => "ASC",
        CandidateOrder::RemainingDesc => "DESC",
    };
    let locking = if dialect.supports_skip_locked() {
        " FOR UPDATE SKIP LOCKED"
    } else {
        ""
    };
    let sql = format!(
        "SELECT id, capacity, used FROM nodes \
         WHERE capacity - used >= $1 \
         ORDER BY capacity - used {direction}, id ASC \
         LIMIT 1{locking}"
    );

    sqlx::query_as::<_, NodeRow>(&sql)
        .bind(token_count)
        .fetch_optional(&mut **tx)
        .await
        .map_err(DbError::Query)
}

/// Conditionally reserve `token_count` tokens on a node.
///
/// The `WHERE` clause re-checks remaining capacity, so a stale candidate
/// snapshot can never push `used` past `capacity`. Returns whether the
/// update took effect.
pub async fn try_reserve(
    tx: &mut Transaction<'_, Any>,
    node_id: i64,
    token_count: i64,
) -> Result<bool, DbError> {
    let result = sqlx::query(
        "UPDATE nodes SET used = used + $1 WHERE id = $2 AND capacity - used >= $3",
    )
    .bind(token_count)
    .bind(node_id)
    .bind(token_count)
    .execute(&mut **tx)
    .await
    .map_err(DbError::Query)?;

    Ok(result.rows_affected() == 1)
}

/// Insert a reservation row, reporting a unique-key collision as
/// [`InsertOutcome::Conflict`] rather than an error.
pub async fn insert_reservation(
    tx: &mut Transaction<'_, Any>,
    request_id: &str,
    node_id: i64,
    tokens: i64,
) -> Result<InsertOutcome, DbError> {
    let result = sqlx::query(
        "INSERT INTO reservations (request_id, node_id, tokens) VALUES ($1, $2, $3)",
    )
    .bind(request_id)
    .bind(node_id)
    .bind(tokens)
    .execute(&mut **tx)
    .await;

    match result {
        Ok(_) => Ok(InsertOutcome::Inserted),
        Err(e) if super::is_unique_violation(&e) => Ok(InsertOutcome::Conflict),
        Err(e) => Err(DbError::Query(e)),
    }
}

/// Return `tokens` to a node.
pub async fn release_node(
    tx: &mut Transaction<'_, Any>,
    node_id: i64,
    tokens: i64,
) -> Result<(), DbError> {
    sqlx::query("UPDATE nodes SET used = used - $1 WHERE id = $2")
        .bind(tokens)
        .bind(node_id)
        .execute(&mut **tx)
        .await
        .map_err(DbError::Query)?;
    Ok(())
}

/// Delete a reservation row.
pub async fn delete_reservation(
    tx: &mut Transaction<'_, Any>,
    request_id: &str,
) -> Result<(), DbError> {
    sqlx::query("DELETE FROM reservations WHERE request_id = $1")
        .bind(request_id)
        .execute(&mut **tx)
        .await
        .map_err(DbError::Query)?;
    Ok(())
}

/// Largest single-node capacity in the pool, if any nodes exist.
pub async fn max_capacity(tx: &mut Transaction<'_, Any>) -> Result<Option<i64>, DbError> {
    sqlx::query_scalar::<_, Option<i64>>("SELECT MAX(capacity) FROM nodes")
        .fetch_one(&mut **tx)
        .await
        .map_err(DbError::Query)
}

/// List all nodes ordered by id. Pool-level read.
pub async fn list_nodes(pool: &AnyPool) -> Result<Vec<NodeRow>, DbError> {
    sqlx::query_as::<_, NodeRow>("SELECT id, capacity, used FROM nodes ORDER BY id ASC")
        .fetch_all(pool)
        .await
        .map_err(DbError::Query)
}

/// Count active reservations. Pool-level read.
pub async fn count_reservations(pool: &AnyPool) -> Result<i64, DbError> {
    sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM reservations")
        .fetch_one(pool)
        .await
        .map_err(DbError::Query)
}
