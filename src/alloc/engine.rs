//! The placement engine.
//!
//! All correctness rests on the database's row-level locking and the
//! guarded conditional update; no user-space mutex is held across a
//! database call. Expected contention outcomes (lost update race, unique
//! collision on the reservation insert) become retries or the idempotent
//! path and never reach the caller.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::db::store::{self, CandidateOrder, InsertOutcome};
use crate::db::{Database, DbError};

use super::{Strategy, StrategyRegistry};

/// Result of a successful allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Placement {
    pub node_id: i64,
    pub remaining_quota: i64,
}

/// Result of a successful release.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Release {
    pub node_id: i64,
}

/// Allocation engine errors.
#[derive(Debug, thiserror::Error)]
pub enum AllocError {
    /// Malformed input; no state change.
    #[error("invalid request: {0}")]
    Invalid(String),

    /// No node can host the request under the active strategy, or the
    /// retry budget was exhausted under contention. No state change.
    #[error("no node can satisfy the request")]
    Overloaded,

    /// No active reservation for the request id.
    #[error("no active reservation for request id")]
    NotFound,

    /// Unexpected store failure.
    #[error(transparent)]
    Db(#[from] DbError),
}

/// Tuning knobs for the engine.
#[derive(Debug, Clone)]
pub struct AllocatorConfig {
    /// Per-node capacity at seed; the large-request threshold is a fraction
    /// of this value.
    pub node_budget: i64,

    /// Requests at or above `large_request_ratio * node_budget` tokens take
    /// the fragmentation override.
    pub large_request_ratio: f64,

    /// Bounded retry budget for contended attempts.
    pub max_retries: u32,
}

impl Default for AllocatorConfig {
    fn default() -> Self {
        Self {
            node_budget: 300,
            large_request_ratio: 0.5,
            max_retries: 8,
        }
    }
}

impl AllocatorConfig {
    /// Whether a request takes the fragmentation override.
    fn is_large(&self, token_count: i64) -> bool {
        token_count as f64 >= self.large_request_ratio * self.node_budget as f64
    }

    /// Candidate ordering for a call: large requests are placed worst-fit
    /// regardless of the active strategy, so mid-sized nodes are not
    /// fragmented below the point where any large request fits.
    fn candidate_order(&self, strategy: Strategy, token_count: i64) -> CandidateOrder {
        if self.is_large(token_count) {
            CandidateOrder::RemainingDesc
        } else {
            match strategy {
                Strategy::Best => CandidateOrder::RemainingAsc,
                Strategy::Largest => CandidateOrder::RemainingDesc,
            }
        }
    }
}

/// Token-budget allocator over a pool of nodes.
#[derive(Clone)]
pub struct Allocator {
    db: Database,
    strategy: Arc<StrategyRegistry>,
    config: AllocatorConfig,
}

impl Allocator {
    pub fn new(db: Database, strategy: Arc<StrategyRegistry>, config: AllocatorConfig) -> Self {
        Self {
            db,
            strategy,
            config,
        }
    }

    /// Reserve `token_count` tokens under the request id.
    ///
    /// Idempotent: a repeat call with an already-active request id returns
    /// the existing reservation's placement, computed against the node's
    /// current state, regardless of the repeat's `token_count`.
    pub async fn allocate(
        &self,
        request_id: &str,
        token_count: i64,
    ) -> Result<Placement, AllocError> {
        if request_id.is_empty() {
            return Err(AllocError::Invalid("request_id must be non-empty".into()));
        }
        if token_count <= 0 {
            return Err(AllocError::Invalid("token_count must be positive".into()));
        }

        // Read the strategy once so the whole call, retries included, uses
        // one coherent ordering.
        let strategy = self.strategy.get();
        let order = self.config.candidate_order(strategy, token_count);

        for attempt in 0..self.config.max_retries {
            match self
                .try_allocate(request_id, token_count, order, attempt)
                .await
            {
                Ok(Some(placement)) => return Ok(placement),
                Ok(None) => continue,
                Err(AllocError::Db(e))
                    if e.is_retryable() && attempt + 1 < self.config.max_retries =>
                {
                    warn!(
                        request_id,
                        attempt,
                        error = %e,
                        "Retryable store error during allocation"
                    );
                    continue;
                }
                Err(e) => return Err(e),
            }
        }

        debug!(
            request_id,
            token_count,
            retries = self.config.max_retries,
            "Allocation retry budget exhausted"
        );
        Err(AllocError::Overloaded)
    }

    /// One allocation attempt inside its own transaction.
    ///
    /// `Ok(None)` means the attempt lost a race (stale candidate snapshot,
    /// or a reservation insert collision whose winner must be re-read) and
    /// should be retried.
    async fn try_allocate(
        &self,
        request_id: &str,
        token_count: i64,
        order: CandidateOrder,
        attempt: u32,
    ) -> Result<Option<Placement>, AllocError> {
        let dialect = self.db.dialect();
        let mut tx = self.db.pool().begin().await.map_err(DbError::Query)?;

        // Idempotent short-circuit for repeated submissions.
        if let Some(existing) = store::find_reservation(&mut tx, request_id).await? {
            let node = store::node_by_id(&mut tx, existing.node_id)
                .await?
                .ok_or_else(|| DbError::MissingNode {
                    request_id: existing.request_id.clone(),
                    node_id: existing.node_id,
                })?;
            tx.commit().await.map_err(DbError::Query)?;
            debug!(
                request_id,
                node_id = node.id,
                "Repeat allocation returned existing reservation"
            );
            return Ok(Some(Placement {
                node_id: node.id,
                remaining_quota: node.remaining(),
            }));
        }

        // Nothing in the pool can ever host a request above the largest
        // node capacity; that is an input error, not overload.
        let max_capacity = store::max_capacity(&mut tx).await?.unwrap_or(0);
        if token_count > max_capacity {
            tx.rollback().await.map_err(DbError::Query)?;
            return Err(AllocError::Invalid(format!(
                "token_count {token_count} exceeds the largest node capacity {max_capacity}"
            )));
        }

        let Some(candidate) = store::lock_candidate(&mut tx, dialect, token_count, order).await?
        else {
            tx.commit().await.map_err(DbError::Query)?;
            return Err(AllocError::Overloaded);
        };

        if !store::try_reserve(&mut tx, candidate.id, token_count).await? {
            // The snapshot went stale between selection and update; another
            // transaction consumed the node's remaining capacity.
            tx.rollback().await.map_err(DbError::Query)?;
            debug!(
                request_id,
                node_id = candidate.id,
                attempt,
                "Lost conditional update race, retrying"
            );
            return Ok(None);
        }

        match store::insert_reservation(&mut tx, request_id, candidate.id, token_count).await? {
            InsertOutcome::Inserted => {}
            InsertOutcome::Conflict => {
                // A concurrent call for the same request id won; undo the
                // capacity change and take the idempotent path next attempt.
                tx.rollback().await.map_err(DbError::Query)?;
                return Ok(None);
            }
        }

        let node = store::node_by_id(&mut tx, candidate.id)
            .await?
            .ok_or_else(|| DbError::MissingNode {
                request_id: request_id.to_string(),
                node_id: candidate.id,
            })?;
        tx.commit().await.map_err(DbError::Query)?;

        Ok(Some(Placement {
            node_id: node.id,
            remaining_quota: node.remaining(),
        }))
    }

    /// Release the reservation held under the request id.
    pub async fn free(&self, request_id: &str) -> Result<Release, AllocError> {
        if request_id.is_empty() {
            return Err(AllocError::Invalid("request_id must be non-empty".into()));
        }

        let dialect = self.db.dialect();
        let mut tx = self.db.pool().begin().await.map_err(DbError::Query)?;

        let Some(reservation) =
            store::find_reservation_locked(&mut tx, dialect, request_id).await?
        else {
            tx.commit().await.map_err(DbError::Query)?;
            return Err(AllocError::NotFound);
        };

        store::lock_node(&mut tx, dialect, reservation.node_id).await?;
        store::release_node(&mut tx, reservation.node_id, reservation.tokens).await?;
        store::delete_reservation(&mut tx, request_id).await?;
        tx.commit().await.map_err(DbError::Query)?;

        debug!(
            request_id,
            node_id = reservation.node_id,
            tokens = reservation.tokens,
            "Released reservation"
        );

        Ok(Release {
            node_id: reservation.node_id,
        })
    }
}
