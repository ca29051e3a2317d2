//! Application state shared across request handlers.

use std::sync::Arc;

use crate::alloc::{Allocator, AllocatorConfig, StrategyRegistry};
use crate::config::Config;
use crate::db::Database;
use crate::ratelimit::TokenBucketLimiter;

/// Shared application state.
///
/// This is passed to all request handlers via Axum's state extractor.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    db: Database,
    allocator: Allocator,
    strategy: Arc<StrategyRegistry>,
    limiter: TokenBucketLimiter,
    overload_retry_after_secs: u32,
}

impl AppState {
    /// Create a new application state from configuration.
    pub fn new(db: Database, config: &Config) -> Self {
        let strategy = Arc::new(StrategyRegistry::new(config.strategy));
        let allocator = Allocator::new(
            db.clone(),
            Arc::clone(&strategy),
            AllocatorConfig {
                node_budget: config.node_budget,
                large_request_ratio: config.large_request_ratio,
                max_retries: config.alloc_max_retries,
            },
        );
        let limiter = TokenBucketLimiter::new(config.rate_limit.clone());

        Self {
            inner: Arc::new(AppStateInner {
                db,
                allocator,
                strategy,
                limiter,
                overload_retry_after_secs: config.overload_retry_after_secs,
            }),
        }
    }

    /// Get a reference to the database.
    pub fn db(&self) -> &Database {
        &self.inner.db
    }

    /// Get a reference to the allocation engine.
    pub fn allocator(&self) -> &Allocator {
        &self.inner.allocator
    }

    /// Get a reference to the strategy registry.
    pub fn strategy(&self) -> &StrategyRegistry {
        &self.inner.strategy
    }

    /// Get a reference to the admission-control limiter.
    pub fn limiter(&self) -> &TokenBucketLimiter {
        &self.inner.limiter
    }

    /// `Retry-After` value for overloaded responses, in seconds.
    pub fn overload_retry_after_secs(&self) -> u32 {
        self.inner.overload_retry_after_secs
    }
}
