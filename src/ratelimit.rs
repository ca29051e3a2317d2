//! Token-bucket admission control.
//!
//! A global bucket and one bucket per client key must both admit a request
//! before the allocator is invoked. Bucket state lives behind a single
//! short mutex critical section; the lock is never held across an await
//! point. Client-key cardinality is bounded by least-recently-used
//! eviction at a configurable soft cap.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Rate limiter configuration.
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    /// Whether admission control is enabled at all.
    pub enabled: bool,

    /// Per-client burst size.
    pub capacity: f64,

    /// Per-client refill rate, tokens per second.
    pub refill_rps: f64,

    /// Global burst size.
    pub global_capacity: f64,

    /// Global refill rate, tokens per second.
    pub global_rps: f64,

    /// Soft cap on tracked client keys.
    pub max_keys: usize,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            capacity: 20.0,
            refill_rps: 10.0,
            global_capacity: 200.0,
            global_rps: 100.0,
            max_keys: 10_000,
        }
    }
}

/// Outcome of an admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Admitted,
    /// Rejected; retry once a token becomes available in whichever bucket
    /// is short.
    Limited { retry_after: Duration },
}

#[derive(Debug, Clone)]
struct Bucket {
    tokens: f64,
    last: Instant,
    capacity: f64,
    rate: f64,
}

impl Bucket {
    fn new(capacity: f64, rate: f64, now: Instant) -> Self {
        Self {
            tokens: capacity,
            last: now,
            capacity,
            rate,
        }
    }

    fn refill(&mut self, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.rate).min(self.capacity);
        self.last = now;
    }

    /// Seconds until one token is available.
    fn wait_for_token(&self) -> f64 {
        let need = (1.0 - self.tokens).max(0.0);
        if self.rate > 0.0 {
            need / self.rate
        } else {
            f64::INFINITY
        }
    }
}

struct LimiterState {
    global: Bucket,
    clients: HashMap<String, Bucket>,
}

/// In-process token-bucket limiter keyed by client identity.
pub struct TokenBucketLimiter {
    config: RateLimitConfig,
    state: Mutex<LimiterState>,
}

impl TokenBucketLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        let now = Instant::now();
        let global = Bucket::new(config.global_capacity, config.global_rps, now);
        Self {
            config,
            state: Mutex::new(LimiterState {
                global,
                clients: HashMap::new(),
            }),
        }
    }

    /// Check whether a request from `client_key` is admitted.
    pub fn check(&self, client_key: &str) -> Admission {
        self.check_at(client_key, Instant::now())
    }

    fn check_at(&self, client_key: &str, now: Instant) -> Admission {
        if !self.config.enabled {
            return Admission::Admitted;
        }

        let mut guard = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let state = &mut *guard;

        if state.clients.len() >= self.config.max_keys && !state.clients.contains_key(client_key) {
            evict_lru(&mut state.clients);
        }

        state.global.refill(now);
        let global_wait = state.global.wait_for_token();
        let global_ok = state.global.tokens >= 1.0;

        let client = state
            .clients
            .entry(client_key.to_string())
            .or_insert_with(|| Bucket::new(self.config.capacity, self.config.refill_rps, now));
        client.refill(now);
        let client_ok = client.tokens >= 1.0;

        if global_ok && client_ok {
            client.tokens -= 1.0;
            state.global.tokens -= 1.0;
            return Admission::Admitted;
        }

        let wait = client.wait_for_token().max(global_wait);
        let retry_after = if wait.is_finite() {
            Duration::from_secs_f64(wait.max(0.0))
        } else {
            Duration::from_secs(u32::MAX as u64)
        };
        Admission::Limited { retry_after }
    }
}

fn evict_lru(clients: &mut HashMap<String, Bucket>) {
    let oldest = clients
        .iter()
        .min_by_key(|(_, bucket)| bucket.last)
        .map(|(key, _)| key.clone());
    if let Some(key) = oldest {
        clients.remove(&key);
    }
}

/// Round a retry-after duration up to whole seconds for the HTTP header.
pub fn retry_after_secs(retry_after: Duration) -> u64 {
    retry_after.as_secs_f64().ceil() as u64
}
