//! Configuration for the allocation service.

use std::net::SocketAddr;

use anyhow::{bail, Context, Result};

use crate::alloc::Strategy;
use crate::db::DbConfig;
use crate::ratelimit::RateLimitConfig;

/// Deployment profile, selected via `APP_ENV`.
///
/// The profile only affects defaults: `prod` refuses to start without an
/// explicit `DATABASE_URL`, while `dev` and `test` fall back to SQLite.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Profile {
    Prod,
    Dev,
    Test,
}

impl Profile {
    fn from_env() -> Self {
        match std::env::var("APP_ENV").as_deref() {
            Ok("prod") => Self::Prod,
            Ok("test") => Self::Test,
            _ => Self::Dev,
        }
    }
}

/// Service configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Address to listen on for HTTP connections.
    pub listen_addr: SocketAddr,

    /// Deployment profile.
    pub profile: Profile,

    /// Database settings.
    pub db: DbConfig,

    /// Number of nodes ensured at seed time.
    pub nodes: i64,

    /// Per-node token capacity at seed time.
    pub node_budget: i64,

    /// Initial placement strategy.
    pub strategy: Strategy,

    /// Requests at or above this fraction of `node_budget` take the
    /// fragmentation override (worst-fit placement).
    pub large_request_ratio: f64,

    /// Bounded retry budget for contended allocations.
    pub alloc_max_retries: u32,

    /// Admission control settings.
    pub rate_limit: RateLimitConfig,

    /// `Retry-After` value returned with overloaded responses, in seconds.
    pub overload_retry_after_secs: u32,
}

fn env_parsed<T: std::str::FromStr>(name: &str, default: T) -> Result<T> {
    match std::env::var(name) {
        Ok(raw) => raw
            .parse()
            .map_err(|_| anyhow::anyhow!("invalid value for {name}: {raw:?}")),
        Err(_) => Ok(default),
    }
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        let profile = Profile::from_env();

        let database_url = match std::env::var("DATABASE_URL") {
            Ok(url) => url,
            Err(_) => match profile {
                Profile::Prod => bail!("DATABASE_URL must be set for the prod profile"),
                Profile::Dev => "sqlite://dev.db?mode=rwc".to_string(),
                Profile::Test => "sqlite::memory:".to_string(),
            },
        };

        let port: u16 = env_parsed("PORT", 3000)?;
        let listen_addr = format!("0.0.0.0:{port}")
            .parse()
            .context("invalid listen address")?;

        let nodes: i64 = env_parsed("NODES", 2)?;
        if nodes < 1 {
            bail!("NODES must be at least 1");
        }
        let node_budget: i64 = env_parsed("NODE_BUDGET", 300)?;
        if node_budget < 1 {
            bail!("NODE_BUDGET must be at least 1");
        }

        let strategy: Strategy = env_parsed("ALLOC_STRATEGY", Strategy::Best)?;

        let large_request_ratio: f64 = env_parsed("LARGE_REQUEST_RATIO", 0.5)?;
        if !(0.0..=1.0).contains(&large_request_ratio) {
            bail!("LARGE_REQUEST_RATIO must be within [0.0, 1.0]");
        }

        Ok(Self {
            listen_addr,
            profile,
            db: DbConfig {
                database_url,
                max_connections: env_parsed("DB_POOL_SIZE", 10)?,
                min_connections: env_parsed("DB_MIN_CONNECTIONS", 1)?,
                acquire_timeout: std::time::Duration::from_secs(env_parsed(
                    "DB_POOL_TIMEOUT_SECS",
                    5,
                )?),
            },
            nodes,
            node_budget,
            strategy,
            large_request_ratio,
            alloc_max_retries: env_parsed("ALLOC_MAX_RETRIES", 8)?,
            rate_limit: RateLimitConfig {
                enabled: env_parsed("RATE_LIMIT_ENABLED", true)?,
                capacity: env_parsed("RATE_LIMIT_CAPACITY", 20.0)?,
                refill_rps: env_parsed("RATE_LIMIT_RPS", 10.0)?,
                global_capacity: env_parsed("RATE_LIMIT_GLOBAL_CAPACITY", 200.0)?,
                global_rps: env_parsed("RATE_LIMIT_GLOBAL_RPS", 100.0)?,
                max_keys: env_parsed("RATE_LIMIT_MAX_KEYS", 10_000)?,
            },
            overload_retry_after_secs: env_parsed("OVERLOAD_RETRY_AFTER_SECS", 2)?,
        })
    }
}
