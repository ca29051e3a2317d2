//! Database layer for the allocation service.
//!
//! This module provides:
//! - Connection pool management over the `sqlx` Any driver
//! - Dialect detection from the database URL scheme
//! - Schema bootstrap for the two tables (nodes, reservations)
//! - The row gateway used by the allocator and the seed routine
//!
//! Two dialects are supported. Postgres is the production dialect and uses
//! `SELECT ... FOR UPDATE SKIP LOCKED` row locking; SQLite is the
//! development/test dialect and relies on the guarded conditional update
//! alone, with coarser database-level locking.

mod error;
mod seed;
pub mod store;

pub use error::{is_unique_violation, DbError};
pub use seed::seed_nodes;

use std::sync::OnceLock;
use std::time::Duration;

use sqlx::any::AnyPoolOptions;
use sqlx::AnyPool;
use tracing::info;

/// Database configuration.
#[derive(Debug, Clone)]
pub struct DbConfig {
    /// Database connection URL. The dialect is chosen from the scheme.
    pub database_url: String,

    /// Maximum number of connections in the pool.
    pub max_connections: u32,

    /// Minimum number of idle connections.
    pub min_connections: u32,

    /// Connection acquire timeout.
    pub acquire_timeout: Duration,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            database_url: "sqlite::memory:".to_string(),
            max_connections: 10,
            min_connections: 1,
            acquire_timeout: Duration::from_secs(5),
        }
    }
}

/// SQL dialect behind the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    Postgres,
    Sqlite,
}

impl Dialect {
    /// Determine the dialect from a database URL scheme.
    pub fn from_url(url: &str) -> Result<Self, DbError> {
        let scheme = url.split(':').next().unwrap_or_default();
        match scheme {
            "postgres" | "postgresql" => Ok(Self::Postgres),
            "sqlite" => Ok(Self::Sqlite),
            other => Err(DbError::UnsupportedScheme(other.to_string())),
        }
    }

    /// Whether the dialect supports `FOR UPDATE SKIP LOCKED` row locking.
    pub fn supports_skip_locked(&self) -> bool {
        matches!(self, Self::Postgres)
    }
}

fn install_drivers() {
    static INSTALLED: OnceLock<()> = OnceLock::new();
    INSTALLED.get_or_init(|| {
        sqlx::any::install_default_drivers();
    });
}

/// Database connection pool wrapper.
#[derive(Clone)]
pub struct Database {
    pool: AnyPool,
    dialect: Dialect,
}

impl Database {
    /// Create a new database connection pool.
    pub async fn connect(config: &DbConfig) -> Result<Self, DbError> {
        install_drivers();

        let dialect = Dialect::from_url(&config.database_url)?;

        // An in-memory SQLite database exists per connection; a wider pool
        // would hand out connections that see different databases.
        let max_connections =
            if dialect == Dialect::Sqlite && config.database_url.contains(":memory:") {
                1
            } else {
                config.max_connections
            };

        info!(
            dialect = ?dialect,
            max_connections,
            min_connections = config.min_connections,
            "Connecting to database"
        );

        let pool = AnyPoolOptions::new()
            .max_connections(max_connections)
            .min_connections(config.min_connections.min(max_connections))
            .acquire_timeout(config.acquire_timeout)
            .connect(&config.database_url)
            .await
            .map_err(DbError::Connect)?;

        info!("Database connection pool established");

        Ok(Self { pool, dialect })
    }

    /// Get a reference to the underlying connection pool.
    pub fn pool(&self) -> &AnyPool {
        &self.pool
    }

    /// The dialect behind the pool.
    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    /// Check if the database is reachable.
    pub async fn health_check(&self) -> Result<(), DbError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(DbError::Query)?;
        Ok(())
    }

    /// Create the nodes and reservations tables if they do not exist.
    ///
    /// The DDL is portable across both dialects, so a single bootstrap path
    /// serves production and development stores alike.
    pub async fn ensure_schema(&self) -> Result<(), DbError> {
        info!("Ensuring database schema");

        let statements = [
            r#"
            CREATE TABLE IF NOT EXISTS nodes (
                id        BIGINT PRIMARY KEY,
                capacity  BIGINT NOT NULL,
                used      BIGINT NOT NULL DEFAULT 0,
                CHECK (used >= 0),
                CHECK (used <= capacity)
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS reservations (
                request_id TEXT PRIMARY KEY,
                node_id    BIGINT NOT NULL REFERENCES nodes(id),
                tokens     BIGINT NOT NULL CHECK (tokens > 0),
                created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
            )
            "#,
            "CREATE INDEX IF NOT EXISTS idx_reservations_node_id ON reservations (node_id)",
        ];

        for ddl in statements {
            sqlx::query(ddl)
                .execute(&self.pool)
                .await
                .map_err(DbError::Schema)?;
        }

        Ok(())
    }
}
