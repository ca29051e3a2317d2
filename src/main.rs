//! tokenplane
//!
//! A token-budget allocation service over a pool of compute nodes. Clients
//! reserve a contiguous token budget against a request identifier; the
//! service places it on a node under the active strategy and releases it
//! when the same identifier is returned.

use std::net::SocketAddr;

use anyhow::Result;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use tokenplane::api;
use tokenplane::config::Config;
use tokenplane::db::{seed_nodes, Database};
use tokenplane::state::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("Starting tokenplane");

    let config = Config::from_env()?;
    info!(listen_addr = %config.listen_addr, profile = ?config.profile, "Configuration loaded");

    let db = match Database::connect(&config.db).await {
        Ok(db) => db,
        Err(e) => {
            error!(error = %e, "Failed to connect to database");
            return Err(e.into());
        }
    };

    db.ensure_schema().await?;
    seed_nodes(&db, config.nodes, config.node_budget).await?;

    let state = AppState::new(db, &config);
    let app = api::create_router(state);

    let listener = tokio::net::TcpListener::bind(&config.listen_addr).await?;
    info!(addr = %config.listen_addr, "Listening for connections");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}
