//! # Xport Server - Streaming Export Service
//!
//! HTTP frontend of the xport engine. Exposes job creation, streaming
//! download, a health probe, and the benchmark harness over axum, backed by
//! a bounded Postgres connection pool shared across exports.
//!
//! ## Usage
//!
//! ```bash
//! # Run against the default local database
//! xport-server
//!
//! # Point at another database and port
//! DATABASE_URL=postgresql://user:pw@db:5432/exports_db PORT=9090 xport-server
//!
//! # Cap every export at 100k rows (staging aid)
//! EXPORT_ROW_LIMIT=100000 xport-server
//! ```

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use sqlx::postgres::PgPoolOptions;
use tokio::signal;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use xport_core::JobRegistry;

mod benchmark;
mod config;
mod driver;
mod http;
mod mem;

use config::Config;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::parse();

    // One pool for the whole process; every export borrows from it.
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .acquire_timeout(Duration::from_secs(2))
        .idle_timeout(Duration::from_secs(30))
        .connect(&config.database_url)
        .await?;

    let state = http::AppState {
        pool: pool.clone(),
        registry: Arc::new(JobRegistry::new()),
        config: config.clone(),
    };

    let app = http::router(state);
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", config.port)).await?;
    info!(port = config.port, "export server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // In-flight exports have drained; give the connections back.
    pool.close().await;
    info!("pool closed, bye");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c().await.expect("install ctrl-c handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("install sigterm handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    info!("shutdown signal received, draining in-flight exports");
}
