//! jobscout-engine - job ingestion and matching service
//!
//! Hosts the crawl/extract/normalize/embed/match pipeline and the HTTP
//! API over one SQLite database.

use anyhow::Result;
use tracing::info;
use tracing_subscriber::EnvFilter;

use jobscout_common::Config;
use jobscout_engine::{build_router, AppState};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Config::from_env();
    info!("Starting jobscout-engine");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));
    info!("Database: {}", config.database_path.display());

    let pool = jobscout_common::db::init_database(&config.database_path).await?;
    info!("Database connection established");

    let bind_addr = config.bind_addr.clone();
    let state = AppState::new(pool, config)?;

    // Close run rows orphaned by a previous process
    state.pipeline.reconcile_orphaned_runs().await?;

    // The scheduler starts ticking immediately with its default cadence;
    // the admin API can stop or retune it.
    state.scheduler.start(None);

    let app = build_router(state);
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!("Listening on http://{bind_addr}");

    axum::serve(listener, app).await?;

    Ok(())
}
