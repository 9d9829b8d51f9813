//! JobScout engine library interface
//!
//! Exposes the pipeline, persistence and API modules for the binary and
//! for integration tests.

pub mod api;
pub mod db;
pub mod detect;
pub mod discovery;
pub mod embed;
pub mod error;
pub mod extract;
pub mod fetch;
pub mod maintenance;
pub mod matching;
pub mod normalize;
pub mod pipeline;
pub mod types;

pub use crate::error::{ApiError, ApiResult};

use axum::Router;
use sqlx::SqlitePool;
use std::sync::Arc;

use jobscout_common::Config;

use crate::pipeline::{Pipeline, PipelineScheduler};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    /// Database connection pool
    pub db: SqlitePool,
    /// The pipeline orchestrator
    pub pipeline: Arc<Pipeline>,
    /// Periodic full-run driver
    pub scheduler: Arc<PipelineScheduler>,
}

impl AppState {
    pub fn new(db: SqlitePool, config: Config) -> anyhow::Result<Self> {
        let pipeline = Pipeline::new(db.clone(), config)?;
        let scheduler = PipelineScheduler::new(Arc::clone(&pipeline));
        Ok(Self {
            db,
            pipeline,
            scheduler,
        })
    }
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .nest("/api/jobs", api::jobs::routes())
        .nest("/api/candidates", api::candidates::routes())
        .nest("/api/admin", api::admin::routes())
        .merge(api::health::routes())
        .with_state(state)
}
