//! Health check

use axum::{extract::State, routing::get, Json, Router};
use serde_json::json;

use crate::{AppState, ApiResult};

pub fn routes() -> Router<AppState> {
    Router::new().route("/health", get(health))
}

async fn health(State(state): State<AppState>) -> ApiResult<Json<serde_json::Value>> {
    // A trivial query proves the database is reachable
    sqlx::query_scalar::<_, i64>("SELECT 1")
        .fetch_one(&state.db)
        .await?;

    Ok(Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    })))
}
