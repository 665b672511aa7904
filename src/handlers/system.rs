//! Health and maintenance handlers

use std::sync::Arc;

use axum::{extract::State, Json};
use serde::Serialize;

use crate::db;
use crate::error::ApiResult;
use crate::models::ApiResponse;
use crate::state::AppState;
use crate::sweeper::{ExpirySweeper, SweepReport};

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub database: String,
    pub version: String,
}

pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let database = match &state.db_pool {
        Some(pool) => match db::check_health(pool).await {
            Ok(()) => "connected".to_string(),
            Err(e) => format!("error: {}", e),
        },
        None => "in-memory".to_string(),
    };

    let status = if database.starts_with("error") {
        "unhealthy"
    } else {
        "healthy"
    };

    Json(HealthResponse {
        status: status.to_string(),
        database,
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// Run an expiry sweep now instead of waiting for the next tick.
pub async fn run_expiry_sweep(
    State(sweeper): State<Arc<ExpirySweeper>>,
) -> ApiResult<Json<ApiResponse<SweepReport>>> {
    let report = sweeper.run_once().await?;
    Ok(Json(ApiResponse::ok(report)))
}
