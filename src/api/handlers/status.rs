use axum::{
    extract::{OriginalUri, State},
    http::StatusCode,
    Json,
};
use chrono::Utc;
use serde::Serialize;
use std::collections::BTreeMap;

use crate::api::handlers::AppState;
use crate::api::middleware::AppError;
use crate::services::database::{PoolFactory, PoolStatus};

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub status: &'static str,
    pub started: String,
    pub uptime: String,
    /// Open pools by connection name
    pub pools: BTreeMap<String, PoolStatus>,
}

/// Liveness check with process uptime
pub async fn status<F: PoolFactory>(State(state): State<AppState<F>>) -> Json<StatusResponse> {
    let elapsed = (Utc::now() - state.started_at).num_seconds().max(0) as u64;
    Json(StatusResponse {
        status: "ok",
        started: state.started_at.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
        uptime: format_uptime(elapsed),
        pools: state.pool_manager.pool_statuses().await,
    })
}

/// JSON 404 for every unknown route
pub async fn not_found(OriginalUri(uri): OriginalUri) -> AppError {
    AppError::NotFound {
        message: StatusCode::NOT_FOUND
            .canonical_reason()
            .unwrap_or("Not Found")
            .to_string(),
        details: Some(format!("Path '{}' not found", uri.path())),
    }
}

/// `1d 02h 03m 04s`, dropping leading zero units.
fn format_uptime(total_seconds: u64) -> String {
    let days = total_seconds / 86_400;
    let hours = (total_seconds % 86_400) / 3_600;
    let minutes = (total_seconds % 3_600) / 60;
    let seconds = total_seconds % 60;

    if days > 0 {
        format!("{}d {:02}h {:02}m {:02}s", days, hours, minutes, seconds)
    } else if hours > 0 {
        format!("{:02}h {:02}m {:02}s", hours, minutes, seconds)
    } else if minutes > 0 {
        format!("{:02}m {:02}s", minutes, seconds)
    } else {
        format!("{:02}s", seconds)
    }
}
