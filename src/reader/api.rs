//! Reader HTTP routes

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use chrono::{Duration, Utc};
use serde::Deserialize;
use tower_http::cors::{Any, CorsLayer};

use super::{ApiResponse, ReaderState};
use crate::types::Observation;

/// Create the API router
pub fn create_router(state: ReaderState) -> Router {
    Router::new()
        .route("/api/history", get(get_history))
        .route("/api/health", get(get_health))
        .with_state(state)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
}

#[derive(Debug, Deserialize)]
struct HistoryQuery {
    id: Option<String>,
    hours: Option<i64>,
}

/// GET /api/history?id=bitcoin&hours=24 - observations since now - hours
async fn get_history(
    Query(query): Query<HistoryQuery>,
    State(state): State<ReaderState>,
) -> impl IntoResponse {
    let hours = query.hours.unwrap_or(state.default_hours);
    if !(1..=state.max_hours).contains(&hours) {
        return (
            StatusCode::BAD_REQUEST,
            Json(ApiResponse::<Vec<Observation>>::error(format!(
                "hours must be between 1 and {}",
                state.max_hours
            ))),
        );
    }

    let id = query
        .id
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| state.default_id.clone());
    let floor = Utc::now() - Duration::hours(hours);

    match state.store.find_since(&id, floor).await {
        Ok(items) => (StatusCode::OK, Json(ApiResponse::success(items))),
        Err(e) => {
            tracing::warn!(asset_id = %id, error = %e, "History query failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ApiResponse::error(e.to_string())),
            )
        }
    }
}

/// GET /api/health
async fn get_health() -> impl IntoResponse {
    Json(ApiResponse::success("ok"))
}
