//! Health endpoint

use crate::ProxyServer;
use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use std::sync::Arc;

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// `healthy` or `unhealthy`
    pub status: &'static str,
}

/// 200 when the primary answers its health probe, 500 otherwise
pub async fn health(State(server): State<Arc<ProxyServer>>) -> Response {
    if server.health.check().await {
        (StatusCode::OK, Json(HealthResponse { status: "healthy" })).into_response()
    } else {
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(HealthResponse {
                status: "unhealthy",
            }),
        )
            .into_response()
    }
}
