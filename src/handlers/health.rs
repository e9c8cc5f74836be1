use axum::Json;
use crate::config;
use crate::models::HealthResponse;
use tracing::debug;

/// Health check endpoint
pub async fn health_check() -> Json<HealthResponse> {
    debug!("Health check requested");
    Json(HealthResponse {
        status: "ok".to_string(),
        message: "Server is running".to_string(),
        service: config::get_config().service_name.clone(),
    })
}

/// Readiness check endpoint. All live state is in-process, so a running
/// server is a ready one.
pub async fn ready_check() -> Json<HealthResponse> {
    debug!("Readiness check requested");
    Json(HealthResponse {
        status: "ok".to_string(),
        message: "Service is ready".to_string(),
        service: config::get_config().service_name.clone(),
    })
}
