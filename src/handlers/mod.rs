//! # API Handlers
//!
//! HTTP endpoint handlers. Handlers only translate between HTTP and the
//! pipeline; all behavior lives in the pipeline services.

pub mod dead_letters;
pub mod events;
pub mod ingest;

use axum::{extract::State, http::StatusCode, response::Json};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::db;
use crate::models::ServiceInfo;
use crate::server::AppState;

/// Root handler that returns basic service information
#[utoipa::path(
    get,
    path = "/",
    responses(
        (status = 200, description = "Service information", body = ServiceInfo)
    ),
    tag = "root"
)]
pub async fn root() -> Json<ServiceInfo> {
    Json(ServiceInfo::default())
}

/// Health probe response
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct HealthStatus {
    /// `ok` or `unavailable`
    #[schema(example = "ok")]
    pub status: String,
    /// Whether the database answered a ping
    pub database: bool,
}

/// Liveness and database reachability
#[utoipa::path(
    get,
    path = "/healthz",
    responses(
        (status = 200, description = "Service healthy", body = HealthStatus),
        (status = 503, description = "Database unreachable", body = HealthStatus)
    ),
    tag = "root"
)]
pub async fn healthz(State(state): State<AppState>) -> (StatusCode, Json<HealthStatus>) {
    match db::health_check(&state.db).await {
        Ok(()) => (
            StatusCode::OK,
            Json(HealthStatus {
                status: "ok".to_string(),
                database: true,
            }),
        ),
        Err(err) => {
            tracing::warn!(error = %err, "Health check failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(HealthStatus {
                    status: "unavailable".to_string(),
                    database: false,
                }),
            )
        }
    }
}
