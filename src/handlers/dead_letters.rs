//! # Dead-letter API Handler

use axum::{
    extract::{Query, State},
    response::Json,
};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::auth::OperatorAuth;
use crate::error::ApiError;
use crate::models::dead_letter_job;
use crate::server::AppState;

const DEFAULT_LIMIT: u64 = 50;
const MAX_LIMIT: u64 = 200;

/// Query parameters for listing dead letters
#[derive(Debug, Deserialize)]
pub struct ListDeadLettersQuery {
    /// Maximum number of entries to return (default: 50, max: 200)
    pub limit: Option<u64>,
}

/// One exhausted job
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct DeadLetterInfo {
    #[schema(example = "550e8400-e29b-41d4-a716-446655440000")]
    pub id: String,
    #[schema(example = "550e8400-e29b-41d4-a716-446655440000")]
    pub event_id: String,
    #[schema(example = 5)]
    pub attempts: i32,
    /// Last processing error
    pub error: serde_json::Value,
    #[schema(example = "2026-01-01T00:00:00Z")]
    pub created_at: String,
}

/// Response payload for the dead-letter listing
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct DeadLettersResponse {
    pub dead_letters: Vec<DeadLetterInfo>,
}

impl From<dead_letter_job::Model> for DeadLetterInfo {
    fn from(model: dead_letter_job::Model) -> Self {
        Self {
            id: model.id.to_string(),
            event_id: model.event_id.to_string(),
            attempts: model.attempts,
            error: model.error,
            created_at: model.created_at.to_rfc3339(),
        }
    }
}

/// List jobs that exhausted their retries, newest first.
#[utoipa::path(
    get,
    path = "/v1/dead-letters",
    security(("bearer_auth" = [])),
    params(
        ("limit" = Option<u64>, Query, description = "Maximum number of entries to return (default 50, max 200)")
    ),
    responses(
        (status = 200, description = "Dead-lettered jobs", body = DeadLettersResponse),
        (status = 401, description = "Unauthorized", body = ApiError)
    ),
    tag = "events"
)]
pub async fn list_dead_letters(
    _operator: OperatorAuth,
    State(state): State<AppState>,
    Query(query): Query<ListDeadLettersQuery>,
) -> Result<Json<DeadLettersResponse>, ApiError> {
    let limit = query.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);
    let rows = state.pipeline.dead_letters.list(limit).await?;
    Ok(Json(DeadLettersResponse {
        dead_letters: rows.into_iter().map(DeadLetterInfo::from).collect(),
    }))
}
