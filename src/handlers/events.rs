//! # Event API Handlers

use axum::{
    extract::{Path, State, rejection::JsonRejection},
    response::Json,
};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::auth::OperatorAuth;
use crate::error::{ApiError, validation_error};
use crate::server::AppState;

/// Request body for acknowledging an event
#[derive(Debug, Deserialize, ToSchema)]
pub struct AcknowledgeRequest {
    /// Operator taking ownership of the issue
    #[schema(example = "jane.doe")]
    pub acknowledged_by: String,
}

/// Acknowledgement state of an event
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct AcknowledgementResponse {
    pub event_id: Uuid,
    pub acknowledged_by: Option<String>,
    /// RFC 3339 timestamp of the first acknowledgement
    pub acknowledged_at: Option<String>,
}

/// Acknowledge an event so its critical notifications stop escalating.
#[utoipa::path(
    post,
    path = "/v1/events/{event_id}/acknowledge",
    security(("bearer_auth" = [])),
    params(
        ("event_id" = Uuid, Path, description = "Event identifier")
    ),
    request_body = AcknowledgeRequest,
    responses(
        (status = 200, description = "Event acknowledged", body = AcknowledgementResponse),
        (status = 400, description = "Invalid request", body = ApiError),
        (status = 401, description = "Unauthorized", body = ApiError),
        (status = 404, description = "Event not found", body = ApiError)
    ),
    tag = "events"
)]
pub async fn acknowledge(
    _operator: OperatorAuth,
    State(state): State<AppState>,
    Path(event_id): Path<Uuid>,
    payload: Result<Json<AcknowledgeRequest>, JsonRejection>,
) -> Result<Json<AcknowledgementResponse>, ApiError> {
    let Json(request) = payload?;
    let acknowledged_by = request.acknowledged_by.trim();
    if acknowledged_by.is_empty() {
        return Err(validation_error(
            "Invalid acknowledgement",
            serde_json::json!({ "acknowledged_by": "must not be empty" }),
        ));
    }

    let event = state.pipeline.acknowledge(event_id, acknowledged_by).await?;
    Ok(Json(AcknowledgementResponse {
        event_id: event.id,
        acknowledged_by: event.acknowledged_by,
        acknowledged_at: event.acknowledged_at.map(|at| at.to_rfc3339()),
    }))
}
