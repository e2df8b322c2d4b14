//! # Ingestion API Handler

use axum::{
    extract::{Path, State, rejection::JsonRejection},
    http::StatusCode,
    response::Json,
};
use serde_json::Value;

use crate::auth::OperatorAuth;
use crate::error::ApiError;
use crate::ingestion::IngestOutcome;
use crate::server::AppState;

/// Ingest one raw upstream event.
///
/// Returns 202 when the event was stored and queued, 200 when the
/// `(source, source_ref)` pair was already ingested.
#[utoipa::path(
    post,
    path = "/v1/ingest/{source}",
    security(("bearer_auth" = [])),
    params(
        ("source" = String, Path, description = "Upstream system (erp, oms, tms, crm, ecommerce, wfm, manual)")
    ),
    request_body(content = serde_json::Value, description = "Raw upstream payload", content_type = "application/json"),
    responses(
        (status = 202, description = "Event accepted", body = IngestOutcome),
        (status = 200, description = "Duplicate event", body = IngestOutcome),
        (status = 400, description = "Invalid payload", body = ApiError),
        (status = 401, description = "Unauthorized", body = ApiError),
        (status = 404, description = "Unregistered source", body = ApiError)
    ),
    tag = "ingest"
)]
pub async fn ingest(
    _operator: OperatorAuth,
    State(state): State<AppState>,
    Path(source): Path<String>,
    payload: Result<Json<Value>, JsonRejection>,
) -> Result<(StatusCode, Json<IngestOutcome>), ApiError> {
    let Json(raw) = payload?;
    let outcome = state.pipeline.ingestion.ingest_raw(&source, &raw).await?;

    let status = if outcome.duplicate {
        StatusCode::OK
    } else {
        StatusCode::ACCEPTED
    };
    Ok((status, Json(outcome)))
}
