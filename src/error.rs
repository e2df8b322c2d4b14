//! # Error Handling
//!
//! Pipeline error taxonomy plus the problem+json [`ApiError`] rendered by the
//! HTTP layer, with trace ID propagation.

use axum::{
    extract::rejection::JsonRejection,
    http::{HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::adapters::AdapterError;
use crate::telemetry;
use crate::transports::TransportError;

/// Failures raised anywhere between ingestion and notification dispatch.
///
/// Duplicates are not errors; they surface as an ingestion outcome.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Adapter(#[from] AdapterError),
    #[error("processing failed for event {event_id}: {reason}")]
    ProcessingFailure { event_id: Uuid, reason: String },
    #[error("{channel} transport failed: {reason}")]
    TransportFailure { channel: String, reason: String },
    #[error("storage error: {0}")]
    Storage(#[from] sea_orm::DbErr),
    #[error("event {0} not found")]
    EventNotFound(Uuid),
    #[error("job queue is closed")]
    QueueClosed,
    #[error("job queue is full")]
    QueueFull,
}

impl PipelineError {
    /// Structured form recorded on dead-letter rows.
    pub fn to_details(&self) -> serde_json::Value {
        let kind = match self {
            PipelineError::Adapter(AdapterError::InvalidPayload { .. }) => "invalid_payload",
            PipelineError::Adapter(AdapterError::UnregisteredSource { .. }) => {
                "unregistered_source"
            }
            PipelineError::ProcessingFailure { .. } => "processing_failure",
            PipelineError::TransportFailure { .. } => "transport_failure",
            PipelineError::Storage(_) => "storage",
            PipelineError::EventNotFound(_) => "event_not_found",
            PipelineError::QueueClosed => "queue_closed",
            PipelineError::QueueFull => "queue_full",
        };
        serde_json::json!({ "kind": kind, "message": self.to_string() })
    }
}

impl From<TransportError> for PipelineError {
    fn from(error: TransportError) -> Self {
        PipelineError::TransportFailure {
            channel: error.channel().to_string(),
            reason: error.to_string(),
        }
    }
}

/// Unified API error response structure
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ApiError {
    /// HTTP status code for the response
    #[serde(skip_serializing, skip_deserializing)]
    pub status: StatusCode,
    /// Error code for programmatic handling
    pub code: Box<str>,
    /// Human-readable error message
    pub message: Box<str>,
    /// Additional error details (optional)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Box<serde_json::Value>>,
    /// Suggested retry delay in seconds (optional)
    pub retry_after: Option<u64>,
    /// Correlation trace ID for debugging (optional)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<Box<str>>,
}

impl ApiError {
    /// Create a new API error with the given status code and message
    pub fn new(status: StatusCode, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            status,
            code: code.into().into_boxed_str(),
            message: message.into().into_boxed_str(),
            details: None,
            retry_after: None,
            trace_id: Self::current_trace_id(),
        }
    }

    /// Add details to the error
    pub fn with_details<V: Into<serde_json::Value>>(mut self, details: V) -> Self {
        self.details = Some(Box::new(details.into()));
        self
    }

    /// Set retry after delay
    pub fn with_retry_after(mut self, seconds: u64) -> Self {
        self.retry_after = Some(seconds);
        self
    }

    /// Trace ID of the active request, falling back to a generated correlation ID
    fn current_trace_id() -> Option<Box<str>> {
        telemetry::current_trace_id()
            .map(|trace_id| trace_id.into_boxed_str())
            .or_else(|| {
                Some(format!("corr-{}", &Uuid::new_v4().to_string()[..8]).into_boxed_str())
            })
    }
}

/// True when `error` reports a unique index violation on any supported backend.
pub fn is_unique_violation(error: &sea_orm::DbErr) -> bool {
    use sea_orm::RuntimeErr;

    const PG_UNIQUE: &str = "23505";
    const SQLITE_DUPLICATE_CODES: &[&str] = &["1555", "2067"];

    let runtime_err = match error {
        sea_orm::DbErr::Query(RuntimeErr::SqlxError(sqlx_err))
        | sea_orm::DbErr::Exec(RuntimeErr::SqlxError(sqlx_err)) => sqlx_err,
        _ => return false,
    };

    let Some(db_error) = runtime_err.as_database_error() else {
        return false;
    };

    if db_error.is_unique_violation() {
        return true;
    }

    db_error.code().is_some_and(|code| {
        let code = code.as_ref();
        code == PG_UNIQUE || SQLITE_DUPLICATE_CODES.contains(&code)
    })
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let mut headers = HeaderMap::new();
        headers.insert(
            "content-type",
            HeaderValue::from_static("application/problem+json"),
        );

        if let Some(retry_after) = self.retry_after
            && let Ok(header_value) = HeaderValue::from_str(&retry_after.to_string())
        {
            headers.insert("retry-after", header_value);
        }

        (self.status, headers, axum::Json(self)).into_response()
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(error: anyhow::Error) -> Self {
        tracing::error!("Internal error: {:?}", error);

        Self::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            "INTERNAL_SERVER_ERROR",
            "An internal error occurred",
        )
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        let message = match rejection {
            JsonRejection::JsonDataError(err) => format!("Invalid JSON: {}", err),
            JsonRejection::JsonSyntaxError(err) => format!("JSON syntax error: {}", err),
            JsonRejection::MissingJsonContentType(_) => {
                "Missing 'Content-Type: application/json' header".to_string()
            }
            _ => "Invalid request body".to_string(),
        };

        Self::new(StatusCode::BAD_REQUEST, "VALIDATION_FAILED", message)
    }
}

impl From<sea_orm::DbErr> for ApiError {
    fn from(error: sea_orm::DbErr) -> Self {
        if is_unique_violation(&error) {
            tracing::debug!(?error, "Unique constraint violation detected");
            return Self::new(StatusCode::CONFLICT, "CONFLICT", "Resource already exists");
        }

        match error {
            sea_orm::DbErr::RecordNotFound(record) => Self::new(
                StatusCode::NOT_FOUND,
                "NOT_FOUND",
                format!("Record not found: {}", record),
            ),
            sea_orm::DbErr::Conn(connection_err) => {
                tracing::error!("Database connection error: {:?}", connection_err);
                Self::new(
                    StatusCode::SERVICE_UNAVAILABLE,
                    "SERVICE_UNAVAILABLE",
                    "Database service unavailable",
                )
            }
            _ => {
                tracing::error!("Database error: {:?}", error);
                Self::new(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_SERVER_ERROR",
                    "Database error occurred",
                )
            }
        }
    }
}

impl From<PipelineError> for ApiError {
    fn from(error: PipelineError) -> Self {
        match error {
            PipelineError::Adapter(ref adapter_err @ AdapterError::InvalidPayload { .. }) => {
                validation_error(&adapter_err.to_string(), adapter_err.details_json())
            }
            PipelineError::Adapter(ref adapter_err @ AdapterError::UnregisteredSource { .. }) => {
                ApiError::new(
                    StatusCode::NOT_FOUND,
                    "UNREGISTERED_SOURCE",
                    adapter_err.to_string(),
                )
                .with_details(adapter_err.details_json())
            }
            PipelineError::EventNotFound(event_id) => ApiError::new(
                StatusCode::NOT_FOUND,
                "NOT_FOUND",
                format!("Event {event_id} not found"),
            ),
            PipelineError::Storage(db_err) => db_err.into(),
            PipelineError::QueueClosed | PipelineError::QueueFull => ApiError::new(
                StatusCode::SERVICE_UNAVAILABLE,
                "SERVICE_UNAVAILABLE",
                "Job queue unavailable",
            )
            .with_retry_after(5),
            other => {
                tracing::error!(error = %other, "Pipeline error");
                ApiError::new(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_SERVER_ERROR",
                    "An internal error occurred",
                )
            }
        }
    }
}

/// Create an unauthorized error (401)
pub fn unauthorized(message: Option<&str>) -> ApiError {
    let msg = message.unwrap_or("Authentication required");
    ApiError::new(StatusCode::UNAUTHORIZED, "UNAUTHORIZED", msg)
}

/// Create an unauthorized error (401) with explicit trace_id
pub fn unauthorized_with_trace_id(message: Option<&str>, trace_id: String) -> ApiError {
    let mut error = unauthorized(message);
    error.trace_id = Some(trace_id.into_boxed_str());
    error
}

/// Create a validation error with field details
pub fn validation_error(message: &str, field_errors: serde_json::Value) -> ApiError {
    ApiError::new(StatusCode::BAD_REQUEST, "VALIDATION_FAILED", message).with_details(field_errors)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::BTreeMap;

    #[test]
    fn test_api_error_with_details() {
        let error = ApiError::new(StatusCode::BAD_REQUEST, "BAD_REQUEST", "Test error message")
            .with_details(json!({"field": "value"}));

        assert_eq!(error.details, Some(Box::new(json!({"field": "value"}))));
        assert_eq!(error.retry_after, None);
    }

    #[test]
    fn test_content_type_and_retry_after_headers() {
        let error = ApiError::new(
            StatusCode::SERVICE_UNAVAILABLE,
            "SERVICE_UNAVAILABLE",
            "Queue closed",
        )
        .with_retry_after(5);

        let response = error.into_response();

        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(response.headers().get("retry-after").unwrap(), "5");
        assert_eq!(
            response.headers().get("content-type").unwrap(),
            "application/problem+json"
        );
    }

    #[test]
    fn test_trace_id_generation() {
        let error = ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL", "boom");

        let trace_id = error.trace_id.unwrap();
        assert!(trace_id.starts_with("corr-"));
        assert_eq!(trace_id.len(), 13);
    }

    #[test]
    fn test_invalid_payload_maps_to_validation_failed() {
        let mut details = BTreeMap::new();
        details.insert("data.eta".to_string(), "is required".to_string());
        let err: ApiError = PipelineError::Adapter(AdapterError::InvalidPayload {
            system: "oms".to_string(),
            details,
        })
        .into();

        assert_eq!(err.status, StatusCode::BAD_REQUEST);
        assert_eq!(err.code, Box::from("VALIDATION_FAILED"));
        assert_eq!(err.details.unwrap()["data.eta"], "is required");
    }

    #[test]
    fn test_unregistered_source_maps_to_not_found() {
        let err: ApiError = PipelineError::Adapter(AdapterError::UnregisteredSource {
            system: "sap".to_string(),
        })
        .into();

        assert_eq!(err.status, StatusCode::NOT_FOUND);
        assert_eq!(err.code, Box::from("UNREGISTERED_SOURCE"));
    }

    #[test]
    fn test_database_error_mapping() {
        let api_error: ApiError = sea_orm::DbErr::RecordNotFound("event".to_string()).into();

        assert_eq!(api_error.status, StatusCode::NOT_FOUND);
        assert!(api_error.message.contains("event"));
    }

    #[test]
    fn test_dead_letter_details_carry_kind() {
        let err = PipelineError::ProcessingFailure {
            event_id: Uuid::nil(),
            reason: "entity update failed".to_string(),
        };
        let details = err.to_details();
        assert_eq!(details["kind"], "processing_failure");
        assert!(details["message"].as_str().unwrap().contains("entity update failed"));
    }

    #[test]
    fn test_unauthorized_helper() {
        let auth_error = unauthorized(None);
        assert_eq!(auth_error.status, StatusCode::UNAUTHORIZED);
        assert_eq!(auth_error.message, Box::from("Authentication required"));

        let with_trace = unauthorized_with_trace_id(Some("Invalid token"), "trace-1".to_string());
        assert_eq!(with_trace.trace_id, Some(Box::from("trace-1")));
    }
}
