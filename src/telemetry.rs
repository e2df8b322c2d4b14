//! Telemetry: global subscriber setup, request-scoped trace context and the
//! metric catalogue emitted by the pipeline.

use std::any::type_name_of_val;
use std::sync::atomic::{AtomicBool, Ordering};

use axum::http::HeaderMap;
use log::LevelFilter;
use metrics::{Unit, describe_counter, describe_gauge, describe_histogram};
use thiserror::Error;
use tokio::task_local;
use tracing_log::LogTracer;
use tracing_subscriber::{
    EnvFilter, fmt,
    layer::Layer,
    layer::SubscriberExt,
    util::{SubscriberInitExt, TryInitError},
};
use uuid::Uuid;

use crate::config::AppConfig;

/// Header used to propagate a caller-supplied correlation id.
pub const TRACE_ID_HEADER: &str = "x-trace-id";

/// Trace context containing request correlation ID.
#[derive(Debug, Clone)]
pub struct TraceContext {
    pub trace_id: String,
}

impl TraceContext {
    /// Reuse the caller's `x-trace-id` when it is printable, otherwise mint one.
    pub fn from_headers(headers: &HeaderMap) -> Self {
        let trace_id = headers
            .get(TRACE_ID_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|value| !value.is_empty() && value.len() <= 128)
            .map(str::to_string)
            .unwrap_or_else(|| Uuid::new_v4().simple().to_string());
        Self { trace_id }
    }
}

task_local! {
    static ACTIVE_TRACE_CONTEXT: TraceContext;
}

/// Errors that can occur while initializing global telemetry.
#[derive(Debug, Error)]
pub enum TelemetryInitError {
    #[error("failed to install log tracer bridge: {0}")]
    LogTracer(#[from] log::SetLoggerError),
    #[error("failed to install tracing subscriber: {0}")]
    Subscriber(#[from] TryInitError),
}

static TELEMETRY_INITIALIZED: AtomicBool = AtomicBool::new(false);

/// Initialize global tracing/logging exactly once, wiring `log::` macros into the tracing pipeline.
pub fn init_tracing(config: &AppConfig) -> Result<(), TelemetryInitError> {
    if TELEMETRY_INITIALIZED
        .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
        .is_err()
    {
        return Ok(());
    }

    // sqlx and other dependencies still log through `log::`
    if let Err(err) = LogTracer::builder()
        .with_max_level(LevelFilter::Trace)
        .init()
    {
        let logger_type = type_name_of_val(log::logger());
        if !logger_type.contains("LogTracer") {
            eprintln!(
                "Warning: Failed to install log tracer bridge: {}. `log::` records will not reach the tracing subscriber.",
                err
            );
        }
    }

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    let fmt_layer = match config.log_format.as_str() {
        "pretty" => fmt::layer().pretty().boxed(),
        _ => fmt::layer().json().boxed(),
    };

    if let Err(err) = tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .try_init()
    {
        TELEMETRY_INITIALIZED.store(false, Ordering::SeqCst);
        eprintln!(
            "Warning: Failed to set global tracing subscriber: {}. Default subscriber remains in effect.",
            err
        );
    }

    describe_metrics();

    Ok(())
}

/// Register descriptions for every metric the pipeline records.
pub fn describe_metrics() {
    describe_counter!("events_ingested_total", "Events persisted and accepted");
    describe_counter!(
        "events_duplicate_total",
        "Events rejected as duplicates of an existing (source, source_ref)"
    );
    describe_counter!("jobs_failed_total", "Worker job attempts that failed");
    describe_counter!(
        "jobs_dead_lettered_total",
        "Jobs that exhausted their retry budget"
    );
    describe_counter!("jobs_reconciled_total", "Unqueued events re-enqueued by the sweep");
    describe_counter!("rule_results_triggered_total", "Rules whose condition held");
    describe_counter!("notifications_created_total", "Notifications persisted");
    describe_counter!(
        "notifications_escalated_total",
        "Critical notifications escalated to managers"
    );
    describe_histogram!(
        "worker_job_duration_ms",
        Unit::Milliseconds,
        "Wall time of one worker job attempt"
    );
    describe_histogram!(
        "scheduler_run_duration_ms",
        Unit::Milliseconds,
        "Wall time of one scheduled trigger"
    );
    describe_gauge!("queue_in_flight", "Event ids currently queued or being processed");
}

/// Execute `future` within the provided trace context, making it available through task-local
/// storage for the duration of the request.
pub async fn with_trace_context<Fut, R>(context: TraceContext, future: Fut) -> R
where
    Fut: std::future::Future<Output = R>,
{
    ACTIVE_TRACE_CONTEXT.scope(context, future).await
}

/// Get the currently active trace ID, if one has been set for the running task.
pub fn current_trace_id() -> Option<String> {
    ACTIVE_TRACE_CONTEXT
        .try_with(|ctx| ctx.trace_id.clone())
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[tokio::test]
    async fn trace_id_is_scoped_to_the_future() {
        assert!(current_trace_id().is_none());

        let context = TraceContext {
            trace_id: "trace-42".to_string(),
        };
        let seen = with_trace_context(context, async { current_trace_id() }).await;

        assert_eq!(seen.as_deref(), Some("trace-42"));
        assert!(current_trace_id().is_none());
    }

    #[test]
    fn caller_trace_id_is_reused() {
        let mut headers = HeaderMap::new();
        headers.insert(TRACE_ID_HEADER, HeaderValue::from_static("abc-123"));
        assert_eq!(TraceContext::from_headers(&headers).trace_id, "abc-123");

        let generated = TraceContext::from_headers(&HeaderMap::new());
        assert_eq!(generated.trace_id.len(), 32);
    }
}
