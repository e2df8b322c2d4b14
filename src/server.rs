//! # Server Configuration
//!
//! Router assembly and process lifecycle for the fulfillment monitor: the
//! HTTP API, the worker pool and the background scheduler all share one
//! [`Pipeline`] and one shutdown token.

use std::sync::Arc;

use anyhow::Context;
use axum::{
    Router,
    extract::Request,
    http::HeaderValue,
    middleware::{self, Next},
    response::Response,
    routing::{get, post},
};
use sea_orm::DatabaseConnection;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};
use utoipa::{
    Modify, OpenApi,
    openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme},
};
use utoipa_swagger_ui::SwaggerUi;

use crate::auth::auth_middleware;
use crate::config::AppConfig;
use crate::handlers;
use crate::pipeline::Pipeline;
use crate::queue::Job;
use crate::scheduler::PipelineScheduler;
use crate::telemetry::{TRACE_ID_HEADER, TraceContext, with_trace_context};

/// Application state containing shared resources
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub db: DatabaseConnection,
    pub pipeline: Arc<Pipeline>,
}

/// Creates and configures the Axum application router
pub fn create_app(state: AppState) -> Router {
    let protected = Router::new()
        .route("/v1/ingest/{source}", post(handlers::ingest::ingest))
        .route(
            "/v1/events/{event_id}/acknowledge",
            post(handlers::events::acknowledge),
        )
        .route(
            "/v1/dead-letters",
            get(handlers::dead_letters::list_dead_letters),
        )
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ));

    Router::new()
        .route("/", get(handlers::root))
        .route("/healthz", get(handlers::healthz))
        .merge(protected)
        .layer(middleware::from_fn(trace_context_middleware))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
        .merge(SwaggerUi::new("/docs").url("/openapi.json", ApiDoc::openapi()))
}

/// Attach a [`TraceContext`] to the request and echo its id on the response.
async fn trace_context_middleware(mut request: Request, next: Next) -> Response {
    let context = TraceContext::from_headers(request.headers());
    let trace_id = context.trace_id.clone();
    request.extensions_mut().insert(context.clone());

    let mut response = with_trace_context(context, next.run(request)).await;
    if let Ok(value) = HeaderValue::from_str(&trace_id) {
        response.headers_mut().insert(TRACE_ID_HEADER, value);
    }
    response
}

/// Serve the API and run workers plus scheduler until `shutdown` fires.
///
/// In-flight HTTP requests are drained first, then workers finish the job
/// they hold before returning.
pub async fn run_server(
    config: AppConfig,
    db: DatabaseConnection,
    pipeline: Arc<Pipeline>,
    receiver: mpsc::Receiver<Job>,
    shutdown: CancellationToken,
) -> anyhow::Result<()> {
    let addr = config
        .bind_addr()
        .with_context(|| format!("Invalid server address: {}", config.api_bind_addr))?;

    let workers = pipeline.start_workers(receiver, shutdown.clone());
    let scheduler = PipelineScheduler::new(Arc::clone(&pipeline), config.schedule.clone());
    let scheduler_task = tokio::spawn(scheduler.run(shutdown.clone()));

    let state = AppState {
        config: Arc::new(config),
        db,
        pipeline,
    };
    let profile = state.config.profile.clone();
    let app = create_app(state);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    info!(%addr, %profile, "Server listening");

    let server_shutdown = shutdown.clone();
    let served = axum::serve(listener, app)
        .with_graceful_shutdown(async move { server_shutdown.cancelled().await })
        .await;

    // Stop background work even when the listener failed.
    shutdown.cancel();
    workers.join().await;
    if let Err(err) = scheduler_task.await {
        warn!(error = %err, "Scheduler task terminated abnormally");
    }
    info!("Server stopped");

    served.context("HTTP server error")
}

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer_auth",
                SecurityScheme::Http(HttpBuilder::new().scheme(HttpAuthScheme::Bearer).build()),
            );
        }
    }
}

/// OpenAPI documentation
#[derive(OpenApi)]
#[openapi(
    paths(
        crate::handlers::root,
        crate::handlers::healthz,
        crate::handlers::ingest::ingest,
        crate::handlers::events::acknowledge,
        crate::handlers::dead_letters::list_dead_letters,
    ),
    components(
        schemas(
            crate::models::ServiceInfo,
            crate::handlers::HealthStatus,
            crate::ingestion::IngestOutcome,
            crate::handlers::events::AcknowledgeRequest,
            crate::handlers::events::AcknowledgementResponse,
            crate::handlers::dead_letters::DeadLetterInfo,
            crate::handlers::dead_letters::DeadLettersResponse,
            crate::error::ApiError,
        )
    ),
    modifiers(&SecurityAddon),
    info(
        title = "Fulfillment Monitor API",
        description = "Event ingestion and anomaly detection for fulfillment projects",
        version = env!("CARGO_PKG_VERSION"),
    )
)]
pub struct ApiDoc;
