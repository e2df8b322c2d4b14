//! Integration tests for the HTTP API

use std::sync::Arc;

use anyhow::Result;
use axum::{
    Router,
    body::{Body, to_bytes},
    http::{Request, StatusCode, header},
};
use fulfillment_monitor::{
    config::AppConfig,
    repositories::DeadLetterRepository,
    server::{AppState, create_app},
};
use sea_orm::DatabaseConnection;
use serde_json::{Value, json};
use tower::ServiceExt;
use uuid::Uuid;

#[path = "test_utils/mod.rs"]
mod test_utils;

use test_utils::{build_pipeline, erp_event, setup_test_db, test_config};

const TOKEN: &str = "operator-secret";

fn app(db: &DatabaseConnection, config: AppConfig) -> Router {
    let harness = build_pipeline(db, &config);
    create_app(AppState {
        config: Arc::new(config),
        db: db.clone(),
        pipeline: Arc::new(harness.pipeline),
    })
}

fn secured_config() -> AppConfig {
    AppConfig {
        operator_tokens: vec![TOKEN.to_string()],
        ..test_config()
    }
}

fn post_json(uri: &str, body: &Value, token: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json");
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

async fn json_body(response: axum::response::Response) -> Result<Value> {
    let bytes = to_bytes(response.into_body(), usize::MAX).await?;
    Ok(serde_json::from_slice(&bytes)?)
}

#[tokio::test]
async fn root_returns_service_info() -> Result<()> {
    let db = setup_test_db().await?;
    let response = app(&db, secured_config())
        .oneshot(Request::builder().uri("/").body(Body::empty())?)
        .await?;

    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await?;
    assert_eq!(body["service"], "fulfillment-monitor");
    Ok(())
}

#[tokio::test]
async fn healthz_reports_database_ok() -> Result<()> {
    let db = setup_test_db().await?;
    let response = app(&db, secured_config())
        .oneshot(Request::builder().uri("/healthz").body(Body::empty())?)
        .await?;

    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await?;
    assert_eq!(body["status"], "ok");
    assert_eq!(body["database"], true);
    Ok(())
}

#[tokio::test]
async fn ingest_requires_operator_token() -> Result<()> {
    let db = setup_test_db().await?;
    let app = app(&db, secured_config());
    let raw = erp_event("ERP-A1", "stock.ok", "P-A", "O-1", json!({}));

    let missing = app
        .clone()
        .oneshot(post_json("/v1/ingest/erp", &raw, None))
        .await?;
    assert_eq!(missing.status(), StatusCode::UNAUTHORIZED);

    let wrong = app
        .oneshot(post_json("/v1/ingest/erp", &raw, Some("nope")))
        .await?;
    assert_eq!(wrong.status(), StatusCode::UNAUTHORIZED);
    let body = json_body(wrong).await?;
    assert_eq!(body["code"], "UNAUTHORIZED");
    Ok(())
}

#[tokio::test]
async fn local_profile_without_tokens_is_open() -> Result<()> {
    let db = setup_test_db().await?;
    let response = app(&db, test_config())
        .oneshot(post_json(
            "/v1/ingest/erp",
            &erp_event("ERP-A2", "stock.ok", "P-A", "O-1", json!({})),
            None,
        ))
        .await?;

    assert_eq!(response.status(), StatusCode::ACCEPTED);
    Ok(())
}

#[tokio::test]
async fn ingest_accepts_then_reports_duplicate() -> Result<()> {
    let db = setup_test_db().await?;
    let app = app(&db, secured_config());
    let raw = erp_event(
        "ERP-A3",
        "order.confirmed",
        "P-A",
        "O-1",
        json!({"promised_delivery_date": "2026-03-20"}),
    );

    let first = app
        .clone()
        .oneshot(post_json("/v1/ingest/erp", &raw, Some(TOKEN)))
        .await?;
    assert_eq!(first.status(), StatusCode::ACCEPTED);
    let first = json_body(first).await?;
    assert_eq!(first["accepted"], true);
    assert_eq!(first["duplicate"], false);

    let second = app
        .oneshot(post_json("/v1/ingest/erp", &raw, Some(TOKEN)))
        .await?;
    assert_eq!(second.status(), StatusCode::OK);
    let second = json_body(second).await?;
    assert_eq!(second["duplicate"], true);
    assert_eq!(second["event_id"], first["event_id"]);
    Ok(())
}

#[tokio::test]
async fn invalid_payload_returns_field_errors() -> Result<()> {
    let db = setup_test_db().await?;
    let response = app(&db, secured_config())
        .oneshot(post_json(
            "/v1/ingest/erp",
            &json!({"document_no": "ERP-A4", "event_type": "order.confirmed"}),
            Some(TOKEN),
        ))
        .await?;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = json_body(response).await?;
    assert_eq!(body["code"], "VALIDATION_FAILED");
    assert!(body["details"]["project_ref"].is_string());
    assert!(body["details"]["occurred_at"].is_string());
    Ok(())
}

#[tokio::test]
async fn unknown_source_returns_not_found() -> Result<()> {
    let db = setup_test_db().await?;
    let response = app(&db, secured_config())
        .oneshot(post_json("/v1/ingest/sap", &json!({}), Some(TOKEN)))
        .await?;

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let body = json_body(response).await?;
    assert_eq!(body["code"], "UNREGISTERED_SOURCE");
    Ok(())
}

#[tokio::test]
async fn acknowledge_flow() -> Result<()> {
    let db = setup_test_db().await?;
    let app = app(&db, secured_config());

    let ingested = json_body(
        app.clone()
            .oneshot(post_json(
                "/v1/ingest/erp",
                &erp_event("ERP-A5", "stock.ok", "P-A", "O-1", json!({})),
                Some(TOKEN),
            ))
            .await?,
    )
    .await?;
    let event_id = ingested["event_id"].as_str().expect("event id").to_string();

    let empty = app
        .clone()
        .oneshot(post_json(
            &format!("/v1/events/{event_id}/acknowledge"),
            &json!({"acknowledged_by": "  "}),
            Some(TOKEN),
        ))
        .await?;
    assert_eq!(empty.status(), StatusCode::BAD_REQUEST);

    let acknowledged = app
        .clone()
        .oneshot(post_json(
            &format!("/v1/events/{event_id}/acknowledge"),
            &json!({"acknowledged_by": "jane.doe"}),
            Some(TOKEN),
        ))
        .await?;
    assert_eq!(acknowledged.status(), StatusCode::OK);
    let body = json_body(acknowledged).await?;
    assert_eq!(body["event_id"], event_id.as_str());
    assert_eq!(body["acknowledged_by"], "jane.doe");
    assert!(body["acknowledged_at"].is_string());

    let unknown = app
        .oneshot(post_json(
            &format!("/v1/events/{}/acknowledge", Uuid::new_v4()),
            &json!({"acknowledged_by": "jane.doe"}),
            Some(TOKEN),
        ))
        .await?;
    assert_eq!(unknown.status(), StatusCode::NOT_FOUND);
    Ok(())
}

#[tokio::test]
async fn dead_letters_are_listed() -> Result<()> {
    let db = setup_test_db().await?;
    let event_id = Uuid::new_v4();
    DeadLetterRepository::new(db.clone())
        .insert(event_id, 5, json!({"kind": "processing_failure", "message": "boom"}))
        .await?;

    let response = app(&db, secured_config())
        .oneshot(
            Request::builder()
                .uri("/v1/dead-letters?limit=10")
                .header(header::AUTHORIZATION, format!("Bearer {TOKEN}"))
                .body(Body::empty())?,
        )
        .await?;

    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await?;
    let entries = body["dead_letters"].as_array().expect("array");
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0]["event_id"], event_id.to_string());
    assert_eq!(entries[0]["attempts"], 5);
    assert_eq!(entries[0]["error"]["message"], "boom");
    Ok(())
}

#[tokio::test]
async fn trace_id_is_echoed() -> Result<()> {
    let db = setup_test_db().await?;
    let response = app(&db, secured_config())
        .oneshot(
            Request::builder()
                .uri("/")
                .header("x-trace-id", "trace-abc")
                .body(Body::empty())?,
        )
        .await?;

    assert_eq!(
        response
            .headers()
            .get("x-trace-id")
            .and_then(|value| value.to_str().ok()),
        Some("trace-abc")
    );
    Ok(())
}

#[tokio::test]
async fn unauthorized_errors_carry_request_trace_id() -> Result<()> {
    let db = setup_test_db().await?;
    let mut request = post_json("/v1/ingest/erp", &json!({}), None);
    request
        .headers_mut()
        .insert("x-trace-id", "trace-401".parse()?);

    let response = app(&db, secured_config()).oneshot(request).await?;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let body = json_body(response).await?;
    assert_eq!(body["trace_id"], "trace-401");
    Ok(())
}

#[tokio::test]
async fn openapi_document_lists_routes() -> Result<()> {
    let db = setup_test_db().await?;
    let response = app(&db, secured_config())
        .oneshot(Request::builder().uri("/openapi.json").body(Body::empty())?)
        .await?;

    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await?;
    assert_eq!(body["info"]["title"], "Fulfillment Monitor API");
    assert!(body["paths"]["/v1/ingest/{source}"].is_object());
    assert!(body["paths"]["/v1/events/{event_id}/acknowledge"].is_object());
    Ok(())
}
