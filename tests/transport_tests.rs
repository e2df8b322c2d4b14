//! Integration tests for the HTTP email and ticketing transports

use std::time::Duration;

use fulfillment_monitor::transports::{
    EmailMessage, EmailTransport, HttpEmailTransport, HttpTicketingClient, TicketRequest,
    TicketingClient, TransportError,
};
use serde_json::json;
use uuid::Uuid;
use wiremock::{
    Mock, MockServer, ResponseTemplate,
    matchers::{body_partial_json, header, method, path},
};

fn message() -> EmailMessage {
    EmailMessage {
        to: vec!["ops@example.com".to_string()],
        subject: "[critical] Stock shortage: project P-1".to_string(),
        html: "<p>Stock shortage</p>".to_string(),
        text: "Stock shortage".to_string(),
    }
}

fn email_transport(server: &MockServer) -> HttpEmailTransport {
    HttpEmailTransport::new(
        format!("{}/v1/send", server.uri()),
        Some("mail-token".to_string()),
        "alerts@example.com",
        Duration::from_secs(5),
    )
    .unwrap()
    .with_retry_delay(Duration::from_millis(5))
}

#[tokio::test]
async fn email_is_posted_with_bearer_token() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/send"))
        .and(header("authorization", "Bearer mail-token"))
        .and(body_partial_json(json!({
            "from": "alerts@example.com",
            "to": ["ops@example.com"],
            "subject": "[critical] Stock shortage: project P-1"
        })))
        .respond_with(ResponseTemplate::new(202))
        .expect(1)
        .mount(&server)
        .await;

    email_transport(&server).send(&message()).await.unwrap();
}

#[tokio::test]
async fn email_retries_then_reports_last_status() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/send"))
        .respond_with(ResponseTemplate::new(503))
        .expect(3)
        .mount(&server)
        .await;

    let err = email_transport(&server)
        .send(&message())
        .await
        .expect_err("every attempt fails");
    assert!(matches!(
        err,
        TransportError::Status {
            channel: "email",
            status: 503
        }
    ));
}

#[tokio::test]
async fn email_recovers_after_transient_failure() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/send"))
        .respond_with(ResponseTemplate::new(500))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1/send"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    email_transport(&server).send(&message()).await.unwrap();
}

fn ticket_request() -> TicketRequest {
    TicketRequest {
        notification_id: Uuid::new_v4(),
        project_id: Uuid::new_v4(),
        rule_id: Uuid::new_v4(),
        subject: "Installation issue".to_string(),
    }
}

#[tokio::test]
async fn ticket_reference_is_returned() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/tickets"))
        .and(header("authorization", "Bearer crm-token"))
        .and(body_partial_json(json!({"subject": "Installation issue"})))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({"ticket_ref": "CRM-42"})))
        .mount(&server)
        .await;

    let client = HttpTicketingClient::new(
        format!("{}/", server.uri()),
        Some("crm-token".to_string()),
        Duration::from_secs(5),
    )
    .unwrap();
    let ticket_ref = client.create_ticket(&ticket_request()).await.unwrap();
    assert_eq!(ticket_ref, "CRM-42");
}

#[tokio::test]
async fn ticket_id_alias_is_accepted() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/tickets"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "T-7"})))
        .mount(&server)
        .await;

    let client = HttpTicketingClient::new(server.uri(), None, Duration::from_secs(5)).unwrap();
    assert_eq!(client.create_ticket(&ticket_request()).await.unwrap(), "T-7");
}

#[tokio::test]
async fn malformed_ticket_response_is_reported() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/tickets"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": "queued"})))
        .mount(&server)
        .await;

    let client = HttpTicketingClient::new(server.uri(), None, Duration::from_secs(5)).unwrap();
    let err = client
        .create_ticket(&ticket_request())
        .await
        .expect_err("no reference in body");
    assert!(matches!(err, TransportError::InvalidResponse { .. }));
    assert_eq!(err.channel(), "ticketing");
}
