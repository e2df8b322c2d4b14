//! Test utilities for database and pipeline testing.
//!
//! Provides an in-memory SQLite database with migrations applied, recording
//! transport doubles and builders for raw upstream payloads.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use anyhow::Result;
use async_trait::async_trait;
use fulfillment_monitor::{
    adapters::AdapterRegistry,
    config::AppConfig,
    models::anomaly_rule,
    pipeline::Pipeline,
    queue::Job,
    repositories::{NewRule, RuleRepository},
    transports::{
        EmailMessage, EmailTransport, PushHub, TicketRequest, TicketingClient, TransportError,
        Transports,
    },
};
use migration::{Migrator, MigratorTrait};
use sea_orm::{ConnectionTrait, Database, DatabaseConnection, Statement};
use serde_json::{Value, json};
use tokio::sync::mpsc;

/// Sets up an in-memory SQLite database with all migrations applied.
pub async fn setup_test_db() -> Result<DatabaseConnection> {
    let db = Database::connect("sqlite::memory:").await?;

    Migrator::up(&db, None).await?;

    // Fixtures insert notifications for rules and events the tests never create.
    db.execute(Statement::from_string(
        db.get_database_backend(),
        "PRAGMA foreign_keys = OFF".to_string(),
    ))
    .await?;

    Ok(db)
}

/// Configuration for tests: `test` profile, fast retries, one recipient.
pub fn test_config() -> AppConfig {
    let mut config = AppConfig {
        profile: "test".to_string(),
        ..AppConfig::default()
    };
    config.worker.concurrency = 2;
    config.worker.max_attempts = 3;
    config.worker.backoff_base_ms = 5;
    config.worker.backoff_max_ms = 20;
    config.worker.jitter_factor = 0.0;
    config.notifications.default_recipients = vec!["ops@example.com".to_string()];
    config.notifications.escalation_recipients = vec!["manager@example.com".to_string()];
    config
}

/// Email transport that records every message and optionally fails.
#[derive(Default)]
pub struct RecordingEmail {
    sent: Mutex<Vec<EmailMessage>>,
    fail: bool,
}

impl RecordingEmail {
    pub fn failing() -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
            fail: true,
        }
    }

    pub fn sent(&self) -> Vec<EmailMessage> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl EmailTransport for RecordingEmail {
    async fn send(&self, message: &EmailMessage) -> Result<(), TransportError> {
        self.sent.lock().unwrap().push(message.clone());
        if self.fail {
            return Err(TransportError::Status {
                channel: "email",
                status: 502,
            });
        }
        Ok(())
    }
}

/// Ticketing client that records requests and hands out sequential refs.
#[derive(Default)]
pub struct RecordingTickets {
    requests: Mutex<Vec<TicketRequest>>,
}

impl RecordingTickets {
    pub fn requests(&self) -> Vec<TicketRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl TicketingClient for RecordingTickets {
    async fn create_ticket(&self, request: &TicketRequest) -> Result<String, TransportError> {
        let mut requests = self.requests.lock().unwrap();
        requests.push(request.clone());
        Ok(format!("CRM-{}", requests.len()))
    }
}

/// A pipeline over `db` with recording transports.
pub struct TestPipeline {
    pub pipeline: Pipeline,
    pub receiver: mpsc::Receiver<Job>,
    pub email: Arc<RecordingEmail>,
    pub tickets: Arc<RecordingTickets>,
    pub push: Arc<PushHub>,
}

pub fn build_pipeline(db: &DatabaseConnection, config: &AppConfig) -> TestPipeline {
    build_pipeline_with_email(db, config, RecordingEmail::default())
}

pub fn build_pipeline_with_email(
    db: &DatabaseConnection,
    config: &AppConfig,
    email: RecordingEmail,
) -> TestPipeline {
    let email = Arc::new(email);
    let tickets = Arc::new(RecordingTickets::default());
    let push = Arc::new(PushHub::new());
    let transports = Transports {
        email: email.clone(),
        push: push.clone(),
        ticketing: tickets.clone(),
    };
    let (pipeline, receiver) = Pipeline::build(
        db.clone(),
        config,
        AdapterRegistry::with_default_adapters(),
        transports,
    );
    TestPipeline {
        pipeline,
        receiver,
        email,
        tickets,
        push,
    }
}

/// Inserts an active rule.
pub async fn create_rule(
    db: &DatabaseConnection,
    name: &str,
    scope: &str,
    trigger: &str,
    severity: &str,
    condition: Value,
    action: Value,
) -> Result<anomaly_rule::Model> {
    let rule = RuleRepository::new(db.clone())
        .create(NewRule {
            name: name.to_string(),
            scope: scope.to_string(),
            step_type: None,
            trigger: trigger.to_string(),
            severity: severity.to_string(),
            condition,
            action,
        })
        .await?;
    Ok(rule)
}

/// Raw ERP payload.
pub fn erp_event(document_no: &str, event_type: &str, project: &str, order: &str, data: Value) -> Value {
    json!({
        "document_no": document_no,
        "event_type": event_type,
        "project_ref": project,
        "order_ref": order,
        "occurred_at": "2026-03-02T08:00:00Z",
        "data": data,
    })
}

/// Raw OMS payload.
pub fn oms_event(id: &str, event_type: &str, project: &str, order: &str, data: Value) -> Value {
    json!({
        "id": id,
        "event_type": event_type,
        "project_ref": project,
        "order_ref": order,
        "occurred_at": "2026-03-05T12:00:00Z",
        "data": data,
    })
}

/// Raw TMS payload.
pub fn tms_event(message_id: &str, event_type: &str, project: &str, data: Value) -> Value {
    json!({
        "message_id": message_id,
        "event_type": event_type,
        "project_ref": project,
        "occurred_at": "2026-03-08T09:00:00Z",
        "data": data,
    })
}

/// Raw WFM payload.
pub fn wfm_event(id: &str, event_type: &str, project: &str, data: Value) -> Value {
    json!({
        "id": id,
        "event_type": event_type,
        "project_ref": project,
        "occurred_at": "2026-03-10T07:30:00Z",
        "data": data,
    })
}

/// Raw CRM payload.
pub fn crm_event(id: &str, event_type: &str, project: &str, data: Value) -> Value {
    json!({
        "id": id,
        "event_type": event_type,
        "project_ref": project,
        "occurred_at": "2026-03-01T10:00:00Z",
        "data": data,
    })
}
