//! Event pipeline
//!
//! Wires the services together. [`EventProcessor`] is what a worker runs for
//! each job; [`Pipeline`] bundles every component built from one database
//! connection and configuration so the server, scheduler and CLI share them.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sea_orm::DatabaseConnection;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};
use uuid::Uuid;

use crate::adapters::AdapterRegistry;
use crate::config::{AppConfig, ScheduleConfig};
use crate::entities::EntityUpdateService;
use crate::error::PipelineError;
use crate::ingestion::IngestionService;
use crate::models::event;
use crate::normalization::{EventType, parse_event_type, payload_timestamp};
use crate::notifications::{EscalationSummary, NotificationService};
use crate::queue::{Job, JobProcessor, QueueConfig, QueueHandle, WorkerPool};
use crate::repositories::{DeadLetterRepository, EventRepository};
use crate::rules::{RuleEngine, ScheduleMode};
use crate::steps::{StepService, StepUpsert};
use crate::transports::Transports;

/// Payload field holding the deadline a step is expected to be reached by.
fn expected_at(event_type: EventType, payload: &Value) -> Option<DateTime<Utc>> {
    let field = match event_type {
        EventType::OrderConfirmed => "promised_delivery_date",
        EventType::ShipmentEtaUpdated => "eta",
        EventType::LastMileScheduled => "scheduled_date",
        EventType::InstallationScheduled => "scheduled_at",
        _ => return None,
    };
    payload_timestamp(payload, field)
}

/// Per-event work: steps, entity side effects, realtime rules, notifications.
#[derive(Clone)]
pub struct EventProcessor {
    events: EventRepository,
    steps: StepService,
    entities: EntityUpdateService,
    rules: RuleEngine,
    notifications: NotificationService,
}

impl EventProcessor {
    pub fn new(
        db: DatabaseConnection,
        rules: RuleEngine,
        notifications: NotificationService,
    ) -> Self {
        Self {
            events: EventRepository::new(db.clone()),
            steps: StepService::new(db.clone()),
            entities: EntityUpdateService::new(db),
            rules,
            notifications,
        }
    }

    async fn run(&self, event: &event::Model) -> Result<(), PipelineError> {
        let event_type =
            parse_event_type(&event.event_type).ok_or_else(|| PipelineError::ProcessingFailure {
                event_id: event.id,
                reason: format!("unknown event type '{}'", event.event_type),
            })?;

        let step_id = self
            .steps
            .upsert_step(StepUpsert {
                event_type,
                project_id: event.project_id,
                order_id: event.order_id,
                installation_id: event.installation_id,
                event_id: Some(event.id),
                expected_at: expected_at(event_type, &event.payload),
            })
            .await?;

        self.entities.apply(event).await?;

        let results = self.rules.evaluate_realtime(event, Utc::now()).await?;
        let mut notified = 0;
        for result in &results {
            if self.notifications.handle_rule_result(result).await?.is_some() {
                notified += 1;
            }
        }

        self.events.mark_processed(event.id).await?;
        debug!(
            step_id = ?step_id,
            rules_triggered = results.len(),
            notified,
            "Event processed"
        );
        Ok(())
    }
}

#[async_trait]
impl JobProcessor for EventProcessor {
    #[instrument(skip(self))]
    async fn process(&self, event_id: Uuid) -> Result<(), PipelineError> {
        let event = self
            .events
            .find_by_id(event_id)
            .await?
            .ok_or(PipelineError::EventNotFound(event_id))?;

        if event.processed_at.is_some() {
            debug!("Event already processed; skipping");
            return Ok(());
        }
        self.run(&event).await
    }
}

/// All pipeline components built from one connection and configuration.
#[derive(Clone)]
pub struct Pipeline {
    pub ingestion: IngestionService,
    pub queue: QueueHandle,
    pub rules: RuleEngine,
    pub notifications: NotificationService,
    pub events: EventRepository,
    pub dead_letters: DeadLetterRepository,
    processor: Arc<EventProcessor>,
    schedule: ScheduleConfig,
}

impl Pipeline {
    /// Build the pipeline. The returned receiver feeds [`Pipeline::start_workers`].
    pub fn build(
        db: DatabaseConnection,
        config: &AppConfig,
        registry: AdapterRegistry,
        transports: Transports,
    ) -> (Self, mpsc::Receiver<Job>) {
        let (queue, receiver) = QueueHandle::new(db.clone(), QueueConfig::from(&config.worker));
        let rules = RuleEngine::new(db.clone(), config.notifications.default_recipients.clone());
        let notifications =
            NotificationService::new(db.clone(), transports, &config.notifications);
        let processor = Arc::new(EventProcessor::new(
            db.clone(),
            rules.clone(),
            notifications.clone(),
        ));

        let pipeline = Self {
            ingestion: IngestionService::new(db.clone(), registry, queue.clone()),
            queue,
            rules,
            notifications,
            events: EventRepository::new(db.clone()),
            dead_letters: DeadLetterRepository::new(db),
            processor,
            schedule: config.schedule.clone(),
        };
        (pipeline, receiver)
    }

    pub fn start_workers(
        &self,
        receiver: mpsc::Receiver<Job>,
        shutdown: CancellationToken,
    ) -> WorkerPool {
        let processor: Arc<dyn JobProcessor> = self.processor.clone();
        WorkerPool::spawn(self.queue.clone(), receiver, processor, shutdown)
    }

    /// Process one event inline, bypassing the queue.
    pub async fn process_now(&self, event_id: Uuid) -> Result<(), PipelineError> {
        self.processor.process(event_id).await
    }

    /// Run `hourly` or `daily` rules and dispatch their notifications.
    /// Returns the number of notifications created.
    pub async fn evaluate_scheduled_rules(&self, mode: ScheduleMode) -> Result<usize, PipelineError> {
        let results = self.rules.evaluate_scheduled(mode, Utc::now()).await?;
        let mut created = 0;
        for result in &results {
            if self.notifications.handle_rule_result(result).await?.is_some() {
                created += 1;
            }
        }
        info!(mode = %mode, triggered = results.len(), created, "Scheduled evaluation finished");
        Ok(created)
    }

    pub async fn run_escalation_check(&self) -> Result<EscalationSummary, PipelineError> {
        self.notifications.run_escalation_check(Utc::now()).await
    }

    pub async fn reconcile(&self) -> Result<usize, PipelineError> {
        self.queue
            .reconcile_unqueued(self.schedule.reconcile_grace())
            .await
    }

    pub async fn acknowledge(
        &self,
        event_id: Uuid,
        acknowledged_by: &str,
    ) -> Result<event::Model, PipelineError> {
        let acknowledged = self
            .events
            .acknowledge(event_id, acknowledged_by)
            .await?
            .ok_or(PipelineError::EventNotFound(event_id))?;
        info!(event_id = %event_id, acknowledged_by = %acknowledged_by, "Event acknowledged");
        Ok(acknowledged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn expected_at_reads_deadline_fields() {
        let payload = json!({"eta": "2026-04-02T10:00:00Z", "scheduled_at": "2026-04-05"});
        assert_eq!(
            expected_at(EventType::ShipmentEtaUpdated, &payload).map(|at| at.to_rfc3339()),
            Some("2026-04-02T10:00:00+00:00".to_string())
        );
        assert!(expected_at(EventType::InstallationScheduled, &payload).is_some());
        assert!(expected_at(EventType::StockOk, &payload).is_none());
    }
}
