//! Step state machine
//!
//! Every mapped event moves one step of its owning project, order or
//! installation to a target status. `completed_at` is stamped the first time
//! a step completes and is never cleared, so a later anomaly keeps the
//! original completion time.

use std::fmt;

use chrono::{DateTime, Utc};
use sea_orm::{DatabaseConnection, DbErr, Set};
use serde_json::Value as JsonValue;
use tracing::debug;
use uuid::Uuid;

use crate::error::is_unique_violation;
use crate::models::step;
use crate::normalization::EventType;
use crate::repositories::StepRepository;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StepScope {
    Project,
    Order,
    Installation,
}

impl StepScope {
    pub const fn as_str(self) -> &'static str {
        match self {
            StepScope::Project => "project",
            StepScope::Order => "order",
            StepScope::Installation => "installation",
        }
    }
}

impl fmt::Display for StepScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StepStatus {
    Pending,
    InProgress,
    Completed,
    Anomaly,
    Skipped,
}

impl StepStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            StepStatus::Pending => "pending",
            StepStatus::InProgress => "in_progress",
            StepStatus::Completed => "completed",
            StepStatus::Anomaly => "anomaly",
            StepStatus::Skipped => "skipped",
        }
    }
}

impl fmt::Display for StepStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where an event type lands in the step table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StepMapping {
    pub step_type: &'static str,
    pub scope: StepScope,
    pub target: StepStatus,
}

const fn mapping(step_type: &'static str, scope: StepScope, target: StepStatus) -> StepMapping {
    StepMapping {
        step_type,
        scope,
        target,
    }
}

/// Step mapping for an event type, or `None` for informational events.
pub const fn step_mapping(event_type: EventType) -> Option<StepMapping> {
    use StepScope::*;
    use StepStatus::*;

    let mapped = match event_type {
        EventType::ProjectCreated => mapping("project_created", Project, Completed),
        EventType::OrderPlaced => mapping("order_placed", Project, Completed),
        EventType::PaymentReceived => mapping("payment", Project, Completed),
        EventType::OrderConfirmed => mapping("order_confirmed", Order, Completed),
        EventType::StockShortage => mapping("stock_check", Order, Anomaly),
        EventType::StockOk => mapping("stock_check", Order, Completed),
        EventType::ShipmentDispatched | EventType::ShipmentEtaUpdated => {
            mapping("shipment", Order, InProgress)
        }
        EventType::ShipmentArrivedStation => mapping("shipment", Order, Completed),
        EventType::ConsolidationPartialApproved => mapping("consolidation", Project, InProgress),
        EventType::ConsolidationComplete => mapping("consolidation", Project, Completed),
        EventType::LastMileScheduled => mapping("last_mile", Installation, InProgress),
        EventType::LastMileDelivered => mapping("last_mile", Installation, Completed),
        EventType::InstallationScheduled => mapping("installation", Installation, Pending),
        EventType::InstallationStarted => mapping("installation", Installation, InProgress),
        EventType::InstallationCompleted => mapping("installation", Installation, Completed),
        EventType::InstallationIssue => mapping("installation", Installation, Anomaly),
        EventType::CustomerComplaint | EventType::NoteAdded | EventType::IssueReported => {
            return None;
        }
    };
    Some(mapped)
}

/// Input for [`StepService::upsert_step`].
#[derive(Debug, Clone, PartialEq)]
pub struct StepUpsert {
    pub event_type: EventType,
    pub project_id: Uuid,
    pub order_id: Option<Uuid>,
    pub installation_id: Option<Uuid>,
    pub event_id: Option<Uuid>,
    pub expected_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct StepService {
    steps: StepRepository,
}

impl StepService {
    pub fn new(db: DatabaseConnection) -> Self {
        Self {
            steps: StepRepository::new(db),
        }
    }

    /// Move the mapped step to its target status, creating it when missing.
    ///
    /// Returns `None` when the event type has no mapping or the scope's owning
    /// id is absent.
    pub async fn upsert_step(&self, input: StepUpsert) -> Result<Option<Uuid>, DbErr> {
        let Some(mapping) = step_mapping(input.event_type) else {
            return Ok(None);
        };

        let owning_id = match mapping.scope {
            StepScope::Project => Some(input.project_id),
            StepScope::Order => input.order_id,
            StepScope::Installation => input.installation_id,
        };
        let Some(owning_id) = owning_id else {
            debug!(
                event_type = %input.event_type,
                scope = %mapping.scope,
                "No owning id for step scope; skipping"
            );
            return Ok(None);
        };

        let existing = self
            .steps
            .find(mapping.scope.as_str(), owning_id, mapping.step_type)
            .await?;

        let step = match existing {
            Some(step) => self.advance(step, &mapping, &input).await?,
            None => match self.create(owning_id, &mapping, &input).await {
                Ok(step) => step,
                Err(err) if is_unique_violation(&err) => {
                    let winner = self
                        .steps
                        .find(mapping.scope.as_str(), owning_id, mapping.step_type)
                        .await?
                        .ok_or(err)?;
                    self.advance(winner, &mapping, &input).await?
                }
                Err(err) => return Err(err),
            },
        };

        debug!(
            step_id = %step.id,
            step_type = %step.step_type,
            status = %step.status,
            "Step upserted"
        );
        Ok(Some(step.id))
    }

    async fn create(
        &self,
        owning_id: Uuid,
        mapping: &StepMapping,
        input: &StepUpsert,
    ) -> Result<step::Model, DbErr> {
        let now = Utc::now().fixed_offset();
        let completed_at = (mapping.target == StepStatus::Completed).then_some(now);
        let event_ids = input
            .event_id
            .map(|id| vec![JsonValue::String(id.to_string())])
            .unwrap_or_default();

        let model = step::ActiveModel {
            id: Set(Uuid::new_v4()),
            scope: Set(mapping.scope.as_str().to_string()),
            owning_id: Set(owning_id),
            project_id: Set((mapping.scope == StepScope::Project).then_some(owning_id)),
            order_id: Set((mapping.scope == StepScope::Order).then_some(owning_id)),
            installation_id: Set((mapping.scope == StepScope::Installation).then_some(owning_id)),
            step_type: Set(mapping.step_type.to_string()),
            status: Set(mapping.target.as_str().to_string()),
            expected_at: Set(input.expected_at.map(|at| at.fixed_offset())),
            completed_at: Set(completed_at),
            event_ids: Set(JsonValue::Array(event_ids)),
            created_at: Set(now),
            updated_at: Set(now),
        };
        self.steps.insert(model).await
    }

    async fn advance(
        &self,
        step: step::Model,
        mapping: &StepMapping,
        input: &StepUpsert,
    ) -> Result<step::Model, DbErr> {
        let now = Utc::now().fixed_offset();
        let mut event_ids = step.event_id_list();
        if let Some(event_id) = input.event_id
            && !event_ids.contains(&event_id)
        {
            event_ids.push(event_id);
        }
        let stamp_completion =
            mapping.target == StepStatus::Completed && step.completed_at.is_none();

        let mut model: step::ActiveModel = step.into();
        model.status = Set(mapping.target.as_str().to_string());
        if stamp_completion {
            model.completed_at = Set(Some(now));
        }
        if let Some(expected_at) = input.expected_at {
            model.expected_at = Set(Some(expected_at.fixed_offset()));
        }
        model.event_ids = Set(JsonValue::Array(
            event_ids
                .into_iter()
                .map(|id| JsonValue::String(id.to_string()))
                .collect(),
        ));
        model.updated_at = Set(now);
        self.steps.update(model).await
    }
}
