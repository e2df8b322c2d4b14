//! Evaluation context
//!
//! A read-only snapshot of one project (optionally focused on one order)
//! assembled fresh for every evaluation.

use chrono::{DateTime, Utc};
use sea_orm::{DatabaseConnection, DbErr};
use uuid::Uuid;

use super::condition::{Field, Metric};
use crate::models::{consolidation, event, installation, last_mile_delivery, order, project, step};
use crate::repositories::{EventRepository, ProjectRepository, StepRepository};

/// Number of recent events loaded into each context.
const RECENT_EVENT_LIMIT: u64 = 50;

#[derive(Debug, Clone)]
pub struct EvaluationContext {
    pub now: DateTime<Utc>,
    pub project: project::Model,
    pub orders: Vec<order::Model>,
    /// Order the evaluation is focused on, for order-scoped rules.
    pub order: Option<order::Model>,
    pub consolidation: Option<consolidation::Model>,
    pub last_mile: Option<last_mile_delivery::Model>,
    pub installation: Option<installation::Model>,
    pub steps: Vec<step::Model>,
    pub recent_events: Vec<event::Model>,
    pub event: Option<event::Model>,
}

fn hours_between(later: DateTime<Utc>, earlier: DateTime<Utc>) -> f64 {
    (later - earlier).num_milliseconds() as f64 / 3_600_000.0
}

impl EvaluationContext {
    /// The same snapshot focused on another order.
    pub fn with_order(&self, order: Option<order::Model>) -> Self {
        Self {
            order,
            ..self.clone()
        }
    }

    /// The step of `step_type` belonging to the focused order, or to the
    /// project/installation when no order step exists.
    pub fn step(&self, step_type: &str) -> Option<&step::Model> {
        if let Some(order) = &self.order
            && let Some(step) = self
                .steps
                .iter()
                .find(|step| step.step_type == step_type && step.order_id == Some(order.id))
        {
            return Some(step);
        }
        self.steps
            .iter()
            .find(|step| step.step_type == step_type && step.scope != "order")
    }

    /// Timestamp that `elapsed_hours` counts from.
    fn anchor(&self, step_type: Option<&str>) -> DateTime<Utc> {
        step_type
            .and_then(|step_type| self.step(step_type))
            .and_then(|step| step.expected_at)
            .or_else(|| self.event.as_ref().map(|event| event.occurred_at))
            .or_else(|| self.order.as_ref().and_then(|order| order.confirmed_at))
            .map(|at| at.with_timezone(&Utc))
            .unwrap_or_else(|| self.project.created_at.with_timezone(&Utc))
    }

    pub fn metric(&self, metric: Metric, step_type: Option<&str>) -> Option<f64> {
        match metric {
            Metric::ElapsedHours => Some(hours_between(self.now, self.anchor(step_type))),
            Metric::HoursSincePromisedDelivery => {
                let promised = self.order.as_ref()?.promised_delivery_at?;
                Some(hours_between(self.now, promised.with_timezone(&Utc)))
            }
            Metric::DelayHours => {
                let order = self.order.as_ref()?;
                let eta = order.eta?.with_timezone(&Utc);
                let promised = order.promised_delivery_at?.with_timezone(&Utc);
                Some(hours_between(eta, promised))
            }
            Metric::MissingOrders => Some(
                self.orders
                    .iter()
                    .filter(|order| order.status != "cancelled" && order.arrived_at.is_none())
                    .count() as f64,
            ),
            Metric::StockShortageCount => Some(
                self.orders
                    .iter()
                    .filter(|order| order.status == "stock_shortage")
                    .count() as f64,
            ),
            Metric::HoursUntilInstallation => {
                let scheduled = self.installation.as_ref()?.scheduled_at?;
                Some(hours_between(scheduled.with_timezone(&Utc), self.now))
            }
            Metric::HoursSinceLastEvent => {
                let latest = self
                    .recent_events
                    .iter()
                    .map(|event| event.occurred_at)
                    .max()?;
                Some(hours_between(self.now, latest.with_timezone(&Utc)))
            }
            Metric::AnomalyStepCount => Some(
                self.steps
                    .iter()
                    .filter(|step| step.status == "anomaly")
                    .count() as f64,
            ),
        }
    }

    pub fn field(&self, field: Field, step_type: Option<&str>) -> Option<String> {
        match field {
            Field::EventType => self.event.as_ref().map(|event| event.event_type.clone()),
            Field::ProjectStatus => Some(self.project.status.clone()),
            Field::OrderStatus => self.order.as_ref().map(|order| order.status.clone()),
            Field::ConsolidationStatus => self
                .consolidation
                .as_ref()
                .map(|consolidation| consolidation.status.clone()),
            Field::LastMileStatus => self
                .last_mile
                .as_ref()
                .map(|last_mile| last_mile.status.clone()),
            Field::InstallationStatus => self
                .installation
                .as_ref()
                .map(|installation| installation.status.clone()),
            Field::StepStatus => step_type
                .and_then(|step_type| self.step(step_type))
                .map(|step| step.status.clone()),
            Field::OrderDispatchedAt => self
                .order
                .as_ref()
                .and_then(|order| order.dispatched_at)
                .map(|at| at.to_rfc3339()),
            Field::OrderEta => self
                .order
                .as_ref()
                .and_then(|order| order.eta)
                .map(|at| at.to_rfc3339()),
            Field::LastMileScheduledDate => self
                .last_mile
                .as_ref()
                .and_then(|last_mile| last_mile.scheduled_date)
                .map(|at| at.to_rfc3339()),
        }
    }
}

/// Loads [`EvaluationContext`]s from storage.
#[derive(Debug, Clone)]
pub struct ContextBuilder {
    projects: ProjectRepository,
    steps: StepRepository,
    events: EventRepository,
}

impl ContextBuilder {
    pub fn new(db: DatabaseConnection) -> Self {
        Self {
            projects: ProjectRepository::new(db.clone()),
            steps: StepRepository::new(db.clone()),
            events: EventRepository::new(db),
        }
    }

    /// Returns `None` when the project does not exist.
    pub async fn build(
        &self,
        project_id: Uuid,
        order_id: Option<Uuid>,
        event: Option<event::Model>,
        now: DateTime<Utc>,
    ) -> Result<Option<EvaluationContext>, DbErr> {
        let Some(project) = self.projects.find_by_id(project_id).await? else {
            return Ok(None);
        };

        let orders = self.projects.orders_for_project(project_id).await?;
        let order = order_id.and_then(|id| orders.iter().find(|order| order.id == id).cloned());
        let consolidation = self.projects.find_consolidation(project_id).await?;
        let last_mile = self.projects.find_last_mile(project_id).await?;
        let installation = self.projects.find_installation(project_id).await?;

        let mut owners: Vec<Uuid> = vec![project_id];
        owners.extend(orders.iter().map(|order| order.id));
        owners.extend(installation.as_ref().map(|installation| installation.id));
        let steps = self.steps.for_owners(&owners).await?;
        let recent_events = self
            .events
            .recent_for_project(project_id, RECENT_EVENT_LIMIT)
            .await?;

        Ok(Some(EvaluationContext {
            now,
            project,
            orders,
            order,
            consolidation,
            last_mile,
            installation,
            steps,
            recent_events,
            event,
        }))
    }
}
