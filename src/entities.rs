//! Entity update service
//!
//! Applies the side effects of a processed event to the project aggregates.
//! Handlers read current status before writing so re-applying an event (a
//! retried job, a redelivered upstream record) leaves state unchanged.

use chrono::Utc;
use sea_orm::prelude::DateTimeWithTimeZone;
use sea_orm::{DatabaseConnection, Set};
use serde_json::{Value as JsonValue, json};
use tracing::{debug, info};

use crate::error::PipelineError;
use crate::models::{event, installation, last_mile_delivery, order, project};
use crate::normalization::{EventType, parse_event_type, payload_str, payload_timestamp};
use crate::repositories::{ActivityLogRepository, ConsolidationTransition, ProjectRepository};

/// Consolidation statuses that can still move to `complete`.
const CONSOLIDATION_OPEN: &[&str] = &["pending", "partial", "partial_approved"];

/// Order statuses a stock or confirmation event may no longer overwrite.
const ORDER_IN_TRANSIT: &[&str] = &["dispatched", "at_station", "cancelled"];

#[derive(Debug, Clone)]
pub struct EntityUpdateService {
    projects: ProjectRepository,
    activity: ActivityLogRepository,
}

impl EntityUpdateService {
    pub fn new(db: DatabaseConnection) -> Self {
        Self {
            projects: ProjectRepository::new(db.clone()),
            activity: ActivityLogRepository::new(db),
        }
    }

    /// Dispatch `event` to its family handler.
    pub async fn apply(&self, event: &event::Model) -> Result<(), PipelineError> {
        let event_type =
            parse_event_type(&event.event_type).ok_or_else(|| PipelineError::ProcessingFailure {
                event_id: event.id,
                reason: format!("unknown event type '{}'", event.event_type),
            })?;

        match event_type {
            EventType::ProjectCreated => self.project_created(event).await,
            EventType::OrderConfirmed => self.order_confirmed(event).await,
            EventType::StockShortage => self.stock_shortage(event).await,
            EventType::StockOk => self.stock_ok(event).await,
            EventType::ShipmentDispatched => self.shipment_dispatched(event).await,
            EventType::ShipmentEtaUpdated => self.shipment_eta_updated(event).await,
            EventType::ShipmentArrivedStation => self.shipment_arrived(event).await,
            EventType::ConsolidationComplete => self.consolidation_complete(event).await,
            EventType::ConsolidationPartialApproved => self.consolidation_partial_approved(event).await,
            EventType::LastMileScheduled => self.last_mile_scheduled(event).await,
            EventType::LastMileDelivered => self.last_mile_delivered(event).await,
            EventType::InstallationScheduled
            | EventType::InstallationStarted
            | EventType::InstallationCompleted
            | EventType::InstallationIssue => self.installation_changed(event, event_type).await,
            EventType::OrderPlaced
            | EventType::PaymentReceived
            | EventType::CustomerComplaint
            | EventType::NoteAdded
            | EventType::IssueReported => {
                self.log(event, event_type.as_str(), json!({ "payload": event.payload }))
                    .await
            }
        }
    }

    async fn project_created(&self, event: &event::Model) -> Result<(), PipelineError> {
        let project = self.require_project(event).await?;
        let customer_name = payload_str(&event.payload, "customer_name").map(str::to_string);

        if customer_name.is_some() && project.customer_name != customer_name {
            let mut model: project::ActiveModel = project.into();
            model.customer_name = Set(customer_name.clone());
            model.updated_at = Set(now());
            self.projects.update(model).await?;
        }

        self.log(
            event,
            "project.customer_recorded",
            json!({ "customer_name": customer_name }),
        )
        .await
    }

    async fn order_confirmed(&self, event: &event::Model) -> Result<(), PipelineError> {
        let order = self.require_order(event).await?;
        let promised = payload_timestamp(&event.payload, "promised_delivery_date");
        let previous_status = order.status.clone();

        let mut model: order::ActiveModel = order.clone().into();
        if order.status == "pending" {
            model.status = Set("confirmed".to_string());
        }
        if order.confirmed_at.is_none() {
            model.confirmed_at = Set(Some(event.occurred_at));
        }
        if let Some(promised) = promised {
            model.promised_delivery_at = Set(Some(promised.fixed_offset()));
        }
        model.updated_at = Set(now());
        let updated = self.projects.update_order(model).await?;

        self.log(
            event,
            "order.confirmed",
            json!({
                "order_id": updated.id,
                "from": previous_status,
                "to": updated.status,
                "promised_delivery_at": updated.promised_delivery_at,
            }),
        )
        .await
    }

    async fn stock_shortage(&self, event: &event::Model) -> Result<(), PipelineError> {
        let order = self.require_order(event).await?;
        let items = event.payload.get("items").cloned().unwrap_or(JsonValue::Null);

        let mut model: order::ActiveModel = order.clone().into();
        if !ORDER_IN_TRANSIT.contains(&order.status.as_str()) {
            model.status = Set("stock_shortage".to_string());
        }
        model.shortage_items = Set(Some(items.clone()));
        model.updated_at = Set(now());
        self.projects.update_order(model).await?;

        self.log(
            event,
            "order.stock_shortage",
            json!({ "order_id": order.id, "items": items }),
        )
        .await
    }

    async fn stock_ok(&self, event: &event::Model) -> Result<(), PipelineError> {
        let order = self.require_order(event).await?;

        let mut model: order::ActiveModel = order.clone().into();
        if !ORDER_IN_TRANSIT.contains(&order.status.as_str()) {
            model.status = Set("stock_ok".to_string());
        }
        model.shortage_items = Set(None);
        model.updated_at = Set(now());
        self.projects.update_order(model).await?;

        self.log(event, "order.stock_ok", json!({ "order_id": order.id }))
            .await
    }

    async fn shipment_dispatched(&self, event: &event::Model) -> Result<(), PipelineError> {
        let order = self.require_order(event).await?;
        let carrier = payload_str(&event.payload, "carrier").map(str::to_string);
        let tracking_ref = payload_str(&event.payload, "tracking_ref").map(str::to_string);

        let mut model: order::ActiveModel = order.clone().into();
        if !matches!(order.status.as_str(), "at_station" | "cancelled") {
            model.status = Set("dispatched".to_string());
        }
        if order.dispatched_at.is_none() {
            model.dispatched_at = Set(Some(event.occurred_at));
        }
        if carrier.is_some() {
            model.carrier = Set(carrier.clone());
        }
        if tracking_ref.is_some() {
            model.tracking_ref = Set(tracking_ref.clone());
        }
        model.updated_at = Set(now());
        self.projects.update_order(model).await?;

        self.log(
            event,
            "order.dispatched",
            json!({ "order_id": order.id, "carrier": carrier, "tracking_ref": tracking_ref }),
        )
        .await
    }

    async fn shipment_eta_updated(&self, event: &event::Model) -> Result<(), PipelineError> {
        let order = self.require_order(event).await?;
        let eta = payload_timestamp(&event.payload, "eta").map(|eta| eta.fixed_offset());
        let previous_eta = order.eta;

        if eta.is_some() && eta != previous_eta {
            let mut model: order::ActiveModel = order.clone().into();
            model.eta = Set(eta);
            model.updated_at = Set(now());
            self.projects.update_order(model).await?;
        }

        self.log(
            event,
            "order.eta_updated",
            json!({ "order_id": order.id, "previous_eta": previous_eta, "eta": eta }),
        )
        .await
    }

    async fn shipment_arrived(&self, event: &event::Model) -> Result<(), PipelineError> {
        let order = self.require_order(event).await?;

        let mut model: order::ActiveModel = order.clone().into();
        if order.status != "cancelled" {
            model.status = Set("at_station".to_string());
        }
        if order.arrived_at.is_none() {
            model.arrived_at = Set(Some(event.occurred_at));
        }
        model.updated_at = Set(now());
        self.projects.update_order(model).await?;

        self.log(
            event,
            "order.arrived_station",
            json!({
                "order_id": order.id,
                "station": payload_str(&event.payload, "station"),
            }),
        )
        .await?;

        self.recount_consolidation(event).await
    }

    /// Recompute arrival counters and complete the consolidation once every
    /// non-cancelled order has arrived.
    async fn recount_consolidation(&self, event: &event::Model) -> Result<(), PipelineError> {
        let orders = self.projects.orders_for_project(event.project_id).await?;
        let live: Vec<&order::Model> = orders
            .iter()
            .filter(|order| order.status != "cancelled")
            .collect();
        let required = count_i32(live.len());
        let arrived = count_i32(live.iter().filter(|order| order.arrived_at.is_some()).count());

        let consolidation = self
            .projects
            .get_or_create_consolidation(event.project_id)
            .await?;
        self.projects
            .record_consolidation_counts(consolidation.id, required, arrived)
            .await?;

        let transition = if required > 0 && arrived >= required {
            Some(ConsolidationTransition {
                from: CONSOLIDATION_OPEN,
                to: "complete",
                completed_at: Some(now()),
                approved_by: None,
            })
        } else if arrived > 0 {
            Some(ConsolidationTransition {
                from: &["pending"],
                to: "partial",
                completed_at: None,
                approved_by: None,
            })
        } else {
            None
        };

        if let Some(transition) = transition {
            let to = transition.to;
            if self
                .projects
                .transition_consolidation(consolidation.id, transition)
                .await?
            {
                self.log(
                    event,
                    "consolidation.status_changed",
                    json!({
                        "from": consolidation.status,
                        "to": to,
                        "orders_required": required,
                        "orders_arrived": arrived,
                    }),
                )
                .await?;
            }
        }

        let current = self
            .projects
            .find_consolidation(event.project_id)
            .await?
            .map(|current| current.status);
        debug!(
            project_id = %event.project_id,
            orders_required = required,
            orders_arrived = arrived,
            status = ?current,
            "Consolidation recounted"
        );

        if current.as_deref() == Some("complete") {
            self.mark_last_mile_ready(event).await?;
        }
        Ok(())
    }

    async fn consolidation_complete(&self, event: &event::Model) -> Result<(), PipelineError> {
        let consolidation = self
            .projects
            .get_or_create_consolidation(event.project_id)
            .await?;

        self.projects
            .transition_consolidation(
                consolidation.id,
                ConsolidationTransition {
                    from: CONSOLIDATION_OPEN,
                    to: "complete",
                    completed_at: Some(event.occurred_at),
                    approved_by: None,
                },
            )
            .await?;

        self.log(
            event,
            "consolidation.complete",
            json!({ "from": consolidation.status }),
        )
        .await?;
        self.mark_last_mile_ready(event).await
    }

    async fn consolidation_partial_approved(
        &self,
        event: &event::Model,
    ) -> Result<(), PipelineError> {
        let consolidation = self
            .projects
            .get_or_create_consolidation(event.project_id)
            .await?;
        let approved_by = payload_str(&event.payload, "approved_by").map(str::to_string);

        self.projects
            .transition_consolidation(
                consolidation.id,
                ConsolidationTransition {
                    from: &["pending", "partial"],
                    to: "partial_approved",
                    completed_at: None,
                    approved_by: approved_by.clone(),
                },
            )
            .await?;

        self.log(
            event,
            "consolidation.partial_approved",
            json!({ "from": consolidation.status, "approved_by": approved_by }),
        )
        .await?;
        self.mark_last_mile_ready(event).await
    }

    /// `not_ready -> ready_to_schedule`; any other status is left alone.
    async fn mark_last_mile_ready(&self, event: &event::Model) -> Result<(), PipelineError> {
        let last_mile = self.projects.get_or_create_last_mile(event.project_id).await?;
        if last_mile.status != "not_ready" {
            return Ok(());
        }

        let mut model: last_mile_delivery::ActiveModel = last_mile.into();
        model.status = Set("ready_to_schedule".to_string());
        model.updated_at = Set(now());
        self.projects.update_last_mile(model).await?;

        info!(project_id = %event.project_id, "Last mile ready to schedule");
        self.log(
            event,
            "last_mile.ready_to_schedule",
            json!({ "from": "not_ready" }),
        )
        .await
    }

    async fn last_mile_scheduled(&self, event: &event::Model) -> Result<(), PipelineError> {
        let last_mile = self.projects.get_or_create_last_mile(event.project_id).await?;
        let external_ref = payload_str(&event.payload, "lastmile_id").map(str::to_string);
        let scheduled_date =
            payload_timestamp(&event.payload, "scheduled_date").map(|date| date.fixed_offset());

        let mut model: last_mile_delivery::ActiveModel = last_mile.clone().into();
        if last_mile.status != "delivered" {
            model.status = Set("scheduled".to_string());
        }
        if external_ref.is_some() {
            model.external_ref = Set(external_ref.clone());
        }
        if scheduled_date.is_some() {
            model.scheduled_date = Set(scheduled_date);
        }
        model.updated_at = Set(now());
        self.projects.update_last_mile(model).await?;

        self.log(
            event,
            "last_mile.scheduled",
            json!({
                "from": last_mile.status,
                "lastmile_id": external_ref,
                "scheduled_date": scheduled_date,
            }),
        )
        .await
    }

    async fn last_mile_delivered(&self, event: &event::Model) -> Result<(), PipelineError> {
        let last_mile = self.projects.get_or_create_last_mile(event.project_id).await?;

        if last_mile.status != "delivered" {
            let mut model: last_mile_delivery::ActiveModel =
                last_mile.clone().into();
            model.status = Set("delivered".to_string());
            model.delivered_at = Set(Some(event.occurred_at));
            if let Some(external_ref) = payload_str(&event.payload, "lastmile_id") {
                model.external_ref = Set(Some(external_ref.to_string()));
            }
            model.updated_at = Set(now());
            self.projects.update_last_mile(model).await?;
        }

        self.log(
            event,
            "last_mile.delivered",
            json!({ "from": last_mile.status }),
        )
        .await
    }

    async fn installation_changed(
        &self,
        event: &event::Model,
        event_type: EventType,
    ) -> Result<(), PipelineError> {
        let installation = self
            .projects
            .get_or_create_installation(event.project_id)
            .await?;
        let previous_status = installation.status.clone();
        let already_completed = previous_status == "completed";

        let mut model: installation::ActiveModel = installation.clone().into();
        match event_type {
            EventType::InstallationScheduled => {
                if !already_completed {
                    model.status = Set("scheduled".to_string());
                }
                if let Some(at) = payload_timestamp(&event.payload, "scheduled_at") {
                    model.scheduled_at = Set(Some(at.fixed_offset()));
                }
            }
            EventType::InstallationStarted if !already_completed => {
                model.status = Set("in_progress".to_string());
            }
            EventType::InstallationIssue if !already_completed => {
                model.status = Set("issue".to_string());
            }
            EventType::InstallationCompleted => {
                model.status = Set("completed".to_string());
                if installation.completed_at.is_none() {
                    model.completed_at = Set(Some(event.occurred_at));
                }
            }
            _ => {}
        }
        model.updated_at = Set(now());
        let updated = self.projects.update_installation(model).await?;

        let mut detail = json!({ "from": previous_status, "to": updated.status });
        if let Some(reason) = payload_str(&event.payload, "reason") {
            detail["reason"] = JsonValue::String(reason.to_string());
        }
        self.log(event, event_type.as_str(), detail).await?;

        if event_type == EventType::InstallationCompleted {
            self.complete_project(event).await?;
        }
        Ok(())
    }

    async fn complete_project(&self, event: &event::Model) -> Result<(), PipelineError> {
        let project = self.require_project(event).await?;
        if project.status != "active" {
            return Ok(());
        }

        let mut model: project::ActiveModel = project.into();
        model.status = Set("completed".to_string());
        model.updated_at = Set(now());
        self.projects.update(model).await?;

        info!(project_id = %event.project_id, "Project completed");
        self.log(event, "project.completed", json!({ "from": "active" }))
            .await
    }

    async fn require_project(
        &self,
        event: &event::Model,
    ) -> Result<project::Model, PipelineError> {
        self.projects
            .find_by_id(event.project_id)
            .await?
            .ok_or_else(|| PipelineError::ProcessingFailure {
                event_id: event.id,
                reason: format!("project {} not found", event.project_id),
            })
    }

    async fn require_order(&self, event: &event::Model) -> Result<order::Model, PipelineError> {
        let order_id = event
            .order_id
            .ok_or_else(|| PipelineError::ProcessingFailure {
                event_id: event.id,
                reason: format!("{} event carries no order", event.event_type),
            })?;
        self.projects
            .find_order(order_id)
            .await?
            .ok_or_else(|| PipelineError::ProcessingFailure {
                event_id: event.id,
                reason: format!("order {order_id} not found"),
            })
    }

    /// Append an audit entry once per `(event, action)`.
    async fn log(
        &self,
        event: &event::Model,
        action: &str,
        detail: JsonValue,
    ) -> Result<(), PipelineError> {
        if self.activity.exists(event.id, action).await? {
            return Ok(());
        }
        self.activity
            .append(event.project_id, Some(event.id), action, detail)
            .await?;
        Ok(())
    }
}

fn now() -> DateTimeWithTimeZone {
    Utc::now().fixed_offset()
}

fn count_i32(count: usize) -> i32 {
    i32::try_from(count).unwrap_or(i32::MAX)
}
