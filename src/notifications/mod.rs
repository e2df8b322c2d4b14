//! Notification service
//!
//! Turns triggered [`RuleResult`]s into at most one notification per
//! dedupe key, then fans out over email, push and (optionally) a CRM ticket.
//! Delivery failures are recorded on the row and never propagate.

mod escalation;

pub use escalation::EscalationSummary;

use std::sync::Arc;

use chrono::Utc;
use metrics::counter;
use sea_orm::{DatabaseConnection, Set};
use serde_json::json;
use tracing::{debug, info, warn};

use crate::config::NotificationConfig;
use crate::error::PipelineError;
use crate::models::notification;
use crate::repositories::{NewNotification, NotificationRepository, ProjectRepository};
use crate::rules::{RuleResult, RuleScope, Severity};
use crate::transports::{
    EmailMessage, EmailTransport, PushHub, TicketRequest, TicketingClient, Transports,
};

/// Dedupe key for a rule result: per triggering event when there is one,
/// otherwise per scoped entity.
pub fn dedupe_key(result: &RuleResult) -> String {
    match result.event_id {
        Some(event_id) => format!("{}:{}", result.rule_id, event_id),
        None => {
            let entity_id = match result.scope {
                RuleScope::Order => result.order_id.unwrap_or(result.project_id),
                RuleScope::Project => result.project_id,
            };
            format!("{}:{}:{}", result.rule_id, result.scope.as_str(), entity_id)
        }
    }
}

#[derive(Clone)]
pub struct NotificationService {
    notifications: NotificationRepository,
    projects: ProjectRepository,
    email: Arc<dyn EmailTransport>,
    push: Arc<PushHub>,
    ticketing: Arc<dyn TicketingClient>,
    escalation_recipients: Vec<String>,
    escalation_threshold_hours: u64,
}

impl NotificationService {
    pub fn new(db: DatabaseConnection, transports: Transports, config: &NotificationConfig) -> Self {
        let escalation_recipients = if config.escalation_recipients.is_empty() {
            config.default_recipients.clone()
        } else {
            config.escalation_recipients.clone()
        };

        Self {
            notifications: NotificationRepository::new(db.clone()),
            projects: ProjectRepository::new(db),
            email: transports.email,
            push: transports.push,
            ticketing: transports.ticketing,
            escalation_recipients,
            escalation_threshold_hours: config.escalation_threshold_hours,
        }
    }

    pub fn push_hub(&self) -> Arc<PushHub> {
        Arc::clone(&self.push)
    }

    /// Record and dispatch a rule result.
    ///
    /// Returns `None` when the result did not trigger, is `ok` severity, or
    /// was already notified.
    pub async fn handle_rule_result(
        &self,
        result: &RuleResult,
    ) -> Result<Option<notification::Model>, PipelineError> {
        if !result.triggered || result.severity == Severity::Ok {
            return Ok(None);
        }

        let key = dedupe_key(result);
        let Some(created) = self
            .notifications
            .insert(NewNotification {
                project_id: result.project_id,
                order_id: result.order_id,
                rule_id: result.rule_id,
                event_id: result.event_id,
                dedupe_key: key.clone(),
                severity: result.severity.as_str().to_string(),
                subject: result.subject.clone(),
            })
            .await?
        else {
            debug!(dedupe_key = %key, "Notification already exists");
            return Ok(None);
        };

        counter!("notifications_created_total", "severity" => result.severity.as_str())
            .increment(1);

        let delivered = self.send_email(result).await;
        self.broadcast(&created);
        let ticket_ref = if result.create_ticket {
            self.open_ticket(&created).await
        } else {
            None
        };

        let mut model: notification::ActiveModel = created.into();
        if delivered {
            model.status = Set("sent".to_string());
            model.sent_at = Set(Some(Utc::now().fixed_offset()));
        } else {
            model.status = Set("delivery_failed".to_string());
        }
        if ticket_ref.is_some() {
            model.crm_ticket_ref = Set(ticket_ref);
        }
        let updated = self.notifications.update(model).await?;

        info!(
            notification_id = %updated.id,
            rule_id = %updated.rule_id,
            project_id = %updated.project_id,
            severity = %updated.severity,
            status = %updated.status,
            "Notification dispatched"
        );
        Ok(Some(updated))
    }

    async fn send_email(&self, result: &RuleResult) -> bool {
        if result.recipients.is_empty() {
            warn!(rule_id = %result.rule_id, "No recipients for notification");
            return false;
        }

        let message = EmailMessage {
            to: result.recipients.clone(),
            subject: result.subject.clone(),
            html: result
                .html
                .clone()
                .unwrap_or_else(|| format!("<p>{}</p>", result.subject)),
            text: result.text.clone().unwrap_or_else(|| result.subject.clone()),
        };

        match self.email.send(&message).await {
            Ok(()) => true,
            Err(err) => {
                warn!(rule_id = %result.rule_id, error = %err, "Notification email failed");
                false
            }
        }
    }

    fn broadcast(&self, created: &notification::Model) {
        let delivered = self.push.broadcast(&json!({
            "type": "notification",
            "id": created.id,
            "rule_id": created.rule_id,
            "project_id": created.project_id,
            "order_id": created.order_id,
            "event_id": created.event_id,
            "severity": created.severity,
            "subject": created.subject,
            "created_at": created.created_at,
        }));
        debug!(notification_id = %created.id, clients = delivered, "Notification pushed");
    }

    async fn open_ticket(&self, created: &notification::Model) -> Option<String> {
        let request = TicketRequest {
            notification_id: created.id,
            project_id: created.project_id,
            rule_id: created.rule_id,
            subject: created.subject.clone(),
        };
        match self.ticketing.create_ticket(&request).await {
            Ok(ticket_ref) => Some(ticket_ref),
            Err(err) => {
                warn!(notification_id = %created.id, error = %err, "CRM ticket creation failed");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn result(event_id: Option<Uuid>, scope: RuleScope, order_id: Option<Uuid>) -> RuleResult {
        RuleResult {
            rule_id: Uuid::nil(),
            rule_name: "rule".to_string(),
            triggered: true,
            severity: Severity::Critical,
            scope,
            recipients: Vec::new(),
            subject: "subject".to_string(),
            html: None,
            text: None,
            project_id: Uuid::from_u128(1),
            order_id,
            event_id,
            create_ticket: false,
        }
    }

    #[test]
    fn dedupe_key_prefers_event() {
        let event_id = Uuid::from_u128(7);
        let key = dedupe_key(&result(Some(event_id), RuleScope::Project, None));
        assert_eq!(key, format!("{}:{}", Uuid::nil(), event_id));
    }

    #[test]
    fn dedupe_key_falls_back_to_scoped_entity() {
        let order_id = Uuid::from_u128(9);
        let order_key = dedupe_key(&result(None, RuleScope::Order, Some(order_id)));
        assert_eq!(order_key, format!("{}:order:{}", Uuid::nil(), order_id));

        let project_key = dedupe_key(&result(None, RuleScope::Project, Some(order_id)));
        assert_eq!(
            project_key,
            format!("{}:project:{}", Uuid::nil(), Uuid::from_u128(1))
        );
    }
}
