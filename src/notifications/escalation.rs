//! Escalation sweep
//!
//! Critical notifications that stay unacknowledged past the threshold are
//! escalated once to the manager list.

use chrono::{DateTime, Duration, Utc};
use metrics::counter;
use serde_json::json;
use tracing::{info, warn};

use super::NotificationService;
use crate::error::PipelineError;
use crate::models::notification;
use crate::transports::EmailMessage;

/// Outcome of one sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EscalationSummary {
    pub examined: usize,
    pub escalated: usize,
}

fn elapsed_label(sent_at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> String {
    match sent_at {
        Some(sent_at) => format!("{:.1} hours", (now - sent_at).num_minutes() as f64 / 60.0),
        None => "unknown".to_string(),
    }
}

impl NotificationService {
    pub async fn run_escalation_check(
        &self,
        now: DateTime<Utc>,
    ) -> Result<EscalationSummary, PipelineError> {
        let threshold = i64::try_from(self.escalation_threshold_hours)
            .ok()
            .and_then(Duration::try_hours)
            .unwrap_or(Duration::MAX);
        let cutoff = now
            .checked_sub_signed(threshold)
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        let candidates = self.notifications.escalation_candidates(cutoff).await?;
        let mut summary = EscalationSummary {
            examined: candidates.len(),
            ..EscalationSummary::default()
        };

        for candidate in candidates {
            if !self.notifications.claim_escalation(candidate.id, now).await? {
                continue;
            }

            self.send_escalation(&candidate, now).await?;
            summary.escalated += 1;
            counter!("notifications_escalated_total").increment(1);
        }

        info!(
            examined = summary.examined,
            escalated = summary.escalated,
            "Escalation sweep finished"
        );
        Ok(summary)
    }

    async fn send_escalation(
        &self,
        candidate: &notification::Model,
        now: DateTime<Utc>,
    ) -> Result<(), PipelineError> {
        let project_ref = self
            .projects
            .find_by_id(candidate.project_id)
            .await?
            .map(|project| project.reference)
            .unwrap_or_else(|| candidate.project_id.to_string());
        let elapsed = elapsed_label(
            candidate.sent_at.map(|sent_at| sent_at.with_timezone(&Utc)),
            now,
        );

        let text = format!(
            "Critical alert '{}' for project {} has not been acknowledged. Time since notification: {}.",
            candidate.subject, project_ref, elapsed
        );
        let message = EmailMessage {
            to: self.escalation_recipients.clone(),
            subject: format!("[ESCALATION] {}", candidate.subject),
            html: format!("<p>{text}</p>"),
            text,
        };

        if message.to.is_empty() {
            warn!(notification_id = %candidate.id, "No escalation recipients configured");
        } else if let Err(err) = self.email.send(&message).await {
            warn!(notification_id = %candidate.id, error = %err, "Escalation email failed");
        }

        self.push.broadcast(&json!({
            "type": "escalation",
            "id": candidate.id,
            "project_id": candidate.project_id,
            "severity": candidate.severity,
            "subject": candidate.subject,
            "elapsed": elapsed,
        }));

        info!(
            notification_id = %candidate.id,
            project_ref = %project_ref,
            elapsed = %elapsed,
            "Notification escalated"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn missing_sent_at_renders_unknown() {
        let now = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();
        assert_eq!(elapsed_label(None, now), "unknown");
        assert_eq!(
            elapsed_label(Some(now - Duration::minutes(270)), now),
            "4.5 hours"
        );
    }
}
