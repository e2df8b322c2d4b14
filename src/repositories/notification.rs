//! # Notification Repository

use chrono::{DateTime, Utc};
use sea_orm::sea_query::{Expr, Query};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, DatabaseConnection, DbErr, EntityTrait,
    PaginatorTrait, QueryFilter, QueryOrder, Set,
};
use uuid::Uuid;

use super::now;
use crate::error::is_unique_violation;
use crate::models::{Event, Notification, event, notification};

/// Fields of a notification before delivery.
#[derive(Debug, Clone)]
pub struct NewNotification {
    pub project_id: Uuid,
    pub order_id: Option<Uuid>,
    pub rule_id: Uuid,
    pub event_id: Option<Uuid>,
    pub dedupe_key: String,
    pub severity: String,
    pub subject: String,
}

#[derive(Debug, Clone)]
pub struct NotificationRepository {
    db: DatabaseConnection,
}

impl NotificationRepository {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    /// Insert a `pending` notification. Returns `None` if the dedupe key is taken.
    pub async fn insert(
        &self,
        new: NewNotification,
    ) -> Result<Option<notification::Model>, DbErr> {
        let model = notification::ActiveModel {
            id: Set(Uuid::new_v4()),
            project_id: Set(new.project_id),
            order_id: Set(new.order_id),
            rule_id: Set(new.rule_id),
            event_id: Set(new.event_id),
            dedupe_key: Set(new.dedupe_key),
            severity: Set(new.severity),
            subject: Set(new.subject),
            status: Set("pending".to_string()),
            sent_at: Set(None),
            escalated_at: Set(None),
            crm_ticket_ref: Set(None),
            created_at: Set(now()),
        };

        match model.insert(&self.db).await {
            Ok(created) => Ok(Some(created)),
            Err(err) if is_unique_violation(&err) => Ok(None),
            Err(err) => Err(err),
        }
    }

    pub async fn find_by_dedupe_key(
        &self,
        dedupe_key: &str,
    ) -> Result<Option<notification::Model>, DbErr> {
        Notification::find()
            .filter(notification::Column::DedupeKey.eq(dedupe_key))
            .one(&self.db)
            .await
    }

    pub async fn update(
        &self,
        model: notification::ActiveModel,
    ) -> Result<notification::Model, DbErr> {
        model.update(&self.db).await
    }

    /// Critical notifications not yet escalated whose delivery (or creation,
    /// when never delivered) happened before `cutoff` and whose event has not
    /// been acknowledged.
    pub async fn escalation_candidates(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<notification::Model>, DbErr> {
        let cutoff = cutoff.fixed_offset();
        let acknowledged = Query::select()
            .column(event::Column::Id)
            .from(Event)
            .and_where(event::Column::AcknowledgedBy.is_not_null())
            .to_owned();

        Notification::find()
            .filter(notification::Column::Severity.eq("critical"))
            .filter(notification::Column::EscalatedAt.is_null())
            .filter(
                Condition::any()
                    .add(notification::Column::EventId.is_null())
                    .add(notification::Column::EventId.not_in_subquery(acknowledged)),
            )
            .filter(
                Condition::any()
                    .add(notification::Column::SentAt.lt(cutoff))
                    .add(
                        Condition::all()
                            .add(notification::Column::SentAt.is_null())
                            .add(notification::Column::CreatedAt.lt(cutoff)),
                    ),
            )
            .order_by_asc(notification::Column::CreatedAt)
            .all(&self.db)
            .await
    }

    /// Stamp `escalated_at` unless another sweep already did.
    ///
    /// Returns `true` when this call won the claim.
    pub async fn claim_escalation(
        &self,
        id: Uuid,
        escalated_at: DateTime<Utc>,
    ) -> Result<bool, DbErr> {
        let result = Notification::update_many()
            .col_expr(
                notification::Column::EscalatedAt,
                Expr::value(escalated_at.fixed_offset()),
            )
            .filter(notification::Column::Id.eq(id))
            .filter(notification::Column::EscalatedAt.is_null())
            .exec(&self.db)
            .await?;
        Ok(result.rows_affected == 1)
    }

    pub async fn count_for_rule(&self, rule_id: Uuid) -> Result<u64, DbErr> {
        Notification::find()
            .filter(notification::Column::RuleId.eq(rule_id))
            .count(&self.db)
            .await
    }
}
