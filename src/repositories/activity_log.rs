//! # Activity Log Repository
//!
//! Append-only audit trail of entity mutations.

use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, DbErr, EntityTrait, PaginatorTrait,
    QueryFilter, QueryOrder, Set,
};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use super::now;
use crate::models::{ActivityLog, activity_log};

#[derive(Debug, Clone)]
pub struct ActivityLogRepository {
    db: DatabaseConnection,
}

impl ActivityLogRepository {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    pub async fn append(
        &self,
        project_id: Uuid,
        event_id: Option<Uuid>,
        action: &str,
        detail: JsonValue,
    ) -> Result<activity_log::Model, DbErr> {
        activity_log::ActiveModel {
            id: Set(Uuid::new_v4()),
            project_id: Set(project_id),
            event_id: Set(event_id),
            action: Set(action.to_string()),
            detail: Set(detail),
            created_at: Set(now()),
        }
        .insert(&self.db)
        .await
    }

    /// Whether `action` was already logged for `event_id`.
    pub async fn exists(&self, event_id: Uuid, action: &str) -> Result<bool, DbErr> {
        let count = ActivityLog::find()
            .filter(activity_log::Column::EventId.eq(event_id))
            .filter(activity_log::Column::Action.eq(action))
            .count(&self.db)
            .await?;
        Ok(count > 0)
    }

    pub async fn for_project(&self, project_id: Uuid) -> Result<Vec<activity_log::Model>, DbErr> {
        ActivityLog::find()
            .filter(activity_log::Column::ProjectId.eq(project_id))
            .order_by_asc(activity_log::Column::CreatedAt)
            .all(&self.db)
            .await
    }
}
