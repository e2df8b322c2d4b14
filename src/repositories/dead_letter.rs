//! # Dead-letter Repository

use sea_orm::{
    ActiveModelTrait, DatabaseConnection, DbErr, EntityTrait, QueryOrder, QuerySelect, Set,
};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use super::now;
use crate::models::{DeadLetterJob, dead_letter_job};

#[derive(Debug, Clone)]
pub struct DeadLetterRepository {
    db: DatabaseConnection,
}

impl DeadLetterRepository {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    pub async fn insert(
        &self,
        event_id: Uuid,
        attempts: u32,
        error: JsonValue,
    ) -> Result<dead_letter_job::Model, DbErr> {
        dead_letter_job::ActiveModel {
            id: Set(Uuid::new_v4()),
            event_id: Set(event_id),
            attempts: Set(i32::try_from(attempts).unwrap_or(i32::MAX)),
            error: Set(error),
            created_at: Set(now()),
        }
        .insert(&self.db)
        .await
    }

    /// Newest dead letters first.
    pub async fn list(&self, limit: u64) -> Result<Vec<dead_letter_job::Model>, DbErr> {
        DeadLetterJob::find()
            .order_by_desc(dead_letter_job::Column::CreatedAt)
            .limit(limit)
            .all(&self.db)
            .await
    }
}
