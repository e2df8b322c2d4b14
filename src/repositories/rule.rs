//! # Anomaly Rule Repository

use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, DbErr, EntityTrait, QueryFilter,
    QueryOrder, Set,
};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use super::now;
use crate::models::{AnomalyRule, anomaly_rule};

/// Fields needed to create a rule.
#[derive(Debug, Clone)]
pub struct NewRule {
    pub name: String,
    pub scope: String,
    pub step_type: Option<String>,
    pub trigger: String,
    pub severity: String,
    pub condition: JsonValue,
    pub action: JsonValue,
}

#[derive(Debug, Clone)]
pub struct RuleRepository {
    db: DatabaseConnection,
}

impl RuleRepository {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    pub async fn create(&self, rule: NewRule) -> Result<anomaly_rule::Model, DbErr> {
        let timestamp = now();
        anomaly_rule::ActiveModel {
            id: Set(Uuid::new_v4()),
            name: Set(rule.name),
            scope: Set(rule.scope),
            step_type: Set(rule.step_type),
            trigger: Set(rule.trigger),
            severity: Set(rule.severity),
            condition: Set(rule.condition),
            action: Set(rule.action),
            active: Set(true),
            created_at: Set(timestamp),
            updated_at: Set(timestamp),
        }
        .insert(&self.db)
        .await
    }

    /// Active rules for one evaluation trigger, oldest first.
    pub async fn list_active(&self, trigger: &str) -> Result<Vec<anomaly_rule::Model>, DbErr> {
        AnomalyRule::find()
            .filter(anomaly_rule::Column::Active.eq(true))
            .filter(anomaly_rule::Column::Trigger.eq(trigger))
            .order_by_asc(anomaly_rule::Column::CreatedAt)
            .all(&self.db)
            .await
    }

    pub async fn set_active(&self, id: Uuid, active: bool) -> Result<Option<anomaly_rule::Model>, DbErr> {
        let Some(existing) = AnomalyRule::find_by_id(id).one(&self.db).await? else {
            return Ok(None);
        };
        let mut model: anomaly_rule::ActiveModel = existing.into();
        model.active = Set(active);
        model.updated_at = Set(now());
        model.update(&self.db).await.map(Some)
    }
}
