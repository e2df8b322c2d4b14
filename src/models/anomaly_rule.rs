//! AnomalyRule entity model
//!
//! Condition and action are stored as JSON and decoded into
//! [`crate::rules::Condition`] and [`crate::rules::RuleAction`] at evaluation
//! time.

use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;
use serde_json::Value as JsonValue;
use uuid::Uuid;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "anomaly_rules")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    pub name: String,

    /// project | order
    pub scope: String,

    /// Restricts realtime evaluation to events mapped to this step type
    pub step_type: Option<String>,

    /// realtime | hourly | daily
    pub trigger: String,

    /// ok | warning | critical
    pub severity: String,

    #[sea_orm(column_type = "JsonBinary")]
    pub condition: JsonValue,

    #[sea_orm(column_type = "JsonBinary")]
    pub action: JsonValue,

    pub active: bool,
    pub created_at: DateTimeWithTimeZone,
    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
