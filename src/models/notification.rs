//! Notification entity model
//!
//! One row per dispatched anomaly. `dedupe_key` is unique so a rule fires at
//! most once per event (or per entity when no event is attached).

use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;
use uuid::Uuid;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "notifications")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub project_id: Uuid,
    pub order_id: Option<Uuid>,
    pub rule_id: Uuid,
    pub event_id: Option<Uuid>,
    #[sea_orm(unique)]
    pub dedupe_key: String,
    pub severity: String,
    pub subject: String,
    /// pending | sent | delivery_failed
    pub status: String,
    pub sent_at: Option<DateTimeWithTimeZone>,
    pub escalated_at: Option<DateTimeWithTimeZone>,
    pub crm_ticket_ref: Option<String>,
    pub created_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::anomaly_rule::Entity",
        from = "Column::RuleId",
        to = "super::anomaly_rule::Column::Id"
    )]
    Rule,
}

impl Related<super::anomaly_rule::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Rule.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
