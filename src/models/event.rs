//! Event entity model
//!
//! Persisted form of a normalized upstream event. `(source, source_ref)` is
//! unique, and `processed_at` stays null until the worker pipeline finished.

use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;
use serde_json::Value as JsonValue;
use uuid::Uuid;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "events")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    /// Upstream system identifier (erp, oms, tms, ...)
    pub source: String,

    /// Record identifier inside the upstream system
    pub source_ref: String,

    pub event_type: String,
    pub project_id: Uuid,
    pub order_id: Option<Uuid>,
    pub installation_id: Option<Uuid>,
    pub occurred_at: DateTimeWithTimeZone,

    #[sea_orm(column_type = "JsonBinary")]
    pub payload: JsonValue,

    pub acknowledged_by: Option<String>,
    pub acknowledged_at: Option<DateTimeWithTimeZone>,
    pub created_at: DateTimeWithTimeZone,
    pub processed_at: Option<DateTimeWithTimeZone>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::project::Entity",
        from = "Column::ProjectId",
        to = "super::project::Column::Id"
    )]
    Project,
}

impl Related<super::project::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Project.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
