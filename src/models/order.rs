//! Order entity model
//!
//! One supplier order inside a project. Shipping and stock events mutate the
//! order; consolidation counts are derived from the set of orders.

use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;
use serde_json::Value as JsonValue;
use uuid::Uuid;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "orders")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    pub project_id: Uuid,

    /// Upstream order reference, unique within the project
    pub reference: String,

    /// pending | confirmed | stock_shortage | stock_ok | dispatched | at_station | cancelled
    pub status: String,

    pub promised_delivery_at: Option<DateTimeWithTimeZone>,
    pub confirmed_at: Option<DateTimeWithTimeZone>,
    pub dispatched_at: Option<DateTimeWithTimeZone>,
    pub eta: Option<DateTimeWithTimeZone>,
    pub arrived_at: Option<DateTimeWithTimeZone>,
    pub carrier: Option<String>,
    pub tracking_ref: Option<String>,

    /// Items reported short by the ERP, cleared once stock is confirmed
    #[sea_orm(column_type = "JsonBinary", nullable)]
    pub shortage_items: Option<JsonValue>,

    pub created_at: DateTimeWithTimeZone,
    pub updated_at: DateTimeWithTimeZone,
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
