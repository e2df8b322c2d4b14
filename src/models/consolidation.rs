//! Consolidation entity model
//!
//! Tracks whether every order of a project has reached the consolidation
//! station. One row per project.

use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;
use uuid::Uuid;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "consolidations")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    #[sea_orm(unique)]
    pub project_id: Uuid,

    /// pending | partial | partial_approved | complete
    pub status: String,

    pub orders_required: i32,
    pub orders_arrived: i32,
    pub completed_at: Option<DateTimeWithTimeZone>,

    /// Operator who released a partial consolidation
    pub approved_by: Option<String>,

    pub created_at: DateTimeWithTimeZone,
    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
