//! Step entity model
//!
//! A step is one stage of the fulfillment lifecycle owned by a project, order
//! or installation. `(scope, owning_id, step_type)` is unique and only the id
//! column matching `scope` is populated.

use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;
use serde_json::Value as JsonValue;
use uuid::Uuid;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "steps")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    /// project | order | installation
    pub scope: String,

    /// Id of the owning aggregate; mirrors the populated scope column
    pub owning_id: Uuid,

    pub project_id: Option<Uuid>,
    pub order_id: Option<Uuid>,
    pub installation_id: Option<Uuid>,

    pub step_type: String,

    /// pending | in_progress | completed | anomaly | skipped
    pub status: String,

    pub expected_at: Option<DateTimeWithTimeZone>,

    /// Set the first time the step completes and never cleared afterwards
    pub completed_at: Option<DateTimeWithTimeZone>,

    /// JSON array of contributing event ids
    #[sea_orm(column_type = "JsonBinary")]
    pub event_ids: JsonValue,

    pub created_at: DateTimeWithTimeZone,
    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    /// Event ids recorded on this step, ignoring malformed entries.
    pub fn event_id_list(&self) -> Vec<Uuid> {
        self.event_ids
            .as_array()
            .map(|ids| {
                ids.iter()
                    .filter_map(|value| value.as_str())
                    .filter_map(|value| Uuid::parse_str(value).ok())
                    .collect()
            })
            .unwrap_or_default()
    }
}
