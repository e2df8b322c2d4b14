//! # Data Models
//!
//! SeaORM entities for the fulfillment domain plus small response types
//! shared by the HTTP layer.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

pub mod activity_log;
pub mod anomaly_rule;
pub mod consolidation;
pub mod dead_letter_job;
pub mod event;
pub mod installation;
pub mod last_mile_delivery;
pub mod notification;
pub mod order;
pub mod project;
pub mod step;

pub use activity_log::Entity as ActivityLog;
pub use anomaly_rule::Entity as AnomalyRule;
pub use consolidation::Entity as Consolidation;
pub use dead_letter_job::Entity as DeadLetterJob;
pub use event::Entity as Event;
pub use installation::Entity as Installation;
pub use last_mile_delivery::Entity as LastMileDelivery;
pub use notification::Entity as Notification;
pub use order::Entity as Order;
pub use project::Entity as Project;
pub use step::Entity as Step;

/// Basic service information response
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ServiceInfo {
    /// The name of the service
    pub service: String,
    /// The version of the service
    pub version: String,
}

impl Default for ServiceInfo {
    fn default() -> Self {
        Self {
            service: "fulfillment-monitor".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}
