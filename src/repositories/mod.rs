//! # Repository Layer
//!
//! Thin wrappers over SeaORM entities. Each repository owns a clone of the
//! `DatabaseConnection` and returns `DbErr` untouched so callers decide how
//! storage failures surface.

use chrono::Utc;
use sea_orm::prelude::DateTimeWithTimeZone;

pub mod activity_log;
pub mod dead_letter;
pub mod event;
pub mod notification;
pub mod project;
pub mod rule;
pub mod step;

pub use activity_log::ActivityLogRepository;
pub use dead_letter::DeadLetterRepository;
pub use event::{EventLinks, EventRepository};
pub use notification::{NewNotification, NotificationRepository};
pub use project::{ConsolidationTransition, ProjectRepository};
pub use rule::{NewRule, RuleRepository};
pub use step::StepRepository;

pub(crate) fn now() -> DateTimeWithTimeZone {
    Utc::now().fixed_offset()
}
