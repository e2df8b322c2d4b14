//! Database migrations for the fulfillment monitor.
//!
//! This module contains all database migrations using SeaORM Migration.

pub use sea_orm_migration::prelude::*;

mod m2026_01_05_090000_create_fulfillment_tables;
mod m2026_01_05_090100_create_event_tables;
mod m2026_01_05_090200_create_alerting_tables;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m2026_01_05_090000_create_fulfillment_tables::Migration),
            Box::new(m2026_01_05_090100_create_event_tables::Migration),
            Box::new(m2026_01_05_090200_create_alerting_tables::Migration),
        ]
    }
}
