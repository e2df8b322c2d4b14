//! Migration creating the fulfillment aggregates.
//!
//! A project owns its orders plus exactly one consolidation, last-mile
//! delivery and installation record.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Projects::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(Projects::Id).uuid().not_null().primary_key())
                    .col(ColumnDef::new(Projects::Reference).text().not_null())
                    .col(ColumnDef::new(Projects::CustomerName).text().null())
                    .col(
                        ColumnDef::new(Projects::Status)
                            .text()
                            .not_null()
                            .default("active"),
                    )
                    .col(
                        ColumnDef::new(Projects::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(Projects::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_projects_reference_unique")
                    .table(Projects::Table)
                    .col(Projects::Reference)
                    .unique()
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(Orders::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(Orders::Id).uuid().not_null().primary_key())
                    .col(ColumnDef::new(Orders::ProjectId).uuid().not_null())
                    .col(ColumnDef::new(Orders::Reference).text().not_null())
                    .col(
                        ColumnDef::new(Orders::Status)
                            .text()
                            .not_null()
                            .default("pending"),
                    )
                    .col(
                        ColumnDef::new(Orders::PromisedDeliveryAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(Orders::ConfirmedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(Orders::DispatchedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(ColumnDef::new(Orders::Eta).timestamp_with_time_zone().null())
                    .col(
                        ColumnDef::new(Orders::ArrivedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(ColumnDef::new(Orders::Carrier).text().null())
                    .col(ColumnDef::new(Orders::TrackingRef).text().null())
                    .col(ColumnDef::new(Orders::ShortageItems).json_binary().null())
                    .col(
                        ColumnDef::new(Orders::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(Orders::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_orders_project_id")
                            .from(Orders::Table, Orders::ProjectId)
                            .to(Projects::Table, Projects::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_orders_project_reference_unique")
                    .table(Orders::Table)
                    .col(Orders::ProjectId)
                    .col(Orders::Reference)
                    .unique()
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(Consolidations::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Consolidations::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(Consolidations::ProjectId).uuid().not_null())
                    .col(
                        ColumnDef::new(Consolidations::Status)
                            .text()
                            .not_null()
                            .default("pending"),
                    )
                    .col(
                        ColumnDef::new(Consolidations::OrdersRequired)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(Consolidations::OrdersArrived)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(Consolidations::CompletedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(ColumnDef::new(Consolidations::ApprovedBy).text().null())
                    .col(
                        ColumnDef::new(Consolidations::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(Consolidations::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_consolidations_project_id")
                            .from(Consolidations::Table, Consolidations::ProjectId)
                            .to(Projects::Table, Projects::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_consolidations_project_unique")
                    .table(Consolidations::Table)
                    .col(Consolidations::ProjectId)
                    .unique()
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(LastMileDeliveries::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(LastMileDeliveries::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(LastMileDeliveries::ProjectId)
                            .uuid()
                            .not_null(),
                    )
                    .col(ColumnDef::new(LastMileDeliveries::ExternalRef).text().null())
                    .col(
                        ColumnDef::new(LastMileDeliveries::Status)
                            .text()
                            .not_null()
                            .default("not_ready"),
                    )
                    .col(
                        ColumnDef::new(LastMileDeliveries::ScheduledDate)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(LastMileDeliveries::DeliveredAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(LastMileDeliveries::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(LastMileDeliveries::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_last_mile_deliveries_project_id")
                            .from(LastMileDeliveries::Table, LastMileDeliveries::ProjectId)
                            .to(Projects::Table, Projects::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_last_mile_deliveries_project_unique")
                    .table(LastMileDeliveries::Table)
                    .col(LastMileDeliveries::ProjectId)
                    .unique()
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(Installations::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Installations::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(Installations::ProjectId).uuid().not_null())
                    .col(
                        ColumnDef::new(Installations::Status)
                            .text()
                            .not_null()
                            .default("planned"),
                    )
                    .col(
                        ColumnDef::new(Installations::ScheduledAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(Installations::CompletedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(Installations::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(Installations::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_installations_project_id")
                            .from(Installations::Table, Installations::ProjectId)
                            .to(Projects::Table, Projects::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_installations_project_unique")
                    .table(Installations::Table)
                    .col(Installations::ProjectId)
                    .unique()
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Installations::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(LastMileDeliveries::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Consolidations::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Orders::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Projects::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum Projects {
    Table,
    Id,
    Reference,
    CustomerName,
    Status,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum Orders {
    Table,
    Id,
    ProjectId,
    Reference,
    Status,
    PromisedDeliveryAt,
    ConfirmedAt,
    DispatchedAt,
    Eta,
    ArrivedAt,
    Carrier,
    TrackingRef,
    ShortageItems,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum Consolidations {
    Table,
    Id,
    ProjectId,
    Status,
    OrdersRequired,
    OrdersArrived,
    CompletedAt,
    ApprovedBy,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum LastMileDeliveries {
    Table,
    Id,
    ProjectId,
    ExternalRef,
    Status,
    ScheduledDate,
    DeliveredAt,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum Installations {
    Table,
    Id,
    ProjectId,
    Status,
    ScheduledAt,
    CompletedAt,
    CreatedAt,
    UpdatedAt,
}
