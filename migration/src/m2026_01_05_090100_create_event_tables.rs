//! Migration creating the ingested event log, derived steps and the
//! activity audit trail.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Events::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(Events::Id).uuid().not_null().primary_key())
                    .col(ColumnDef::new(Events::Source).text().not_null())
                    .col(ColumnDef::new(Events::SourceRef).text().not_null())
                    .col(ColumnDef::new(Events::EventType).text().not_null())
                    .col(ColumnDef::new(Events::ProjectId).uuid().not_null())
                    .col(ColumnDef::new(Events::OrderId).uuid().null())
                    .col(ColumnDef::new(Events::InstallationId).uuid().null())
                    .col(
                        ColumnDef::new(Events::OccurredAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(ColumnDef::new(Events::Payload).json_binary().not_null())
                    .col(ColumnDef::new(Events::AcknowledgedBy).text().null())
                    .col(
                        ColumnDef::new(Events::AcknowledgedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(Events::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(Events::ProcessedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_events_project_id")
                            .from(Events::Table, Events::ProjectId)
                            .to(Projects::Table, Projects::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        // Idempotency key for upstream records
        manager
            .create_index(
                Index::create()
                    .name("idx_events_source_ref_unique")
                    .table(Events::Table)
                    .col(Events::Source)
                    .col(Events::SourceRef)
                    .unique()
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_events_processed_created")
                    .table(Events::Table)
                    .col(Events::ProcessedAt)
                    .col(Events::CreatedAt)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_events_project_occurred")
                    .table(Events::Table)
                    .col(Events::ProjectId)
                    .col(Events::OccurredAt)
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(Steps::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(Steps::Id).uuid().not_null().primary_key())
                    .col(ColumnDef::new(Steps::Scope).text().not_null())
                    .col(ColumnDef::new(Steps::OwningId).uuid().not_null())
                    .col(ColumnDef::new(Steps::ProjectId).uuid().null())
                    .col(ColumnDef::new(Steps::OrderId).uuid().null())
                    .col(ColumnDef::new(Steps::InstallationId).uuid().null())
                    .col(ColumnDef::new(Steps::StepType).text().not_null())
                    .col(ColumnDef::new(Steps::Status).text().not_null())
                    .col(
                        ColumnDef::new(Steps::ExpectedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(Steps::CompletedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(ColumnDef::new(Steps::EventIds).json_binary().not_null())
                    .col(
                        ColumnDef::new(Steps::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(Steps::UpdatedAt)
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
                    .name("idx_steps_scope_owner_type_unique")
                    .table(Steps::Table)
                    .col(Steps::Scope)
                    .col(Steps::OwningId)
                    .col(Steps::StepType)
                    .unique()
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(ActivityLogs::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(ActivityLogs::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(ActivityLogs::ProjectId).uuid().not_null())
                    .col(ColumnDef::new(ActivityLogs::EventId).uuid().null())
                    .col(ColumnDef::new(ActivityLogs::Action).text().not_null())
                    .col(ColumnDef::new(ActivityLogs::Detail).json_binary().not_null())
                    .col(
                        ColumnDef::new(ActivityLogs::CreatedAt)
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
                    .name("idx_activity_logs_project_created")
                    .table(ActivityLogs::Table)
                    .col(ActivityLogs::ProjectId)
                    .col(ActivityLogs::CreatedAt)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(ActivityLogs::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Steps::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Events::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum Events {
    Table,
    Id,
    Source,
    SourceRef,
    EventType,
    ProjectId,
    OrderId,
    InstallationId,
    OccurredAt,
    Payload,
    AcknowledgedBy,
    AcknowledgedAt,
    CreatedAt,
    ProcessedAt,
}

#[derive(DeriveIden)]
enum Steps {
    Table,
    Id,
    Scope,
    OwningId,
    ProjectId,
    OrderId,
    InstallationId,
    StepType,
    Status,
    ExpectedAt,
    CompletedAt,
    EventIds,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum ActivityLogs {
    Table,
    Id,
    ProjectId,
    EventId,
    Action,
    Detail,
    CreatedAt,
}

#[derive(DeriveIden)]
enum Projects {
    Table,
    Id,
}
