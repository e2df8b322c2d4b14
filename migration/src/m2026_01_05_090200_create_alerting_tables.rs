//! Migration creating anomaly rules, notifications and the dead-letter table.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(AnomalyRules::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(AnomalyRules::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(AnomalyRules::Name).text().not_null())
                    .col(ColumnDef::new(AnomalyRules::Scope).text().not_null())
                    .col(ColumnDef::new(AnomalyRules::StepType).text().null())
                    .col(
                        ColumnDef::new(AnomalyRules::Trigger)
                            .text()
                            .not_null()
                            .default("realtime"),
                    )
                    .col(ColumnDef::new(AnomalyRules::Severity).text().not_null())
                    .col(
                        ColumnDef::new(AnomalyRules::Condition)
                            .json_binary()
                            .not_null(),
                    )
                    .col(ColumnDef::new(AnomalyRules::Action).json_binary().not_null())
                    .col(
                        ColumnDef::new(AnomalyRules::Active)
                            .boolean()
                            .not_null()
                            .default(true),
                    )
                    .col(
                        ColumnDef::new(AnomalyRules::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(AnomalyRules::UpdatedAt)
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
                    .name("idx_anomaly_rules_active_trigger")
                    .table(AnomalyRules::Table)
                    .col(AnomalyRules::Active)
                    .col(AnomalyRules::Trigger)
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(Notifications::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Notifications::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(Notifications::ProjectId).uuid().not_null())
                    .col(ColumnDef::new(Notifications::OrderId).uuid().null())
                    .col(ColumnDef::new(Notifications::RuleId).uuid().not_null())
                    .col(ColumnDef::new(Notifications::EventId).uuid().null())
                    .col(ColumnDef::new(Notifications::DedupeKey).text().not_null())
                    .col(ColumnDef::new(Notifications::Severity).text().not_null())
                    .col(ColumnDef::new(Notifications::Subject).text().not_null())
                    .col(
                        ColumnDef::new(Notifications::Status)
                            .text()
                            .not_null()
                            .default("pending"),
                    )
                    .col(
                        ColumnDef::new(Notifications::SentAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(Notifications::EscalatedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(ColumnDef::new(Notifications::CrmTicketRef).text().null())
                    .col(
                        ColumnDef::new(Notifications::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_notifications_rule_id")
                            .from(Notifications::Table, Notifications::RuleId)
                            .to(AnomalyRules::Table, AnomalyRules::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        // At most one notification per (rule, event) or (rule, scope, entity)
        manager
            .create_index(
                Index::create()
                    .name("idx_notifications_dedupe_key_unique")
                    .table(Notifications::Table)
                    .col(Notifications::DedupeKey)
                    .unique()
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_notifications_escalation_scan")
                    .table(Notifications::Table)
                    .col(Notifications::Severity)
                    .col(Notifications::EscalatedAt)
                    .col(Notifications::SentAt)
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(DeadLetterJobs::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(DeadLetterJobs::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(DeadLetterJobs::EventId).uuid().not_null())
                    .col(ColumnDef::new(DeadLetterJobs::Attempts).integer().not_null())
                    .col(ColumnDef::new(DeadLetterJobs::Error).json_binary().not_null())
                    .col(
                        ColumnDef::new(DeadLetterJobs::CreatedAt)
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
                    .name("idx_dead_letter_jobs_event")
                    .table(DeadLetterJobs::Table)
                    .col(DeadLetterJobs::EventId)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(DeadLetterJobs::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Notifications::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(AnomalyRules::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum AnomalyRules {
    Table,
    Id,
    Name,
    Scope,
    StepType,
    Trigger,
    Severity,
    Condition,
    Action,
    Active,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum Notifications {
    Table,
    Id,
    ProjectId,
    OrderId,
    RuleId,
    EventId,
    DedupeKey,
    Severity,
    Subject,
    Status,
    SentAt,
    EscalatedAt,
    CrmTicketRef,
    CreatedAt,
}

#[derive(DeriveIden)]
enum DeadLetterJobs {
    Table,
    Id,
    EventId,
    Attempts,
    Error,
    CreatedAt,
}
