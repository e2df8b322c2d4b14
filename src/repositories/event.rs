//! # Event Repository

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use sea_orm::sea_query::{Expr, Query};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, DbErr, EntityTrait, QueryFilter,
    QueryOrder, QuerySelect, Set,
};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use super::now;
use crate::error::is_unique_violation;
use crate::models::{DeadLetterJob, Event, dead_letter_job, event};
use crate::normalization::NormalizedEvent;

/// Foreign keys resolved for an event before it is stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventLinks {
    pub project_id: Uuid,
    pub order_id: Option<Uuid>,
    pub installation_id: Option<Uuid>,
}

#[derive(Debug, Clone)]
pub struct EventRepository {
    db: DatabaseConnection,
}

impl EventRepository {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    /// Store a normalized event with `processed_at = null`.
    ///
    /// Returns `None` when `(source, source_ref)` already exists.
    pub async fn insert(
        &self,
        normalized: &NormalizedEvent,
        links: EventLinks,
    ) -> Result<Option<event::Model>, DbErr> {
        let model = event::ActiveModel {
            id: Set(Uuid::new_v4()),
            source: Set(normalized.source.as_str().to_string()),
            source_ref: Set(normalized.source_ref.clone()),
            event_type: Set(normalized.event_type.as_str().to_string()),
            project_id: Set(links.project_id),
            order_id: Set(links.order_id),
            installation_id: Set(links.installation_id),
            occurred_at: Set(normalized.occurred_at.fixed_offset()),
            payload: Set(JsonValue::Object(normalized.payload.clone())),
            acknowledged_by: Set(None),
            acknowledged_at: Set(None),
            created_at: Set(now()),
            processed_at: Set(None),
        };

        match model.insert(&self.db).await {
            Ok(created) => Ok(Some(created)),
            Err(err) if is_unique_violation(&err) => Ok(None),
            Err(err) => Err(err),
        }
    }

    pub async fn find_by_id(&self, id: Uuid) -> Result<Option<event::Model>, DbErr> {
        Event::find_by_id(id).one(&self.db).await
    }

    pub async fn find_by_source_ref(
        &self,
        source: &str,
        source_ref: &str,
    ) -> Result<Option<event::Model>, DbErr> {
        Event::find()
            .filter(event::Column::Source.eq(source))
            .filter(event::Column::SourceRef.eq(source_ref))
            .one(&self.db)
            .await
    }

    pub async fn mark_processed(&self, id: Uuid) -> Result<(), DbErr> {
        Event::update_many()
            .col_expr(event::Column::ProcessedAt, Expr::value(now()))
            .filter(event::Column::Id.eq(id))
            .exec(&self.db)
            .await?;
        Ok(())
    }

    /// Record an operator acknowledgement. The first acknowledgement wins.
    pub async fn acknowledge(
        &self,
        id: Uuid,
        acknowledged_by: &str,
    ) -> Result<Option<event::Model>, DbErr> {
        let Some(existing) = self.find_by_id(id).await? else {
            return Ok(None);
        };
        if existing.acknowledged_by.is_some() {
            return Ok(Some(existing));
        }

        let mut active: event::ActiveModel = existing.into();
        active.acknowledged_by = Set(Some(acknowledged_by.to_string()));
        active.acknowledged_at = Set(Some(now()));
        active.update(&self.db).await.map(Some)
    }

    /// Most recent events for a project, newest first.
    pub async fn recent_for_project(
        &self,
        project_id: Uuid,
        limit: u64,
    ) -> Result<Vec<event::Model>, DbErr> {
        Event::find()
            .filter(event::Column::ProjectId.eq(project_id))
            .order_by_desc(event::Column::OccurredAt)
            .limit(limit)
            .all(&self.db)
            .await
    }

    /// Unprocessed events created before `cutoff` that were never
    /// dead-lettered, oldest first, skipping the ids in `exclude`.
    pub async fn list_unprocessed_before(
        &self,
        cutoff: DateTime<Utc>,
        exclude: &HashSet<Uuid>,
    ) -> Result<Vec<event::Model>, DbErr> {
        let dead_lettered = Query::select()
            .column(dead_letter_job::Column::EventId)
            .from(DeadLetterJob)
            .to_owned();

        let mut query = Event::find()
            .filter(event::Column::ProcessedAt.is_null())
            .filter(event::Column::CreatedAt.lt(cutoff.fixed_offset()))
            .filter(event::Column::Id.not_in_subquery(dead_lettered));
        if !exclude.is_empty() {
            query = query.filter(event::Column::Id.is_not_in(exclude.iter().copied()));
        }

        query
            .order_by_asc(event::Column::CreatedAt)
            .all(&self.db)
            .await
    }
}
