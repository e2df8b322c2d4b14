//! # Project Repository
//!
//! Lookups and get-or-create operations for projects and the per-project
//! aggregates (orders, consolidation, last-mile delivery, installation).
//! Creation races are settled by the unique indexes: the loser of an insert
//! race re-reads the winner's row.

use sea_orm::prelude::DateTimeWithTimeZone;
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, DbErr, EntityTrait, QueryFilter,
    QueryOrder, Set,
};
use uuid::Uuid;

use super::now;
use crate::error::is_unique_violation;
use crate::models::{
    Consolidation, Installation, LastMileDelivery, Order, Project, consolidation, installation,
    last_mile_delivery, order, project,
};

/// Conditional consolidation status change.
#[derive(Debug, Clone)]
pub struct ConsolidationTransition<'a> {
    pub from: &'a [&'a str],
    pub to: &'a str,
    pub completed_at: Option<DateTimeWithTimeZone>,
    pub approved_by: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ProjectRepository {
    db: DatabaseConnection,
}

impl ProjectRepository {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    pub async fn find_by_id(&self, id: Uuid) -> Result<Option<project::Model>, DbErr> {
        Project::find_by_id(id).one(&self.db).await
    }

    pub async fn find_by_reference(&self, reference: &str) -> Result<Option<project::Model>, DbErr> {
        Project::find()
            .filter(project::Column::Reference.eq(reference))
            .one(&self.db)
            .await
    }

    /// Resolve a project reference, creating an `active` project on first sight.
    pub async fn get_or_create(&self, reference: &str) -> Result<project::Model, DbErr> {
        if let Some(existing) = self.find_by_reference(reference).await? {
            return Ok(existing);
        }

        let timestamp = now();
        let model = project::ActiveModel {
            id: Set(Uuid::new_v4()),
            reference: Set(reference.to_string()),
            customer_name: Set(None),
            status: Set("active".to_string()),
            created_at: Set(timestamp),
            updated_at: Set(timestamp),
        };

        match model.insert(&self.db).await {
            Ok(created) => {
                tracing::info!(project_id = %created.id, project_ref = %reference, "Project created");
                Ok(created)
            }
            Err(err) if is_unique_violation(&err) => self
                .find_by_reference(reference)
                .await?
                .ok_or_else(|| not_found("project", reference)),
            Err(err) => Err(err),
        }
    }

    pub async fn list_active(&self) -> Result<Vec<project::Model>, DbErr> {
        Project::find()
            .filter(project::Column::Status.eq("active"))
            .order_by_asc(project::Column::CreatedAt)
            .all(&self.db)
            .await
    }

    pub async fn update(&self, model: project::ActiveModel) -> Result<project::Model, DbErr> {
        model.update(&self.db).await
    }

    pub async fn find_order(&self, id: Uuid) -> Result<Option<order::Model>, DbErr> {
        Order::find_by_id(id).one(&self.db).await
    }

    pub async fn find_order_by_reference(
        &self,
        project_id: Uuid,
        reference: &str,
    ) -> Result<Option<order::Model>, DbErr> {
        Order::find()
            .filter(order::Column::ProjectId.eq(project_id))
            .filter(order::Column::Reference.eq(reference))
            .one(&self.db)
            .await
    }

    /// Resolve an order reference inside a project, creating a `pending` order
    /// when unknown.
    pub async fn get_or_create_order(
        &self,
        project_id: Uuid,
        reference: &str,
    ) -> Result<order::Model, DbErr> {
        if let Some(existing) = self.find_order_by_reference(project_id, reference).await? {
            return Ok(existing);
        }

        let timestamp = now();
        let model = order::ActiveModel {
            id: Set(Uuid::new_v4()),
            project_id: Set(project_id),
            reference: Set(reference.to_string()),
            status: Set("pending".to_string()),
            promised_delivery_at: Set(None),
            confirmed_at: Set(None),
            dispatched_at: Set(None),
            eta: Set(None),
            arrived_at: Set(None),
            carrier: Set(None),
            tracking_ref: Set(None),
            shortage_items: Set(None),
            created_at: Set(timestamp),
            updated_at: Set(timestamp),
        };

        match model.insert(&self.db).await {
            Ok(created) => {
                tracing::info!(
                    project_id = %project_id,
                    order_id = %created.id,
                    order_ref = %reference,
                    "Order created"
                );
                Ok(created)
            }
            Err(err) if is_unique_violation(&err) => self
                .find_order_by_reference(project_id, reference)
                .await?
                .ok_or_else(|| not_found("order", reference)),
            Err(err) => Err(err),
        }
    }

    pub async fn orders_for_project(&self, project_id: Uuid) -> Result<Vec<order::Model>, DbErr> {
        Order::find()
            .filter(order::Column::ProjectId.eq(project_id))
            .order_by_asc(order::Column::CreatedAt)
            .all(&self.db)
            .await
    }

    pub async fn update_order(&self, model: order::ActiveModel) -> Result<order::Model, DbErr> {
        model.update(&self.db).await
    }

    pub async fn find_consolidation(
        &self,
        project_id: Uuid,
    ) -> Result<Option<consolidation::Model>, DbErr> {
        Consolidation::find()
            .filter(consolidation::Column::ProjectId.eq(project_id))
            .one(&self.db)
            .await
    }

    pub async fn get_or_create_consolidation(
        &self,
        project_id: Uuid,
    ) -> Result<consolidation::Model, DbErr> {
        if let Some(existing) = self.find_consolidation(project_id).await? {
            return Ok(existing);
        }

        let timestamp = now();
        let model = consolidation::ActiveModel {
            id: Set(Uuid::new_v4()),
            project_id: Set(project_id),
            status: Set("pending".to_string()),
            orders_required: Set(0),
            orders_arrived: Set(0),
            completed_at: Set(None),
            approved_by: Set(None),
            created_at: Set(timestamp),
            updated_at: Set(timestamp),
        };

        match model.insert(&self.db).await {
            Ok(created) => Ok(created),
            Err(err) if is_unique_violation(&err) => self
                .find_consolidation(project_id)
                .await?
                .ok_or_else(|| not_found("consolidation", &project_id.to_string())),
            Err(err) => Err(err),
        }
    }

    /// Store recounted arrival counters unless a newer recount already
    /// recorded more arrivals.
    pub async fn record_consolidation_counts(
        &self,
        id: Uuid,
        orders_required: i32,
        orders_arrived: i32,
    ) -> Result<(), DbErr> {
        Consolidation::update_many()
            .col_expr(
                consolidation::Column::OrdersRequired,
                Expr::value(orders_required),
            )
            .col_expr(consolidation::Column::OrdersArrived, Expr::value(orders_arrived))
            .col_expr(consolidation::Column::UpdatedAt, Expr::value(now()))
            .filter(consolidation::Column::Id.eq(id))
            .filter(consolidation::Column::OrdersArrived.lte(orders_arrived))
            .exec(&self.db)
            .await?;
        Ok(())
    }

    /// Apply `transition` only while the consolidation is still in one of
    /// its `from` statuses. Returns `true` when this call moved it.
    pub async fn transition_consolidation(
        &self,
        id: Uuid,
        transition: ConsolidationTransition<'_>,
    ) -> Result<bool, DbErr> {
        let mut update = Consolidation::update_many()
            .col_expr(consolidation::Column::Status, Expr::value(transition.to))
            .col_expr(consolidation::Column::UpdatedAt, Expr::value(now()));
        if let Some(completed_at) = transition.completed_at {
            update = update.col_expr(consolidation::Column::CompletedAt, Expr::value(completed_at));
        }
        if let Some(approved_by) = transition.approved_by {
            update = update.col_expr(consolidation::Column::ApprovedBy, Expr::value(approved_by));
        }

        let result = update
            .filter(consolidation::Column::Id.eq(id))
            .filter(consolidation::Column::Status.is_in(transition.from.iter().copied()))
            .exec(&self.db)
            .await?;
        Ok(result.rows_affected == 1)
    }

    pub async fn find_last_mile(
        &self,
        project_id: Uuid,
    ) -> Result<Option<last_mile_delivery::Model>, DbErr> {
        LastMileDelivery::find()
            .filter(last_mile_delivery::Column::ProjectId.eq(project_id))
            .one(&self.db)
            .await
    }

    pub async fn get_or_create_last_mile(
        &self,
        project_id: Uuid,
    ) -> Result<last_mile_delivery::Model, DbErr> {
        if let Some(existing) = self.find_last_mile(project_id).await? {
            return Ok(existing);
        }

        let timestamp = now();
        let model = last_mile_delivery::ActiveModel {
            id: Set(Uuid::new_v4()),
            project_id: Set(project_id),
            external_ref: Set(None),
            status: Set("not_ready".to_string()),
            scheduled_date: Set(None),
            delivered_at: Set(None),
            created_at: Set(timestamp),
            updated_at: Set(timestamp),
        };

        match model.insert(&self.db).await {
            Ok(created) => Ok(created),
            Err(err) if is_unique_violation(&err) => self
                .find_last_mile(project_id)
                .await?
                .ok_or_else(|| not_found("last_mile_delivery", &project_id.to_string())),
            Err(err) => Err(err),
        }
    }

    pub async fn update_last_mile(
        &self,
        model: last_mile_delivery::ActiveModel,
    ) -> Result<last_mile_delivery::Model, DbErr> {
        model.update(&self.db).await
    }

    pub async fn find_installation(
        &self,
        project_id: Uuid,
    ) -> Result<Option<installation::Model>, DbErr> {
        Installation::find()
            .filter(installation::Column::ProjectId.eq(project_id))
            .one(&self.db)
            .await
    }

    pub async fn get_or_create_installation(
        &self,
        project_id: Uuid,
    ) -> Result<installation::Model, DbErr> {
        if let Some(existing) = self.find_installation(project_id).await? {
            return Ok(existing);
        }

        let timestamp = now();
        let model = installation::ActiveModel {
            id: Set(Uuid::new_v4()),
            project_id: Set(project_id),
            status: Set("planned".to_string()),
            scheduled_at: Set(None),
            completed_at: Set(None),
            created_at: Set(timestamp),
            updated_at: Set(timestamp),
        };

        match model.insert(&self.db).await {
            Ok(created) => {
                tracing::info!(
                    project_id = %project_id,
                    installation_id = %created.id,
                    "Installation created"
                );
                Ok(created)
            }
            Err(err) if is_unique_violation(&err) => self
                .find_installation(project_id)
                .await?
                .ok_or_else(|| not_found("installation", &project_id.to_string())),
            Err(err) => Err(err),
        }
    }

    pub async fn update_installation(
        &self,
        model: installation::ActiveModel,
    ) -> Result<installation::Model, DbErr> {
        model.update(&self.db).await
    }
}

fn not_found(entity: &str, key: &str) -> DbErr {
    DbErr::RecordNotFound(format!("{entity} '{key}' vanished after unique violation"))
}
