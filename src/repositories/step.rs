//! # Step Repository

use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, DbErr, EntityTrait, QueryFilter,
    QueryOrder,
};
use uuid::Uuid;

use crate::models::{Step, step};

#[derive(Debug, Clone)]
pub struct StepRepository {
    db: DatabaseConnection,
}

impl StepRepository {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    pub async fn find(
        &self,
        scope: &str,
        owning_id: Uuid,
        step_type: &str,
    ) -> Result<Option<step::Model>, DbErr> {
        Step::find()
            .filter(step::Column::Scope.eq(scope))
            .filter(step::Column::OwningId.eq(owning_id))
            .filter(step::Column::StepType.eq(step_type))
            .one(&self.db)
            .await
    }

    pub async fn insert(&self, model: step::ActiveModel) -> Result<step::Model, DbErr> {
        model.insert(&self.db).await
    }

    pub async fn update(&self, model: step::ActiveModel) -> Result<step::Model, DbErr> {
        model.update(&self.db).await
    }

    /// All steps owned by any of `owning_ids`.
    pub async fn for_owners(&self, owning_ids: &[Uuid]) -> Result<Vec<step::Model>, DbErr> {
        if owning_ids.is_empty() {
            return Ok(Vec::new());
        }
        Step::find()
            .filter(step::Column::OwningId.is_in(owning_ids.iter().copied()))
            .order_by_asc(step::Column::CreatedAt)
            .all(&self.db)
            .await
    }
}
