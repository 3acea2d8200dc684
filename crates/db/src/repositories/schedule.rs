//! Schedule repository.

use crate::entities::{Schedule, schedule};
use movieclub_common::{AppError, AppResult};
use sea_orm::{ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter, Set};

/// Schedule repository for database operations.
#[derive(Clone, Copy, Debug, Default)]
pub struct ScheduleRepository;

impl ScheduleRepository {
    /// Create a new schedule repository.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Find the active schedule, if one is configured.
    pub async fn find_active<C: ConnectionTrait>(
        &self,
        conn: &C,
    ) -> AppResult<Option<schedule::Model>> {
        Schedule::find()
            .filter(schedule::Column::IsActive.eq(true))
            .one(conn)
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// Deactivate every active schedule.
    pub async fn deactivate_all<C: ConnectionTrait>(&self, conn: &C) -> AppResult<u64> {
        let result = Schedule::update_many()
            .set(schedule::ActiveModel {
                is_active: Set(false),
                ..Default::default()
            })
            .filter(schedule::Column::IsActive.eq(true))
            .exec(conn)
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        Ok(result.rows_affected)
    }

    /// Create a new schedule.
    pub async fn create<C: ConnectionTrait>(
        &self,
        conn: &C,
        model: schedule::ActiveModel,
    ) -> AppResult<schedule::Model> {
        model
            .insert(conn)
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }
}
