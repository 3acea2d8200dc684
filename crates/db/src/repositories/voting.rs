//! Voting repository.

use crate::entities::{
    Voting,
    voting::{self, VotingKind, VotingStatus},
};
use movieclub_common::{AppError, AppResult};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter, QueryOrder,
    QuerySelect, Set,
};

/// Voting repository for database operations.
#[derive(Clone, Copy, Debug, Default)]
pub struct VotingRepository;

impl VotingRepository {
    /// Create a new voting repository.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Find a voting by ID.
    pub async fn find_by_id<C: ConnectionTrait>(
        &self,
        conn: &C,
        id: i32,
    ) -> AppResult<Option<voting::Model>> {
        Voting::find_by_id(id)
            .one(conn)
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// Find a voting by ID and lock its row until the transaction ends.
    pub async fn find_by_id_for_update<C: ConnectionTrait>(
        &self,
        conn: &C,
        id: i32,
    ) -> AppResult<Option<voting::Model>> {
        Voting::find_by_id(id)
            .lock_exclusive()
            .one(conn)
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// Find votings with the given status, oldest deadline first.
    pub async fn find_by_status<C: ConnectionTrait>(
        &self,
        conn: &C,
        status: VotingStatus,
    ) -> AppResult<Vec<voting::Model>> {
        Voting::find()
            .filter(voting::Column::Status.eq(status))
            .order_by_asc(voting::Column::FinishedAt)
            .all(conn)
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// Find all votings that belong to a session.
    pub async fn find_by_session<C: ConnectionTrait>(
        &self,
        conn: &C,
        session_id: i32,
    ) -> AppResult<Vec<voting::Model>> {
        Voting::find()
            .filter(voting::Column::SessionId.eq(session_id))
            .order_by_asc(voting::Column::Id)
            .all(conn)
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// Find the rating voting opened for a movie of a session, ignoring cancelled ones.
    pub async fn find_rating_for_session_movie<C: ConnectionTrait>(
        &self,
        conn: &C,
        session_id: i32,
        movie_id: i64,
    ) -> AppResult<Option<voting::Model>> {
        Voting::find()
            .filter(voting::Column::SessionId.eq(session_id))
            .filter(voting::Column::MovieId.eq(movie_id))
            .filter(voting::Column::Kind.eq(VotingKind::Rating))
            .filter(voting::Column::Status.ne(VotingStatus::Cancelled))
            .one(conn)
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// Find active rating votings of a session for the given movies.
    pub async fn find_active_ratings_for_movies<C: ConnectionTrait>(
        &self,
        conn: &C,
        session_id: i32,
        movie_ids: &[i64],
    ) -> AppResult<Vec<voting::Model>> {
        if movie_ids.is_empty() {
            return Ok(vec![]);
        }

        Voting::find()
            .filter(voting::Column::SessionId.eq(session_id))
            .filter(voting::Column::MovieId.is_in(movie_ids.iter().copied()))
            .filter(voting::Column::Kind.eq(VotingKind::Rating))
            .filter(voting::Column::Status.eq(VotingStatus::Active))
            .all(conn)
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// Create a new voting.
    pub async fn create<C: ConnectionTrait>(
        &self,
        conn: &C,
        model: voting::ActiveModel,
    ) -> AppResult<voting::Model> {
        model
            .insert(conn)
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// Move a voting to a new status.
    pub async fn update_status<C: ConnectionTrait>(
        &self,
        conn: &C,
        id: i32,
        status: VotingStatus,
    ) -> AppResult<()> {
        let result = Voting::update_many()
            .set(voting::ActiveModel {
                status: Set(status),
                ..Default::default()
            })
            .filter(voting::Column::Id.eq(id))
            .exec(conn)
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        if result.rows_affected == 0 {
            return Err(AppError::NotFound(format!("Voting not found: {id}")));
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use chrono::Utc;
    use sea_orm::{DatabaseBackend, MockDatabase, MockExecResult};

    fn create_test_voting(id: i32, kind: VotingKind, status: VotingStatus) -> voting::Model {
        voting::Model {
            id,
            title: "Next movie".to_string(),
            kind,
            status,
            created_by: 1,
            finished_at: 1_700_000_000,
            movie_id: None,
            session_id: None,
            created_at: Utc::now().fixed_offset(),
        }
    }

    #[tokio::test]
    async fn test_find_by_id_for_update_returns_voting() {
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([[create_test_voting(
                3,
                VotingKind::Selection,
                VotingStatus::Active,
            )]])
            .into_connection();

        let voting = VotingRepository::new()
            .find_by_id_for_update(&db, 3)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(voting.id, 3);
        assert_eq!(voting.status, VotingStatus::Active);

        let log = format!("{:?}", db.into_transaction_log());
        assert!(log.contains("FOR UPDATE"));
    }

    #[tokio::test]
    async fn test_find_by_status() {
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([[
                create_test_voting(1, VotingKind::Selection, VotingStatus::Active),
                create_test_voting(2, VotingKind::Rating, VotingStatus::Active),
            ]])
            .into_connection();

        let votings = VotingRepository::new()
            .find_by_status(&db, VotingStatus::Active)
            .await
            .unwrap();

        assert_eq!(votings.len(), 2);
        assert!(votings.iter().all(|v| v.status == VotingStatus::Active));
    }

    #[tokio::test]
    async fn test_find_active_ratings_for_no_movies_skips_query() {
        let db = MockDatabase::new(DatabaseBackend::Postgres).into_connection();

        let votings = VotingRepository::new()
            .find_active_ratings_for_movies(&db, 1, &[])
            .await
            .unwrap();

        assert!(votings.is_empty());
    }

    #[tokio::test]
    async fn test_update_status_missing_voting() {
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_exec_results([MockExecResult {
                last_insert_id: 0,
                rows_affected: 0,
            }])
            .into_connection();

        let result = VotingRepository::new()
            .update_status(&db, 5, VotingStatus::Cancelled)
            .await;

        assert!(matches!(result, Err(AppError::NotFound(_))));
    }
}
