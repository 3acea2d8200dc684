//! Session repository.

use crate::entities::{
    Session, SessionMovie,
    session::{self, SessionStatus},
    session_movie,
};
use chrono::Utc;
use movieclub_common::{AppError, AppResult};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter, QueryOrder,
    QuerySelect, Set, SqlErr, TransactionTrait, sea_query::OnConflict,
};

/// Session repository for database operations.
#[derive(Clone, Copy, Debug, Default)]
pub struct SessionRepository;

impl SessionRepository {
    /// Create a new session repository.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Find a session by ID.
    pub async fn find_by_id<C: ConnectionTrait>(
        &self,
        conn: &C,
        id: i32,
    ) -> AppResult<Option<session::Model>> {
        Session::find_by_id(id)
            .one(conn)
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// Find a session by ID and lock its row until the transaction ends.
    pub async fn find_by_id_for_update<C: ConnectionTrait>(
        &self,
        conn: &C,
        id: i32,
    ) -> AppResult<Option<session::Model>> {
        Session::find_by_id(id)
            .lock_exclusive()
            .one(conn)
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// Find the ongoing session, if any.
    pub async fn find_ongoing<C: ConnectionTrait>(
        &self,
        conn: &C,
    ) -> AppResult<Option<session::Model>> {
        Session::find()
            .filter(session::Column::Status.eq(SessionStatus::Ongoing))
            .one(conn)
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// Find the ongoing session and lock its row until the transaction ends.
    pub async fn find_ongoing_for_update<C: ConnectionTrait>(
        &self,
        conn: &C,
    ) -> AppResult<Option<session::Model>> {
        Session::find()
            .filter(session::Column::Status.eq(SessionStatus::Ongoing))
            .lock_exclusive()
            .one(conn)
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// Return the ongoing session, creating it with the given deadline if there is none.
    ///
    /// The boolean is `true` when the session was created by this call. Concurrent callers
    /// are serialized by the single-ongoing unique index: the loser of the race rolls back
    /// its savepoint and reads the winner's row.
    pub async fn find_or_create_ongoing<C>(
        &self,
        conn: &C,
        created_by: i64,
        finished_at: i64,
    ) -> AppResult<(session::Model, bool)>
    where
        C: ConnectionTrait + TransactionTrait,
    {
        if let Some(session) = self.find_ongoing_for_update(conn).await? {
            return Ok((session, false));
        }

        let savepoint = conn
            .begin()
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        let inserted = session::ActiveModel {
            finished_at: Set(finished_at),
            status: Set(SessionStatus::Ongoing),
            description: Set(None),
            created_by: Set(created_by),
            created_at: Set(Utc::now().fixed_offset()),
            ..Default::default()
        }
        .insert(&savepoint)
        .await;

        match inserted {
            Ok(session) => {
                savepoint
                    .commit()
                    .await
                    .map_err(|e| AppError::Database(e.to_string()))?;
                Ok((session, true))
            }
            Err(e) if matches!(e.sql_err(), Some(SqlErr::UniqueConstraintViolation(_))) => {
                savepoint
                    .rollback()
                    .await
                    .map_err(|e| AppError::Database(e.to_string()))?;
                tracing::debug!("Lost ongoing session creation race, reusing existing session");
                self.find_ongoing_for_update(conn)
                    .await?
                    .map(|session| (session, false))
                    .ok_or_else(|| {
                        AppError::Conflict("Ongoing session disappeared during creation".to_string())
                    })
            }
            Err(e) => Err(AppError::Database(e.to_string())),
        }
    }

    /// Move a session to a new status.
    pub async fn update_status<C: ConnectionTrait>(
        &self,
        conn: &C,
        id: i32,
        status: SessionStatus,
    ) -> AppResult<()> {
        self.update(
            conn,
            id,
            session::ActiveModel {
                status: Set(status),
                ..Default::default()
            },
        )
        .await
    }

    /// Move the planned end of a session.
    pub async fn update_finished_at<C: ConnectionTrait>(
        &self,
        conn: &C,
        id: i32,
        finished_at: i64,
    ) -> AppResult<()> {
        self.update(
            conn,
            id,
            session::ActiveModel {
                finished_at: Set(finished_at),
                ..Default::default()
            },
        )
        .await
    }

    /// Replace the description of a session.
    pub async fn update_description<C: ConnectionTrait>(
        &self,
        conn: &C,
        id: i32,
        description: Option<String>,
    ) -> AppResult<()> {
        self.update(
            conn,
            id,
            session::ActiveModel {
                description: Set(description),
                ..Default::default()
            },
        )
        .await
    }

    async fn update<C: ConnectionTrait>(
        &self,
        conn: &C,
        id: i32,
        changes: session::ActiveModel,
    ) -> AppResult<()> {
        let result = Session::update_many()
            .set(changes)
            .filter(session::Column::Id.eq(id))
            .exec(conn)
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        if result.rows_affected == 0 {
            return Err(AppError::NotFound(format!("Session not found: {id}")));
        }
        Ok(())
    }

    /// IDs of the movies attached to a session.
    pub async fn movie_ids<C: ConnectionTrait>(
        &self,
        conn: &C,
        session_id: i32,
    ) -> AppResult<Vec<i64>> {
        SessionMovie::find()
            .select_only()
            .column(session_movie::Column::MovieId)
            .filter(session_movie::Column::SessionId.eq(session_id))
            .order_by_asc(session_movie::Column::MovieId)
            .into_tuple::<i64>()
            .all(conn)
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// Attach movies to a session. Already attached movies are left untouched.
    pub async fn attach_movies<C: ConnectionTrait>(
        &self,
        conn: &C,
        session_id: i32,
        movie_ids: &[i64],
    ) -> AppResult<()> {
        if movie_ids.is_empty() {
            return Ok(());
        }

        let links = movie_ids.iter().map(|movie_id| session_movie::ActiveModel {
            session_id: Set(session_id),
            movie_id: Set(*movie_id),
        });

        SessionMovie::insert_many(links)
            .on_conflict(
                OnConflict::columns([
                    session_movie::Column::SessionId,
                    session_movie::Column::MovieId,
                ])
                .do_nothing()
                .to_owned(),
            )
            .exec_without_returning(conn)
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;
        Ok(())
    }

    /// Detach movies from a session. Returns the number of links removed.
    pub async fn detach_movies<C: ConnectionTrait>(
        &self,
        conn: &C,
        session_id: i32,
        movie_ids: &[i64],
    ) -> AppResult<u64> {
        if movie_ids.is_empty() {
            return Ok(0);
        }

        let result = SessionMovie::delete_many()
            .filter(session_movie::Column::SessionId.eq(session_id))
            .filter(session_movie::Column::MovieId.is_in(movie_ids.iter().copied()))
            .exec(conn)
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        Ok(result.rows_affected)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use maplit::btreemap;
    use sea_orm::{DatabaseBackend, MockDatabase, MockExecResult};

    fn create_test_session(id: i32, status: SessionStatus) -> session::Model {
        session::Model {
            id,
            finished_at: 1_700_000_000,
            status,
            description: None,
            created_by: 1,
            created_at: Utc::now().fixed_offset(),
        }
    }

    #[tokio::test]
    async fn test_find_or_create_reuses_ongoing_session() {
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([[create_test_session(4, SessionStatus::Ongoing)]])
            .into_connection();

        let (session, created) = SessionRepository::new()
            .find_or_create_ongoing(&db, 1, 1_800_000_000)
            .await
            .unwrap();

        assert_eq!(session.id, 4);
        assert_eq!(session.finished_at, 1_700_000_000);
        assert!(!created);
    }

    #[tokio::test]
    async fn test_find_ongoing_none() {
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([Vec::<session::Model>::new()])
            .into_connection();

        let session = SessionRepository::new().find_ongoing(&db).await.unwrap();

        assert!(session.is_none());
    }

    #[tokio::test]
    async fn test_movie_ids() {
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([vec![
                btreemap! { "movie_id" => sea_orm::Value::BigInt(Some(1)) },
                btreemap! { "movie_id" => sea_orm::Value::BigInt(Some(2)) },
            ]])
            .into_connection();

        let ids = SessionRepository::new().movie_ids(&db, 4).await.unwrap();

        assert_eq!(ids, vec![1, 2]);
    }

    #[tokio::test]
    async fn test_update_status_missing_session() {
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_exec_results([MockExecResult {
                last_insert_id: 0,
                rows_affected: 0,
            }])
            .into_connection();

        let result = SessionRepository::new()
            .update_status(&db, 4, SessionStatus::Finished)
            .await;

        assert!(matches!(result, Err(AppError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_attach_movies_ignores_existing_links() {
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_exec_results([MockExecResult {
                last_insert_id: 0,
                rows_affected: 1,
            }])
            .into_connection();

        SessionRepository::new()
            .attach_movies(&db, 4, &[1, 2])
            .await
            .unwrap();

        let log = format!("{:?}", db.into_transaction_log());
        assert!(log.contains("ON CONFLICT"));
        assert!(log.contains("DO NOTHING"));
    }
}
