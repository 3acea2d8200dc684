//! Movie repository.

use crate::entities::{Movie, movie, movie::MovieStatus};
use movieclub_common::{AppError, AppResult};
use sea_orm::{
    ActiveEnum, ActiveModelTrait, ActiveValue, ColumnTrait, ConnectionTrait, EntityTrait,
    QueryFilter, QueryOrder,
    sea_query::{Expr, OnConflict},
};

/// Movie repository for database operations.
#[derive(Clone, Copy, Debug, Default)]
pub struct MovieRepository;

impl MovieRepository {
    /// Create a new movie repository.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Find a movie by ID.
    pub async fn find_by_id<C: ConnectionTrait>(
        &self,
        conn: &C,
        id: i64,
    ) -> AppResult<Option<movie::Model>> {
        Movie::find_by_id(id)
            .one(conn)
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// Find all movies with the given IDs. Unknown IDs are skipped.
    pub async fn find_by_ids<C: ConnectionTrait>(
        &self,
        conn: &C,
        ids: &[i64],
    ) -> AppResult<Vec<movie::Model>> {
        if ids.is_empty() {
            return Ok(vec![]);
        }

        Movie::find()
            .filter(movie::Column::Id.is_in(ids.iter().copied()))
            .all(conn)
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// Create a new movie.
    pub async fn create<C: ConnectionTrait>(
        &self,
        conn: &C,
        model: movie::ActiveModel,
    ) -> AppResult<movie::Model> {
        model
            .insert(conn)
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// Insert a catalog movie or refresh the stored one with the same id.
    ///
    /// Only the catalog fields, the suggester and the status are overwritten, so rating
    /// and watch history survive a new suggestion.
    pub async fn upsert<C: ConnectionTrait>(
        &self,
        conn: &C,
        model: movie::ActiveModel,
    ) -> AppResult<movie::Model> {
        let id = match model.id {
            ActiveValue::Set(id) | ActiveValue::Unchanged(id) => id,
            ActiveValue::NotSet => {
                return Err(AppError::Validation("Movie id is required".to_string()));
            }
        };

        Movie::insert(model)
            .on_conflict(
                OnConflict::column(movie::Column::Id)
                    .update_columns([
                        movie::Column::Title,
                        movie::Column::Description,
                        movie::Column::Year,
                        movie::Column::Link,
                        movie::Column::Status,
                        movie::Column::SuggestedBy,
                    ])
                    .to_owned(),
            )
            .exec_without_returning(conn)
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        self.find_by_id(conn, id)
            .await?
            .ok_or_else(|| AppError::Internal(format!("Movie {id} vanished after upsert")))
    }

    /// Movies in the given status, oldest first.
    pub async fn find_by_status<C: ConnectionTrait>(
        &self,
        conn: &C,
        status: MovieStatus,
    ) -> AppResult<Vec<movie::Model>> {
        Movie::find()
            .filter(movie::Column::Status.eq(status))
            .order_by_asc(movie::Column::CreatedAt)
            .order_by_asc(movie::Column::Id)
            .all(conn)
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// Store the club rating of a movie.
    pub async fn set_rating<C: ConnectionTrait>(
        &self,
        conn: &C,
        id: i64,
        rating: f64,
    ) -> AppResult<()> {
        let result = Movie::update_many()
            .col_expr(movie::Column::Rating, Expr::value(rating))
            .filter(movie::Column::Id.eq(id))
            .exec(conn)
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        if result.rows_affected == 0 {
            return Err(AppError::NotFound(format!("Movie not found: {id}")));
        }
        Ok(())
    }

    /// Mark movies as watched in a session that ended at `finished_at`.
    ///
    /// Increments the watch count of every movie, so it must run once per finished session.
    pub async fn mark_watched<C: ConnectionTrait>(
        &self,
        conn: &C,
        ids: &[i64],
        finished_at: i64,
    ) -> AppResult<u64> {
        if ids.is_empty() {
            return Ok(0);
        }

        let result = Movie::update_many()
            .col_expr(
                movie::Column::WatchCount,
                Expr::col(movie::Column::WatchCount).add(1),
            )
            .col_expr(movie::Column::FinishedAt, Expr::value(finished_at))
            .col_expr(
                movie::Column::Status,
                Expr::value(MovieStatus::Watched.to_value()),
            )
            .filter(movie::Column::Id.is_in(ids.iter().copied()))
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
    use chrono::Utc;
    use sea_orm::{DatabaseBackend, MockDatabase, MockExecResult};

    fn create_test_movie(id: i64, title: &str) -> movie::Model {
        movie::Model {
            id,
            title: title.to_string(),
            description: None,
            year: Some(1999),
            link: None,
            rating: None,
            status: MovieStatus::Suggested,
            watch_count: 0,
            finished_at: None,
            suggested_by: Some(7),
            created_at: Utc::now().fixed_offset(),
        }
    }

    #[tokio::test]
    async fn test_find_by_id_returns_movie() {
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([[create_test_movie(42, "Stalker")]])
            .into_connection();

        let movie = MovieRepository::new().find_by_id(&db, 42).await.unwrap();

        assert_eq!(movie.unwrap().title, "Stalker");
    }

    #[tokio::test]
    async fn test_find_by_ids_empty_skips_query() {
        let db = MockDatabase::new(DatabaseBackend::Postgres).into_connection();

        let movies = MovieRepository::new().find_by_ids(&db, &[]).await.unwrap();

        assert!(movies.is_empty());
    }

    #[tokio::test]
    async fn test_upsert_refreshes_and_returns_row() {
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_exec_results([MockExecResult {
                last_insert_id: 42,
                rows_affected: 1,
            }])
            .append_query_results([[create_test_movie(42, "Stalker")]])
            .into_connection();

        let model = movie::ActiveModel {
            id: ActiveValue::Set(42),
            title: ActiveValue::Set("Stalker".to_string()),
            status: ActiveValue::Set(MovieStatus::Suggested),
            suggested_by: ActiveValue::Set(Some(7)),
            ..Default::default()
        };
        let movie = MovieRepository::new().upsert(&db, model).await.unwrap();

        assert_eq!(movie.id, 42);
        assert_eq!(movie.suggested_by, Some(7));
        let log = format!("{:?}", db.into_transaction_log());
        assert!(log.contains("ON CONFLICT"));
    }

    #[tokio::test]
    async fn test_upsert_requires_catalog_id() {
        let db = MockDatabase::new(DatabaseBackend::Postgres).into_connection();

        let result = MovieRepository::new()
            .upsert(&db, <movie::ActiveModel as Default>::default())
            .await;

        assert!(matches!(result, Err(AppError::Validation(_))));
    }

    #[tokio::test]
    async fn test_set_rating_missing_movie() {
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_exec_results([MockExecResult {
                last_insert_id: 0,
                rows_affected: 0,
            }])
            .into_connection();

        let result = MovieRepository::new().set_rating(&db, 42, 8.0).await;

        assert!(matches!(result, Err(AppError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_mark_watched_returns_rows() {
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_exec_results([MockExecResult {
                last_insert_id: 0,
                rows_affected: 2,
            }])
            .into_connection();

        let updated = MovieRepository::new()
            .mark_watched(&db, &[1, 2], 1_700_000_000)
            .await
            .unwrap();

        assert_eq!(updated, 2);
    }
}
