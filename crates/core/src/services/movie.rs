//! Movie suggestions.
//!
//! Movies come from the external catalog. Suggesting one stores its catalog fields under
//! the catalog id and puts it on the suggestion list the selection votings draw from.

use chrono::Utc;
use movieclub_common::{AppError, AppResult};
use movieclub_db::UnitOfWork;
use movieclub_db::entities::movie::{self, MovieStatus};
use movieclub_db::repositories::MovieRepository;
use sea_orm::Set;
use tracing::info;
use validator::Validate;

/// A catalog movie as the catalog service describes it.
#[derive(Debug, Clone, Validate)]
pub struct SuggestMovieInput {
    /// Catalog identifier, used as the movie id.
    #[validate(range(min = 1))]
    pub id: i64,
    #[validate(length(min = 1, max = 255))]
    pub title: String,
    #[validate(length(max = 4096))]
    pub description: Option<String>,
    #[validate(range(min = 1870, max = 2100))]
    pub year: Option<i32>,
    #[validate(url)]
    pub link: Option<String>,
}

/// Movie service.
#[derive(Clone)]
pub struct MovieService {
    uow: UnitOfWork,
    movie_repo: MovieRepository,
}

impl MovieService {
    /// Create a new movie service.
    #[must_use]
    pub const fn new(uow: UnitOfWork) -> Self {
        Self {
            uow,
            movie_repo: MovieRepository::new(),
        }
    }

    /// Store a catalog movie as suggested by `suggested_by` and return the stored row.
    ///
    /// A movie already known under the same id gets fresh catalog fields, the new
    /// suggester and `SUGGESTED` status. Its rating and watch history are kept.
    pub async fn suggest(
        &self,
        input: SuggestMovieInput,
        suggested_by: i64,
    ) -> AppResult<movie::Model> {
        input.validate()?;
        let title = input.title.trim().to_string();
        if title.is_empty() {
            return Err(AppError::Validation("Movie title is blank".to_string()));
        }

        let model = movie::ActiveModel {
            id: Set(input.id),
            title: Set(title),
            description: Set(input.description.filter(|d| !d.trim().is_empty())),
            year: Set(input.year),
            link: Set(input.link),
            rating: Set(None),
            status: Set(MovieStatus::Suggested),
            watch_count: Set(0),
            finished_at: Set(None),
            suggested_by: Set(Some(suggested_by)),
            created_at: Set(Utc::now().fixed_offset()),
        };

        let txn = self.uow.begin().await?;
        let movie = self.movie_repo.upsert(&txn, model).await?;
        UnitOfWork::commit(txn).await?;

        info!(movie_id = movie.id, suggested_by, "Movie suggested");
        Ok(movie)
    }

    /// Movies waiting on the suggestion list, oldest first.
    pub async fn suggested_movies(&self) -> AppResult<Vec<movie::Model>> {
        self.movie_repo
            .find_by_status(self.uow.connection(), MovieStatus::Suggested)
            .await
    }

    /// Movies the club has watched, oldest suggestion first.
    pub async fn watched_movies(&self) -> AppResult<Vec<movie::Model>> {
        self.movie_repo
            .find_by_status(self.uow.connection(), MovieStatus::Watched)
            .await
    }

    /// Find a movie by catalog id.
    pub async fn find_movie(&self, id: i64) -> AppResult<movie::Model> {
        self.movie_repo
            .find_by_id(self.uow.connection(), id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Movie not found: {id}")))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use sea_orm::{DatabaseBackend, MockDatabase, MockExecResult};
    use std::sync::Arc;

    fn service(db: MockDatabase) -> MovieService {
        MovieService::new(UnitOfWork::new(Arc::new(db.into_connection())))
    }

    fn input(title: &str) -> SuggestMovieInput {
        SuggestMovieInput {
            id: 42,
            title: title.to_string(),
            description: Some("A zone".to_string()),
            year: Some(1979),
            link: Some("https://example.com/film/42".to_string()),
        }
    }

    fn stored(status: MovieStatus, rating: Option<f64>) -> movie::Model {
        movie::Model {
            id: 42,
            title: "Stalker".to_string(),
            description: Some("A zone".to_string()),
            year: Some(1979),
            link: Some("https://example.com/film/42".to_string()),
            rating,
            status,
            watch_count: i32::from(rating.is_some()),
            finished_at: None,
            suggested_by: Some(7),
            created_at: Utc::now().fixed_offset(),
        }
    }

    #[tokio::test]
    async fn test_suggest_returns_stored_row() {
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_exec_results([MockExecResult {
                last_insert_id: 42,
                rows_affected: 1,
            }])
            .append_query_results([[stored(MovieStatus::Suggested, Some(8.5))]]);
        let service = service(db);

        let movie = service.suggest(input("  Stalker "), 7).await.unwrap();

        assert_eq!(movie.id, 42);
        assert_eq!(movie.status, MovieStatus::Suggested);
        assert_eq!(movie.suggested_by, Some(7));
        // Rating of an earlier watch is not reset
        assert_eq!(movie.rating, Some(8.5));
    }

    #[tokio::test]
    async fn test_suggest_rejects_invalid_input() {
        let service = service(MockDatabase::new(DatabaseBackend::Postgres));

        let blank = service.suggest(input("   "), 7).await;
        assert!(matches!(blank, Err(AppError::Validation(_))));

        let mut bad_link = input("Stalker");
        bad_link.link = Some("not a link".to_string());
        assert!(matches!(
            service.suggest(bad_link, 7).await,
            Err(AppError::Validation(_))
        ));

        let mut no_id = input("Stalker");
        no_id.id = 0;
        assert!(matches!(
            service.suggest(no_id, 7).await,
            Err(AppError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_find_movie_missing() {
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([Vec::<movie::Model>::new()]);
        let service = service(db);

        let result = service.find_movie(42).await;

        assert!(matches!(result, Err(AppError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_suggested_movies_lists_rows() {
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([[stored(MovieStatus::Suggested, None)]]);
        let service = service(db);

        let movies = service.suggested_movies().await.unwrap();

        assert_eq!(movies.len(), 1);
        assert_eq!(movies[0].title, "Stalker");
    }
}
