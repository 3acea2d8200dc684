//! Vote repository and tally queries.

use crate::entities::{Vote, vote};
use chrono::Utc;
use movieclub_common::{AppError, AppResult};
use sea_orm::{
    ColumnTrait, ConnectionTrait, EntityTrait, FromQueryResult, PaginatorTrait, QueryFilter,
    QueryOrder, QuerySelect, Set,
    sea_query::{Alias, Expr, OnConflict},
};

/// The most voted movie of a selection voting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromQueryResult)]
pub struct SelectionTally {
    /// Winning movie.
    pub movie_id: i64,
    /// Votes the movie received.
    pub vote_count: i64,
}

/// Sum and count of the ratings of a rating voting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromQueryResult)]
pub struct RatingAggregate {
    /// Sum of non-null ratings, `None` when there are none.
    pub rating_sum: Option<i64>,
    /// Number of non-null ratings.
    pub rating_count: i64,
}

/// A user's answer, either a movie choice or a score.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoteChoice {
    /// Selection voting answer.
    Movie(i64),
    /// Rating voting answer, 1 to 10.
    Rating(i32),
}

/// Vote repository for database operations.
#[derive(Clone, Copy, Debug, Default)]
pub struct VoteRepository;

impl VoteRepository {
    /// Create a new vote repository.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Record a user's answer, replacing any earlier answer to the same voting.
    pub async fn upsert<C: ConnectionTrait>(
        &self,
        conn: &C,
        voting_id: i32,
        user_id: i64,
        choice: VoteChoice,
    ) -> AppResult<()> {
        let (movie_id, rating) = match choice {
            VoteChoice::Movie(movie_id) => (Some(movie_id), None),
            VoteChoice::Rating(rating) => (None, Some(rating)),
        };

        let model = vote::ActiveModel {
            voting_id: Set(voting_id),
            user_id: Set(user_id),
            movie_id: Set(movie_id),
            rating: Set(rating),
            created_at: Set(Utc::now().fixed_offset()),
            ..Default::default()
        };

        Vote::insert(model)
            .on_conflict(
                OnConflict::columns([vote::Column::UserId, vote::Column::VotingId])
                    .update_columns([
                        vote::Column::MovieId,
                        vote::Column::Rating,
                        vote::Column::CreatedAt,
                    ])
                    .to_owned(),
            )
            .exec_without_returning(conn)
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;
        Ok(())
    }

    /// Delete a user's answer. Returns whether a vote existed.
    pub async fn delete_by_user_and_voting<C: ConnectionTrait>(
        &self,
        conn: &C,
        user_id: i64,
        voting_id: i32,
    ) -> AppResult<bool> {
        let result = Vote::delete_many()
            .filter(vote::Column::UserId.eq(user_id))
            .filter(vote::Column::VotingId.eq(voting_id))
            .exec(conn)
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        Ok(result.rows_affected > 0)
    }

    /// Get all votes of a voting.
    pub async fn find_by_voting<C: ConnectionTrait>(
        &self,
        conn: &C,
        voting_id: i32,
    ) -> AppResult<Vec<vote::Model>> {
        Vote::find()
            .filter(vote::Column::VotingId.eq(voting_id))
            .order_by_asc(vote::Column::Id)
            .all(conn)
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// Count votes of a voting.
    pub async fn count_by_voting<C: ConnectionTrait>(
        &self,
        conn: &C,
        voting_id: i32,
    ) -> AppResult<u64> {
        Vote::find()
            .filter(vote::Column::VotingId.eq(voting_id))
            .count(conn)
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// Movie with the most votes. Equal counts resolve to the lowest movie id.
    pub async fn max_selection_count<C: ConnectionTrait>(
        &self,
        conn: &C,
        voting_id: i32,
    ) -> AppResult<Option<SelectionTally>> {
        Vote::find()
            .select_only()
            .column(vote::Column::MovieId)
            .column_as(Expr::col(vote::Column::Id).count(), "vote_count")
            .filter(vote::Column::VotingId.eq(voting_id))
            .filter(vote::Column::MovieId.is_not_null())
            .group_by(vote::Column::MovieId)
            .order_by_desc(Expr::col(Alias::new("vote_count")))
            .order_by_asc(vote::Column::MovieId)
            .limit(1)
            .into_model::<SelectionTally>()
            .one(conn)
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// Sum and count of the ratings of a voting.
    pub async fn rating_aggregate<C: ConnectionTrait>(
        &self,
        conn: &C,
        voting_id: i32,
    ) -> AppResult<RatingAggregate> {
        let aggregate = Vote::find()
            .select_only()
            .column_as(Expr::col(vote::Column::Rating).sum(), "rating_sum")
            .column_as(Expr::col(vote::Column::Rating).count(), "rating_count")
            .filter(vote::Column::VotingId.eq(voting_id))
            .into_model::<RatingAggregate>()
            .one(conn)
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        Ok(aggregate.unwrap_or(RatingAggregate {
            rating_sum: None,
            rating_count: 0,
        }))
    }
}
