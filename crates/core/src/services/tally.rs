//! Vote tally service.

use movieclub_common::AppResult;
use movieclub_db::repositories::{RatingAggregate, SelectionTally, VoteRepository};
use sea_orm::ConnectionTrait;

/// Aggregations over recorded votes.
#[derive(Clone, Copy, Debug, Default)]
pub struct TallyService {
    vote_repo: VoteRepository,
}

impl TallyService {
    /// Create a new tally service.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            vote_repo: VoteRepository::new(),
        }
    }

    /// The most voted movie of a selection voting, `None` without votes.
    ///
    /// Equal counts resolve to the lowest movie id.
    pub async fn max_selection_count<C: ConnectionTrait>(
        &self,
        conn: &C,
        voting_id: i32,
    ) -> AppResult<Option<SelectionTally>> {
        self.vote_repo.max_selection_count(conn, voting_id).await
    }

    /// Mean rating of a rating voting, `None` without votes.
    pub async fn rating_mean<C: ConnectionTrait>(
        &self,
        conn: &C,
        voting_id: i32,
    ) -> AppResult<Option<f64>> {
        let aggregate = self.vote_repo.rating_aggregate(conn, voting_id).await?;
        Ok(mean(aggregate))
    }
}

/// Arithmetic mean of an aggregate. There is no mean of zero ratings.
#[must_use]
pub fn mean(aggregate: RatingAggregate) -> Option<f64> {
    match aggregate {
        RatingAggregate {
            rating_sum: Some(sum),
            rating_count,
        } if rating_count > 0 => Some(sum as f64 / rating_count as f64),
        _ => None,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use maplit::btreemap;
    use sea_orm::{DatabaseBackend, MockDatabase, Value};

    #[test]
    fn test_mean() {
        let aggregate = RatingAggregate {
            rating_sum: Some(24),
            rating_count: 3,
        };
        assert_eq!(mean(aggregate), Some(8.0));

        let aggregate = RatingAggregate {
            rating_sum: Some(15),
            rating_count: 2,
        };
        assert_eq!(mean(aggregate), Some(7.5));
    }

    #[test]
    fn test_mean_without_votes_is_none() {
        let empty = RatingAggregate {
            rating_sum: None,
            rating_count: 0,
        };
        assert_eq!(mean(empty), None);

        // A zero count never divides, whatever the sum says
        let inconsistent = RatingAggregate {
            rating_sum: Some(0),
            rating_count: 0,
        };
        assert_eq!(mean(inconsistent), None);
    }

    #[tokio::test]
    async fn test_rating_mean_from_query() {
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([vec![btreemap! {
                "rating_sum" => Value::BigInt(Some(24)),
                "rating_count" => Value::BigInt(Some(3)),
            }]])
            .into_connection();

        let mean = TallyService::new().rating_mean(&db, 1).await.unwrap();
        assert_eq!(mean, Some(8.0));
    }

    #[tokio::test]
    async fn test_rating_mean_no_data() {
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([vec![btreemap! {
                "rating_sum" => Value::BigInt(None),
                "rating_count" => Value::BigInt(Some(0)),
            }]])
            .into_connection();

        let mean = TallyService::new().rating_mean(&db, 1).await.unwrap();
        assert!(mean.is_none());
    }
}
