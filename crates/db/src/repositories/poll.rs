//! Poll repository.

use crate::entities::{
    Poll, PollOption,
    poll::{self, PollStatus},
    poll_option,
};
use movieclub_common::{AppError, AppResult};
use sea_orm::{ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter, Set};

/// Poll repository for database operations.
#[derive(Clone, Copy, Debug, Default)]
pub struct PollRepository;

impl PollRepository {
    /// Create a new poll repository.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Find a poll by the id the chat platform assigned to it.
    pub async fn find_by_external_id<C: ConnectionTrait>(
        &self,
        conn: &C,
        external_poll_id: &str,
    ) -> AppResult<Option<poll::Model>> {
        Poll::find()
            .filter(poll::Column::ExternalPollId.eq(external_poll_id))
            .one(conn)
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// Find the poll of a voting.
    pub async fn find_by_voting_id<C: ConnectionTrait>(
        &self,
        conn: &C,
        voting_id: i32,
    ) -> AppResult<Option<poll::Model>> {
        Poll::find()
            .filter(poll::Column::VotingId.eq(voting_id))
            .one(conn)
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// Create a new poll.
    pub async fn create<C: ConnectionTrait>(
        &self,
        conn: &C,
        model: poll::ActiveModel,
    ) -> AppResult<poll::Model> {
        model
            .insert(conn)
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// Store the option-index to movie mapping of a selection poll.
    pub async fn create_options<C: ConnectionTrait>(
        &self,
        conn: &C,
        poll_id: i32,
        movie_ids: &[i64],
    ) -> AppResult<()> {
        if movie_ids.is_empty() {
            return Ok(());
        }

        let options = movie_ids
            .iter()
            .enumerate()
            .map(|(index, movie_id)| poll_option::ActiveModel {
                poll_id: Set(poll_id),
                option_index: Set(index as i32),
                movie_id: Set(*movie_id),
                ..Default::default()
            });

        PollOption::insert_many(options)
            .exec_without_returning(conn)
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;
        Ok(())
    }

    /// Find the option at a platform index.
    pub async fn find_option<C: ConnectionTrait>(
        &self,
        conn: &C,
        poll_id: i32,
        option_index: i32,
    ) -> AppResult<Option<poll_option::Model>> {
        PollOption::find()
            .filter(poll_option::Column::PollId.eq(poll_id))
            .filter(poll_option::Column::OptionIndex.eq(option_index))
            .one(conn)
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// Close the poll of a voting.
    pub async fn close_by_voting_id<C: ConnectionTrait>(
        &self,
        conn: &C,
        voting_id: i32,
    ) -> AppResult<u64> {
        let result = Poll::update_many()
            .set(poll::ActiveModel {
                status: Set(PollStatus::Closed),
                ..Default::default()
            })
            .filter(poll::Column::VotingId.eq(voting_id))
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
    use crate::entities::voting::VotingKind;
    use sea_orm::{DatabaseBackend, MockDatabase, MockExecResult};

    fn create_test_poll(id: i32, voting_id: i32, status: PollStatus) -> poll::Model {
        poll::Model {
            id,
            external_poll_id: format!("tg-{id}"),
            chat_id: -100,
            message_id: 77,
            voting_id,
            kind: VotingKind::Selection,
            status,
            movie_id: None,
        }
    }

    #[tokio::test]
    async fn test_find_by_external_id() {
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([[create_test_poll(1, 10, PollStatus::Opened)]])
            .into_connection();

        let poll = PollRepository::new()
            .find_by_external_id(&db, "tg-1")
            .await
            .unwrap()
            .unwrap();

        assert_eq!(poll.voting_id, 10);
        assert_eq!(poll.status, PollStatus::Opened);
    }

    #[tokio::test]
    async fn test_find_option_by_index() {
        let option = poll_option::Model {
            id: 5,
            poll_id: 1,
            option_index: 2,
            movie_id: 30,
        };
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([[option]])
            .into_connection();

        let found = PollRepository::new()
            .find_option(&db, 1, 2)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(found.movie_id, 30);
    }

    #[tokio::test]
    async fn test_create_options_empty_skips_insert() {
        let db = MockDatabase::new(DatabaseBackend::Postgres).into_connection();

        PollRepository::new()
            .create_options(&db, 1, &[])
            .await
            .unwrap();

        assert!(db.into_transaction_log().is_empty());
    }

    #[tokio::test]
    async fn test_create_options_inserts_in_order() {
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_exec_results([MockExecResult {
                last_insert_id: 0,
                rows_affected: 3,
            }])
            .into_connection();

        PollRepository::new()
            .create_options(&db, 1, &[10, 20, 30])
            .await
            .unwrap();

        let log = format!("{:?}", db.into_transaction_log());
        assert!(log.contains("poll_option"));
    }

    #[tokio::test]
    async fn test_close_by_voting_id() {
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_exec_results([MockExecResult {
                last_insert_id: 0,
                rows_affected: 1,
            }])
            .into_connection();

        let closed = PollRepository::new()
            .close_by_voting_id(&db, 10)
            .await
            .unwrap();

        assert_eq!(closed, 1);
    }
}
