//! Vote recording service.

use crate::services::chat::PollAnswerEvent;
use movieclub_common::{AppError, AppResult};
use movieclub_db::UnitOfWork;
use movieclub_db::entities::{poll::PollStatus, voting::VotingKind};
use movieclub_db::repositories::{PollRepository, VoteChoice, VoteRepository};
use tracing::{debug, info};

/// Highest rating a user can give.
pub const MAX_RATING: i32 = 10;

/// What happened to an incoming poll answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnswerOutcome {
    /// The user's vote now reflects the answer.
    Recorded,
    /// The user withdrew their answer and the vote was removed.
    Retracted,
    /// The poll is unknown or already closed.
    Ignored,
}

/// Vote service for recording poll answers.
#[derive(Clone)]
pub struct VoteService {
    uow: UnitOfWork,
    poll_repo: PollRepository,
    vote_repo: VoteRepository,
}

impl VoteService {
    /// Create a new vote service.
    #[must_use]
    pub const fn new(uow: UnitOfWork) -> Self {
        Self {
            uow,
            poll_repo: PollRepository::new(),
            vote_repo: VoteRepository::new(),
        }
    }

    /// Record a user's answer to a poll. A repeated answer replaces the earlier one.
    pub async fn record_answer(&self, event: PollAnswerEvent) -> AppResult<AnswerOutcome> {
        let txn = self.uow.begin().await?;

        let Some(poll) = self
            .poll_repo
            .find_by_external_id(&txn, &event.poll_id)
            .await?
        else {
            debug!(poll_id = %event.poll_id, "Answer for unknown poll");
            return Ok(AnswerOutcome::Ignored);
        };

        if poll.status == PollStatus::Closed {
            debug!(poll_id = %event.poll_id, voting_id = poll.voting_id, "Answer for closed poll");
            return Ok(AnswerOutcome::Ignored);
        }

        let Some(&option_index) = event.option_ids.last() else {
            let removed = self
                .vote_repo
                .delete_by_user_and_voting(&txn, event.user_id, poll.voting_id)
                .await?;
            UnitOfWork::commit(txn).await?;

            info!(
                voting_id = poll.voting_id,
                user_id = event.user_id,
                removed,
                "Vote retracted"
            );
            return Ok(AnswerOutcome::Retracted);
        };

        let choice = match poll.kind {
            VotingKind::Rating => {
                if !(0..MAX_RATING).contains(&option_index) {
                    return Err(AppError::Validation(format!(
                        "Rating option index out of range: {option_index}"
                    )));
                }
                VoteChoice::Rating(option_index + 1)
            }
            VotingKind::Selection => {
                let option = self
                    .poll_repo
                    .find_option(&txn, poll.id, option_index)
                    .await?
                    .ok_or_else(|| {
                        AppError::Validation(format!(
                            "Unknown option {option_index} for poll {}",
                            poll.external_poll_id
                        ))
                    })?;
                VoteChoice::Movie(option.movie_id)
            }
        };

        self.vote_repo
            .upsert(&txn, poll.voting_id, event.user_id, choice)
            .await?;
        UnitOfWork::commit(txn).await?;

        info!(
            voting_id = poll.voting_id,
            user_id = event.user_id,
            ?choice,
            "Vote recorded"
        );
        Ok(AnswerOutcome::Recorded)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use movieclub_db::entities::{poll, poll_option};
    use sea_orm::{DatabaseBackend, MockDatabase, MockExecResult};
    use std::sync::Arc;

    fn test_poll(kind: VotingKind, status: PollStatus) -> poll::Model {
        poll::Model {
            id: 3,
            external_poll_id: "tg-poll".to_string(),
            chat_id: -100,
            message_id: 55,
            voting_id: 9,
            kind,
            status,
            movie_id: None,
        }
    }

    fn answer(option_ids: Vec<i32>) -> PollAnswerEvent {
        PollAnswerEvent {
            poll_id: "tg-poll".to_string(),
            user_id: 100,
            option_ids,
        }
    }

    fn service(db: MockDatabase) -> VoteService {
        VoteService::new(UnitOfWork::new(Arc::new(db.into_connection())))
    }

    fn exec_ok() -> MockExecResult {
        MockExecResult {
            last_insert_id: 0,
            rows_affected: 1,
        }
    }

    #[tokio::test]
    async fn test_unknown_poll_is_ignored() {
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([Vec::<poll::Model>::new()]);

        let outcome = service(db).record_answer(answer(vec![0])).await.unwrap();
        assert_eq!(outcome, AnswerOutcome::Ignored);
    }

    #[tokio::test]
    async fn test_closed_poll_is_ignored() {
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([[test_poll(VotingKind::Rating, PollStatus::Closed)]]);

        let outcome = service(db).record_answer(answer(vec![4])).await.unwrap();
        assert_eq!(outcome, AnswerOutcome::Ignored);
    }

    #[tokio::test]
    async fn test_rating_answer_is_recorded() {
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([[test_poll(VotingKind::Rating, PollStatus::Opened)]])
            .append_exec_results([exec_ok()]);

        let outcome = service(db).record_answer(answer(vec![7])).await.unwrap();
        assert_eq!(outcome, AnswerOutcome::Recorded);
    }

    #[tokio::test]
    async fn test_rating_answer_out_of_range() {
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([[test_poll(VotingKind::Rating, PollStatus::Opened)]]);

        let result = service(db).record_answer(answer(vec![10])).await;
        assert!(matches!(result, Err(AppError::Validation(_))));
    }

    #[tokio::test]
    async fn test_selection_answer_maps_option() {
        let option = poll_option::Model {
            id: 1,
            poll_id: 3,
            option_index: 1,
            movie_id: 20,
        };
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([[test_poll(VotingKind::Selection, PollStatus::Opened)]])
            .append_query_results([[option]])
            .append_exec_results([exec_ok()]);

        let outcome = service(db).record_answer(answer(vec![1])).await.unwrap();
        assert_eq!(outcome, AnswerOutcome::Recorded);
    }

    #[tokio::test]
    async fn test_selection_answer_unknown_option() {
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([[test_poll(VotingKind::Selection, PollStatus::Opened)]])
            .append_query_results([Vec::<poll_option::Model>::new()]);

        let result = service(db).record_answer(answer(vec![5])).await;
        assert!(matches!(result, Err(AppError::Validation(_))));
    }

    #[tokio::test]
    async fn test_empty_answer_retracts_vote() {
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([[test_poll(VotingKind::Selection, PollStatus::Opened)]])
            .append_exec_results([exec_ok()]);

        let outcome = service(db).record_answer(answer(vec![])).await.unwrap();
        assert_eq!(outcome, AnswerOutcome::Retracted);
    }
}
