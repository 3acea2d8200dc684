//! Database repositories.
//!
//! Every method takes the connection it runs on, so the same repository serves plain
//! reads on the pool and multi-row mutations inside a [`crate::UnitOfWork`] transaction.

mod movie;
mod poll;
mod schedule;
mod session;
mod vote;
mod voting;

pub use movie::MovieRepository;
pub use poll::PollRepository;
pub use schedule::ScheduleRepository;
pub use session::SessionRepository;
pub use vote::{RatingAggregate, SelectionTally, VoteChoice, VoteRepository};
pub use voting::VotingRepository;
