//! Database entities.

#![allow(missing_docs)]

pub mod movie;
pub mod poll;
pub mod poll_option;
pub mod schedule;
pub mod session;
pub mod session_movie;
pub mod vote;
pub mod voting;

pub use movie::Entity as Movie;
pub use poll::Entity as Poll;
pub use poll_option::Entity as PollOption;
pub use schedule::Entity as Schedule;
pub use session::Entity as Session;
pub use session_movie::Entity as SessionMovie;
pub use vote::Entity as Vote;
pub use voting::Entity as Voting;
