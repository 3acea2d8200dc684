//! Business logic services.

#![allow(missing_docs)]

pub mod chat;
pub mod jobs;
pub mod movie;
pub mod schedule;
pub mod session;
pub mod tally;
pub mod vote;
pub mod voting;

pub use chat::{ChatPlatform, ChatService, NoOpChat, PollAnswerEvent, SentPoll};
pub use jobs::{
    CloseVotingPayload, DeleteOutcome, EnqueueOutcome, FinishSessionPayload, Job, JobId,
    JobInfo, JobKind, JobOutcome, JobScheduler, JobState, MovieRef, OpenRatingVotingPayload,
    TaskGateway, TaskQueue, delay_until,
};
pub use movie::{MovieService, SuggestMovieInput};
pub use schedule::{ScheduleInput, ScheduleRule, ScheduleService, next_occurrence};
pub use session::{
    AddedMovies, CancelledSession, FinishOutcome, OngoingSession, ReconcileReport,
    RemovedMovies, SessionService,
};
pub use tally::TallyService;
pub use vote::{AnswerOutcome, VoteService};
pub use voting::{
    CancelOutcome, PollChoice, SessionAttachment, StartVotingInput, StartedVoting, Transition,
    VotingService,
};
