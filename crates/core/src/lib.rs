//! Core business logic for movieclub.
//!
//! The orchestrators in [`services`] write relational state through [`movieclub_db`] and
//! talk to the outside world through two ports: [`ChatPlatform`] for polls and messages,
//! and [`TaskGateway`] for durable delayed jobs.

pub mod services;

pub use services::*;
