//! Deferred jobs of movieclub on top of the asynq task queue.
//!
//! - **Gateway**: [`AsynqTaskQueue`] enqueues, inspects and deletes jobs by id
//! - **Processor**: [`JobProcessor`] dispatches fired jobs to the orchestrators
//! - **Worker**: asynq server settings derived from the worker configuration
//! - **Memory**: in-process gateway for tests

pub mod gateway;
pub mod memory;
pub mod processor;
pub mod worker;

pub use gateway::AsynqTaskQueue;
pub use memory::MemoryTaskQueue;
pub use processor::JobProcessor;
pub use worker::{build_server, server_config};
