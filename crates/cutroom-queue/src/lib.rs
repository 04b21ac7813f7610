//! Redis Streams task queue for pipeline steps.
//!
//! This crate provides:
//! - Step-task enqueueing with idempotency-key dedup
//! - Consumer-group consumption with ack and pending-claim
//! - Retry counters and a dead-letter stream

pub mod error;
pub mod queue;
pub mod task;

pub use error::{QueueError, QueueResult};
pub use queue::{QueueConfig, TaskQueue};
pub use task::StepTask;
