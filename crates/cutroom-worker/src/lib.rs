//! Queue worker for the Cutroom pipeline.
//!
//! Consumes step tasks from the Redis stream and drives them through the
//! orchestrator. Step outcomes land on the workflow document; the worker
//! only manages delivery (ack, retry, DLQ).

pub mod config;
pub mod error;
pub mod runner;

pub use config::WorkerConfig;
pub use error::{WorkerError, WorkerResult};
pub use runner::StepRunner;
