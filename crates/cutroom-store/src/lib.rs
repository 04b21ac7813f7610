//! Versioned document store with optimistic concurrency.
//!
//! This crate provides:
//! - The [`DocumentStore`] trait: conditional get/create/put keyed by an
//!   opaque version token (compare-and-swap over a durable backend)
//! - An S3-compatible backend using ETag preconditions
//! - An in-memory backend for tests and local development
//! - Typed repositories for workflows and projects, with the bounded
//!   read-modify-write retry helper all mutation funnels through

pub mod error;
pub mod memory;
pub mod metrics;
pub mod repo;
pub mod s3;
pub mod store;

pub use error::{StoreError, StoreResult};
pub use memory::MemoryStore;
pub use repo::{Commit, UpdateOutcome, WorkflowRepository, WriteRetryConfig};
pub use s3::{S3DocumentStore, S3StoreConfig};
pub use store::{DocumentStore, Version};
