//! HTTP API for the Cutroom pipeline orchestrator.
//!
//! Exposes workflow lifecycle, review gates, recovery, and project batch
//! operations over REST. The heavy lifting lives in `cutroom-engine`; this
//! crate is the thin axum surface plus configuration and observability.

pub mod config;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod routes;
pub mod state;

pub use config::ApiConfig;
pub use error::{ApiError, ApiResult};
pub use routes::create_router;
pub use state::AppState;
