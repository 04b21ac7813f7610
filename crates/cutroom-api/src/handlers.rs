//! Request handlers.

pub mod health;
pub mod projects;
pub mod recovery;
pub mod reviews;
pub mod workflows;
