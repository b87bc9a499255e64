//! HTTP route handlers.

pub mod assignments;
pub mod front;
pub mod health;
pub mod metrics;
