//! HTTP client side of the boundary upload review step.
//!
//! Wraps the dashboard REST endpoints with [`reqwest`] and runs the
//! background work the step needs on Tokio: status polling with
//! cancellation, the import gate, the entities table query and the
//! notification poller that shares the polling interval.

pub mod api;
pub mod config;
pub mod entities;
pub mod events;
pub mod import;
pub mod notifications;
pub mod poll_interval;
pub mod poller;
