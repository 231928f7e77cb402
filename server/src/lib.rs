//! # Booking Server
//!
//! Wires the coordinator to `PostgreSQL`, the Stripe and Calendly APIs and
//! the HTTP surface. The binary in `main.rs` only loads configuration,
//! installs tracing and metrics, and runs what [`app::build`] returns.

pub mod app;
pub mod clients;
pub mod config;

pub use config::{Config, ConfigError};
