//! HTTP request handlers.

pub mod bookings;
pub mod health;
pub mod webhooks;

pub use health::health_check;
