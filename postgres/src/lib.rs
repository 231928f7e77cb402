//! `PostgreSQL` persistence for the booking coordinator.
//!
//! This crate implements the storage traits from `booking-core` on top of
//! sqlx:
//!
//! - [`PostgresBookingStore`]: booking aggregates with version-checked writes,
//!   an append-only history table and an idempotency-key table
//! - [`PostgresPendingQueue`]: the parked-event queue
//! - [`PostgresAnomalyLog`]: operator-facing anomaly reports
//!
//! # Example
//!
//! ```ignore
//! use booking_postgres::{PostgresBookingStore, connect, migrate};
//!
//! async fn example() -> Result<(), Box<dyn std::error::Error>> {
//!     let pool = connect("postgres://localhost/bookings", 10).await?;
//!     migrate(&pool).await?;
//!     let store = PostgresBookingStore::new(pool);
//!     Ok(())
//! }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod anomaly_log;
mod booking_store;
mod pending_queue;

pub use anomaly_log::{AnomalyRecord, AnomalyStatus, PostgresAnomalyLog};
pub use booking_store::PostgresBookingStore;
pub use pending_queue::PostgresPendingQueue;

use booking_core::store::StoreError;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use std::time::Duration;

/// Open a connection pool.
///
/// # Errors
///
/// Returns the sqlx error if the database cannot be reached.
pub async fn connect(database_url: &str, max_connections: u32) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(max_connections)
        .acquire_timeout(Duration::from_secs(5))
        .connect(database_url)
        .await
}

/// Apply the bundled schema migrations.
///
/// # Errors
///
/// Returns the migration error if any migration fails.
pub async fn migrate(pool: &PgPool) -> Result<(), sqlx::migrate::MigrateError> {
    sqlx::migrate!("./migrations").run(pool).await
}

/// Map a sqlx failure onto the store error surface.
fn db_error(e: sqlx::Error) -> StoreError {
    match e {
        sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) => StoreError::Serialization(e.to_string()),
        other => StoreError::Unavailable(other.to_string()),
    }
}

fn decode_error(e: impl std::fmt::Display) -> StoreError {
    StoreError::Serialization(e.to_string())
}

/// Convert a caller-supplied limit to a SQL `LIMIT`.
#[allow(clippy::cast_possible_wrap)] // Limits are small
const fn sql_limit(limit: usize) -> i64 {
    limit as i64
}
