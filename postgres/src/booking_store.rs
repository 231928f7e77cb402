//! `PostgreSQL` booking store.
//!
//! The aggregate is stored as a JSONB document next to the columns the
//! coordinator filters on. Every write runs in one transaction that updates
//! the row only if its version still matches, appends the new history rows
//! and records the idempotency keys, so a booking's state, history and
//! directive ledger never disagree.

use crate::{db_error, decode_error, sql_limit};
use booking_core::booking::Booking;
use booking_core::ids::{BookingId, Version};
use booking_core::store::{BookingFilter, BookingStore, BoxFuture, StoreError};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Postgres, QueryBuilder, Row};
use uuid::Uuid;

const SCHEDULING_REF_CONSTRAINT: &str = "bookings_scheduling_ref_key";
const PAYMENT_REF_CONSTRAINT: &str = "bookings_payment_ref_key";

/// `PostgreSQL`-backed [`BookingStore`].
///
/// # Example
///
/// ```no_run
/// use booking_postgres::PostgresBookingStore;
///
/// # async fn example(pool: sqlx::PgPool) {
/// let store = PostgresBookingStore::new(pool);
/// # }
/// ```
#[derive(Clone, Debug)]
pub struct PostgresBookingStore {
    pool: PgPool,
}

impl PostgresBookingStore {
    /// Create a store over `pool`.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// The underlying pool.
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }

    fn row_to_booking(row: &PgRow) -> Result<Booking, StoreError> {
        let document: serde_json::Value = row.try_get("document").map_err(db_error)?;
        let version: i64 = row.try_get("version").map_err(db_error)?;
        let mut booking: Booking = serde_json::from_value(document).map_err(decode_error)?;
        booking.version = Version::new(u64::try_from(version).map_err(decode_error)?);
        Ok(booking)
    }

    #[tracing::instrument(skip(self, booking), fields(booking_id = %booking.id, %expected))]
    async fn save_booking(&self, booking: &Booking, expected: Version) -> Result<Version, StoreError> {
        let next = expected.next();
        let document = serde_json::to_value(booking).map_err(decode_error)?;
        let has_scheduled = booking.scheduled_directives().next().is_some();
        let id = booking.id.as_uuid();

        let mut tx = self.pool.begin().await.map_err(db_error)?;

        let written = if expected == Version::INITIAL {
            sqlx::query(
                r"
                INSERT INTO bookings (
                    id, client_id, builder_id, state, payment_state,
                    scheduled_start, scheduled_end, external_scheduling_ref, external_payment_ref,
                    has_scheduled_directives, document, version, created_at, last_transition_at
                ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
                ",
            )
            .bind(id)
            .bind(booking.client_id.as_str())
            .bind(booking.builder_id.as_str())
            .bind(booking.state.as_str())
            .bind(booking.payment_state.as_str())
            .bind(booking.scheduled_start)
            .bind(booking.scheduled_end)
            .bind(booking.external_scheduling_ref.as_deref())
            .bind(booking.external_payment_ref.as_deref())
            .bind(has_scheduled)
            .bind(&document)
            .bind(version_column(next)?)
            .bind(booking.created_at)
            .bind(booking.last_transition_at)
            .execute(&mut *tx)
            .await
        } else {
            sqlx::query(
                r"
                UPDATE bookings
                SET state = $2,
                    payment_state = $3,
                    scheduled_start = $4,
                    scheduled_end = $5,
                    external_scheduling_ref = $6,
                    external_payment_ref = $7,
                    has_scheduled_directives = $8,
                    document = $9,
                    version = $10,
                    last_transition_at = $11,
                    updated_at = now()
                WHERE id = $1 AND version = $12
                ",
            )
            .bind(id)
            .bind(booking.state.as_str())
            .bind(booking.payment_state.as_str())
            .bind(booking.scheduled_start)
            .bind(booking.scheduled_end)
            .bind(booking.external_scheduling_ref.as_deref())
            .bind(booking.external_payment_ref.as_deref())
            .bind(has_scheduled)
            .bind(&document)
            .bind(version_column(next)?)
            .bind(booking.last_transition_at)
            .bind(version_column(expected)?)
            .execute(&mut *tx)
            .await
        };

        let rows = match written {
            Ok(result) => result.rows_affected(),
            Err(e) => {
                drop(tx);
                return Err(self.classify_write_error(e, booking, expected).await);
            },
        };
        if rows == 0 {
            drop(tx);
            return Err(self.conflict(booking.id, expected).await);
        }

        let (stored,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM booking_history WHERE booking_id = $1")
            .bind(id)
            .fetch_one(&mut *tx)
            .await
            .map_err(db_error)?;
        let stored = usize::try_from(stored).map_err(decode_error)?;

        for (seq, entry) in booking.state_history.iter().enumerate().skip(stored) {
            sqlx::query(
                r"
                INSERT INTO booking_history (booking_id, seq, state, event, source_id, origin, entered_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7)
                ",
            )
            .bind(id)
            .bind(i32::try_from(seq).map_err(decode_error)?)
            .bind(entry.state.as_str())
            .bind(entry.event.as_str())
            .bind(entry.source_id.as_str())
            .bind(entry.origin.label())
            .bind(entry.entered_at)
            .execute(&mut *tx)
            .await
            .map_err(db_error)?;
        }

        let keys: Vec<String> = booking
            .idempotency_keys
            .iter()
            .map(|k| k.as_str().to_string())
            .collect();
        sqlx::query(
            r"
            INSERT INTO booking_idempotency_keys (booking_id, idempotency_key)
            SELECT $1, k FROM UNNEST($2::text[]) AS k
            ON CONFLICT DO NOTHING
            ",
        )
        .bind(id)
        .bind(keys)
        .execute(&mut *tx)
        .await
        .map_err(db_error)?;

        tx.commit().await.map_err(db_error)?;

        tracing::debug!(version = %next, state = %booking.state, "Booking saved");
        Ok(next)
    }

    /// Build the conflict error for a version-checked update that matched no row.
    async fn conflict(&self, booking_id: BookingId, expected: Version) -> StoreError {
        match self.current_version(booking_id).await {
            Ok(Some(actual)) => StoreError::ConcurrencyConflict {
                booking_id,
                expected,
                actual,
            },
            Ok(None) => StoreError::NotFound(booking_id),
            Err(e) => e,
        }
    }

    async fn classify_write_error(&self, error: sqlx::Error, booking: &Booking, expected: Version) -> StoreError {
        let constraint = match &error {
            sqlx::Error::Database(db) if db.is_unique_violation() => db.constraint().map(str::to_string),
            _ => return db_error(error),
        };

        let reference = match constraint.as_deref() {
            Some(SCHEDULING_REF_CONSTRAINT) => booking.external_scheduling_ref.clone(),
            Some(PAYMENT_REF_CONSTRAINT) => booking.external_payment_ref.clone(),
            // Primary key: another writer inserted this booking first.
            _ => return self.conflict(booking.id, expected).await,
        };
        let Some(reference) = reference else {
            return db_error(error);
        };

        let owner = match constraint.as_deref() {
            Some(SCHEDULING_REF_CONSTRAINT) => self.find_ref("external_scheduling_ref", &reference).await,
            _ => self.find_ref("external_payment_ref", &reference).await,
        };
        match owner {
            Ok(Some(owner)) => StoreError::DuplicateReference { reference, owner },
            Ok(None) => db_error(error),
            Err(e) => e,
        }
    }

    async fn current_version(&self, booking_id: BookingId) -> Result<Option<Version>, StoreError> {
        let row: Option<(i64,)> = sqlx::query_as("SELECT version FROM bookings WHERE id = $1")
            .bind(booking_id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error)?;
        row.map(|(v,)| u64::try_from(v).map(Version::new).map_err(decode_error))
            .transpose()
    }

    async fn find_ref(&self, column: &'static str, reference: &str) -> Result<Option<BookingId>, StoreError> {
        let sql = format!("SELECT id FROM bookings WHERE {column} = $1");
        let row: Option<(Uuid,)> = sqlx::query_as(&sql)
            .bind(reference)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error)?;
        Ok(row.map(|(id,)| BookingId::from_uuid(id)))
    }
}

fn version_column(version: Version) -> Result<i64, StoreError> {
    i64::try_from(version.value()).map_err(decode_error)
}

impl BookingStore for PostgresBookingStore {
    fn load(&self, id: BookingId) -> BoxFuture<'_, Result<Booking, StoreError>> {
        Box::pin(async move {
            let row = sqlx::query("SELECT document, version FROM bookings WHERE id = $1")
                .bind(id.as_uuid())
                .fetch_optional(&self.pool)
                .await
                .map_err(db_error)?
                .ok_or(StoreError::NotFound(id))?;
            Self::row_to_booking(&row)
        })
    }

    fn save(&self, booking: &Booking, expected: Version) -> BoxFuture<'_, Result<Version, StoreError>> {
        let booking = booking.clone();
        Box::pin(async move { self.save_booking(&booking, expected).await })
    }

    fn find_by_scheduling_ref<'a>(
        &'a self,
        reference: &'a str,
    ) -> BoxFuture<'a, Result<Option<BookingId>, StoreError>> {
        Box::pin(self.find_ref("external_scheduling_ref", reference))
    }

    fn find_by_payment_ref<'a>(
        &'a self,
        reference: &'a str,
    ) -> BoxFuture<'a, Result<Option<BookingId>, StoreError>> {
        Box::pin(self.find_ref("external_payment_ref", reference))
    }

    fn find(&self, filter: BookingFilter, limit: usize) -> BoxFuture<'_, Result<Vec<Booking>, StoreError>> {
        Box::pin(async move {
            let mut query = QueryBuilder::<Postgres>::new("SELECT document, version FROM bookings WHERE TRUE");
            if !filter.states.is_empty() {
                let states: Vec<&str> = filter.states.iter().map(|s| s.as_str()).collect();
                query.push(" AND state = ANY(").push_bind(states).push(")");
            }
            if let Some(at) = filter.last_transition_before {
                query.push(" AND last_transition_at < ").push_bind(at);
            }
            if let Some(at) = filter.scheduled_end_before {
                query.push(" AND scheduled_end < ").push_bind(at);
            }
            if filter.with_scheduled_directives {
                query.push(" AND has_scheduled_directives");
            }
            query
                .push(" ORDER BY last_transition_at ASC LIMIT ")
                .push_bind(sql_limit(limit));

            let rows = query.build().fetch_all(&self.pool).await.map_err(db_error)?;
            rows.iter().map(Self::row_to_booking).collect()
        })
    }

    fn ping(&self) -> BoxFuture<'_, Result<(), StoreError>> {
        Box::pin(async move {
            sqlx::query("SELECT 1")
                .execute(&self.pool)
                .await
                .map(|_| ())
                .map_err(db_error)
        })
    }
}
