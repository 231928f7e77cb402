//! `PostgreSQL` parked-event queue.
//!
//! Taking an entry stamps a `claimed_until` lease on its row rather than
//! deleting it; the row goes away on acknowledgement, and re-parking clears
//! the lease. Rows are claimed under `FOR UPDATE SKIP LOCKED`, so two
//! coordinator instances never re-evaluate the same parked event at once. A
//! process that dies between claiming and settling leaves a lease that
//! lapses, after which the recovery sweep takes the row again.
//!
//! Lease times come from the database clock so that instances with skewed
//! clocks agree on expiry.

use crate::{db_error, decode_error, sql_limit};
use booking_core::event::EventEnvelope;
use booking_core::ids::CorrelationKey;
use booking_core::pending::{ParkedEvent, PendingEventQueue};
use booking_core::store::{BoxFuture, StoreError};
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use std::time::Duration;
use uuid::Uuid;

/// How long a taken entry stays claimed when it is never settled.
pub const DEFAULT_CLAIM_LEASE: Duration = Duration::from_secs(300);

/// `PostgreSQL`-backed [`PendingEventQueue`].
#[derive(Clone, Debug)]
pub struct PostgresPendingQueue {
    pool: PgPool,
    lease: Duration,
}

impl PostgresPendingQueue {
    /// Create a queue over `pool`.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self {
            pool,
            lease: DEFAULT_CLAIM_LEASE,
        }
    }

    /// Claim lease for taken entries.
    #[must_use]
    pub const fn with_claim_lease(mut self, lease: Duration) -> Self {
        self.lease = lease;
        self
    }

    fn row_to_parked(row: &PgRow) -> Result<ParkedEvent, StoreError> {
        let envelope: serde_json::Value = row.try_get("envelope").map_err(db_error)?;
        let envelope: EventEnvelope = serde_json::from_value(envelope).map_err(decode_error)?;
        let attempts: i32 = row.try_get("attempts").map_err(db_error)?;
        Ok(ParkedEvent {
            id: row.try_get("id").map_err(db_error)?,
            envelope,
            parked_at: row.try_get("parked_at").map_err(db_error)?,
            attempts: u32::try_from(attempts).map_err(decode_error)?,
        })
    }

    fn rows_to_parked(rows: &[PgRow]) -> Result<Vec<ParkedEvent>, StoreError> {
        rows.iter().map(Self::row_to_parked).collect()
    }
}

impl PendingEventQueue for PostgresPendingQueue {
    fn park(&self, event: ParkedEvent) -> BoxFuture<'_, Result<(), StoreError>> {
        Box::pin(async move {
            let envelope = serde_json::to_value(&event.envelope).map_err(decode_error)?;
            let attempts = i32::try_from(event.attempts).map_err(decode_error)?;
            sqlx::query(
                r"
                INSERT INTO parked_events (
                    id, idempotency_key, target_kind, target_value, envelope, parked_at, attempts
                ) VALUES ($1, $2, $3, $4, $5, $6, $7)
                ON CONFLICT (idempotency_key)
                DO UPDATE SET
                    attempts = GREATEST(parked_events.attempts, EXCLUDED.attempts),
                    claimed_until = NULL
                ",
            )
            .bind(event.id)
            .bind(event.envelope.idempotency_key.as_str())
            .bind(event.envelope.target.kind())
            .bind(event.envelope.target.value())
            .bind(&envelope)
            .bind(event.parked_at)
            .bind(attempts)
            .execute(&self.pool)
            .await
            .map_err(db_error)?;

            tracing::debug!(
                key = %event.envelope.idempotency_key,
                target = %event.envelope.target,
                attempts = event.attempts,
                "Event parked"
            );
            Ok(())
        })
    }

    fn take<'a>(&'a self, keys: &'a [CorrelationKey]) -> BoxFuture<'a, Result<Vec<ParkedEvent>, StoreError>> {
        Box::pin(async move {
            if keys.is_empty() {
                return Ok(Vec::new());
            }
            let kinds: Vec<&str> = keys.iter().map(CorrelationKey::kind).collect();
            let values: Vec<String> = keys.iter().map(CorrelationKey::value).collect();

            let rows = sqlx::query(
                r"
                UPDATE parked_events
                SET claimed_until = now() + make_interval(secs => $3)
                WHERE id IN (
                    SELECT id FROM parked_events
                    WHERE (target_kind, target_value) IN (
                        SELECT * FROM UNNEST($1::text[], $2::text[])
                    )
                    AND (claimed_until IS NULL OR claimed_until < now())
                    FOR UPDATE SKIP LOCKED
                )
                RETURNING id, envelope, parked_at, attempts
                ",
            )
            .bind(kinds)
            .bind(values)
            .bind(self.lease.as_secs_f64())
            .fetch_all(&self.pool)
            .await
            .map_err(db_error)?;

            let mut taken = Self::rows_to_parked(&rows)?;
            taken.sort_by(ParkedEvent::drain_order);
            Ok(taken)
        })
    }

    fn take_stale(
        &self,
        older_than: DateTime<Utc>,
        limit: usize,
    ) -> BoxFuture<'_, Result<Vec<ParkedEvent>, StoreError>> {
        Box::pin(async move {
            let rows = sqlx::query(
                r"
                UPDATE parked_events
                SET claimed_until = now() + make_interval(secs => $3)
                WHERE id IN (
                    SELECT id FROM parked_events
                    WHERE parked_at < $1
                    AND (claimed_until IS NULL OR claimed_until < now())
                    ORDER BY parked_at ASC
                    LIMIT $2
                    FOR UPDATE SKIP LOCKED
                )
                RETURNING id, envelope, parked_at, attempts
                ",
            )
            .bind(older_than)
            .bind(sql_limit(limit))
            .bind(self.lease.as_secs_f64())
            .fetch_all(&self.pool)
            .await
            .map_err(db_error)?;

            let mut taken = Self::rows_to_parked(&rows)?;
            taken.sort_by(ParkedEvent::drain_order);
            Ok(taken)
        })
    }

    fn acknowledge(&self, id: Uuid) -> BoxFuture<'_, Result<(), StoreError>> {
        Box::pin(async move {
            sqlx::query("DELETE FROM parked_events WHERE id = $1")
                .bind(id)
                .execute(&self.pool)
                .await
                .map_err(db_error)?;
            Ok(())
        })
    }

    fn len(&self) -> BoxFuture<'_, Result<usize, StoreError>> {
        Box::pin(async move {
            let (count,): (i64,) = sqlx::query_as(
                "SELECT COUNT(*) FROM parked_events WHERE claimed_until IS NULL OR claimed_until < now()",
            )
            .fetch_one(&self.pool)
            .await
            .map_err(db_error)?;
            usize::try_from(count).map_err(decode_error)
        })
    }
}
