//! Anomaly log for operator follow-up.
//!
//! Every anomaly the coordinator reports lands here: rejected events,
//! directives that exhausted their retries, webhooks for unknown bookings.
//! Operators list open entries, acknowledge them while investigating and
//! resolve them with a note.

use crate::{db_error, sql_limit};
use booking_core::anomaly::{Anomaly, AnomalyKind, AnomalyReporter};
use booking_core::event::EventKind;
use booking_core::ids::{BookingId, IdempotencyKey};
use booking_core::store::{BoxFuture, StoreError};
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};
use uuid::Uuid;

/// Triage status of a logged anomaly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnomalyStatus {
    /// Nobody has looked at it yet.
    Open,
    /// An operator is investigating.
    Acknowledged,
    /// Handled.
    Resolved,
}

impl AnomalyStatus {
    /// Database representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Acknowledged => "acknowledged",
            Self::Resolved => "resolved",
        }
    }

    /// Parse the database representation.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Serialization`] for an unknown status.
    pub fn parse(s: &str) -> Result<Self, StoreError> {
        match s {
            "open" => Ok(Self::Open),
            "acknowledged" => Ok(Self::Acknowledged),
            "resolved" => Ok(Self::Resolved),
            _ => Err(StoreError::Serialization(format!("Invalid anomaly status: {s}"))),
        }
    }
}

/// A logged anomaly with its triage metadata.
#[derive(Debug, Clone)]
pub struct AnomalyRecord {
    /// Log entry identifier.
    pub id: i64,
    /// The report as the coordinator filed it.
    pub anomaly: Anomaly,
    /// Triage status.
    pub status: AnomalyStatus,
    /// When it was resolved.
    pub resolved_at: Option<DateTime<Utc>>,
    /// Who resolved it.
    pub resolved_by: Option<String>,
    /// What was done.
    pub resolution_notes: Option<String>,
}

/// `PostgreSQL`-backed [`AnomalyReporter`] with operator queries.
///
/// # Example
///
/// ```no_run
/// use booking_postgres::{AnomalyStatus, PostgresAnomalyLog};
///
/// # async fn example(pool: sqlx::PgPool) -> Result<(), Box<dyn std::error::Error>> {
/// let log = PostgresAnomalyLog::new(pool);
///
/// let open = log.list_open(100).await?;
/// if let Some(first) = open.first() {
///     log.update_status(first.id, AnomalyStatus::Acknowledged).await?;
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Debug)]
pub struct PostgresAnomalyLog {
    pool: PgPool,
}

impl PostgresAnomalyLog {
    /// Create a log over `pool`.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Insert a report and return its entry ID.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Unavailable`] if the insert fails.
    pub async fn add_entry(&self, anomaly: &Anomaly) -> Result<i64, StoreError> {
        let (id,): (i64,) = sqlx::query_as(
            r"
            INSERT INTO anomalies (
                kind, booking_id, target, event, idempotency_key, detail, observed_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING id
            ",
        )
        .bind(anomaly.kind.as_str())
        .bind(anomaly.booking_id.map(|b| b.as_uuid()))
        .bind(anomaly.target.as_ref().map(ToString::to_string))
        .bind(anomaly.event.map(EventKind::as_str))
        .bind(anomaly.idempotency_key.as_ref().map(IdempotencyKey::as_str))
        .bind(&anomaly.detail)
        .bind(anomaly.observed_at)
        .fetch_one(&self.pool)
        .await
        .map_err(db_error)?;

        tracing::warn!(
            anomaly_id = id,
            kind = %anomaly.kind,
            booking_id = ?anomaly.booking_id,
            "Anomaly logged"
        );
        metrics::counter!("booking_anomalies_logged_total", "kind" => anomaly.kind.as_str()).increment(1);

        Ok(id)
    }

    /// Open entries, oldest first.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the query fails.
    pub async fn list_open(&self, limit: usize) -> Result<Vec<AnomalyRecord>, StoreError> {
        self.list_by_status(AnomalyStatus::Open, limit).await
    }

    /// Entries with `status`, oldest first.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the query fails.
    pub async fn list_by_status(&self, status: AnomalyStatus, limit: usize) -> Result<Vec<AnomalyRecord>, StoreError> {
        let rows = sqlx::query(
            r"
            SELECT id, kind, booking_id, target, event, idempotency_key, detail, observed_at,
                   status, resolved_at, resolved_by, resolution_notes
            FROM anomalies
            WHERE status = $1
            ORDER BY observed_at ASC
            LIMIT $2
            ",
        )
        .bind(status.as_str())
        .bind(sql_limit(limit))
        .fetch_all(&self.pool)
        .await
        .map_err(db_error)?;

        rows.iter().map(Self::row_to_record).collect()
    }

    /// Every entry filed against `booking_id`, oldest first.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the query fails.
    pub async fn for_booking(&self, booking_id: BookingId) -> Result<Vec<AnomalyRecord>, StoreError> {
        let rows = sqlx::query(
            r"
            SELECT id, kind, booking_id, target, event, idempotency_key, detail, observed_at,
                   status, resolved_at, resolved_by, resolution_notes
            FROM anomalies
            WHERE booking_id = $1
            ORDER BY observed_at ASC
            ",
        )
        .bind(booking_id.as_uuid())
        .fetch_all(&self.pool)
        .await
        .map_err(db_error)?;

        rows.iter().map(Self::row_to_record).collect()
    }

    /// Change an entry's status.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Unavailable`] if the update fails.
    pub async fn update_status(&self, id: i64, status: AnomalyStatus) -> Result<(), StoreError> {
        sqlx::query("UPDATE anomalies SET status = $1 WHERE id = $2")
            .bind(status.as_str())
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(db_error)?;

        tracing::info!(anomaly_id = id, status = status.as_str(), "Anomaly status updated");
        Ok(())
    }

    /// Mark an entry resolved.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Unavailable`] if the update fails.
    pub async fn mark_resolved(&self, id: i64, resolved_by: &str, notes: Option<&str>) -> Result<(), StoreError> {
        sqlx::query(
            r"
            UPDATE anomalies
            SET status = 'resolved',
                resolved_at = NOW(),
                resolved_by = $1,
                resolution_notes = $2
            WHERE id = $3
            ",
        )
        .bind(resolved_by)
        .bind(notes)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(db_error)?;

        tracing::info!(anomaly_id = id, resolved_by, "Anomaly resolved");
        metrics::counter!("booking_anomalies_resolved_total").increment(1);
        Ok(())
    }

    /// Number of open entries, for health checks.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Unavailable`] if the query fails.
    pub async fn count_open(&self) -> Result<i64, StoreError> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM anomalies WHERE status = 'open'")
            .fetch_one(&self.pool)
            .await
            .map_err(db_error)?;
        Ok(count)
    }

    fn row_to_record(row: &sqlx::postgres::PgRow) -> Result<AnomalyRecord, StoreError> {
        let kind: String = row.try_get("kind").map_err(db_error)?;
        let kind = AnomalyKind::parse(&kind)
            .ok_or_else(|| StoreError::Serialization(format!("Invalid anomaly kind: {kind}")))?;
        let booking_id: Option<Uuid> = row.try_get("booking_id").map_err(db_error)?;
        let target: Option<String> = row.try_get("target").map_err(db_error)?;
        let event: Option<String> = row.try_get("event").map_err(db_error)?;
        let idempotency_key: Option<String> = row.try_get("idempotency_key").map_err(db_error)?;
        let status: String = row.try_get("status").map_err(db_error)?;

        Ok(AnomalyRecord {
            id: row.try_get("id").map_err(db_error)?,
            anomaly: Anomaly {
                kind,
                booking_id: booking_id.map(BookingId::from_uuid),
                target: target.as_deref().and_then(|t| {
                    let (kind, value) = t.split_once(':')?;
                    booking_core::ids::CorrelationKey::from_parts(kind, value).ok()
                }),
                event: event.as_deref().and_then(EventKind::parse),
                idempotency_key: idempotency_key.map(IdempotencyKey::new),
                detail: row.try_get("detail").map_err(db_error)?,
                observed_at: row.try_get("observed_at").map_err(db_error)?,
            },
            status: AnomalyStatus::parse(&status)?,
            resolved_at: row.try_get("resolved_at").map_err(db_error)?,
            resolved_by: row.try_get("resolved_by").map_err(db_error)?,
            resolution_notes: row.try_get("resolution_notes").map_err(db_error)?,
        })
    }
}

impl AnomalyReporter for PostgresAnomalyLog {
    fn report(&self, anomaly: Anomaly) -> BoxFuture<'_, Result<(), StoreError>> {
        Box::pin(async move { self.add_entry(&anomaly).await.map(|_| ()) })
    }
}
