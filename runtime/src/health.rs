//! Readiness of the coordinator's durable dependencies.
//!
//! Two things decide whether the coordinator can take traffic: the booking
//! store must answer, and the parked-event backlog must not have grown past
//! what the recovery sweep can work off. A large backlog is reported as
//! degraded rather than unhealthy, since webhooks are still accepted.

use booking_core::pending::PendingEventQueue;
use booking_core::store::BookingStore;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::Instant;

/// Ordered from best to worst so that `max` picks the overall status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Serving normally.
    Healthy,
    /// Serving, but an operator should look.
    Degraded,
    /// Not able to serve.
    Unhealthy,
}

/// A checked dependency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Component {
    /// [`BookingStore::ping`].
    BookingStore,
    /// [`PendingEventQueue::len`].
    ParkedEvents,
}

/// Outcome of one dependency check.
#[derive(Debug, Clone, Serialize)]
pub struct HealthCheck {
    /// What was checked.
    pub component: Component,
    /// Result.
    pub status: HealthStatus,
    /// Why the component is not healthy.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    /// Round-trip time of the probe.
    pub latency_ms: u64,
}

impl HealthCheck {
    fn probe(component: Component, started: Instant, outcome: Result<(), (HealthStatus, String)>) -> Self {
        let latency_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        let (status, detail) = match outcome {
            Ok(()) => (HealthStatus::Healthy, None),
            Err((status, detail)) => (status, Some(detail)),
        };
        Self {
            component,
            status,
            detail,
            latency_ms,
        }
    }
}

/// Every check plus the worst of their statuses.
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    /// Worst status among `checks`.
    pub status: HealthStatus,
    /// Individual results.
    pub checks: Vec<HealthCheck>,
    /// Clock time of the check.
    pub checked_at: DateTime<Utc>,
}

impl HealthReport {
    /// Summarise `checks` taken at `checked_at`.
    #[must_use]
    pub fn new(checks: Vec<HealthCheck>, checked_at: DateTime<Utc>) -> Self {
        let status = checks
            .iter()
            .map(|c| c.status)
            .max()
            .unwrap_or(HealthStatus::Healthy);
        Self {
            status,
            checks,
            checked_at,
        }
    }

    /// Whether the coordinator should receive traffic.
    #[must_use]
    pub fn is_serving(&self) -> bool {
        self.status != HealthStatus::Unhealthy
    }
}

/// Ping the booking store.
pub async fn check_store(store: &dyn BookingStore) -> HealthCheck {
    let started = Instant::now();
    let outcome = store
        .ping()
        .await
        .map_err(|e| (HealthStatus::Unhealthy, e.to_string()));
    HealthCheck::probe(Component::BookingStore, started, outcome)
}

/// Measure the parked-event backlog; more than `threshold` entries is degraded.
pub async fn check_parked_queue(queue: &dyn PendingEventQueue, threshold: usize) -> HealthCheck {
    let started = Instant::now();
    let outcome = match queue.len().await {
        Ok(len) if len > threshold => Err((
            HealthStatus::Degraded,
            format!("{len} events parked, threshold {threshold}"),
        )),
        Ok(_) => Ok(()),
        Err(e) => Err((HealthStatus::Unhealthy, e.to_string())),
    };
    HealthCheck::probe(Component::ParkedEvents, started, outcome)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use booking_core::pending::ParkedEvent;
    use booking_testing::{InMemoryBookingStore, InMemoryPendingQueue, fixtures, test_time};

    #[tokio::test]
    async fn store_outage_stops_traffic() {
        let store = InMemoryBookingStore::new();
        let queue = InMemoryPendingQueue::new();

        let report = HealthReport::new(
            vec![check_store(&store).await, check_parked_queue(&queue, 10).await],
            test_time(),
        );
        assert_eq!(report.status, HealthStatus::Healthy);

        store.set_unavailable(true);
        let report = HealthReport::new(vec![check_store(&store).await], test_time());
        assert_eq!(report.status, HealthStatus::Unhealthy);
        assert!(!report.is_serving());
        assert!(report.checks[0].detail.is_some());
    }

    #[tokio::test]
    async fn backlog_past_threshold_degrades_but_keeps_serving() {
        let queue = InMemoryPendingQueue::new();
        let booking = fixtures::pending_booking();
        for key in ["a", "b"] {
            let envelope = fixtures::envelope(booking.id, key, fixtures::payment_succeeded("cs_1"));
            queue.park(ParkedEvent::new(envelope, test_time())).await.unwrap();
        }

        let check = check_parked_queue(&queue, 1).await;
        assert_eq!(check.status, HealthStatus::Degraded);
        assert_eq!(check.component, Component::ParkedEvents);

        let report = HealthReport::new(vec![check], test_time());
        assert!(report.is_serving());
    }

    #[test]
    fn no_checks_is_healthy() {
        assert_eq!(HealthReport::new(Vec::new(), test_time()).status, HealthStatus::Healthy);
    }
}
