//! Shared wiring for the runtime integration tests.

#![allow(dead_code)]

use booking_core::environment::UuidGenerator;
use booking_core::principal::{Principal, Role};
use booking_core::refund::FullRefund;
use booking_runtime::{BookingCoordinator, CoordinatorConfig, RecoveryConfig, RecoveryJob, RetryPolicy, Services};
use booking_testing::{
    InMemoryBookingStore, InMemoryPendingQueue, ManualClock, MockPaymentProvider, MockSchedulingProvider,
    RecordingAnomalyReporter, RecordingNotifier, test_time,
};
use std::sync::Arc;
use std::time::Duration;

/// A coordinator over in-memory fakes, with handles to every fake.
pub struct Harness {
    pub coordinator: BookingCoordinator,
    pub recovery: RecoveryJob,
    pub store: InMemoryBookingStore,
    pub pending: InMemoryPendingQueue,
    pub anomalies: RecordingAnomalyReporter,
    pub payments: MockPaymentProvider,
    pub scheduling: MockSchedulingProvider,
    pub notifier: RecordingNotifier,
    pub clock: ManualClock,
}

pub fn harness() -> Harness {
    harness_with(CoordinatorConfig::default())
}

pub fn harness_with(config: CoordinatorConfig) -> Harness {
    booking_testing::helpers::init_tracing();

    let store = InMemoryBookingStore::new();
    let pending = InMemoryPendingQueue::new();
    let anomalies = RecordingAnomalyReporter::new();
    let payments = MockPaymentProvider::new();
    let scheduling = MockSchedulingProvider::new();
    let notifier = RecordingNotifier::new();
    let clock = ManualClock::new(test_time());

    let services = Services {
        store: Arc::new(store.clone()),
        pending: Arc::new(pending.clone()),
        anomalies: Arc::new(anomalies.clone()),
        payments: Arc::new(payments.clone()),
        scheduling: Arc::new(scheduling.clone()),
        notifier: Arc::new(notifier.clone()),
        refund_policy: Arc::new(FullRefund),
        clock: Arc::new(clock.clone()),
        ids: Arc::new(UuidGenerator),
    };
    let config = config.with_directive_retry(
        RetryPolicy::builder()
            .max_retries(2)
            .initial_delay(Duration::from_millis(1))
            .max_delay(Duration::from_millis(5))
            .build(),
    );
    let coordinator = BookingCoordinator::new(services, config);
    let recovery = RecoveryJob::new(coordinator.clone(), RecoveryConfig::default());

    Harness {
        coordinator,
        recovery,
        store,
        pending,
        anomalies,
        payments,
        scheduling,
        notifier,
        clock,
    }
}

pub fn client() -> Principal {
    Principal::new("client-1", [Role::Client])
}
