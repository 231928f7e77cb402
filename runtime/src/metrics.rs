//! Prometheus recorder for the coordinator.
//!
//! Counters are emitted with the `metrics` macros where the work happens
//! (ingestion, reconciler, dispatcher, recovery, anomaly log). This module only
//! describes them and owns the handle the `/metrics` route renders.
//!
//! ```rust,no_run
//! use booking_runtime::metrics::MetricsExporter;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let mut exporter = MetricsExporter::new();
//! exporter.install()?;
//! let _body = exporter.render();
//! # Ok(())
//! # }
//! ```

use metrics::{describe_counter, describe_gauge, describe_histogram};
use metrics_exporter_prometheus::{BuildError, Matcher, PrometheusBuilder, PrometheusHandle};
use thiserror::Error;

/// Histogram buckets, in seconds, for every `*_duration_seconds` metric.
/// Directive calls are dominated by provider round-trips, sweeps by batch size.
const DURATION_BUCKETS: &[f64] = &[0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0];

const COUNTERS: &[(&str, &str)] = &[
    ("booking_webhooks_total", "Webhook deliveries by provider and outcome"),
    ("booking_created_total", "Bookings created"),
    ("booking_transitions_total", "Applied transitions by event and target state"),
    ("booking_rejections_total", "Events that did not apply, by rejection class"),
    ("booking_version_conflicts_total", "Version conflicts retried by the reconciler or dispatcher"),
    ("booking_directives_total", "Directive executions by directive and outcome"),
    ("booking_parked_events_total", "Events parked until their prerequisite arrives"),
    ("booking_parked_events_drained_total", "Parked events applied after their prerequisite arrived"),
    ("booking_parked_events_dropped_total", "Parked events given up on"),
    ("booking_synthetic_events_total", "Events manufactured by the recovery sweep"),
    ("booking_recovery_sweeps_total", "Completed recovery sweeps"),
    ("booking_anomalies_total", "Anomalies reported, by kind"),
    ("booking_anomalies_logged_total", "Anomalies persisted to the anomaly log"),
    ("booking_anomalies_resolved_total", "Anomalies marked resolved by an operator"),
];

const HISTOGRAMS: &[(&str, &str)] = &[
    ("booking_directive_duration_seconds", "Directive execution time, retries included"),
    ("booking_recovery_sweep_duration_seconds", "Recovery sweep duration"),
];

const GAUGES: &[(&str, &str)] = &[(
    "booking_recovery_last_sweep_failures",
    "Per-booking failures in the most recent sweep",
)];

/// The Prometheus recorder could not be set up.
#[derive(Error, Debug)]
pub enum MetricsError {
    /// Bucket configuration was rejected.
    #[error("invalid histogram buckets: {0}")]
    Buckets(#[from] BuildError),
    /// Another recorder owns the process and it is not ours to render.
    #[error("could not install Prometheus recorder: {0}")]
    Install(String),
}

/// Owns the [`PrometheusHandle`] once installed.
#[derive(Default)]
pub struct MetricsExporter {
    handle: Option<PrometheusHandle>,
}

impl MetricsExporter {
    /// Not installed; [`render`](Self::render) returns `None` until
    /// [`install`](Self::install) succeeds.
    #[must_use]
    pub const fn new() -> Self {
        Self { handle: None }
    }

    /// Describe the coordinator's metrics and make this the global recorder.
    ///
    /// When a recorder is already installed (several servers in one test
    /// binary) this logs and leaves the exporter without a handle.
    ///
    /// # Errors
    ///
    /// [`MetricsError`] when the builder rejects its configuration or the
    /// recorder fails to install for another reason.
    pub fn install(&mut self) -> Result<(), MetricsError> {
        let builder = PrometheusBuilder::new()
            .set_buckets_for_metric(Matcher::Suffix("duration_seconds".to_string()), DURATION_BUCKETS)?;

        match builder.install_recorder() {
            Ok(handle) => {
                describe_all();
                self.handle = Some(handle);
                tracing::info!(
                    counters = COUNTERS.len(),
                    histograms = HISTOGRAMS.len(),
                    "Metrics recorder installed"
                );
                Ok(())
            },
            Err(BuildError::FailedToSetGlobalRecorder(e)) => {
                tracing::warn!(error = %e, "A metrics recorder is already installed; /metrics will be empty");
                Ok(())
            },
            Err(e) => Err(MetricsError::Install(e.to_string())),
        }
    }

    /// Prometheus text exposition, if installed.
    #[must_use]
    pub fn render(&self) -> Option<String> {
        self.handle.as_ref().map(PrometheusHandle::render)
    }

    /// Whether this exporter owns the process recorder.
    #[must_use]
    pub const fn is_installed(&self) -> bool {
        self.handle.is_some()
    }
}

fn describe_all() {
    for &(name, help) in COUNTERS {
        describe_counter!(name, help);
    }
    for &(name, help) in HISTOGRAMS {
        describe_histogram!(name, help);
    }
    for &(name, help) in GAUGES {
        describe_gauge!(name, help);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uninstalled_exporter_renders_nothing() {
        let exporter = MetricsExporter::new();
        assert!(!exporter.is_installed());
        assert!(exporter.render().is_none());
    }

    #[test]
    fn histograms_use_the_duration_suffix() {
        assert!(HISTOGRAMS.iter().all(|(name, _)| name.ends_with("duration_seconds")));
    }

    #[test]
    fn metric_names_are_unique() {
        let mut names: Vec<_> = COUNTERS
            .iter()
            .chain(HISTOGRAMS)
            .chain(GAUGES)
            .map(|(name, _)| *name)
            .collect();
        let total = names.len();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), total);
    }
}
