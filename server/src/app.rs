//! Application assembly.

use crate::clients::{http_client, CalendlyClient, HttpNotifier, LogNotifier, StripeClient};
use crate::config::{Config, RefundPolicyConfig};
use axum::{extract::State, http::StatusCode, routing::get, Router};
use booking_core::environment::{SystemClock, UuidGenerator};
use booking_core::provider::Notifier;
use booking_core::refund::{FullRefund, NoticeWindowRefund, RefundPolicy};
use booking_postgres::{PostgresAnomalyLog, PostgresBookingStore, PostgresPendingQueue};
use booking_runtime::ingestion::SignatureVerifier;
use booking_runtime::metrics::MetricsExporter;
use booking_runtime::{BookingCoordinator, CoordinatorConfig, RecoveryConfig, RecoveryJob, Services};
use booking_web::AppState;
use sqlx::PgPool;
use std::sync::Arc;

/// Everything the binary runs.
pub struct App {
    /// HTTP routes, including `/metrics`.
    pub router: Router,
    /// Recovery sweep, not yet spawned.
    pub recovery: RecoveryJob,
}

/// Build the services over `pool` and the provider clients.
///
/// # Errors
///
/// Fails if the HTTP client cannot be built or the webhook tolerance is out
/// of range.
pub fn build(config: &Config, pool: PgPool, metrics: MetricsExporter) -> anyhow::Result<App> {
    let http = http_client(config.provider_timeout)?;

    let notifier: Arc<dyn Notifier> = match &config.notify_webhook_url {
        Some(url) => Arc::new(HttpNotifier::new(http.clone(), url.clone(), config.provider_timeout)),
        None => {
            tracing::warn!("NOTIFY_WEBHOOK_URL not set, notifications will only be logged");
            Arc::new(LogNotifier)
        },
    };

    let services = Services {
        store: Arc::new(PostgresBookingStore::new(pool.clone())),
        pending: Arc::new(PostgresPendingQueue::new(pool.clone())),
        anomalies: Arc::new(PostgresAnomalyLog::new(pool)),
        payments: Arc::new(StripeClient::new(
            http.clone(),
            config.stripe.api_key.clone(),
            config.stripe.api_base.clone(),
            config.stripe.prices.clone(),
            &config.public_base_url,
            config.provider_timeout,
        )),
        scheduling: Arc::new(CalendlyClient::new(
            http,
            config.calendly.api_token.clone(),
            config.calendly.api_base.clone(),
            config.calendly.organization.clone(),
            config.provider_timeout,
        )),
        notifier,
        refund_policy: refund_policy(config.refund_policy),
        clock: Arc::new(SystemClock),
        ids: Arc::new(UuidGenerator),
    };

    let coordinator = BookingCoordinator::new(services, CoordinatorConfig::default());
    let recovery = RecoveryJob::new(
        coordinator.clone(),
        RecoveryConfig::default().with_interval(config.recovery_interval),
    );

    let tolerance = chrono::Duration::from_std(config.webhook_tolerance)?;
    let state = AppState::new(
        coordinator,
        SignatureVerifier::new(config.calendly.webhook_secret.clone()).with_tolerance(tolerance),
        SignatureVerifier::new(config.stripe.webhook_secret.clone()).with_tolerance(tolerance),
    );

    let metrics_routes = Router::new()
        .route("/metrics", get(render_metrics))
        .with_state(Arc::new(metrics));
    let router = booking_web::router(state).merge(metrics_routes);

    Ok(App { router, recovery })
}

fn refund_policy(config: RefundPolicyConfig) -> Arc<dyn RefundPolicy> {
    match config {
        RefundPolicyConfig::Full => Arc::new(FullRefund),
        RefundPolicyConfig::NoticeWindow {
            full_notice_hours,
            partial_notice_hours,
            partial_percent,
        } => Arc::new(NoticeWindowRefund::new(
            chrono::Duration::hours(full_notice_hours),
            chrono::Duration::hours(partial_notice_hours),
            partial_percent,
        )),
    }
}

#[allow(clippy::unused_async)]
async fn render_metrics(State(metrics): State<Arc<MetricsExporter>>) -> (StatusCode, String) {
    match metrics.render() {
        Some(body) => (StatusCode::OK, body),
        None => (StatusCode::SERVICE_UNAVAILABLE, "metrics recorder not installed".to_string()),
    }
}
