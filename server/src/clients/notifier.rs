//! Participant notifications.
//!
//! [`HttpNotifier`] posts a JSON message to the notification service, which
//! owns templates and delivery channels. [`LogNotifier`] stands in when no
//! service is configured.

use super::{check_status, transport_error, IDEMPOTENCY_KEY_HEADER};
use booking_core::booking::Booking;
use booking_core::directive::NotificationKind;
use booking_core::ids::DirectiveKey;
use booking_core::provider::{Notifier, ProviderError};
use booking_core::store::BoxFuture;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::Duration;

/// Message posted to the notification service.
#[derive(Debug, Serialize)]
struct Notification<'a> {
    kind: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    reason: Option<NotificationKind>,
    booking_id: String,
    client_id: &'a str,
    builder_id: &'a str,
    scheduled_start: DateTime<Utc>,
    scheduled_end: DateTime<Utc>,
    client_timezone: &'a str,
    builder_timezone: Option<&'a str>,
    checkout_url: Option<&'a str>,
}

impl<'a> Notification<'a> {
    fn new(kind: &'static str, booking: &'a Booking) -> Self {
        Self {
            kind,
            reason: None,
            booking_id: booking.id.to_string(),
            client_id: booking.client_id.as_str(),
            builder_id: booking.builder_id.as_str(),
            scheduled_start: booking.scheduled_start,
            scheduled_end: booking.scheduled_end,
            client_timezone: &booking.client_timezone,
            builder_timezone: booking.builder_timezone.as_deref(),
            checkout_url: booking.checkout_url.as_deref(),
        }
    }
}

/// Posts notifications to an HTTP endpoint.
#[derive(Clone, Debug)]
pub struct HttpNotifier {
    http: reqwest::Client,
    url: String,
    timeout: Duration,
}

impl HttpNotifier {
    /// Create a notifier posting to `url`.
    #[must_use]
    pub fn new(http: reqwest::Client, url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            http,
            url: url.into(),
            timeout,
        }
    }

    async fn post(&self, notification: Notification<'_>, key: &DirectiveKey) -> Result<(), ProviderError> {
        let response = self
            .http
            .post(&self.url)
            .header(IDEMPOTENCY_KEY_HEADER, key.as_str())
            .json(&notification)
            .send()
            .await
            .map_err(|e| transport_error(&e, self.timeout))?;
        check_status("notifier", response).await?;
        tracing::debug!(kind = notification.kind, booking_id = %notification.booking_id, "Notification sent");
        Ok(())
    }
}

impl Notifier for HttpNotifier {
    fn send_confirmation<'a>(
        &'a self,
        booking: &'a Booking,
        key: &'a DirectiveKey,
    ) -> BoxFuture<'a, Result<(), ProviderError>> {
        Box::pin(self.post(Notification::new("booking_confirmed", booking), key))
    }

    fn notify_client<'a>(
        &'a self,
        booking: &'a Booking,
        reason: NotificationKind,
        key: &'a DirectiveKey,
    ) -> BoxFuture<'a, Result<(), ProviderError>> {
        let mut notification = Notification::new("client_action_required", booking);
        notification.reason = Some(reason);
        Box::pin(self.post(notification, key))
    }

    fn schedule_updated<'a>(
        &'a self,
        booking: &'a Booking,
        key: &'a DirectiveKey,
    ) -> BoxFuture<'a, Result<(), ProviderError>> {
        Box::pin(self.post(Notification::new("schedule_updated", booking), key))
    }
}

/// Logs notifications instead of delivering them.
#[derive(Clone, Copy, Debug, Default)]
pub struct LogNotifier;

impl LogNotifier {
    fn log(kind: &'static str, booking: &Booking, key: &DirectiveKey) {
        tracing::info!(kind, booking_id = %booking.id, directive_key = %key, "Notification (not delivered)");
    }
}

impl Notifier for LogNotifier {
    fn send_confirmation<'a>(
        &'a self,
        booking: &'a Booking,
        key: &'a DirectiveKey,
    ) -> BoxFuture<'a, Result<(), ProviderError>> {
        Self::log("booking_confirmed", booking, key);
        Box::pin(async { Ok(()) })
    }

    fn notify_client<'a>(
        &'a self,
        booking: &'a Booking,
        _reason: NotificationKind,
        key: &'a DirectiveKey,
    ) -> BoxFuture<'a, Result<(), ProviderError>> {
        Self::log("client_action_required", booking, key);
        Box::pin(async { Ok(()) })
    }

    fn schedule_updated<'a>(
        &'a self,
        booking: &'a Booking,
        key: &'a DirectiveKey,
    ) -> BoxFuture<'a, Result<(), ProviderError>> {
        Self::log("schedule_updated", booking, key);
        Box::pin(async { Ok(()) })
    }
}
