//! Calendly scheduling lookups for the recovery sweep.
//!
//! A booking that already has its event URI is looked up directly. One that
//! does not is searched for among the organization's active events around
//! the requested slot, matching the invitee whose `utm_content` carries the
//! booking ID.

use super::{check_status, decode_error, transport_error};
use booking_core::booking::Booking;
use booking_core::provider::{ProviderError, SchedulingProvider, SchedulingStatus};
use booking_core::store::BoxFuture;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::time::Duration;

const PROVIDER: &str = "calendly";

/// Page size for event and invitee listings.
const PAGE_SIZE: &str = "100";

/// Calendly REST client.
#[derive(Clone)]
pub struct CalendlyClient {
    http: reqwest::Client,
    api_token: String,
    api_base: String,
    organization: String,
    timeout: Duration,
}

impl std::fmt::Debug for CalendlyClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CalendlyClient")
            .field("api_base", &self.api_base)
            .field("organization", &self.organization)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Deserialize)]
struct Resource<T> {
    resource: T,
}

#[derive(Debug, Deserialize)]
struct Collection<T> {
    collection: Vec<T>,
}

#[derive(Debug, Deserialize)]
struct ScheduledEvent {
    uri: String,
    status: String,
    start_time: DateTime<Utc>,
    end_time: DateTime<Utc>,
    cancellation: Option<Cancellation>,
}

#[derive(Debug, Deserialize)]
struct Cancellation {
    reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Invitee {
    #[serde(default)]
    tracking: Tracking,
}

#[derive(Debug, Default, Deserialize)]
struct Tracking {
    utm_content: Option<String>,
}

impl ScheduledEvent {
    fn into_status(self) -> SchedulingStatus {
        if self.status == "canceled" {
            SchedulingStatus::Cancelled {
                reason: self.cancellation.and_then(|c| c.reason),
            }
        } else {
            SchedulingStatus::Scheduled {
                scheduling_ref: self.uri,
                start: self.start_time,
                end: self.end_time,
            }
        }
    }
}

impl CalendlyClient {
    /// Create a client.
    #[must_use]
    pub fn new(
        http: reqwest::Client,
        api_token: impl Into<String>,
        api_base: impl Into<String>,
        organization: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            http,
            api_token: api_token.into(),
            api_base: api_base.into().trim_end_matches('/').to_string(),
            organization: organization.into(),
            timeout,
        }
    }

    async fn get<T: DeserializeOwned>(&self, url: &str, query: &[(&str, &str)]) -> Result<T, ProviderError> {
        let response = self
            .http
            .get(url)
            .bearer_auth(&self.api_token)
            .query(query)
            .send()
            .await
            .map_err(|e| transport_error(&e, self.timeout))?;
        check_status(PROVIDER, response)
            .await?
            .json()
            .await
            .map_err(|e| decode_error(PROVIDER, &e))
    }

    /// Only URIs under the configured API base are followed.
    fn event_url(&self, scheduling_ref: &str) -> Result<String, ProviderError> {
        if scheduling_ref.starts_with(&format!("{}/scheduled_events/", self.api_base)) {
            Ok(scheduling_ref.to_string())
        } else {
            Err(ProviderError::Rejected(format!("unexpected scheduling reference {scheduling_ref}")))
        }
    }

    async fn lookup_booking(&self, booking: &Booking) -> Result<SchedulingStatus, ProviderError> {
        if let Some(scheduling_ref) = booking.external_scheduling_ref.as_deref() {
            let url = self.event_url(scheduling_ref)?;
            let event: Resource<ScheduledEvent> = self.get(&url, &[]).await?;
            return Ok(event.resource.into_status());
        }

        let window = ChronoDuration::minutes(1);
        let min_start = (booking.scheduled_start - window).to_rfc3339();
        let max_start = (booking.scheduled_start + window).to_rfc3339();
        let events: Collection<ScheduledEvent> = self
            .get(
                &format!("{}/scheduled_events", self.api_base),
                &[
                    ("organization", self.organization.as_str()),
                    ("status", "active"),
                    ("min_start_time", min_start.as_str()),
                    ("max_start_time", max_start.as_str()),
                    ("count", PAGE_SIZE),
                ],
            )
            .await?;

        let booking_id = booking.id.to_string();
        for event in events.collection {
            let invitees: Collection<Invitee> = self
                .get(&format!("{}/invitees", event.uri), &[("count", PAGE_SIZE)])
                .await?;
            let matches = invitees
                .collection
                .iter()
                .any(|i| i.tracking.utm_content.as_deref() == Some(booking_id.as_str()));
            if matches {
                tracing::debug!(booking_id = %booking.id, event = %event.uri, "Calendly event found");
                return Ok(event.into_status());
            }
        }

        Ok(SchedulingStatus::NotFound)
    }
}

impl SchedulingProvider for CalendlyClient {
    fn lookup<'a>(&'a self, booking: &'a Booking) -> BoxFuture<'a, Result<SchedulingStatus, ProviderError>> {
        Box::pin(self.lookup_booking(booking))
    }
}
