//! Stripe Checkout client.
//!
//! Sessions carry the booking ID in `client_reference_id` and
//! `metadata[booking_id]`, which is what webhook normalization reads back.

use super::{check_status, decode_error, transport_error, IDEMPOTENCY_KEY_HEADER};
use booking_core::money::Money;
use booking_core::provider::{
    PaymentProvider, PaymentSession, PaymentSessionRequest, PaymentStatus, ProviderError, RefundReceipt,
    RefundRequest,
};
use booking_core::store::BoxFuture;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;

const PROVIDER: &str = "stripe";

/// Stripe REST client.
#[derive(Clone)]
pub struct StripeClient {
    http: reqwest::Client,
    api_key: String,
    api_base: String,
    prices: HashMap<String, String>,
    success_url: String,
    cancel_url: String,
    timeout: Duration,
}

impl std::fmt::Debug for StripeClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StripeClient")
            .field("api_base", &self.api_base)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Deserialize)]
struct CheckoutSession {
    id: String,
    url: Option<String>,
    status: Option<String>,
    payment_status: Option<String>,
    amount_total: Option<i64>,
    currency: Option<String>,
    payment_intent: Option<Expandable<PaymentIntent>>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Expandable<T> {
    Id(String),
    Object(T),
}

#[derive(Debug, Deserialize)]
struct PaymentIntent {
    id: String,
    last_payment_error: Option<PaymentError>,
}

#[derive(Debug, Deserialize)]
struct PaymentError {
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Refund {
    id: String,
    amount: i64,
    currency: String,
    status: String,
}

impl CheckoutSession {
    fn payment_intent_id(&self) -> Option<&str> {
        match self.payment_intent.as_ref()? {
            Expandable::Id(id) => Some(id),
            Expandable::Object(intent) => Some(&intent.id),
        }
    }

    fn status(&self) -> PaymentStatus {
        if self.payment_status.as_deref() == Some("paid") {
            let amount = self
                .amount_total
                .zip(self.currency.clone())
                .map(|(cents, currency)| Money::new(cents, currency));
            return PaymentStatus::Paid { amount };
        }
        if self.status.as_deref() == Some("expired") {
            return PaymentStatus::Expired;
        }
        if let Some(Expandable::Object(PaymentIntent {
            last_payment_error: Some(error),
            ..
        })) = &self.payment_intent
        {
            return PaymentStatus::Failed {
                reason: error.message.clone(),
            };
        }
        PaymentStatus::Open
    }
}

impl StripeClient {
    /// Create a client.
    #[must_use]
    pub fn new(
        http: reqwest::Client,
        api_key: impl Into<String>,
        api_base: impl Into<String>,
        prices: HashMap<String, String>,
        public_base_url: &str,
        timeout: Duration,
    ) -> Self {
        let public_base_url = public_base_url.trim_end_matches('/');
        Self {
            http,
            api_key: api_key.into(),
            api_base: api_base.into().trim_end_matches('/').to_string(),
            prices,
            success_url: format!("{public_base_url}/bookings/checkout/success?session_id={{CHECKOUT_SESSION_ID}}"),
            cancel_url: format!("{public_base_url}/bookings/checkout/cancelled"),
            timeout,
        }
    }

    async fn session(&self, payment_ref: &str, expand_intent: bool) -> Result<CheckoutSession, ProviderError> {
        let mut request = self
            .http
            .get(format!("{}/v1/checkout/sessions/{payment_ref}", self.api_base))
            .bearer_auth(&self.api_key);
        if expand_intent {
            request = request.query(&[("expand[]", "payment_intent")]);
        }
        let response = request
            .send()
            .await
            .map_err(|e| transport_error(&e, self.timeout))?;
        check_status(PROVIDER, response)
            .await?
            .json()
            .await
            .map_err(|e| decode_error(PROVIDER, &e))
    }

    async fn create(&self, request: PaymentSessionRequest) -> Result<PaymentSession, ProviderError> {
        let price = self.prices.get(request.session_type_id.as_str()).ok_or_else(|| {
            ProviderError::Rejected(format!("no price configured for session type {}", request.session_type_id))
        })?;
        let booking_id = request.booking_id.to_string();
        let form = [
            ("mode", "payment"),
            ("client_reference_id", booking_id.as_str()),
            ("metadata[booking_id]", booking_id.as_str()),
            ("metadata[client_id]", request.client_id.as_str()),
            ("line_items[0][price]", price.as_str()),
            ("line_items[0][quantity]", "1"),
            ("success_url", self.success_url.as_str()),
            ("cancel_url", self.cancel_url.as_str()),
        ];

        let response = self
            .http
            .post(format!("{}/v1/checkout/sessions", self.api_base))
            .bearer_auth(&self.api_key)
            .header(IDEMPOTENCY_KEY_HEADER, request.idempotency_key.as_str())
            .form(&form)
            .send()
            .await
            .map_err(|e| transport_error(&e, self.timeout))?;
        let session: CheckoutSession = check_status(PROVIDER, response)
            .await?
            .json()
            .await
            .map_err(|e| decode_error(PROVIDER, &e))?;

        tracing::info!(booking_id = %request.booking_id, session_id = %session.id, "Checkout session created");
        Ok(PaymentSession {
            payment_ref: session.id,
            checkout_url: session.url,
        })
    }

    async fn issue_refund(&self, request: RefundRequest) -> Result<RefundReceipt, ProviderError> {
        let session = self.session(&request.payment_ref, false).await?;
        let payment_intent = session.payment_intent_id().ok_or_else(|| {
            ProviderError::Rejected(format!("checkout session {} has no payment to refund", request.payment_ref))
        })?;
        let amount = request.amount.cents.to_string();
        let form = [
            ("payment_intent", payment_intent),
            ("amount", amount.as_str()),
            ("metadata[checkout_session]", request.payment_ref.as_str()),
        ];

        let response = self
            .http
            .post(format!("{}/v1/refunds", self.api_base))
            .bearer_auth(&self.api_key)
            .header(IDEMPOTENCY_KEY_HEADER, request.idempotency_key.as_str())
            .form(&form)
            .send()
            .await
            .map_err(|e| transport_error(&e, self.timeout))?;
        let refund: Refund = check_status(PROVIDER, response)
            .await?
            .json()
            .await
            .map_err(|e| decode_error(PROVIDER, &e))?;

        tracing::info!(refund_id = %refund.id, status = %refund.status, "Refund issued");
        Ok(RefundReceipt {
            refund_ref: refund.id,
            amount: Money::new(refund.amount, refund.currency),
            settled: refund.status == "succeeded",
        })
    }
}

impl PaymentProvider for StripeClient {
    fn create_session(&self, request: PaymentSessionRequest) -> BoxFuture<'_, Result<PaymentSession, ProviderError>> {
        Box::pin(self.create(request))
    }

    fn refund(&self, request: RefundRequest) -> BoxFuture<'_, Result<RefundReceipt, ProviderError>> {
        Box::pin(self.issue_refund(request))
    }

    fn payment_status<'a>(&'a self, payment_ref: &'a str) -> BoxFuture<'a, Result<PaymentStatus, ProviderError>> {
        Box::pin(async move { Ok(self.session(payment_ref, true).await?.status()) })
    }
}
