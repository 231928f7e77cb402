//! Webhook signature verification.
//!
//! Both providers sign deliveries the same way: the header carries
//! `t=<unix seconds>,v1=<hex>` where the hex digest is HMAC-SHA256 over
//! `"{t}.{body}"` with the endpoint secret. Several `v1` entries may be
//! present while a secret is being rotated; any match is accepted.

use chrono::{DateTime, Duration, Utc};
use constant_time_eq::constant_time_eq;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::fmt;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

/// Why a delivery was refused.
///
/// The HTTP layer maps every variant to the same generic response; the
/// variant is only logged.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SignatureError {
    /// No signature header.
    #[error("signature header missing")]
    Missing,
    /// The header is not `t=..,v1=..`.
    #[error("signature header malformed")]
    Malformed,
    /// The timestamp is outside the accepted window.
    #[error("signature timestamp off by {skew_secs}s")]
    OutsideTolerance {
        /// Distance from now, in seconds.
        skew_secs: u64,
    },
    /// No signature matches the body.
    #[error("signature mismatch")]
    Mismatch,
}

/// Verifies signed webhook deliveries for one endpoint secret.
#[derive(Clone)]
pub struct SignatureVerifier {
    secret: Vec<u8>,
    tolerance: Duration,
}

impl fmt::Debug for SignatureVerifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SignatureVerifier")
            .field("secret", &"<redacted>")
            .field("tolerance", &self.tolerance)
            .finish()
    }
}

impl SignatureVerifier {
    /// Verifier with the default five minute tolerance.
    #[must_use]
    pub fn new(secret: impl Into<Vec<u8>>) -> Self {
        Self {
            secret: secret.into(),
            tolerance: Duration::seconds(300),
        }
    }

    /// Set the accepted clock skew.
    #[must_use]
    pub const fn with_tolerance(mut self, tolerance: Duration) -> Self {
        self.tolerance = tolerance;
        self
    }

    /// Check `header` against `body` at time `now`.
    ///
    /// # Errors
    ///
    /// Returns the [`SignatureError`] describing the first check that failed.
    pub fn verify(&self, header: Option<&str>, body: &[u8], now: DateTime<Utc>) -> Result<(), SignatureError> {
        let header = header.ok_or(SignatureError::Missing)?;

        let mut timestamp = None;
        let mut candidates = Vec::new();
        for part in header.split(',') {
            match part.trim().split_once('=') {
                Some(("t", value)) => {
                    timestamp = Some(value.parse::<i64>().map_err(|_| SignatureError::Malformed)?);
                },
                Some(("v1", value)) => candidates.push(value),
                Some(_) => {},
                None => return Err(SignatureError::Malformed),
            }
        }
        let timestamp = timestamp.ok_or(SignatureError::Malformed)?;
        if candidates.is_empty() {
            return Err(SignatureError::Malformed);
        }

        let skew_secs = now.timestamp().abs_diff(timestamp);
        let tolerance = u64::try_from(self.tolerance.num_seconds()).unwrap_or(0);
        if skew_secs > tolerance {
            return Err(SignatureError::OutsideTolerance { skew_secs });
        }

        let expected = self.sign(timestamp, body)?;
        if candidates
            .iter()
            .any(|candidate| constant_time_eq(expected.as_bytes(), candidate.as_bytes()))
        {
            Ok(())
        } else {
            Err(SignatureError::Mismatch)
        }
    }

    fn sign(&self, timestamp: i64, body: &[u8]) -> Result<String, SignatureError> {
        let mut mac = HmacSha256::new_from_slice(&self.secret).map_err(|_| SignatureError::Mismatch)?;
        mac.update(timestamp.to_string().as_bytes());
        mac.update(b".");
        mac.update(body);
        Ok(hex::encode(mac.finalize().into_bytes()))
    }
}
