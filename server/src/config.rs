//! Configuration management for the booking server.
//!
//! Loads configuration from environment variables (optionally seeded from a
//! `.env` file by the binary). Secrets and the database URL are required;
//! everything else has a default.

use std::collections::HashMap;
use std::env;
use std::time::Duration;
use thiserror::Error;

/// Configuration errors.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    /// A required variable is not set.
    #[error("missing required environment variable {0}")]
    Missing(&'static str),

    /// A variable is set but cannot be parsed.
    #[error("invalid value for {key}: {value}")]
    Invalid {
        /// Variable name.
        key: &'static str,
        /// Offending value.
        value: String,
    },
}

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// `PostgreSQL` configuration
    pub database: DatabaseConfig,
    /// HTTP server configuration
    pub server: ServerConfig,
    /// Stripe configuration
    pub stripe: StripeConfig,
    /// Calendly configuration
    pub calendly: CalendlyConfig,
    /// Accepted webhook clock skew
    pub webhook_tolerance: Duration,
    /// Recovery sweep interval
    pub recovery_interval: Duration,
    /// Where participant notifications are posted; logged only when unset
    pub notify_webhook_url: Option<String>,
    /// Public URL of the booking front end, used for checkout redirects
    pub public_base_url: String,
    /// Outbound provider call timeout
    pub provider_timeout: Duration,
    /// How much of a captured payment a cancellation refunds
    pub refund_policy: RefundPolicyConfig,
}

/// Refund policy selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefundPolicyConfig {
    /// Always refund everything captured.
    Full,
    /// Refund by how much notice the cancellation gave.
    NoticeWindow {
        /// Hours of notice for a full refund.
        full_notice_hours: i64,
        /// Hours of notice for a partial refund.
        partial_notice_hours: i64,
        /// Share refunded inside the partial window.
        partial_percent: u8,
    },
}

/// `PostgreSQL` configuration
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    /// Connection URL
    pub url: String,
    /// Pool size
    pub max_connections: u32,
}

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Host to bind to
    pub host: String,
    /// Port to bind to
    pub port: u16,
}

/// Stripe configuration
#[derive(Clone)]
pub struct StripeConfig {
    /// Secret API key
    pub api_key: String,
    /// Webhook signing secret
    pub webhook_secret: String,
    /// API base URL
    pub api_base: String,
    /// Price ID per session type ID
    pub prices: HashMap<String, String>,
}

/// Calendly configuration
#[derive(Clone)]
pub struct CalendlyConfig {
    /// Personal access token
    pub api_token: String,
    /// Webhook signing key
    pub webhook_secret: String,
    /// Organization URI whose events are searched during recovery
    pub organization: String,
    /// API base URL
    pub api_base: String,
}

impl std::fmt::Debug for StripeConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StripeConfig")
            .field("api_base", &self.api_base)
            .field("prices", &self.prices)
            .finish_non_exhaustive()
    }
}

impl std::fmt::Debug for CalendlyConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CalendlyConfig")
            .field("organization", &self.organization)
            .field("api_base", &self.api_base)
            .finish_non_exhaustive()
    }
}

impl Config {
    /// Load configuration from the process environment.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when a required variable is missing or a
    /// value does not parse.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration through `lookup`.
    ///
    /// # Errors
    ///
    /// See [`from_env`](Self::from_env).
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let required = |key: &'static str| lookup(key).filter(|v| !v.is_empty()).ok_or(ConfigError::Missing(key));
        let text = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());

        Ok(Self {
            database: DatabaseConfig {
                url: required("DATABASE_URL")?,
                max_connections: parsed(&lookup, "DATABASE_MAX_CONNECTIONS", 10)?,
            },
            server: ServerConfig {
                host: text("SERVER_HOST", "0.0.0.0"),
                port: parsed(&lookup, "SERVER_PORT", 8080)?,
            },
            stripe: StripeConfig {
                api_key: required("STRIPE_API_KEY")?,
                webhook_secret: required("STRIPE_WEBHOOK_SECRET")?,
                api_base: text("STRIPE_API_BASE", "https://api.stripe.com"),
                prices: parse_prices(lookup("STRIPE_PRICES").as_deref().unwrap_or_default())?,
            },
            calendly: CalendlyConfig {
                api_token: required("CALENDLY_API_TOKEN")?,
                webhook_secret: required("CALENDLY_WEBHOOK_SECRET")?,
                organization: required("CALENDLY_ORGANIZATION")?,
                api_base: text("CALENDLY_API_BASE", "https://api.calendly.com"),
            },
            webhook_tolerance: Duration::from_secs(parsed(&lookup, "WEBHOOK_TOLERANCE_SECS", 300)?),
            recovery_interval: Duration::from_secs(parsed(&lookup, "RECOVERY_INTERVAL_SECS", 300)?),
            notify_webhook_url: lookup("NOTIFY_WEBHOOK_URL").filter(|v| !v.is_empty()),
            public_base_url: text("PUBLIC_BASE_URL", "http://localhost:3000"),
            provider_timeout: Duration::from_secs(parsed(&lookup, "PROVIDER_TIMEOUT_SECS", 10)?),
            refund_policy: refund_policy(&lookup)?,
        })
    }

    /// Socket address string the server binds to.
    #[must_use]
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

fn parsed<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &'static str,
    default: T,
) -> Result<T, ConfigError> {
    match lookup(key) {
        None => Ok(default),
        Some(value) => value.trim().parse().map_err(|_| ConfigError::Invalid { key, value }),
    }
}

/// `REFUND_FULL_NOTICE_HOURS` switches to the notice-window policy.
fn refund_policy(lookup: &impl Fn(&str) -> Option<String>) -> Result<RefundPolicyConfig, ConfigError> {
    if lookup("REFUND_FULL_NOTICE_HOURS").is_none() {
        return Ok(RefundPolicyConfig::Full);
    }
    let policy = RefundPolicyConfig::NoticeWindow {
        full_notice_hours: parsed(lookup, "REFUND_FULL_NOTICE_HOURS", 48)?,
        partial_notice_hours: parsed(lookup, "REFUND_PARTIAL_NOTICE_HOURS", 24)?,
        partial_percent: parsed(lookup, "REFUND_PARTIAL_PERCENT", 50)?,
    };
    match policy {
        RefundPolicyConfig::NoticeWindow {
            full_notice_hours,
            partial_notice_hours,
            partial_percent,
        } if partial_notice_hours > full_notice_hours || partial_percent > 100 => Err(ConfigError::Invalid {
            key: "REFUND_PARTIAL_NOTICE_HOURS",
            value: format!("{partial_notice_hours}h / {partial_percent}% against {full_notice_hours}h full notice"),
        }),
        policy => Ok(policy),
    }
}

/// Parse `session-type=price_id` pairs separated by commas.
fn parse_prices(raw: &str) -> Result<HashMap<String, String>, ConfigError> {
    raw.split(',')
        .map(str::trim)
        .filter(|pair| !pair.is_empty())
        .map(|pair| match pair.split_once('=') {
            Some((session_type, price)) if !session_type.trim().is_empty() && !price.trim().is_empty() => {
                Ok((session_type.trim().to_string(), price.trim().to_string()))
            },
            _ => Err(ConfigError::Invalid {
                key: "STRIPE_PRICES",
                value: pair.to_string(),
            }),
        })
        .collect()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn base() -> HashMap<&'static str, &'static str> {
        HashMap::from([
            ("DATABASE_URL", "postgres://localhost/bookings"),
            ("STRIPE_API_KEY", "sk_test_1"),
            ("STRIPE_WEBHOOK_SECRET", "whsec_1"),
            ("CALENDLY_API_TOKEN", "cal_token"),
            ("CALENDLY_WEBHOOK_SECRET", "cal_secret"),
            ("CALENDLY_ORGANIZATION", "https://api.calendly.com/organizations/ORG"),
        ])
    }

    fn load(vars: &HashMap<&'static str, &'static str>) -> Result<Config, ConfigError> {
        Config::from_lookup(|key| vars.get(key).map(ToString::to_string))
    }

    #[test]
    fn defaults_apply() {
        let config = load(&base()).unwrap();
        assert_eq!(config.bind_address(), "0.0.0.0:8080");
        assert_eq!(config.database.max_connections, 10);
        assert_eq!(config.webhook_tolerance, Duration::from_secs(300));
        assert_eq!(config.recovery_interval, Duration::from_secs(300));
        assert_eq!(config.stripe.api_base, "https://api.stripe.com");
        assert!(config.notify_webhook_url.is_none());
        assert!(config.stripe.prices.is_empty());
    }

    #[test]
    fn missing_secret_is_reported() {
        let mut vars = base();
        vars.remove("STRIPE_WEBHOOK_SECRET");
        assert_eq!(load(&vars).unwrap_err(), ConfigError::Missing("STRIPE_WEBHOOK_SECRET"));
    }

    #[test]
    fn bad_number_is_reported() {
        let mut vars = base();
        vars.insert("SERVER_PORT", "http");
        assert!(matches!(load(&vars), Err(ConfigError::Invalid { key: "SERVER_PORT", .. })));
    }

    #[test]
    fn prices_are_parsed() {
        let mut vars = base();
        vars.insert("STRIPE_PRICES", "mentoring-60=price_1, review = price_2");
        let config = load(&vars).unwrap();
        assert_eq!(config.stripe.prices["mentoring-60"], "price_1");
        assert_eq!(config.stripe.prices["review"], "price_2");

        vars.insert("STRIPE_PRICES", "mentoring-60");
        assert!(load(&vars).is_err());
    }

    #[test]
    fn notice_window_policy_is_opt_in() {
        assert_eq!(load(&base()).unwrap().refund_policy, RefundPolicyConfig::Full);

        let mut vars = base();
        vars.insert("REFUND_FULL_NOTICE_HOURS", "72");
        assert_eq!(
            load(&vars).unwrap().refund_policy,
            RefundPolicyConfig::NoticeWindow {
                full_notice_hours: 72,
                partial_notice_hours: 24,
                partial_percent: 50,
            }
        );

        vars.insert("REFUND_PARTIAL_PERCENT", "150");
        assert!(load(&vars).is_err());
    }

    #[test]
    fn debug_output_hides_secrets() {
        let config = load(&base()).unwrap();
        let debug = format!("{config:?}");
        assert!(!debug.contains("sk_test_1"));
        assert!(!debug.contains("cal_token"));
    }
}
