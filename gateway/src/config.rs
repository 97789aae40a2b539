//! Configuration module for environment variable parsing.
//!
//! Everything is read once at startup and handed to the gateway as a value;
//! nothing reads the environment per request.

use std::env;
use tracing::warn;

use crate::web::signature::DEFAULT_TOLERANCE_SECS;

/// Default mount path of the webhook endpoint.
pub const DEFAULT_WEBHOOK_PATH: &str = "/api/webhooks/billing/stripe";

/// Application configuration loaded from environment variables.
#[derive(Clone)]
pub struct Config {
    /// Port for the web server to listen on
    pub port: u16,

    /// Stripe endpoint signing secret (`whsec_...`)
    pub stripe_webhook_secret: Option<String>,

    /// Maximum age in seconds of a signed webhook timestamp (0 disables the check)
    pub stripe_signature_tolerance: u64,

    /// Path the webhook endpoint is mounted at
    pub webhook_path: String,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        Config {
            port: parse_var("PORT", 8080),

            stripe_webhook_secret: env::var("STRIPE_WEBHOOK_SECRET")
                .ok()
                .filter(|s| !s.trim().is_empty()),

            stripe_signature_tolerance: parse_var(
                "STRIPE_WEBHOOK_TOLERANCE_SECS",
                DEFAULT_TOLERANCE_SECS,
            ),

            webhook_path: env::var("STRIPE_WEBHOOK_PATH")
                .ok()
                .filter(|p| p.starts_with('/'))
                .unwrap_or_else(|| DEFAULT_WEBHOOK_PATH.to_string()),
        }
    }

    /// Configuration with `secret` and defaults for everything else.
    pub fn with_secret(secret: impl Into<String>) -> Self {
        Config {
            stripe_webhook_secret: Some(secret.into()),
            ..Config::default()
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            port: 8080,
            stripe_webhook_secret: None,
            stripe_signature_tolerance: DEFAULT_TOLERANCE_SECS,
            webhook_path: DEFAULT_WEBHOOK_PATH.to_string(),
        }
    }
}

// Keeps the secret out of logs.
impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("port", &self.port)
            .field(
                "stripe_webhook_secret",
                &self.stripe_webhook_secret.as_ref().map(|_| "<redacted>"),
            )
            .field("stripe_signature_tolerance", &self.stripe_signature_tolerance)
            .field("webhook_path", &self.webhook_path)
            .finish()
    }
}

/// Parse a numeric variable, falling back to `default` when unset or invalid.
fn parse_var<T: std::str::FromStr>(name: &str, default: T) -> T {
    let raw = match env::var(name) {
        Ok(v) => v,
        Err(_) => return default,
    };

    match raw.trim().parse() {
        Ok(v) => v,
        Err(_) => {
            warn!(env_var = name, value = %raw, "Invalid value, using default");
            default
        }
    }
}
