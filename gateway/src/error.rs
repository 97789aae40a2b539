//! Gateway error types and their HTTP mapping.
//!
//! `GatewayError` is the only place where a failure turns into a status code
//! and a public body. Internal details stay in the logs.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use thiserror::Error;
use tracing::{error, warn};

use crate::web::handlers::ErrorResponse;

/// Public body for any signature failure.
pub const SIGNATURE_FAILED: &str = "Webhook signature verification failed";

/// Public body for a type outside the known vocabulary.
pub const INVALID_EVENT_TYPE: &str = "Invalid event type";

/// Public body for unexpected failures.
pub const HANDLER_FAILED: &str = "Webhook handler failed.";

/// Why a webhook failed authentication.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum VerificationError {
    /// No webhook secret configured on this server.
    #[error("STRIPE_WEBHOOK_SECRET not set")]
    Configuration,

    #[error("Stripe-Signature header missing")]
    MissingSignature,

    /// Header present but without a timestamp or any `v1` signature.
    #[error("malformed Stripe-Signature header: {0}")]
    MalformedHeader(&'static str),

    #[error("timestamp outside tolerance (age {age}s, tolerance {tolerance}s)")]
    TimestampOutsideTolerance { age: i64, tolerance: u64 },

    #[error("no signature matches the expected signature for the payload")]
    SignatureMismatch,
}

impl VerificationError {
    /// Server-side misconfiguration rather than a bad request.
    pub fn is_configuration(&self) -> bool {
        matches!(self, Self::Configuration)
    }
}

/// Why a verified event could not be routed.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("unrecognized event type: {0}")]
    UnknownEventType(String),

    #[error("handler for {kind} failed: {source:#}")]
    Handler {
        kind: &'static str,
        #[source]
        source: anyhow::Error,
    },
}

/// Any failure of the webhook endpoint.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error(transparent)]
    Verification(#[from] VerificationError),

    /// Signed body that is not a Stripe event envelope.
    #[error("invalid event payload: {0}")]
    InvalidPayload(#[from] serde_json::Error),

    #[error(transparent)]
    Dispatch(#[from] DispatchError),
}

impl GatewayError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Verification(_) => StatusCode::BAD_REQUEST,
            Self::Dispatch(DispatchError::UnknownEventType(_)) => StatusCode::BAD_REQUEST,
            Self::InvalidPayload(_) | Self::Dispatch(DispatchError::Handler { .. }) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Message safe to return to the caller.
    pub fn public_message(&self) -> &'static str {
        match self {
            Self::Verification(_) => SIGNATURE_FAILED,
            Self::Dispatch(DispatchError::UnknownEventType(_)) => INVALID_EVENT_TYPE,
            Self::InvalidPayload(_) | Self::Dispatch(DispatchError::Handler { .. }) => {
                HANDLER_FAILED
            }
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        match &self {
            Self::Verification(e) if e.is_configuration() => {
                error!(error = %e, "stripe_webhook_misconfigured");
            }
            Self::Verification(e) => {
                warn!(error = %e, "stripe_signature_verification_failed");
            }
            Self::Dispatch(DispatchError::UnknownEventType(event_type)) => {
                warn!(event_type = %event_type, "stripe_event_type_invalid");
            }
            Self::InvalidPayload(_) | Self::Dispatch(DispatchError::Handler { .. }) => {
                error!(error = %self, "stripe_webhook_handler_failed");
            }
        }

        (
            self.status(),
            Json(ErrorResponse {
                error: self.public_message(),
            }),
        )
            .into_response()
    }
}
