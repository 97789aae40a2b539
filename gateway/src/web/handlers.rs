//! Webhook endpoint handlers.
//!
//! The Stripe endpoint:
//! 1. Reads the raw body once
//! 2. Verifies the `Stripe-Signature` header against it
//! 3. Parses the event and dispatches it by type
//! 4. Relays the handler's acknowledgement
//!
//! Every failure is converted to a response by [`GatewayError`].

use std::any::Any;
use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use tracing::{error, info, warn};

use crate::dispatch::Dispatcher;
use crate::error::{GatewayError, HANDLER_FAILED};
use crate::web::signature::{self, SIGNATURE_HEADER};
use crate::Config;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub dispatcher: Arc<Dispatcher>,
}

impl AppState {
    pub fn new(config: Config, dispatcher: Dispatcher) -> Self {
        Self {
            config: Arc::new(config),
            dispatcher: Arc::new(dispatcher),
        }
    }
}

// =============================================================================
// Health Check
// =============================================================================

/// Health check response.
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
}

/// Health check endpoint.
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

// =============================================================================
// Stripe Webhook
// =============================================================================

/// Successful acknowledgement body.
#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: String,
}

/// Error body. Only fixed messages are ever sent.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: &'static str,
}

/// Stripe webhook endpoint.
///
/// The body is taken as raw [`Bytes`] so the signature is checked against
/// exactly what Stripe sent.
pub async fn stripe_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<(StatusCode, Json<MessageResponse>), GatewayError> {
    let signature_header = headers.get(SIGNATURE_HEADER).and_then(|v| v.to_str().ok());

    info!(
        body_length = body.len(),
        has_signature = signature_header.is_some(),
        "stripe_webhook_received"
    );

    let envelope = signature::verify(
        &body,
        signature_header,
        state.config.stripe_webhook_secret.as_deref(),
        state.config.stripe_signature_tolerance,
    )?;

    info!(
        event_id = envelope.id().unwrap_or("unknown"),
        event_type = envelope.event_type().unwrap_or("unknown"),
        livemode = envelope.livemode(),
        "stripe_webhook_verified"
    );

    let result = state.dispatcher.dispatch(&envelope).await?;

    Ok((
        result.status,
        Json(MessageResponse {
            message: result.message,
        }),
    ))
}

/// Any method other than POST on the webhook path.
pub async fn method_not_supported() -> (StatusCode, Json<ErrorResponse>) {
    warn!("stripe_webhook_bad_method");
    (
        StatusCode::BAD_REQUEST,
        Json(ErrorResponse {
            error: "Bad Request",
        }),
    )
}

/// Convert a panic inside a handler into a generic 500.
pub fn handle_panic(err: Box<dyn Any + Send + 'static>) -> Response {
    let detail = if let Some(s) = err.downcast_ref::<String>() {
        s.as_str()
    } else if let Some(s) = err.downcast_ref::<&str>() {
        *s
    } else {
        "unknown panic"
    };

    error!(panic = %detail, "stripe_webhook_panicked");

    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ErrorResponse {
            error: HANDLER_FAILED,
        }),
    )
        .into_response()
}
