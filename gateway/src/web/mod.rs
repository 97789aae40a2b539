//! Web server module for the Stripe webhook endpoint.
//!
//! This module provides:
//! - Signature verification over the raw request body
//! - The webhook handler composing verification and dispatch
//! - The router with health check, method rejection and panic recovery

pub mod handlers;
pub mod signature;

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::{catch_panic::CatchPanicLayer, trace::TraceLayer};

pub use handlers::{
    handle_panic, health, method_not_supported, stripe_webhook, AppState, ErrorResponse,
    HealthResponse, MessageResponse,
};
pub use signature::{sign_payload, signature_header, verify, SIGNATURE_HEADER};

/// Build the gateway router.
///
/// The webhook is mounted at `state.config.webhook_path`; any method other
/// than POST there gets a 400.
pub fn router(state: AppState) -> Router {
    let webhook_path = state.config.webhook_path.clone();

    Router::new()
        .route("/health", get(health))
        .route(
            &webhook_path,
            post(stripe_webhook).fallback(method_not_supported),
        )
        .layer(CatchPanicLayer::custom(handle_panic))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
