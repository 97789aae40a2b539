//! Event dispatch.
//!
//! Routes a verified [`WebhookEnvelope`] to the handler registered for its
//! [`EventKind`].
//!
//! ## Dispatch Flow
//!
//! ```text
//! WebhookEnvelope → kind() → EventObject → ExtractedFields → EventHandler → HandlerResult
//!                     │
//!                     └─ unknown → DispatchError::UnknownEventType
//! ```
//!
//! Kinds without a registered handler are acknowledged with their fixed
//! confirmation message.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use axum::http::StatusCode;
use tracing::{debug, info};

use crate::error::DispatchError;
use crate::events::{EventKind, ExtractedFields, WebhookEnvelope};

/// Outcome of handling one event: the acknowledgement sent back to Stripe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandlerResult {
    pub message: String,
    pub status: StatusCode,
}

impl HandlerResult {
    /// A 200 with a custom message.
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            status: StatusCode::OK,
        }
    }

    /// The fixed confirmation for `kind`.
    pub fn acknowledge(kind: EventKind) -> Self {
        Self::ok(kind.confirmation())
    }
}

/// Business logic invoked for a verified event.
///
/// Return `Ok(None)` to acknowledge with the kind's fixed confirmation, or
/// `Ok(Some(..))` to override it. Errors become a generic 500 for the caller.
#[async_trait]
pub trait EventHandler: Send + Sync + 'static {
    async fn handle(
        &self,
        kind: EventKind,
        fields: &ExtractedFields,
    ) -> anyhow::Result<Option<HandlerResult>>;
}

/// Wrap a synchronous closure as an [`EventHandler`].
///
/// ```rust
/// use stripe_gateway::dispatch::{handler_fn, Dispatcher};
/// use stripe_gateway::events::EventKind;
///
/// let dispatcher = Dispatcher::builder()
///     .on(
///         EventKind::ChargeRefunded,
///         handler_fn(|_kind, fields| {
///             tracing::info!(charge = ?fields.id, "refund_recorded");
///             Ok(None)
///         }),
///     )
///     .build();
/// ```
pub fn handler_fn<F>(f: F) -> HandlerFn<F>
where
    F: Fn(EventKind, &ExtractedFields) -> anyhow::Result<Option<HandlerResult>>
        + Send
        + Sync
        + 'static,
{
    HandlerFn(f)
}

/// Handler returned by [`handler_fn`].
#[derive(Clone)]
pub struct HandlerFn<F>(F);

#[async_trait]
impl<F> EventHandler for HandlerFn<F>
where
    F: Fn(EventKind, &ExtractedFields) -> anyhow::Result<Option<HandlerResult>>
        + Send
        + Sync
        + 'static,
{
    async fn handle(
        &self,
        kind: EventKind,
        fields: &ExtractedFields,
    ) -> anyhow::Result<Option<HandlerResult>> {
        (self.0)(kind, fields)
    }
}

/// Registry of handlers keyed by event kind.
#[derive(Clone, Default)]
pub struct Dispatcher {
    handlers: HashMap<EventKind, Arc<dyn EventHandler>>,
}

impl fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut registered: Vec<_> = self.handlers.keys().map(EventKind::as_str).collect();
        registered.sort_unstable();
        f.debug_struct("Dispatcher")
            .field("registered", &registered)
            .finish()
    }
}

impl Dispatcher {
    /// A dispatcher that acknowledges every known kind without side effects.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn builder() -> DispatcherBuilder {
        DispatcherBuilder::default()
    }

    pub fn has_handler(&self, kind: EventKind) -> bool {
        self.handlers.contains_key(&kind)
    }

    /// Route `envelope` to its handler.
    ///
    /// The handler is called at most once. Routing depends only on the
    /// envelope's `type`.
    pub async fn dispatch(
        &self,
        envelope: &WebhookEnvelope,
    ) -> Result<HandlerResult, DispatchError> {
        let Some(kind) = envelope.kind() else {
            return Err(DispatchError::UnknownEventType(
                envelope.event_type().unwrap_or_default().to_string(),
            ));
        };

        let fields = envelope.typed_object(kind).extract();

        debug!(
            event_type = %kind,
            mode = ?fields.mode,
            id = ?fields.id,
            object = ?fields.object,
            status = ?fields.status,
            payment_status = ?fields.payment_status,
            payment_intent = ?fields.payment_intent,
            subscription = ?fields.subscription,
            invoice = ?fields.invoice,
            user_id = ?fields.user_id,
            "stripe_event_fields"
        );

        let result = match self.handlers.get(&kind) {
            Some(handler) => handler
                .handle(kind, &fields)
                .await
                .map_err(|source| DispatchError::Handler {
                    kind: kind.as_str(),
                    source,
                })?
                .unwrap_or_else(|| HandlerResult::acknowledge(kind)),
            None => HandlerResult::acknowledge(kind),
        };

        info!(
            event_id = envelope.id().unwrap_or("unknown"),
            event_type = %kind,
            status = result.status.as_u16(),
            handled = self.has_handler(kind),
            "stripe_event_dispatched"
        );

        Ok(result)
    }
}

/// Builder for [`Dispatcher`].
#[derive(Default)]
pub struct DispatcherBuilder {
    handlers: HashMap<EventKind, Arc<dyn EventHandler>>,
}

impl DispatcherBuilder {
    /// Register `handler` for `kind`, replacing any earlier registration.
    pub fn on(mut self, kind: EventKind, handler: impl EventHandler) -> Self {
        self.handlers.insert(kind, Arc::new(handler));
        self
    }

    /// Register one shared handler for several kinds.
    pub fn on_each(mut self, kinds: &[EventKind], handler: impl EventHandler) -> Self {
        let handler: Arc<dyn EventHandler> = Arc::new(handler);
        for kind in kinds {
            self.handlers.insert(*kind, Arc::clone(&handler));
        }
        self
    }

    pub fn build(self) -> Dispatcher {
        Dispatcher {
            handlers: self.handlers,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    fn envelope(json: &str) -> WebhookEnvelope {
        WebhookEnvelope::from_slice(json.as_bytes()).unwrap()
    }

    #[tokio::test]
    async fn test_dispatch_charge_succeeded() {
        let event = envelope(r#"{"type":"charge.succeeded","data":{"object":{"id":"ch_1"}}}"#);

        let result = Dispatcher::new().dispatch(&event).await.unwrap();
        assert_eq!(result.status, StatusCode::OK);
        assert_eq!(result.message, "Payment completed!");
    }

    #[tokio::test]
    async fn test_dispatch_subscription_paused() {
        let event = envelope(r#"{"type":"customer.subscription.paused","data":{"object":{}}}"#);

        let result = Dispatcher::new().dispatch(&event).await.unwrap();
        assert_eq!(result, HandlerResult::ok("Customer subscription paused!"));
    }

    #[tokio::test]
    async fn test_dispatch_every_known_kind() {
        let dispatcher = Dispatcher::new();
        for kind in EventKind::ALL {
            let event = envelope(&format!(
                r#"{{"type":"{}","data":{{"object":{{}}}}}}"#,
                kind.as_str()
            ));
            let result = dispatcher.dispatch(&event).await.unwrap();
            assert_eq!(result.status, StatusCode::OK, "{}", kind);
            assert_eq!(result.message, kind.confirmation());
        }
    }

    #[tokio::test]
    async fn test_dispatch_unknown_type() {
        let event = envelope(r#"{"type":"unknown.event","data":{"object":{}}}"#);

        let err = Dispatcher::new().dispatch(&event).await.unwrap_err();
        assert!(matches!(err, DispatchError::UnknownEventType(t) if t == "unknown.event"));
    }

    #[tokio::test]
    async fn test_dispatch_missing_type() {
        let event = envelope(r#"{"data":{"object":{"id":"ch_1"}}}"#);

        let err = Dispatcher::new().dispatch(&event).await.unwrap_err();
        assert!(matches!(err, DispatchError::UnknownEventType(t) if t.is_empty()));
    }

    #[tokio::test]
    async fn test_dispatch_without_data_projects_empty_fields() {
        let seen = Arc::new(Mutex::new(None));
        let dispatcher = {
            let seen = Arc::clone(&seen);
            Dispatcher::builder()
                .on(
                    EventKind::CustomerDeleted,
                    handler_fn(move |_, fields| {
                        *seen.lock().unwrap() = Some(fields.clone());
                        Ok(None)
                    }),
                )
                .build()
        };

        let result = dispatcher
            .dispatch(&envelope(r#"{"type":"customer.deleted"}"#))
            .await
            .unwrap();
        assert_eq!(result, HandlerResult::ok("Customer deleted!"));
        assert_eq!(
            seen.lock().unwrap().clone(),
            Some(ExtractedFields::default())
        );
    }

    #[tokio::test]
    async fn test_handler_receives_projection_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = Arc::new(Mutex::new(None));

        let dispatcher = {
            let calls = Arc::clone(&calls);
            let seen = Arc::clone(&seen);
            Dispatcher::builder()
                .on(
                    EventKind::CheckoutSessionCompleted,
                    handler_fn(move |kind, fields| {
                        calls.fetch_add(1, Ordering::SeqCst);
                        *seen.lock().unwrap() = Some((kind, fields.clone()));
                        Ok(None)
                    }),
                )
                .build()
        };

        let event = envelope(
            r#"{"type":"checkout.session.completed","data":{"object":{
                "id":"cs_1","mode":"payment","payment_status":"paid",
                "payment_intent":"pi_1","metadata":{"userId":"u_1"}}}}"#,
        );

        let result = dispatcher.dispatch(&event).await.unwrap();
        assert_eq!(result.message, "Checkout session completed!");
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let (kind, fields) = seen.lock().unwrap().clone().unwrap();
        assert_eq!(kind, EventKind::CheckoutSessionCompleted);
        assert_eq!(fields.id.as_deref(), Some("cs_1"));
        assert_eq!(fields.mode.as_deref(), Some("payment"));
        assert_eq!(fields.payment_intent.as_deref(), Some("pi_1"));
        assert_eq!(fields.user_id.as_deref(), Some("u_1"));
    }

    #[tokio::test]
    async fn test_handler_not_invoked_for_other_kinds() {
        let calls = Arc::new(AtomicUsize::new(0));
        let dispatcher = {
            let calls = Arc::clone(&calls);
            Dispatcher::builder()
                .on(
                    EventKind::ChargeRefunded,
                    handler_fn(move |_, _| {
                        calls.fetch_add(1, Ordering::SeqCst);
                        Ok(None)
                    }),
                )
                .build()
        };

        for body in [
            r#"{"type":"charge.succeeded","data":{"object":{}}}"#,
            r#"{"type":"unknown.event","data":{"object":{}}}"#,
        ] {
            let _ = dispatcher.dispatch(&envelope(body)).await;
        }
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_handler_can_override_result() {
        let dispatcher = Dispatcher::builder()
            .on(
                EventKind::CustomerCreated,
                handler_fn(|_, fields| {
                    Ok(Some(HandlerResult::ok(format!(
                        "Customer {} created!",
                        fields.id.as_deref().unwrap_or("?")
                    ))))
                }),
            )
            .build();

        let event = envelope(r#"{"type":"customer.created","data":{"object":{"id":"cus_7"}}}"#);
        let result = dispatcher.dispatch(&event).await.unwrap();
        assert_eq!(result.message, "Customer cus_7 created!");
    }

    #[tokio::test]
    async fn test_handler_error_is_reported() {
        let dispatcher = Dispatcher::builder()
            .on(
                EventKind::ChargeFailed,
                handler_fn(|_, _| Err(anyhow::anyhow!("ledger unavailable"))),
            )
            .build();

        let event = envelope(r#"{"type":"charge.failed","data":{"object":{}}}"#);
        let err = dispatcher.dispatch(&event).await.unwrap_err();
        assert!(matches!(
            err,
            DispatchError::Handler {
                kind: "charge.failed",
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_on_each_shares_handler() {
        let calls = Arc::new(AtomicUsize::new(0));
        let dispatcher = {
            let calls = Arc::clone(&calls);
            Dispatcher::builder()
                .on_each(
                    &[
                        EventKind::ChargeDisputeCreated,
                        EventKind::ChargeDisputeClosed,
                    ],
                    handler_fn(move |_, _| {
                        calls.fetch_add(1, Ordering::SeqCst);
                        Ok(None)
                    }),
                )
                .build()
        };

        assert!(dispatcher.has_handler(EventKind::ChargeDisputeCreated));
        assert!(dispatcher.has_handler(EventKind::ChargeDisputeClosed));
        assert!(!dispatcher.has_handler(EventKind::ChargeDisputeUpdated));

        for body in [
            r#"{"type":"charge.dispute.created","data":{"object":{}}}"#,
            r#"{"type":"charge.dispute.closed","data":{"object":{}}}"#,
        ] {
            dispatcher.dispatch(&envelope(body)).await.unwrap();
        }
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
