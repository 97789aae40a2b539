//! Stripe event envelope and the closed vocabulary of event kinds.
//!
//! The envelope keeps the raw `type` tag; [`WebhookEnvelope::kind`] resolves it
//! against [`EventKind`]. `data.object` is decoded per event family into
//! [`EventObject`] and projected into [`ExtractedFields`] before dispatch.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use tracing::warn;

// =============================================================================
// Event Kinds
// =============================================================================

/// Every event type the gateway routes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    // Checkout: https://stripe.com/docs/payments/checkout
    CheckoutSessionCompleted,
    CheckoutSessionAsyncPaymentSucceeded,
    CheckoutSessionAsyncPaymentFailed,
    CheckoutSessionExpired,
    // Charge: https://stripe.com/docs/api/charges
    ChargeSucceeded,
    ChargeFailed,
    ChargeRefunded,
    ChargeExpired,
    // Disputes: https://stripe.com/docs/disputes
    ChargeDisputeCreated,
    ChargeDisputeUpdated,
    ChargeDisputeFundsReinstated,
    ChargeDisputeFundsWithdrawn,
    ChargeDisputeClosed,
    // Customer: https://stripe.com/docs/api/customers
    CustomerCreated,
    CustomerUpdated,
    CustomerDeleted,
    CustomerSubscriptionCreated,
    CustomerSubscriptionUpdated,
    CustomerSubscriptionDeleted,
    CustomerSubscriptionPaused,
    CustomerSubscriptionResumed,
}

/// Shape of `data.object` shared by a group of event kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventFamily {
    CheckoutSession,
    Charge,
    Dispute,
    Customer,
    Subscription,
}

impl EventKind {
    /// All known kinds, in declaration order.
    pub const ALL: [EventKind; 21] = [
        Self::CheckoutSessionCompleted,
        Self::CheckoutSessionAsyncPaymentSucceeded,
        Self::CheckoutSessionAsyncPaymentFailed,
        Self::CheckoutSessionExpired,
        Self::ChargeSucceeded,
        Self::ChargeFailed,
        Self::ChargeRefunded,
        Self::ChargeExpired,
        Self::ChargeDisputeCreated,
        Self::ChargeDisputeUpdated,
        Self::ChargeDisputeFundsReinstated,
        Self::ChargeDisputeFundsWithdrawn,
        Self::ChargeDisputeClosed,
        Self::CustomerCreated,
        Self::CustomerUpdated,
        Self::CustomerDeleted,
        Self::CustomerSubscriptionCreated,
        Self::CustomerSubscriptionUpdated,
        Self::CustomerSubscriptionDeleted,
        Self::CustomerSubscriptionPaused,
        Self::CustomerSubscriptionResumed,
    ];

    /// The Stripe type tag.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CheckoutSessionCompleted => "checkout.session.completed",
            Self::CheckoutSessionAsyncPaymentSucceeded => {
                "checkout.session.async_payment_succeeded"
            }
            Self::CheckoutSessionAsyncPaymentFailed => "checkout.session.async_payment_failed",
            Self::CheckoutSessionExpired => "checkout.session.expired",
            Self::ChargeSucceeded => "charge.succeeded",
            Self::ChargeFailed => "charge.failed",
            Self::ChargeRefunded => "charge.refunded",
            Self::ChargeExpired => "charge.expired",
            Self::ChargeDisputeCreated => "charge.dispute.created",
            Self::ChargeDisputeUpdated => "charge.dispute.updated",
            Self::ChargeDisputeFundsReinstated => "charge.dispute.funds_reinstated",
            Self::ChargeDisputeFundsWithdrawn => "charge.dispute.funds_withdrawn",
            Self::ChargeDisputeClosed => "charge.dispute.closed",
            Self::CustomerCreated => "customer.created",
            Self::CustomerUpdated => "customer.updated",
            Self::CustomerDeleted => "customer.deleted",
            Self::CustomerSubscriptionCreated => "customer.subscription.created",
            Self::CustomerSubscriptionUpdated => "customer.subscription.updated",
            Self::CustomerSubscriptionDeleted => "customer.subscription.deleted",
            Self::CustomerSubscriptionPaused => "customer.subscription.paused",
            Self::CustomerSubscriptionResumed => "customer.subscription.resumed",
        }
    }

    /// Which `data.object` shape this kind carries.
    pub fn family(&self) -> EventFamily {
        match self {
            Self::CheckoutSessionCompleted
            | Self::CheckoutSessionAsyncPaymentSucceeded
            | Self::CheckoutSessionAsyncPaymentFailed
            | Self::CheckoutSessionExpired => EventFamily::CheckoutSession,
            Self::ChargeSucceeded
            | Self::ChargeFailed
            | Self::ChargeRefunded
            | Self::ChargeExpired => EventFamily::Charge,
            Self::ChargeDisputeCreated
            | Self::ChargeDisputeUpdated
            | Self::ChargeDisputeFundsReinstated
            | Self::ChargeDisputeFundsWithdrawn
            | Self::ChargeDisputeClosed => EventFamily::Dispute,
            Self::CustomerCreated | Self::CustomerUpdated | Self::CustomerDeleted => {
                EventFamily::Customer
            }
            Self::CustomerSubscriptionCreated
            | Self::CustomerSubscriptionUpdated
            | Self::CustomerSubscriptionDeleted
            | Self::CustomerSubscriptionPaused
            | Self::CustomerSubscriptionResumed => EventFamily::Subscription,
        }
    }

    /// Acknowledgement message returned to Stripe once the event is handled.
    ///
    /// Log consumers match on these strings, so they must not change.
    pub fn confirmation(&self) -> &'static str {
        match self {
            Self::CheckoutSessionCompleted => "Checkout session completed!",
            Self::CheckoutSessionAsyncPaymentSucceeded => "Checkout payment succeeded!",
            Self::CheckoutSessionAsyncPaymentFailed => "Checkout payment failed!",
            Self::CheckoutSessionExpired => "Payments marked canceled!",
            Self::ChargeSucceeded => "Payment completed!",
            Self::ChargeFailed | Self::ChargeExpired => "Payment Updated!",
            Self::ChargeRefunded => "Refund completed!",
            Self::ChargeDisputeCreated => "Dispute details added!",
            Self::ChargeDisputeUpdated
            | Self::ChargeDisputeFundsReinstated
            | Self::ChargeDisputeFundsWithdrawn => "Dispute details updated!",
            Self::ChargeDisputeClosed => "Dispute closed!",
            Self::CustomerCreated => "Customer created!",
            Self::CustomerUpdated => "Customer updated!",
            Self::CustomerDeleted => "Customer deleted!",
            Self::CustomerSubscriptionCreated => "Customer subscription created!",
            Self::CustomerSubscriptionUpdated => "Customer subscription updated!",
            Self::CustomerSubscriptionDeleted => "Customer subscription deleted!",
            Self::CustomerSubscriptionPaused => "Customer subscription paused!",
            Self::CustomerSubscriptionResumed => "Customer subscription resumed!",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned when a type tag is outside the known vocabulary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownEventKind(pub String);

impl FromStr for EventKind {
    type Err = UnknownEventKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| UnknownEventKind(s.to_string()))
    }
}

// =============================================================================
// Envelope
// =============================================================================

/// A verified Stripe event.
///
/// Only built from a body whose signature has already been checked, and never
/// mutated afterwards.
///
/// Any JSON object is accepted. Fields that are missing or of the wrong JSON
/// type read as absent: a missing `type` routes as an unknown event and a
/// missing `data.object` projects to empty fields.
#[derive(Debug, Clone)]
pub struct WebhookEnvelope {
    id: Option<String>,
    event_type: Option<String>,
    created: Option<i64>,
    livemode: Option<bool>,
    api_version: Option<String>,
    object: Value,
}

impl<'de> Deserialize<'de> for WebhookEnvelope {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let mut fields = Map::<String, Value>::deserialize(deserializer)?;

        let object = fields
            .remove("data")
            .and_then(|mut data| data.get_mut("object").map(Value::take))
            .unwrap_or(Value::Null);

        Ok(Self {
            id: string_field(&fields, "id"),
            event_type: string_field(&fields, "type"),
            created: fields.get("created").and_then(Value::as_i64),
            livemode: fields.get("livemode").and_then(Value::as_bool),
            api_version: string_field(&fields, "api_version"),
            object,
        })
    }
}

fn string_field(fields: &Map<String, Value>, key: &str) -> Option<String> {
    fields.get(key)?.as_str().map(str::to_string)
}

impl WebhookEnvelope {
    /// Parse from raw JSON bytes.
    ///
    /// Fails only when the body is not a JSON object.
    pub fn from_slice(bytes: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(bytes)
    }

    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    /// The raw `type` tag as sent by Stripe; `None` when absent or not a string.
    pub fn event_type(&self) -> Option<&str> {
        self.event_type.as_deref()
    }

    pub fn created(&self) -> Option<i64> {
        self.created
    }

    pub fn livemode(&self) -> bool {
        self.livemode.unwrap_or(false)
    }

    pub fn api_version(&self) -> Option<&str> {
        self.api_version.as_deref()
    }

    /// The untyped `data.object`.
    pub fn object(&self) -> &Value {
        &self.object
    }

    /// Resolve the type tag; `None` for tags outside the vocabulary.
    pub fn kind(&self) -> Option<EventKind> {
        self.event_type()?.parse().ok()
    }

    /// Decode `data.object` into the shape used by `kind`.
    pub fn typed_object(&self, kind: EventKind) -> EventObject {
        EventObject::decode(kind.family(), &self.object)
    }
}

// =============================================================================
// Event Objects
// =============================================================================

/// `data.object` decoded by event family.
#[derive(Debug, Clone, PartialEq)]
pub enum EventObject {
    CheckoutSession(CheckoutSession),
    Charge(Charge),
    Dispute(Dispute),
    Customer(Customer),
    Subscription(Subscription),
}

/// Checkout session object (`cs_...`).
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct CheckoutSession {
    pub id: Option<String>,
    pub object: Option<String>,
    pub mode: Option<String>,
    pub status: Option<String>,
    pub payment_status: Option<String>,
    pub payment_intent: Option<String>,
    pub subscription: Option<String>,
    pub invoice: Option<String>,
    pub metadata: Option<Value>,
}

/// Charge object (`ch_...`).
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct Charge {
    pub id: Option<String>,
    pub object: Option<String>,
    pub status: Option<String>,
    pub payment_intent: Option<String>,
    pub invoice: Option<String>,
    pub metadata: Option<Value>,
}

/// Dispute object (`dp_...`).
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct Dispute {
    pub id: Option<String>,
    pub object: Option<String>,
    pub status: Option<String>,
    pub charge: Option<String>,
    pub payment_intent: Option<String>,
    pub metadata: Option<Value>,
}

/// Customer object (`cus_...`).
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct Customer {
    pub id: Option<String>,
    pub object: Option<String>,
    pub metadata: Option<Value>,
}

/// Subscription object (`sub_...`).
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct Subscription {
    pub id: Option<String>,
    pub object: Option<String>,
    pub status: Option<String>,
    pub latest_invoice: Option<String>,
    pub metadata: Option<Value>,
}

impl EventObject {
    /// Decode `object` for `family`.
    ///
    /// Never fails: a record that does not fit the expected shape (a field of
    /// the wrong JSON type, say) decodes to the empty record.
    pub fn decode(family: EventFamily, object: &Value) -> Self {
        match family {
            EventFamily::CheckoutSession => Self::CheckoutSession(decode_or_default(family, object)),
            EventFamily::Charge => Self::Charge(decode_or_default(family, object)),
            EventFamily::Dispute => Self::Dispute(decode_or_default(family, object)),
            EventFamily::Customer => Self::Customer(decode_or_default(family, object)),
            EventFamily::Subscription => Self::Subscription(decode_or_default(family, object)),
        }
    }

    /// Project the fields handlers receive.
    pub fn extract(&self) -> ExtractedFields {
        match self {
            Self::CheckoutSession(s) => ExtractedFields {
                mode: s.mode.clone(),
                id: s.id.clone(),
                object: s.object.clone(),
                status: s.status.clone(),
                payment_status: s.payment_status.clone(),
                payment_intent: s.payment_intent.clone(),
                subscription: s.subscription.clone(),
                invoice: s.invoice.clone(),
                user_id: user_id(s.metadata.as_ref()),
                metadata: s.metadata.clone(),
            },
            Self::Charge(c) => ExtractedFields {
                id: c.id.clone(),
                object: c.object.clone(),
                status: c.status.clone(),
                payment_intent: c.payment_intent.clone(),
                invoice: c.invoice.clone(),
                user_id: user_id(c.metadata.as_ref()),
                metadata: c.metadata.clone(),
                ..ExtractedFields::default()
            },
            Self::Dispute(d) => ExtractedFields {
                id: d.id.clone(),
                object: d.object.clone(),
                status: d.status.clone(),
                payment_intent: d.payment_intent.clone(),
                user_id: user_id(d.metadata.as_ref()),
                metadata: d.metadata.clone(),
                ..ExtractedFields::default()
            },
            Self::Customer(c) => ExtractedFields {
                id: c.id.clone(),
                object: c.object.clone(),
                user_id: user_id(c.metadata.as_ref()),
                metadata: c.metadata.clone(),
                ..ExtractedFields::default()
            },
            // The subscription reference of a subscription event is its own id.
            Self::Subscription(s) => ExtractedFields {
                id: s.id.clone(),
                object: s.object.clone(),
                status: s.status.clone(),
                subscription: s.id.clone(),
                invoice: s.latest_invoice.clone(),
                user_id: user_id(s.metadata.as_ref()),
                metadata: s.metadata.clone(),
                ..ExtractedFields::default()
            },
        }
    }
}

fn decode_or_default<T>(family: EventFamily, object: &Value) -> T
where
    T: Default + for<'de> Deserialize<'de>,
{
    if object.is_null() {
        return T::default();
    }
    match T::deserialize(object) {
        Ok(decoded) => decoded,
        Err(e) => {
            warn!(family = ?family, error = %e, "stripe_event_object_unrecognized");
            T::default()
        }
    }
}

fn user_id(metadata: Option<&Value>) -> Option<String> {
    metadata?.get("userId")?.as_str().map(str::to_string)
}

// =============================================================================
// Extracted Fields
// =============================================================================

/// Fields pulled out of `data.object` for the handler of one event.
///
/// Which fields are present depends on the event kind; none are required.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ExtractedFields {
    /// Checkout mode (`payment`, `subscription`, `setup`)
    pub mode: Option<String>,
    /// Id of the object the event is about
    pub id: Option<String>,
    /// Stripe object name (`charge`, `checkout.session`, ...)
    pub object: Option<String>,
    /// Object status
    pub status: Option<String>,
    /// Checkout payment status
    pub payment_status: Option<String>,
    /// Payment intent reference (`pi_...`)
    pub payment_intent: Option<String>,
    /// Subscription reference (`sub_...`)
    pub subscription: Option<String>,
    /// Invoice reference (`in_...`)
    pub invoice: Option<String>,
    /// Application user id carried in `metadata.userId`
    pub user_id: Option<String>,
    /// Raw metadata map
    pub metadata: Option<Value>,
}
