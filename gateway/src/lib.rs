//! Stripe webhook gateway.
//!
//! Receives Stripe webhook notifications, verifies their signature over the
//! raw body, and routes each event to the handler registered for its type.
//!
//! ## Architecture
//!
//! ```text
//! POST → raw body → Verifier (Stripe-Signature) → WebhookEnvelope → Dispatcher → EventHandler
//!              │                                        │
//!              └─ 400 on bad/missing signature          └─ 400 on unknown type
//! ```

pub mod config;
pub mod dispatch;
pub mod error;
pub mod events;
pub mod web;

// Re-export commonly used types
pub use config::Config;
pub use dispatch::{handler_fn, Dispatcher, EventHandler, HandlerResult};
pub use error::{DispatchError, GatewayError, VerificationError};
pub use events::{EventKind, ExtractedFields, WebhookEnvelope};
pub use web::{router, AppState};
