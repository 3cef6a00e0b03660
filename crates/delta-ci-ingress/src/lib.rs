//! Ingress Normalizer: HMAC verification and `TriggerEvent` normalization
//! for inbound provider webhooks (spec §4.2).
//!
//! This crate never talks to the Store. It hands a [`NormalizedTrigger`]
//! to whatever owns run creation; the `webhook` feature adds axum
//! extractor glue on top of the same pure functions.

mod error;
mod normalize;
mod signature;

#[cfg(feature = "webhook")]
mod webhook;

pub use error::{IngressError, IngressResult};
pub use normalize::{normalize_event, NormalizedTrigger, TriggerEvent};
pub use signature::verify_signature;

#[cfg(feature = "webhook")]
pub use webhook::{build_router, TriggerSink, WebhookConfig};
