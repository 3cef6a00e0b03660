//! Shared state for the protocol endpoint's axum handlers.

use std::sync::Arc;
use std::time::Duration;

use chrono::Duration as ChronoDuration;
use delta_ci_scheduler::LeaseDispatcher;
use delta_ci_store::DurableStore;

#[derive(Clone)]
pub struct ProtocolState {
    pub store: Arc<dyn DurableStore>,
    pub dispatcher: Arc<LeaseDispatcher>,
    pub lease_ttl: ChronoDuration,
    pub request_timeout: Duration,
}

impl ProtocolState {
    pub fn new(
        store: Arc<dyn DurableStore>,
        dispatcher: Arc<LeaseDispatcher>,
        lease_ttl: ChronoDuration,
        request_timeout: Duration,
    ) -> Self {
        Self { store, dispatcher, lease_ttl, request_timeout }
    }
}
