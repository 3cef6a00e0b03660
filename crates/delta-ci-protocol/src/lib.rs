//! Runner Protocol Endpoint (spec §4.5, §6): the HTTP surface runners poll
//! for leases and report back to.

mod error;
mod handlers;
mod state;
mod wire;

pub use error::{ProtocolError, ProtocolResult};
pub use handlers::build_router;
pub use state::ProtocolState;
pub use wire::{AcquireLeaseResponse, HeartbeatAck, RunnerMessage};
