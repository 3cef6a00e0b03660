//! The Durable Store (spec §4.1): the single source of truth for Run, Job,
//! and Lease state, and the only place lease fencing and state-machine
//! guards are enforced against concurrent writers.

mod error;
#[cfg(feature = "test-support")]
mod memory;
mod model;
#[cfg(feature = "postgres")]
mod postgres;
#[cfg(feature = "sqlite")]
mod sqlite;
mod traits;

pub use error::{StoreError, StoreResult};
#[cfg(feature = "test-support")]
pub use memory::MemoryStore;
pub use model::{
    CancelFinalStatus, CancelTarget, CompletionOutcome, CreateRunResult, DispatchCandidate,
    ExpireOutcome, HeartbeatOutcome, NewRunWithTrigger,
};
#[cfg(feature = "postgres")]
pub use postgres::PostgresStore;
#[cfg(feature = "sqlite")]
pub use sqlite::SqliteStore;
pub use traits::DurableStore;
