//! Lease Dispatcher: `AcquireLease` selection and the lease reaper
//! (spec §4.4).

mod clock;
mod dispatch;
mod error;
mod reaper;

pub use clock::{Clock, SystemClock};
#[cfg(feature = "test-support")]
pub use clock::test_support::FixedClock;
pub use dispatch::{AcquireOutcome, LeaseDispatcher, LeaseGranted};
pub use error::{SchedulerError, SchedulerResult};
pub use reaper::{Reaper, ReaperConfig};
