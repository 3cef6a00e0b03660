//! Monotonic clock abstraction so the dispatcher and reaper can be driven
//! by deterministic time in tests instead of `Utc::now()`.

use chrono::{DateTime, Utc};

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

#[cfg(feature = "test-support")]
pub mod test_support {
    use super::*;
    use std::sync::Mutex;

    /// A clock a test can advance by hand; useful for asserting reaper
    /// behavior without sleeping in real time.
    pub struct FixedClock(Mutex<DateTime<Utc>>);

    impl FixedClock {
        pub fn new(at: DateTime<Utc>) -> Self {
            Self(Mutex::new(at))
        }

        pub fn advance(&self, delta: chrono::Duration) {
            let mut guard = self.0.lock().unwrap();
            *guard += delta;
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            *self.0.lock().unwrap()
        }
    }
}
