//! Opaque identifiers for core entities.
//!
//! Each id is a newtype over `String` so a `JobId` can never be passed where
//! a `RunId` is expected, even though both are plain strings on the wire.

use std::fmt;

use serde::{Deserialize, Serialize};

macro_rules! opaque_id {
    ($name:ident) => {
        #[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        pub struct $name(String);

        impl $name {
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }

            pub fn into_inner(self) -> String {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }
    };
}

opaque_id!(RunId);
opaque_id!(JobId);
opaque_id!(LeaseId);
opaque_id!(TriggerId);
opaque_id!(RunnerId);
opaque_id!(ArtifactId);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_round_trip_through_display_and_as_str() {
        let run_id = RunId::new("run-1");
        assert_eq!(run_id.as_str(), "run-1");
        assert_eq!(run_id.to_string(), "run-1");
    }

    #[test]
    fn distinct_id_types_do_not_compare_equal_in_type_system() {
        // This is a compile-time property; the test documents intent.
        let run_id = RunId::new("same");
        let job_id = JobId::new("same");
        assert_eq!(run_id.as_str(), job_id.as_str());
    }
}
