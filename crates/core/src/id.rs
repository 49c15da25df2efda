//! Identifiers for jobs, tasks and worker services.
//!
//! Ids created locally carry a ULID with a kind prefix. Ids that arrive from
//! the intake queue or from storage are accepted verbatim.

use serde::{Deserialize, Serialize};
use ulid::Ulid;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident, $prefix:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            /// Generate a new id.
            pub fn new() -> Self {
                Self(format!(concat!($prefix, "_{}"), Ulid::new()))
            }

            /// Borrow the id text.
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }
    };
}

string_id!(
    /// Unique identifier for a job instance
    JobId,
    "job"
);

string_id!(
    /// Unique identifier for a task instance
    TaskId,
    "task"
);

string_id!(
    /// Unique identifier for a registered worker service
    ServiceId,
    "svc"
);
