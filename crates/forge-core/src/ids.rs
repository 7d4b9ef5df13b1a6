//! Strongly-typed identifiers.
//!
//! Every id kind in the data model gets its own newtype over [`Uuid`] so that
//! a `TaskId` and a `WorkflowId` can never be swapped at a call site by
//! accident — the arena-of-ids design in spec.md §9 depends on that.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

macro_rules! id_type {
    ($name:ident) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(Uuid);

        impl $name {
            /// Generate a fresh random id.
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            /// Wrap an existing UUID (checkpoint restore, storage round-trip).
            pub fn from_uuid(id: Uuid) -> Self {
                Self(id)
            }

            /// The underlying UUID.
            pub fn as_uuid(&self) -> Uuid {
                self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<Uuid> for $name {
            fn from(id: Uuid) -> Self {
                Self(id)
            }
        }
    };
}

id_type!(RequestId);
id_type!(TaskId);
id_type!(WorkflowId);
id_type!(CapsuleId);
id_type!(TenantId);
id_type!(UserId);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_unique() {
        assert_ne!(TaskId::new(), TaskId::new());
    }

    #[test]
    fn display_matches_uuid_string() {
        let u = Uuid::new_v4();
        let id = TaskId::from_uuid(u);
        assert_eq!(id.to_string(), u.to_string());
    }

    #[test]
    fn distinct_id_types_are_distinct_types() {
        // This is a compile-time property; the test documents it can't mix.
        let t = TaskId::new();
        let w = WorkflowId::new();
        assert_ne!(t.as_uuid(), w.as_uuid()); // only true probabilistically, but demonstrates usage
    }
}
