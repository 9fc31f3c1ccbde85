//! Strongly-typed identifiers for fresco entities.
//!
//! Identifiers are ULIDs: lexicographically sortable by creation time and
//! globally unique without coordination.
//!
//! # Example
//!
//! ```rust
//! use fresco_core::id::{MaterializationId, SubmissionId};
//!
//! let materialization = MaterializationId::generate();
//! let submission = SubmissionId::generate();
//!
//! // IDs are different types - this won't compile:
//! // let wrong: MaterializationId = submission;
//! # let _ = (materialization, submission);
//! ```

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::error::{Error, Result};

macro_rules! ulid_id {
    ($(#[$meta:meta])* $name:ident, $label:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Ulid);

        impl $name {
            /// Generates a new unique identifier.
            #[must_use]
            pub fn generate() -> Self {
                Self(Ulid::new())
            }

            /// Creates an identifier from a raw ULID.
            #[must_use]
            pub const fn from_ulid(ulid: Ulid) -> Self {
                Self(ulid)
            }

            /// Returns the underlying ULID.
            #[must_use]
            pub const fn as_ulid(&self) -> Ulid {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = Error;

            fn from_str(s: &str) -> Result<Self> {
                Ulid::from_string(s)
                    .map(Self)
                    .map_err(|e| Error::InvalidId {
                        message: format!("invalid {} '{s}': {e}", $label),
                    })
            }
        }
    };
}

ulid_id!(
    /// Identifies one successful materialization of an asset.
    ///
    /// When the execution backend does not report a data version, this ID
    /// stands in for it, so every run counts as a logical change.
    MaterializationId,
    "materialization ID"
);

ulid_id!(
    /// Identifies one plan submission to the execution backend.
    SubmissionId,
    "submission ID"
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_round_trip_through_display() {
        let id = MaterializationId::generate();
        let parsed: MaterializationId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn invalid_id_is_rejected() {
        let err = "not-a-ulid".parse::<SubmissionId>().unwrap_err();
        assert!(err.to_string().contains("submission ID"));
    }

    #[test]
    fn ids_serialize_transparently() {
        let ulid = Ulid::from_string("01ARZ3NDEKTSV4RRFFQ69G5FAV").unwrap();
        let id = SubmissionId::from_ulid(ulid);
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"01ARZ3NDEKTSV4RRFFQ69G5FAV\"");
        assert_eq!(id.as_ulid(), ulid);
    }
}
