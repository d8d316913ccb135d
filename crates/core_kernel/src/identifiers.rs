//! Strongly-typed identifiers for domain entities
//!
//! Rows in the record store are keyed by database sequences, so every
//! identifier wraps an `i64`. Newtypes keep a time record id from being
//! passed where a material item id is expected.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::num::ParseIntError;
use std::str::FromStr;

macro_rules! define_id {
    ($name:ident, $prefix:literal) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(i64);

        impl $name {
            /// Wraps a raw database id
            pub const fn new(raw: i64) -> Self {
                Self(raw)
            }

            /// Returns the raw database id
            pub const fn get(&self) -> i64 {
                self.0
            }

            /// Returns true when the id could have come from a sequence
            pub const fn is_valid(&self) -> bool {
                self.0 > 0
            }

            /// Returns the identifier prefix for display
            pub fn prefix() -> &'static str {
                $prefix
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}-{}", $prefix, self.0)
            }
        }

        impl FromStr for $name {
            type Err = ParseIntError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                // Strip prefix if present
                let raw = s.strip_prefix(concat!($prefix, "-")).unwrap_or(s);
                Ok(Self(raw.trim().parse()?))
            }
        }

        impl From<i64> for $name {
            fn from(raw: i64) -> Self {
                Self(raw)
            }
        }

        impl From<$name> for i64 {
            fn from(id: $name) -> i64 {
                id.0
            }
        }
    };
}

// Time reporting
define_id!(TimeRecordId, "TR");
define_id!(MaterialItemId, "TRI");
define_id!(ProjectId, "PRJ");
define_id!(CategoryId, "CAT");
define_id!(ArticleId, "ART");
define_id!(UserId, "USR");

// Billing entities
define_id!(BillingEntityId, "CMP");

// Document queue
define_id!(DocumentJobId, "JOB");
define_id!(GeneratedDocumentId, "DOC");

/// Converts a slice of typed ids into the raw values bound to SQL parameters
pub fn raw_ids<T: Copy + Into<i64>>(ids: &[T]) -> Vec<i64> {
    ids.iter().map(|id| (*id).into()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_time_record_id_display() {
        let id = TimeRecordId::new(10);
        assert_eq!(id.to_string(), "TR-10");
    }

    #[test]
    fn test_id_parsing_with_and_without_prefix() {
        let prefixed: BillingEntityId = "CMP-117".parse().unwrap();
        let bare: BillingEntityId = "117".parse().unwrap();
        assert_eq!(prefixed, bare);
        assert_eq!(prefixed.get(), 117);
    }

    #[test]
    fn test_id_parsing_rejects_garbage() {
        assert!("TR-abc".parse::<TimeRecordId>().is_err());
    }

    #[test]
    fn test_serializes_as_plain_number() {
        let json = serde_json::to_string(&MaterialItemId::new(42)).unwrap();
        assert_eq!(json, "42");
    }

    #[test]
    fn test_raw_ids() {
        let ids = [TimeRecordId::new(3), TimeRecordId::new(1)];
        assert_eq!(raw_ids(&ids), vec![3, 1]);
    }
}
