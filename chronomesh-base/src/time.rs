//! Logical timestamps.
//!
//! All timestamps in this system are producer-supplied integer seconds, not
//! wall-clock reads taken by the engine itself. A `Timestamp` is just a
//! validated non-negative `i64` with the arithmetic the reconciliation
//! engine needs (`expiry` offsets, the default one-year window).

use serde::{Deserialize, Serialize};

/// One year, in seconds — the default instance validity window when a
/// schema node carries `units_in_chain` but no `expiry`.
pub const DEFAULT_EXPIRY_SECONDS: i64 = 31_536_000;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Timestamp(pub i64);

impl Timestamp {
    /// Validates a producer-supplied timestamp: must be non-negative.
    pub fn from_raw(raw: i64) -> Option<Self> {
        if raw >= 0 {
            Some(Timestamp(raw))
        } else {
            None
        }
    }

    pub fn value(self) -> i64 {
        self.0
    }

    /// `valid_to` for an instance created at `self` with an explicit
    /// `expiry` offset: `valid_to = created_at + expiry`.
    pub fn plus_expiry(self, expiry_offset: i64) -> Timestamp {
        Timestamp(self.0 + expiry_offset)
    }

    /// `valid_to` when no `expiry` was supplied: one year out.
    pub fn plus_default_expiry(self) -> Timestamp {
        Timestamp(self.0 + DEFAULT_EXPIRY_SECONDS)
    }
}

impl std::fmt::Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
