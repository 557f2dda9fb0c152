// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//!
//! File-safety — cross-agent advisory locks with stale reclamation, plus
//! an append-only modification log.
//!
//! All agents on the host share one SQLite database (WAL mode) so lock
//! acquisition serializes through real transactions rather than ad-hoc
//! file juggling. A lock is stale when its owning process is no longer
//! alive (same zero-signal rule as the registry) or its expiry has
//! passed; stale locks are reclaimable by any requester.
//!
//! The store fails closed: an internal error is reported as a denial,
//! never as permission.

mod store;
mod types;

pub use store::{SafetyError, SafetyStore};
pub use types::{
    AcquireOutcome, ChangeKind, DenyReason, LockOwner, LockRecord, Modification, WriteDecision,
};

use std::time::Duration;

/// Default retention of modification-log rows.
pub const RETENTION_DAYS: i64 = 30;

/// Clamp a caller-supplied polling cadence into the allowed window.
pub fn clamp_poll_interval(interval: Duration) -> Duration {
    interval.clamp(Duration::from_millis(200), Duration::from_secs(10))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn poll_interval_clamps_both_ends() {
        assert_eq!(
            clamp_poll_interval(Duration::from_millis(1)),
            Duration::from_millis(200)
        );
        assert_eq!(
            clamp_poll_interval(Duration::from_secs(60)),
            Duration::from_secs(10)
        );
        assert_eq!(
            clamp_poll_interval(Duration::from_secs(1)),
            Duration::from_secs(1)
        );
    }
}
