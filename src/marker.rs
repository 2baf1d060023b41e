//! Durable sentinels guarding triggers and recording terminal outcomes
use crate::deal::TimeStamp;
use std::fmt;

/// Claim on a trigger message. A trigger is claimed at most once: the marker
/// starts as `Processing` and is resolved to the deal it produced, after
/// which it stays in place for good.
#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub enum TriggerMarker {
    #[n(0)]
    Processing {
        #[n(0)]
        claim: String, // unique per open attempt
        #[n(1)]
        claimed_at: TimeStamp,
    },
    #[n(1)]
    Resolved {
        #[n(0)]
        deal_ref: String,
    },
}

impl TriggerMarker {
    pub fn processing(claim: String, claimed_at: TimeStamp) -> Self {
        TriggerMarker::Processing { claim, claimed_at }
    }

    /// A `Processing` claim older than `timeout` at `now`.
    pub fn is_stale(&self, now: &TimeStamp, timeout: chrono::TimeDelta) -> bool {
        match self {
            TriggerMarker::Processing { claimed_at, .. } => now.since(claimed_at) >= timeout,
            TriggerMarker::Resolved { .. } => false,
        }
    }
}

/// Terminal outcome recorded against both the deal and its trigger.
#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    #[n(0)]
    Completed,
    #[n(1)]
    Cancelled,
}

impl fmt::Display for Disposition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Disposition::Completed => f.write_str("completed"),
            Disposition::Cancelled => f.write_str("cancelled"),
        }
    }
}
