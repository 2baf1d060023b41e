//! Runtime settings for the deal service and the reaper
use std::time::Duration;

pub const DEFAULT_REAPER_INTERVAL: Duration = Duration::from_secs(30);
pub const DEFAULT_IDLE_THRESHOLD: Duration = Duration::from_secs(600);
pub const DEFAULT_CLAIM_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LedgerConfig {
    /// Consult the in-process trigger lock before claiming in the store.
    pub use_trigger_lock: bool,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            use_trigger_lock: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReaperConfig {
    /// Time between sweeps.
    pub interval: Duration,
    /// Age after completion at which a deal is archived.
    pub idle_threshold: Duration,
    /// Age at which an unresolved trigger claim is dropped.
    pub claim_timeout: Duration,
}

impl Default for ReaperConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_REAPER_INTERVAL,
            idle_threshold: DEFAULT_IDLE_THRESHOLD,
            claim_timeout: DEFAULT_CLAIM_TIMEOUT,
        }
    }
}
