//! Session tunables shared by the bus, history, and sync engine.

use std::time::Duration;

/// Default number of snapshots retained on the undo stack.
pub const DEFAULT_HISTORY_LIMIT: usize = 50;

/// Configuration for a single room session.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncConfig {
    /// Maximum undo depth. Oldest snapshots are evicted first.
    pub history_limit: usize,
    /// How long a trainee waits after joining before sending `request_state`.
    pub request_state_delay: Duration,
    /// Lifetime of a fallback message entry in shared storage.
    pub fallback_cleanup_delay: Duration,
    /// How long after `request_state` before the session reports that no host answered.
    pub host_wait_notice: Duration,
    /// Broadcast `stroke_start` / `stroke_move` while a stroke is being drawn.
    pub broadcast_previews: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            history_limit: DEFAULT_HISTORY_LIMIT,
            request_state_delay: Duration::from_millis(500),
            fallback_cleanup_delay: Duration::from_millis(1000),
            host_wait_notice: Duration::from_secs(5),
            broadcast_previews: false,
        }
    }
}

impl SyncConfig {
    /// Config with all delays set to zero. Useful for tests and local demos.
    pub fn immediate() -> Self {
        Self {
            request_state_delay: Duration::ZERO,
            fallback_cleanup_delay: Duration::ZERO,
            ..Self::default()
        }
    }
}
