//! The engine state published to the UI.

use serde::{Deserialize, Serialize};

/// Where the engine currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncPhase {
    /// Disconnected; mutations accumulate locally.
    Offline,
    /// Connected with nothing to push.
    Idle,
    /// A drain pass is in flight.
    Syncing,
    /// A transient failure scheduled a retry.
    Backoff {
        /// Which retry this is (1-based).
        attempt: u32,
        /// When the retry fires, as milliseconds since the Unix epoch.
        until_ms: u64,
    },
    /// The session expired; nothing syncs until re-authentication.
    AuthRequired,
}

/// Snapshot of the engine's observable state.
///
/// This is the only thing the UI sees of the sync machinery: enough to
/// render an offline banner, a syncing spinner, and a non-blocking
/// "couldn't sync some changes" notice.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncStatus {
    pub phase: SyncPhase,
    /// Records awaiting sync.
    pub pending: usize,
    /// Records the remote permanently rejected.
    pub failed: usize,
    /// The most recent failure, if any.
    pub last_error: Option<String>,
}

impl SyncStatus {
    /// The initial status for a given connectivity state.
    pub fn initial(connected: bool) -> Self {
        Self {
            phase: if connected {
                SyncPhase::Idle
            } else {
                SyncPhase::Offline
            },
            pending: 0,
            failed: 0,
            last_error: None,
        }
    }
}
