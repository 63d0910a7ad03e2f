//! Hybrid Logical Clock timestamps.
//!
//! Every record carries an `updated_at` timestamp that must advance on every
//! local or remote write, because it is the basis for last-write-wins
//! conflict resolution. A raw wall clock cannot promise that: two edits in
//! the same millisecond collide, and NTP steps can move it backwards. The
//! hybrid clock pairs wall time with a logical counter so the ordering is
//! total and monotonic regardless.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

/// A Hybrid Logical Clock timestamp: wall-clock milliseconds plus a logical
/// counter that breaks ties between writes in the same millisecond.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HybridTimestamp {
    /// Physical time component (milliseconds since Unix epoch).
    wall_time: u64,
    /// Logical counter for ordering writes at the same wall time.
    logical: u32,
}

fn wall_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system time before Unix epoch")
        .as_millis() as u64
}

impl HybridTimestamp {
    /// Creates a timestamp at the current wall time.
    #[must_use]
    pub fn now() -> Self {
        Self {
            wall_time: wall_now(),
            logical: 0,
        }
    }

    /// Creates a timestamp from raw components (e.g. read back from storage).
    #[must_use]
    pub const fn from_parts(wall_time: u64, logical: u32) -> Self {
        Self { wall_time, logical }
    }

    /// Returns the wall time component in milliseconds since the epoch.
    #[must_use]
    pub const fn wall_time(&self) -> u64 {
        self.wall_time
    }

    /// Returns the logical counter.
    #[must_use]
    pub const fn logical(&self) -> u32 {
        self.logical
    }

    /// Produces the next timestamp, strictly greater than `self`.
    ///
    /// Called on every local edit so `updated_at` never stalls or regresses,
    /// even when the wall clock does.
    #[must_use]
    pub fn tick(&self) -> Self {
        let now = wall_now();
        if now > self.wall_time {
            Self {
                wall_time: now,
                logical: 0,
            }
        } else {
            Self {
                wall_time: self.wall_time,
                logical: self.logical.saturating_add(1),
            }
        }
    }

    /// Produces a timestamp strictly greater than both `self` and `other`.
    ///
    /// Used when a local write must advance past a conflicting remote
    /// timestamp (e.g. a local delete overriding a newer remote update).
    #[must_use]
    pub fn receive(&self, other: &Self) -> Self {
        let now = wall_now();
        let max_wall = now.max(self.wall_time).max(other.wall_time);

        let logical = if max_wall == self.wall_time && max_wall == other.wall_time {
            self.logical.max(other.logical).saturating_add(1)
        } else if max_wall == self.wall_time {
            self.logical.saturating_add(1)
        } else if max_wall == other.wall_time {
            other.logical.saturating_add(1)
        } else {
            0
        };

        Self {
            wall_time: max_wall,
            logical,
        }
    }
}

impl Default for HybridTimestamp {
    fn default() -> Self {
        Self::now()
    }
}

impl fmt::Display for HybridTimestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.wall_time, self.logical)
    }
}

impl PartialOrd for HybridTimestamp {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HybridTimestamp {
    fn cmp(&self, other: &Self) -> Ordering {
        match self.wall_time.cmp(&other.wall_time) {
            Ordering::Equal => self.logical.cmp(&other.logical),
            other => other,
        }
    }
}
