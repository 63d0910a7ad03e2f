//! Entity kinds and pending sync operations.
//!
//! Every synchronized record is one of four kinds. Kinds carry a drain rank
//! so that when the change queue is flushed, parent records reach the remote
//! before their children (a vocabulary word insert would otherwise violate
//! the remote's foreign-key constraint on its book).

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The kind of a synchronized record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Book,
    VocabWord,
    UserProfile,
    UserSettings,
}

impl EntityKind {
    /// All kinds, in drain order.
    pub const ALL: [EntityKind; 4] = [
        EntityKind::Book,
        EntityKind::VocabWord,
        EntityKind::UserProfile,
        EntityKind::UserSettings,
    ];

    /// Position of this kind in a drain pass. Parents sort before children;
    /// unrelated kinds just need a stable order.
    #[must_use]
    pub const fn drain_rank(&self) -> u8 {
        match self {
            EntityKind::Book => 0,
            EntityKind::VocabWord => 1,
            EntityKind::UserProfile => 2,
            EntityKind::UserSettings => 3,
        }
    }

    /// The kind this kind's records are nested under, if any.
    #[must_use]
    pub const fn parent_kind(&self) -> Option<EntityKind> {
        match self {
            EntityKind::VocabWord => Some(EntityKind::Book),
            _ => None,
        }
    }

    /// Stable string form, used as the storage and wire representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Book => "book",
            EntityKind::VocabWord => "vocab_word",
            EntityKind::UserProfile => "user_profile",
            EntityKind::UserSettings => "user_settings",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityKind {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "book" => Ok(EntityKind::Book),
            "vocab_word" => Ok(EntityKind::VocabWord),
            "user_profile" => Ok(EntityKind::UserProfile),
            "user_settings" => Ok(EntityKind::UserSettings),
            other => Err(crate::Error::UnknownKind(other.to_string())),
        }
    }
}

/// The next operation to push for a record, derived from its dirty state.
///
/// There is no separate operation log: a record's pending op collapses as it
/// is edited. Repeated edits stay a single `Update`; edits on top of an
/// unsynced `Insert` stay an `Insert` carrying the latest values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PendingOp {
    /// Nothing to push.
    None,
    /// Record was created locally and the remote has never seen it.
    Insert,
    /// Record exists remotely and has local edits.
    Update,
    /// Record was deleted locally; the tombstone is kept until confirmed.
    Delete,
}

impl PendingOp {
    /// Stable string form, used as the storage and wire representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            PendingOp::None => "none",
            PendingOp::Insert => "insert",
            PendingOp::Update => "update",
            PendingOp::Delete => "delete",
        }
    }
}

impl fmt::Display for PendingOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PendingOp {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "none" => Ok(PendingOp::None),
            "insert" => Ok(PendingOp::Insert),
            "update" => Ok(PendingOp::Update),
            "delete" => Ok(PendingOp::Delete),
            other => Err(crate::Error::UnknownOp(other.to_string())),
        }
    }
}
