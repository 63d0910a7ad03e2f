use crate::Syncable;
use serde::{Deserialize, Serialize};
use wordtrail_types::{EntityId, EntityKind};

/// App appearance preference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Theme {
    System,
    Light,
    Dark,
}

/// The user's app settings. One record per owner, synced so preferences
/// follow the user across reinstalls.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserSettings {
    pub id: EntityId,
    pub theme: Theme,
    pub notifications_enabled: bool,
    /// Local hour (0–23) for the daily review reminder, if enabled.
    pub review_reminder_hour: Option<u8>,
    /// Speak a word aloud when its detail view opens.
    pub auto_pronounce: bool,
}

impl UserSettings {
    pub fn new() -> Self {
        Self {
            id: EntityId::new(),
            theme: Theme::System,
            notifications_enabled: true,
            review_reminder_hour: None,
            auto_pronounce: false,
        }
    }
}

impl Default for UserSettings {
    fn default() -> Self {
        Self::new()
    }
}

impl Syncable for UserSettings {
    const KIND: EntityKind = EntityKind::UserSettings;

    fn id(&self) -> EntityId {
        self.id
    }
}
