use crate::Syncable;
use serde::{Deserialize, Serialize};
use wordtrail_types::{EntityId, EntityKind};

/// The user's profile. One record per owner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: EntityId,
    pub display_name: String,
    pub email: Option<String>,
    /// Words-per-day learning goal.
    pub daily_goal: u32,
}

impl UserProfile {
    pub fn new(display_name: impl Into<String>) -> Self {
        Self {
            id: EntityId::new(),
            display_name: display_name.into(),
            email: None,
            daily_goal: 10,
        }
    }
}

impl Syncable for UserProfile {
    const KIND: EntityKind = EntityKind::UserProfile;

    fn id(&self) -> EntityId {
        self.id
    }
}
