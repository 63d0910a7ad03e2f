use crate::Syncable;
use serde::{Deserialize, Serialize};
use wordtrail_types::{EntityId, EntityKind};

/// A book the user is collecting vocabulary from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Book {
    pub id: EntityId,
    pub title: String,
    pub author: Option<String>,
    pub cover_url: Option<String>,
    /// Hidden from the main shelf but kept for its words.
    pub archived: bool,
}

impl Book {
    /// Creates a new book with a fresh client-assigned id.
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            id: EntityId::new(),
            title: title.into(),
            author: None,
            cover_url: None,
            archived: false,
        }
    }

    pub fn with_author(mut self, author: impl Into<String>) -> Self {
        self.author = Some(author.into());
        self
    }

    pub fn with_cover_url(mut self, url: impl Into<String>) -> Self {
        self.cover_url = Some(url.into());
        self
    }
}

impl Syncable for Book {
    const KIND: EntityKind = EntityKind::Book;

    fn id(&self) -> EntityId {
        self.id
    }
}
