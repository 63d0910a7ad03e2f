use crate::Syncable;
use serde::{Deserialize, Serialize};
use wordtrail_types::{EntityId, EntityKind};

/// A vocabulary word collected from a book.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VocabWord {
    pub id: EntityId,
    /// The book this word was collected from.
    pub book_id: EntityId,
    pub term: String,
    pub definition: String,
    pub phonetic: Option<String>,
    /// The sentence the word was first encountered in.
    pub example: Option<String>,
    pub mastered: bool,
    /// How many times the user has looked this word up.
    pub lookup_count: u32,
}

impl VocabWord {
    /// Creates a new word under a book, with a fresh client-assigned id.
    pub fn new(book_id: EntityId, term: impl Into<String>, definition: impl Into<String>) -> Self {
        Self {
            id: EntityId::new(),
            book_id,
            term: term.into(),
            definition: definition.into(),
            phonetic: None,
            example: None,
            mastered: false,
            lookup_count: 0,
        }
    }

    pub fn with_phonetic(mut self, phonetic: impl Into<String>) -> Self {
        self.phonetic = Some(phonetic.into());
        self
    }

    pub fn with_example(mut self, example: impl Into<String>) -> Self {
        self.example = Some(example.into());
        self
    }
}

impl Syncable for VocabWord {
    const KIND: EntityKind = EntityKind::VocabWord;

    fn id(&self) -> EntityId {
        self.id
    }

    fn parent_id(&self) -> Option<EntityId> {
        Some(self.book_id)
    }
}
