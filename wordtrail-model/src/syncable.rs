use serde::Serialize;
use serde::de::DeserializeOwned;
use wordtrail_types::{EntityId, EntityKind};

/// A domain type that can be stored and synchronized.
///
/// Implementors declare their kind and expose the identifiers the envelope
/// needs; everything else about the type is opaque JSON to the sync layer.
pub trait Syncable: Serialize + DeserializeOwned {
    /// The entity kind for this type.
    const KIND: EntityKind;

    /// The record's stable, client-assigned identifier.
    fn id(&self) -> EntityId;

    /// The parent record, for kinds nested under another (word → book).
    fn parent_id(&self) -> Option<EntityId> {
        None
    }
}
