//! Per-class reconciliation rules.
//!
//! One generic reconciler serves every entity class; what differs between
//! classes (where the display name comes from, whether it is mandatory, what
//! happens to a child that vanished from its parent) is looked up here.

use bridge_traits::{EntityKind, RemoteRecord};
use core_library::LibraryEntity;

/// Keys tried, in order, for an entity's display name.
const NAME_KEYS: &[&str] = &["name", "title"];

/// What happens to a child that disappeared from its parent's listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemovalAction {
    /// Delete the entity from the store.
    Delete,
    /// Only cut the edge; the entity stays in the library.
    Detach,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntityDescriptor {
    pub kind: EntityKind,
    pub name_keys: &'static [&'static str],
    /// Records without a name are malformed and skipped.
    pub name_required: bool,
    pub removal: RemovalAction,
}

impl EntityDescriptor {
    pub fn for_kind(kind: EntityKind) -> Self {
        let (name_required, removal) = match kind {
            EntityKind::Directory => (false, RemovalAction::Delete),
            EntityKind::MusicFolder => (false, RemovalAction::Delete),
            EntityKind::PodcastEpisode => (true, RemovalAction::Delete),
            EntityKind::Genre
            | EntityKind::Artist
            | EntityKind::Album
            | EntityKind::Song
            | EntityKind::Playlist
            | EntityKind::Podcast => (true, RemovalAction::Detach),
        };
        Self {
            kind,
            name_keys: NAME_KEYS,
            name_required,
            removal,
        }
    }

    /// First non-blank name field of `record`.
    pub fn name_of<'a>(&self, record: &'a RemoteRecord) -> Option<&'a str> {
        self.name_keys
            .iter()
            .filter_map(|key| record.field(key))
            .map(str::trim)
            .find(|name| !name.is_empty())
    }

    /// Copy the record's scalar fields onto `entity`.
    ///
    /// Attributes are replaced wholesale, so fields the server stopped
    /// reporting disappear and applying the same record twice is a no-op.
    pub fn apply_fields(&self, entity: &mut LibraryEntity, name: &str, record: &RemoteRecord) {
        entity.name = name.to_string();
        entity.attributes = record
            .fields
            .iter()
            .filter(|(key, _)| !self.name_keys.contains(&key.as_str()))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();
    }
}
