//! Domain models for the local library catalog
//!
//! Every synced entity class shares one [`LibraryEntity`] shape; what differs
//! per class lives in `attributes` and in the relationship edges. Playlists
//! and sync epochs have dedicated types because their invariants (item order,
//! completion state) are richer than a bag of fields.

use bridge_traits::{EntityKind, EntityRef};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use uuid::Uuid;

use crate::error::{LibraryError, Result};

// =============================================================================
// ID Types
// =============================================================================

/// Sequence number of a sync epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EpochId(pub u32);

impl fmt::Display for EpochId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Local identifier for a playlist
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PlaylistId(pub Uuid);

impl PlaylistId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_string(s: &str) -> std::result::Result<Self, uuid::Error> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

impl Default for PlaylistId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for PlaylistId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// =============================================================================
// Sync Epoch
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EpochState {
    #[default]
    Pending,
    Done,
}

/// Marker written once per full sync.
///
/// Entities touched by a sync reference the epoch by id. Once marked done an
/// epoch is immutable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncEpoch {
    pub id: EpochId,
    pub state: EpochState,
    /// Server-reported "last changed" timestamps per class.
    pub change_dates: BTreeMap<EntityKind, DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl SyncEpoch {
    pub fn new(
        id: EpochId,
        change_dates: BTreeMap<EntityKind, DateTime<Utc>>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            state: EpochState::Pending,
            change_dates,
            created_at,
        }
    }

    pub fn is_done(&self) -> bool {
        self.state == EpochState::Done
    }

    pub fn mark_done(&mut self) -> Result<()> {
        if self.is_done() {
            return Err(LibraryError::InvalidInput {
                field: "SyncEpoch".to_string(),
                message: format!("Epoch {} is already done", self.id),
            });
        }
        self.state = EpochState::Done;
        Ok(())
    }
}

// =============================================================================
// Library Entity
// =============================================================================

/// One synced entity (artist, album, song, genre, podcast, episode,
/// directory or music folder).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LibraryEntity {
    pub kind: EntityKind,
    /// Remote-assigned id, unique within `kind`.
    pub id: String,
    pub name: String,
    /// Epoch of the last sync that touched this entity.
    pub epoch: Option<EpochId>,
    pub attributes: BTreeMap<String, String>,
    /// At most one parent per parent class.
    pub parents: BTreeMap<EntityKind, String>,
    pub children: BTreeMap<EntityKind, BTreeSet<String>>,
    /// Whether the backing file is available locally.
    pub is_cached: bool,
}

impl LibraryEntity {
    pub fn new(kind: EntityKind, id: impl Into<String>) -> Self {
        Self {
            kind,
            id: id.into(),
            name: String::new(),
            epoch: None,
            attributes: BTreeMap::new(),
            parents: BTreeMap::new(),
            children: BTreeMap::new(),
            is_cached: false,
        }
    }

    pub fn entity_ref(&self) -> EntityRef {
        EntityRef::new(self.kind, self.id.clone())
    }

    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(String::as_str)
    }

    pub fn parent(&self, kind: EntityKind) -> Option<&str> {
        self.parents.get(&kind).map(String::as_str)
    }

    pub fn child_ids(&self, kind: EntityKind) -> impl Iterator<Item = &str> {
        self.children
            .get(&kind)
            .into_iter()
            .flat_map(|ids| ids.iter().map(String::as_str))
    }

    pub fn has_child(&self, child: &EntityRef) -> bool {
        self.children
            .get(&child.kind)
            .is_some_and(|ids| ids.contains(&child.id))
    }

    /// Returns `false` when the edge already existed.
    pub fn attach_child(&mut self, child: &EntityRef) -> bool {
        self.children
            .entry(child.kind)
            .or_default()
            .insert(child.id.clone())
    }

    pub fn detach_child(&mut self, child: &EntityRef) -> bool {
        let Some(ids) = self.children.get_mut(&child.kind) else {
            return false;
        };
        let removed = ids.remove(&child.id);
        if ids.is_empty() {
            self.children.remove(&child.kind);
        }
        removed
    }
}

// =============================================================================
// Playlists
// =============================================================================

/// Reference from a playlist item to a song or podcast episode.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PlayableRef {
    pub kind: EntityKind,
    pub id: String,
}

impl PlayableRef {
    pub fn song(id: impl Into<String>) -> Self {
        Self {
            kind: EntityKind::Song,
            id: id.into(),
        }
    }

    pub fn episode(id: impl Into<String>) -> Self {
        Self {
            kind: EntityKind::PodcastEpisode,
            id: id.into(),
        }
    }

    pub fn matches(&self, entity: &EntityRef) -> bool {
        self.kind == entity.kind && self.id == entity.id
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaylistItem {
    pub order: u32,
    /// `None` once the referenced entity was deleted locally.
    pub playable: Option<PlayableRef>,
}

impl PlaylistItem {
    pub fn new(order: u32, playable: Option<PlayableRef>) -> Self {
        Self { order, playable }
    }
}

/// Ordered playlist.
///
/// Items are kept sorted by `order`; the position in [`Playlist::items`] is
/// the item's index. The order operations live in [`crate::playlist`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Playlist {
    pub id: PlaylistId,
    /// Server id; empty until the playlist exists remotely.
    pub remote_id: String,
    pub name: String,
    #[serde(deserialize_with = "deserialize_sorted_items")]
    pub(crate) items: Vec<PlaylistItem>,
    /// Count last reported by the server, display only.
    pub remote_song_count: usize,
    pub changed_since_sync: bool,
    pub updated_at: DateTime<Utc>,
}

pub const SMART_PLAYLIST_ID_PREFIX: &str = "smart_";

impl Playlist {
    /// A playlist that does not exist on the server yet.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: PlaylistId::new(),
            remote_id: String::new(),
            name: name.into(),
            items: Vec::new(),
            remote_song_count: 0,
            changed_since_sync: false,
            updated_at: Utc::now(),
        }
    }

    pub fn with_remote_id(mut self, remote_id: impl Into<String>) -> Self {
        self.remote_id = remote_id.into();
        self
    }

    /// Rebuild a playlist from stored items, which may carry inconsistent
    /// orders; see [`Playlist::ensure_consistent_item_order`].
    pub fn with_items(mut self, mut items: Vec<PlaylistItem>) -> Self {
        items.sort_by_key(|item| item.order);
        self.items = items;
        self
    }

    pub fn items(&self) -> &[PlaylistItem] {
        &self.items
    }

    /// Always equals the item count.
    pub fn song_count(&self) -> usize {
        self.items.len()
    }

    pub fn is_smart_playlist(&self) -> bool {
        self.remote_id.starts_with(SMART_PLAYLIST_ID_PREFIX)
    }

    pub fn exists_remotely(&self) -> bool {
        !self.remote_id.is_empty()
    }

    /// Ids of all referenced playables (songs and episodes) in playlist
    /// order, skipping dangling items.
    pub fn playable_ids(&self) -> Vec<String> {
        self.items
            .iter()
            .filter_map(|item| item.playable.as_ref().map(|p| p.id.clone()))
            .collect()
    }

    /// Ids of the referenced songs only, in playlist order.
    pub fn song_ids(&self) -> Vec<String> {
        self.items
            .iter()
            .filter_map(|item| item.playable.as_ref())
            .filter(|p| p.kind == EntityKind::Song)
            .map(|p| p.id.clone())
            .collect()
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

fn deserialize_sorted_items<'de, D>(deserializer: D) -> std::result::Result<Vec<PlaylistItem>, D::Error>
where
    D: Deserializer<'de>,
{
    let mut items = Vec::<PlaylistItem>::deserialize(deserializer)?;
    items.sort_by_key(|item| item.order);
    Ok(items)
}
