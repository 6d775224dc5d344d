//! Remote Catalog Record Model
//!
//! Decoded, dialect-independent shapes of what a media server returns. The
//! wire decoding (XML or JSON, per dialect) happens inside the bridge
//! implementation; the core only ever sees the types below.

use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::error::{BridgeError, Result};

/// Class of a library entity, shared by the remote and local models.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Genre,
    Artist,
    Album,
    Song,
    Playlist,
    Podcast,
    PodcastEpisode,
    Directory,
    MusicFolder,
}

impl EntityKind {
    pub const ALL: [EntityKind; 9] = [
        EntityKind::Genre,
        EntityKind::Artist,
        EntityKind::Album,
        EntityKind::Song,
        EntityKind::Playlist,
        EntityKind::Podcast,
        EntityKind::PodcastEpisode,
        EntityKind::Directory,
        EntityKind::MusicFolder,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Genre => "genre",
            EntityKind::Artist => "artist",
            EntityKind::Album => "album",
            EntityKind::Song => "song",
            EntityKind::Playlist => "playlist",
            EntityKind::Podcast => "podcast",
            EntityKind::PodcastEpisode => "podcast_episode",
            EntityKind::Directory => "directory",
            EntityKind::MusicFolder => "music_folder",
        }
    }

    /// Kinds that can sit inside a playlist.
    pub fn is_playable(&self) -> bool {
        matches!(self, EntityKind::Song | EntityKind::PodcastEpisode)
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityKind {
    type Err = BridgeError;

    fn from_str(s: &str) -> Result<Self> {
        EntityKind::ALL
            .iter()
            .copied()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| BridgeError::OperationFailed(format!("Unknown entity kind: {}", s)))
    }
}

/// Reference to a remote entity by class and server-assigned id.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EntityRef {
    pub kind: EntityKind,
    pub id: String,
}

impl EntityRef {
    pub fn new(kind: EntityKind, id: impl Into<String>) -> Self {
        Self {
            kind,
            id: id.into(),
        }
    }
}

impl fmt::Display for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.id)
    }
}

/// One decoded record as produced by the server.
///
/// `id` is optional because dialects occasionally emit elements without one;
/// such records are malformed and skipped by the reconciler.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteRecord {
    pub id: Option<String>,
    /// Scalar fields keyed by their dialect-neutral name (`name`, `title`,
    /// `duration`, `year`, ...).
    pub fields: BTreeMap<String, String>,
    /// Parents this record points at, e.g. a song's album and artist.
    pub references: BTreeMap<EntityKind, String>,
}

impl RemoteRecord {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: Some(id.into()),
            ..Default::default()
        }
    }

    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    pub fn with_reference(mut self, kind: EntityKind, id: impl Into<String>) -> Self {
        self.references.insert(kind, id.into());
        self
    }

    pub fn field(&self, key: &str) -> Option<&str> {
        self.fields.get(key).map(String::as_str)
    }

    /// The id, treating empty strings as absent.
    pub fn remote_id(&self) -> Option<&str> {
        self.id.as_deref().filter(|id| !id.is_empty())
    }
}

/// Lazily produced sequence of records for one request.
pub type RecordStream = BoxStream<'static, Result<RemoteRecord>>;

/// Library-wide metadata returned by the handshake call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LibraryMetadata {
    /// Number of entities the server reports per class.
    pub counts: BTreeMap<EntityKind, usize>,
    /// Per-class "last changed" timestamps.
    pub change_dates: BTreeMap<EntityKind, DateTime<Utc>>,
}

impl LibraryMetadata {
    /// `None` when the server did not report a count for `kind`, which is
    /// not the same as an empty class.
    pub fn count(&self, kind: EntityKind) -> Option<usize> {
        self.counts.get(&kind).copied()
    }

    pub fn with_count(mut self, kind: EntityKind, count: usize) -> Self {
        self.counts.insert(kind, count);
        self
    }

    pub fn with_change_date(mut self, kind: EntityKind, date: DateTime<Utc>) -> Self {
        self.change_dates.insert(kind, date);
        self
    }
}

/// Collection a page request is scoped to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ParentScope {
    /// The whole library.
    Library,
    /// Children of one parent entity (an artist's albums, a directory's
    /// entries, ...).
    Entity(EntityRef),
}

impl fmt::Display for ParentScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParentScope::Library => f.write_str("library"),
            ParentScope::Entity(parent) => write!(f, "{}", parent),
        }
    }
}

/// Parameters of a single fetch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRequest {
    pub kind: EntityKind,
    pub scope: ParentScope,
    pub offset: usize,
    /// `None` requests everything the scope holds.
    pub limit: Option<usize>,
}

impl PageRequest {
    pub fn page(kind: EntityKind, offset: usize, limit: usize) -> Self {
        Self {
            kind,
            scope: ParentScope::Library,
            offset,
            limit: Some(limit),
        }
    }

    pub fn all(kind: EntityKind, scope: ParentScope) -> Self {
        Self {
            kind,
            scope,
            offset: 0,
            limit: None,
        }
    }
}

/// Header information of a remote playlist.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemotePlaylist {
    pub id: String,
    pub name: String,
    pub song_count: usize,
}
