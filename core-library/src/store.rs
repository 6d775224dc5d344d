//! # Library Store
//!
//! Durable store contract and the isolated unit of work used by sync workers.
//!
//! ## Overview
//!
//! - [`LibraryStore`] is the storage engine seen from the engine: point reads
//!   and one transactional [`apply`](LibraryStore::apply) per commit.
//! - [`StoreContext`] is a private working copy. Concurrent page workers each
//!   own one, read through it, stage writes, and `commit()` at the end. Reads
//!   see the context's own staged writes first.
//! - Commits send [`EntityPatch`]es (field-level diffs against the version the
//!   context first read), so two workers attaching different children to the
//!   same parent both survive. The last writer wins per field.
//!
//! ## Usage
//!
//! ```ignore
//! let mut ctx = StoreContext::new(store.clone());
//! let mut artist = match ctx.find_by_id(EntityKind::Artist, "ar1").await? {
//!     Some(artist) => artist,
//!     None => ctx.create(EntityKind::Artist, "ar1").await?,
//! };
//! artist.name = "Nina Simone".to_string();
//! ctx.stage(artist).await?;
//! let summary = ctx.commit().await?;
//! ```

use async_trait::async_trait;
use bridge_traits::{EntityKind, EntityRef};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, instrument};

use crate::error::{LibraryError, Result};
use crate::models::{
    EpochId, LibraryEntity, PlayableRef, Playlist, PlaylistId, SyncEpoch,
};

// =============================================================================
// Change Set
// =============================================================================

/// Field-level difference between two versions of one entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityPatch {
    pub entity: EntityRef,
    /// The entity did not exist when the context first looked.
    pub created: bool,
    pub name: Option<String>,
    pub epoch: Option<EpochId>,
    pub is_cached: Option<bool>,
    pub set_attributes: BTreeMap<String, String>,
    pub removed_attributes: BTreeSet<String>,
    pub set_parents: BTreeMap<EntityKind, String>,
    pub cleared_parents: BTreeSet<EntityKind>,
    pub added_children: BTreeSet<EntityRef>,
    pub removed_children: BTreeSet<EntityRef>,
}

impl EntityPatch {
    fn empty(entity: EntityRef, created: bool) -> Self {
        Self {
            entity,
            created,
            name: None,
            epoch: None,
            is_cached: None,
            set_attributes: BTreeMap::new(),
            removed_attributes: BTreeSet::new(),
            set_parents: BTreeMap::new(),
            cleared_parents: BTreeSet::new(),
            added_children: BTreeSet::new(),
            removed_children: BTreeSet::new(),
        }
    }

    /// Diff `current` against `base`; `None` when nothing changed. A missing
    /// base produces a creation patch.
    pub fn diff(base: Option<&LibraryEntity>, current: &LibraryEntity) -> Option<Self> {
        let blank;
        let (base, created) = match base {
            Some(base) => (base, false),
            None => {
                blank = LibraryEntity::new(current.kind, current.id.clone());
                (&blank, true)
            }
        };

        let mut patch = Self::empty(current.entity_ref(), created);

        if base.name != current.name {
            patch.name = Some(current.name.clone());
        }
        if base.epoch != current.epoch {
            patch.epoch = current.epoch;
        }
        if base.is_cached != current.is_cached {
            patch.is_cached = Some(current.is_cached);
        }

        for (key, value) in &current.attributes {
            if base.attributes.get(key) != Some(value) {
                patch.set_attributes.insert(key.clone(), value.clone());
            }
        }
        for key in base.attributes.keys() {
            if !current.attributes.contains_key(key) {
                patch.removed_attributes.insert(key.clone());
            }
        }

        for (kind, id) in &current.parents {
            if base.parents.get(kind) != Some(id) {
                patch.set_parents.insert(*kind, id.clone());
            }
        }
        for kind in base.parents.keys() {
            if !current.parents.contains_key(kind) {
                patch.cleared_parents.insert(*kind);
            }
        }

        let base_children = child_refs(base);
        let current_children = child_refs(current);
        patch.added_children = current_children
            .difference(&base_children)
            .cloned()
            .collect();
        patch.removed_children = base_children
            .difference(&current_children)
            .cloned()
            .collect();

        if patch.created || !patch.is_noop() {
            Some(patch)
        } else {
            None
        }
    }

    fn is_noop(&self) -> bool {
        self.name.is_none()
            && self.epoch.is_none()
            && self.is_cached.is_none()
            && self.set_attributes.is_empty()
            && self.removed_attributes.is_empty()
            && self.set_parents.is_empty()
            && self.cleared_parents.is_empty()
            && self.added_children.is_empty()
            && self.removed_children.is_empty()
    }

    /// Apply the patch to `target`, field by field.
    pub fn apply_to(&self, target: &mut LibraryEntity) {
        if let Some(name) = &self.name {
            target.name = name.clone();
        }
        if let Some(epoch) = self.epoch {
            target.epoch = Some(epoch);
        }
        if let Some(is_cached) = self.is_cached {
            target.is_cached = is_cached;
        }
        for (key, value) in &self.set_attributes {
            target.attributes.insert(key.clone(), value.clone());
        }
        for key in &self.removed_attributes {
            target.attributes.remove(key);
        }
        for (kind, id) in &self.set_parents {
            target.parents.insert(*kind, id.clone());
        }
        for kind in &self.cleared_parents {
            target.parents.remove(kind);
        }
        for child in &self.added_children {
            target.attach_child(child);
        }
        for child in &self.removed_children {
            target.detach_child(child);
        }
    }
}

fn child_refs(entity: &LibraryEntity) -> BTreeSet<EntityRef> {
    entity
        .children
        .iter()
        .flat_map(|(kind, ids)| ids.iter().map(|id| EntityRef::new(*kind, id.clone())))
        .collect()
}

/// Everything one unit of work commits.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeSet {
    pub upserts: Vec<EntityPatch>,
    pub deletions: Vec<EntityRef>,
    pub playlists: Vec<Playlist>,
    pub deleted_playlists: Vec<PlaylistId>,
    pub epochs: Vec<SyncEpoch>,
}

impl ChangeSet {
    pub fn is_empty(&self) -> bool {
        self.upserts.is_empty()
            && self.deletions.is_empty()
            && self.playlists.is_empty()
            && self.deleted_playlists.is_empty()
            && self.epochs.is_empty()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitSummary {
    pub created: usize,
    pub updated: usize,
    pub deleted: usize,
    pub playlists_saved: usize,
    pub playlists_deleted: usize,
    pub epochs_saved: usize,
}

impl CommitSummary {
    pub fn merge(&mut self, other: CommitSummary) {
        self.created += other.created;
        self.updated += other.updated;
        self.deleted += other.deleted;
        self.playlists_saved += other.playlists_saved;
        self.playlists_deleted += other.playlists_deleted;
        self.epochs_saved += other.epochs_saved;
    }
}

// =============================================================================
// Store Contract
// =============================================================================

/// Durable catalog storage.
///
/// `apply` must be atomic: either the whole change set lands or none of it.
#[async_trait]
pub trait LibraryStore: Send + Sync {
    async fn load_entity(&self, kind: EntityKind, id: &str) -> Result<Option<LibraryEntity>>;

    async fn load_entities(&self, kind: EntityKind) -> Result<Vec<LibraryEntity>>;

    async fn load_playlist(&self, id: PlaylistId) -> Result<Option<Playlist>>;

    async fn find_playlist_by_remote_id(&self, remote_id: &str) -> Result<Option<Playlist>>;

    async fn load_playlists(&self) -> Result<Vec<Playlist>>;

    /// All epochs, ascending by id.
    async fn load_epochs(&self) -> Result<Vec<SyncEpoch>>;

    async fn apply(&self, changes: ChangeSet) -> Result<CommitSummary>;
}

// =============================================================================
// Unit of Work
// =============================================================================

/// Isolated working copy over a [`LibraryStore`].
///
/// Owned by exactly one task; nothing is visible to other contexts until
/// [`commit`](StoreContext::commit).
pub struct StoreContext {
    store: Arc<dyn LibraryStore>,
    /// Version first read from the store (`None` = did not exist).
    base: HashMap<EntityRef, Option<LibraryEntity>>,
    staged: HashMap<EntityRef, LibraryEntity>,
    deleted: BTreeSet<EntityRef>,
    playlists: HashMap<PlaylistId, Playlist>,
    deleted_playlists: BTreeSet<PlaylistId>,
    epochs: BTreeMap<EpochId, SyncEpoch>,
}

impl StoreContext {
    pub fn new(store: Arc<dyn LibraryStore>) -> Self {
        Self {
            store,
            base: HashMap::new(),
            staged: HashMap::new(),
            deleted: BTreeSet::new(),
            playlists: HashMap::new(),
            deleted_playlists: BTreeSet::new(),
            epochs: BTreeMap::new(),
        }
    }

    pub fn store(&self) -> &Arc<dyn LibraryStore> {
        &self.store
    }

    async fn load_base(&mut self, entity: &EntityRef) -> Result<Option<LibraryEntity>> {
        if let Some(base) = self.base.get(entity) {
            return Ok(base.clone());
        }
        let loaded = self.store.load_entity(entity.kind, &entity.id).await?;
        self.base.insert(entity.clone(), loaded.clone());
        Ok(loaded)
    }

    /// Look an entity up by class and remote id.
    pub async fn find_by_id(&mut self, kind: EntityKind, id: &str) -> Result<Option<LibraryEntity>> {
        let entity = EntityRef::new(kind, id);
        if self.deleted.contains(&entity) {
            return Ok(None);
        }
        if let Some(staged) = self.staged.get(&entity) {
            return Ok(Some(staged.clone()));
        }
        self.load_base(&entity).await
    }

    /// Create and stage a new entity. Fails if one with the same id exists,
    /// so callers look up first.
    pub async fn create(&mut self, kind: EntityKind, id: &str) -> Result<LibraryEntity> {
        if self.find_by_id(kind, id).await?.is_some() {
            return Err(LibraryError::InvalidInput {
                field: kind.to_string(),
                message: format!("Entity {} already exists", id),
            });
        }
        let entity = LibraryEntity::new(kind, id);
        let key = entity.entity_ref();
        self.deleted.remove(&key);
        self.staged.insert(key, entity.clone());
        Ok(entity)
    }

    /// Stage a new version of an entity (upsert).
    pub async fn stage(&mut self, entity: LibraryEntity) -> Result<()> {
        let key = entity.entity_ref();
        self.load_base(&key).await?;
        self.deleted.remove(&key);
        self.staged.insert(key, entity);
        Ok(())
    }

    /// Delete an entity, detaching it from its parents and children and
    /// nulling playlist items that reference it.
    pub async fn delete(&mut self, kind: EntityKind, id: &str) -> Result<bool> {
        let Some(entity) = self.find_by_id(kind, id).await? else {
            return Ok(false);
        };
        let key = entity.entity_ref();

        for (parent_kind, parent_id) in &entity.parents {
            if let Some(mut parent) = self.find_by_id(*parent_kind, parent_id).await? {
                if parent.detach_child(&key) {
                    self.stage(parent).await?;
                }
            }
        }
        for (child_kind, child_ids) in &entity.children {
            for child_id in child_ids {
                if let Some(mut child) = self.find_by_id(*child_kind, child_id).await? {
                    if child.parent(kind) == Some(id) {
                        child.parents.remove(&kind);
                        self.stage(child).await?;
                    }
                }
            }
        }

        if kind.is_playable() {
            let playable = PlayableRef {
                kind,
                id: id.to_string(),
            };
            for playlist in self.playlists.values_mut() {
                playlist.detach_playable(&playable);
            }
        }

        self.staged.remove(&key);
        self.deleted.insert(key);
        Ok(true)
    }

    /// All entities of `kind` as this context sees them.
    pub async fn entities(&mut self, kind: EntityKind) -> Result<Vec<LibraryEntity>> {
        let mut merged: BTreeMap<String, LibraryEntity> = self
            .store
            .load_entities(kind)
            .await?
            .into_iter()
            .map(|entity| (entity.id.clone(), entity))
            .collect();
        for (key, entity) in &self.staged {
            if key.kind == kind {
                merged.insert(key.id.clone(), entity.clone());
            }
        }
        for key in &self.deleted {
            if key.kind == kind {
                merged.remove(&key.id);
            }
        }
        Ok(merged.into_values().collect())
    }

    pub async fn playlist(&mut self, id: PlaylistId) -> Result<Option<Playlist>> {
        if self.deleted_playlists.contains(&id) {
            return Ok(None);
        }
        if let Some(playlist) = self.playlists.get(&id) {
            return Ok(Some(playlist.clone()));
        }
        self.store.load_playlist(id).await
    }

    pub async fn playlist_by_remote_id(&mut self, remote_id: &str) -> Result<Option<Playlist>> {
        if let Some(playlist) = self
            .playlists
            .values()
            .find(|playlist| playlist.remote_id == remote_id)
        {
            return Ok(Some(playlist.clone()));
        }
        match self.store.find_playlist_by_remote_id(remote_id).await? {
            Some(playlist) if !self.deleted_playlists.contains(&playlist.id) => Ok(Some(playlist)),
            _ => Ok(None),
        }
    }

    pub async fn playlists(&mut self) -> Result<Vec<Playlist>> {
        let mut merged: BTreeMap<PlaylistId, Playlist> = self
            .store
            .load_playlists()
            .await?
            .into_iter()
            .map(|playlist| (playlist.id, playlist))
            .collect();
        for (id, playlist) in &self.playlists {
            merged.insert(*id, playlist.clone());
        }
        for id in &self.deleted_playlists {
            merged.remove(id);
        }
        Ok(merged.into_values().collect())
    }

    pub fn save_playlist(&mut self, playlist: Playlist) {
        self.deleted_playlists.remove(&playlist.id);
        self.playlists.insert(playlist.id, playlist);
    }

    pub fn delete_playlist(&mut self, id: PlaylistId) {
        self.playlists.remove(&id);
        self.deleted_playlists.insert(id);
    }

    async fn all_epochs(&self) -> Result<BTreeMap<EpochId, SyncEpoch>> {
        let mut epochs: BTreeMap<EpochId, SyncEpoch> = self
            .store
            .load_epochs()
            .await?
            .into_iter()
            .map(|epoch| (epoch.id, epoch))
            .collect();
        for (id, epoch) in &self.epochs {
            epochs.insert(*id, epoch.clone());
        }
        Ok(epochs)
    }

    /// Open a new epoch whose id is the number of epochs before it.
    pub async fn create_epoch(
        &mut self,
        change_dates: BTreeMap<EntityKind, chrono::DateTime<chrono::Utc>>,
        created_at: chrono::DateTime<chrono::Utc>,
    ) -> Result<SyncEpoch> {
        let prior = self.all_epochs().await?.len();
        let id = u32::try_from(prior).map_err(|_| {
            LibraryError::Persistence(format!("Epoch counter overflow after {} epochs", prior))
        })?;
        let epoch = SyncEpoch::new(EpochId(id), change_dates, created_at);
        self.epochs.insert(epoch.id, epoch.clone());
        Ok(epoch)
    }

    pub async fn latest_epoch(&self) -> Result<Option<SyncEpoch>> {
        Ok(self.all_epochs().await?.into_values().next_back())
    }

    pub fn save_epoch(&mut self, epoch: SyncEpoch) {
        self.epochs.insert(epoch.id, epoch);
    }

    pub fn has_changes(&self) -> bool {
        !self.staged.is_empty()
            || !self.deleted.is_empty()
            || !self.playlists.is_empty()
            || !self.deleted_playlists.is_empty()
            || !self.epochs.is_empty()
    }

    /// Send every staged change to the store in one transaction.
    #[instrument(skip(self), fields(staged = self.staged.len(), deleted = self.deleted.len()))]
    pub async fn commit(self) -> Result<CommitSummary> {
        let mut changes = ChangeSet::default();

        for (key, entity) in &self.staged {
            let base = self.base.get(key).and_then(Option::as_ref);
            if let Some(patch) = EntityPatch::diff(base, entity) {
                changes.upserts.push(patch);
            }
        }
        changes.upserts.sort_by(|a, b| a.entity.cmp(&b.entity));
        changes.deletions = self.deleted.into_iter().collect();
        changes.playlists = self.playlists.into_values().collect();
        changes.deleted_playlists = self.deleted_playlists.into_iter().collect();
        changes.epochs = self.epochs.into_values().collect();

        if changes.is_empty() {
            debug!("Nothing to commit");
            return Ok(CommitSummary::default());
        }
        self.store.apply(changes).await
    }
}

// =============================================================================
// In-memory Store
// =============================================================================

#[derive(Debug, Default, Serialize, Deserialize)]
struct Snapshot {
    entities: Vec<LibraryEntity>,
    playlists: Vec<Playlist>,
    epochs: Vec<SyncEpoch>,
}

#[derive(Debug, Default)]
struct MemoryState {
    entities: HashMap<EntityRef, LibraryEntity>,
    playlists: BTreeMap<PlaylistId, Playlist>,
    epochs: BTreeMap<EpochId, SyncEpoch>,
}

impl MemoryState {
    fn remove_entity(&mut self, key: &EntityRef) -> bool {
        let Some(entity) = self.entities.remove(key) else {
            return false;
        };
        for (parent_kind, parent_id) in &entity.parents {
            if let Some(parent) = self
                .entities
                .get_mut(&EntityRef::new(*parent_kind, parent_id.clone()))
            {
                parent.detach_child(key);
            }
        }
        for (child_kind, child_ids) in &entity.children {
            for child_id in child_ids {
                if let Some(child) = self
                    .entities
                    .get_mut(&EntityRef::new(*child_kind, child_id.clone()))
                {
                    if child.parent(key.kind) == Some(key.id.as_str()) {
                        child.parents.remove(&key.kind);
                    }
                }
            }
        }
        if key.kind.is_playable() {
            let playable = PlayableRef {
                kind: key.kind,
                id: key.id.clone(),
            };
            for playlist in self.playlists.values_mut() {
                playlist.detach_playable(&playable);
            }
        }
        true
    }

    fn check_epochs(&self, epochs: &[SyncEpoch]) -> Result<()> {
        for epoch in epochs {
            if let Some(stored) = self.epochs.get(&epoch.id) {
                if stored.is_done() && stored != epoch {
                    return Err(LibraryError::InvalidInput {
                        field: "SyncEpoch".to_string(),
                        message: format!("Epoch {} is done and cannot change", epoch.id),
                    });
                }
            }
        }
        Ok(())
    }
}

/// Reference [`LibraryStore`] keeping the catalog in memory, with JSON
/// snapshot persistence.
#[derive(Debug, Default)]
pub struct MemoryLibraryStore {
    state: RwLock<MemoryState>,
}

impl MemoryLibraryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn entity_count(&self, kind: EntityKind) -> usize {
        self.state
            .read()
            .await
            .entities
            .keys()
            .filter(|key| key.kind == kind)
            .count()
    }

    /// Write the whole catalog to `path` as JSON.
    pub async fn save_json(&self, path: impl AsRef<Path>) -> Result<()> {
        let snapshot = {
            let state = self.state.read().await;
            let mut entities: Vec<LibraryEntity> = state.entities.values().cloned().collect();
            entities.sort_by(|a, b| (a.kind, &a.id).cmp(&(b.kind, &b.id)));
            Snapshot {
                entities,
                playlists: state.playlists.values().cloned().collect(),
                epochs: state.epochs.values().cloned().collect(),
            }
        };
        let json = serde_json::to_vec_pretty(&snapshot)?;
        tokio::fs::write(path, json).await?;
        Ok(())
    }

    pub async fn load_json(path: impl AsRef<Path>) -> Result<Self> {
        let bytes = tokio::fs::read(path).await?;
        let snapshot: Snapshot = serde_json::from_slice(&bytes)?;
        let state = MemoryState {
            entities: snapshot
                .entities
                .into_iter()
                .map(|entity| (entity.entity_ref(), entity))
                .collect(),
            playlists: snapshot
                .playlists
                .into_iter()
                .map(|playlist| (playlist.id, playlist))
                .collect(),
            epochs: snapshot
                .epochs
                .into_iter()
                .map(|epoch| (epoch.id, epoch))
                .collect(),
        };
        Ok(Self {
            state: RwLock::new(state),
        })
    }
}

#[async_trait]
impl LibraryStore for MemoryLibraryStore {
    async fn load_entity(&self, kind: EntityKind, id: &str) -> Result<Option<LibraryEntity>> {
        Ok(self
            .state
            .read()
            .await
            .entities
            .get(&EntityRef::new(kind, id))
            .cloned())
    }

    async fn load_entities(&self, kind: EntityKind) -> Result<Vec<LibraryEntity>> {
        let state = self.state.read().await;
        let mut entities: Vec<LibraryEntity> = state
            .entities
            .values()
            .filter(|entity| entity.kind == kind)
            .cloned()
            .collect();
        entities.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(entities)
    }

    async fn load_playlist(&self, id: PlaylistId) -> Result<Option<Playlist>> {
        Ok(self.state.read().await.playlists.get(&id).cloned())
    }

    async fn find_playlist_by_remote_id(&self, remote_id: &str) -> Result<Option<Playlist>> {
        if remote_id.is_empty() {
            return Ok(None);
        }
        Ok(self
            .state
            .read()
            .await
            .playlists
            .values()
            .find(|playlist| playlist.remote_id == remote_id)
            .cloned())
    }

    async fn load_playlists(&self) -> Result<Vec<Playlist>> {
        Ok(self.state.read().await.playlists.values().cloned().collect())
    }

    async fn load_epochs(&self) -> Result<Vec<SyncEpoch>> {
        Ok(self.state.read().await.epochs.values().cloned().collect())
    }

    async fn apply(&self, changes: ChangeSet) -> Result<CommitSummary> {
        let mut state = self.state.write().await;
        state.check_epochs(&changes.epochs)?;

        let mut summary = CommitSummary::default();

        for patch in &changes.upserts {
            match state.entities.get_mut(&patch.entity) {
                Some(existing) => {
                    patch.apply_to(existing);
                    summary.updated += 1;
                }
                None if patch.created => {
                    let mut entity =
                        LibraryEntity::new(patch.entity.kind, patch.entity.id.clone());
                    patch.apply_to(&mut entity);
                    state.entities.insert(patch.entity.clone(), entity);
                    summary.created += 1;
                }
                None => {
                    debug!(entity = %patch.entity, "Dropping patch for entity deleted concurrently");
                }
            }
        }

        for key in &changes.deletions {
            if state.remove_entity(key) {
                summary.deleted += 1;
            }
        }

        for playlist in changes.playlists {
            state.playlists.insert(playlist.id, playlist);
            summary.playlists_saved += 1;
        }
        for id in &changes.deleted_playlists {
            if state.playlists.remove(id).is_some() {
                summary.playlists_deleted += 1;
            }
        }

        for epoch in changes.epochs {
            state.epochs.insert(epoch.id, epoch);
            summary.epochs_saved += 1;
        }

        Ok(summary)
    }
}
