//! # Playlist Synchronization
//!
//! Keeps local playlists and their item order aligned with the server.
//!
//! ## Overview
//!
//! - **Down**: [`PlaylistSyncer::sync_playlist`] pulls the ordered entries of
//!   one playlist, makes sure every referenced song exists locally and
//!   reconciles the items by position.
//!   [`PlaylistSyncer::sync_playlist_list`] refreshes playlist headers only.
//! - **Up**: `add_songs`, `remove_item`, `move_item`, `shuffle` and `delete`
//!   mutate the local playlist, commit it, and only then push the change.
//!   A failing remote call therefore never leaves the local order broken.
//!
//! Before any remote write the playlist's remote id is validated. A missing
//! or stale id triggers a remote create; if the server rejects it the id is
//! left empty so the next attempt creates it again. Down-syncing a playlist
//! that was never uploaded does nothing. Only song entries are pushed.

use bridge_traits::{
    EntityKind, LibraryServerApi, PageRequest, ParentScope, RemoteRecord,
};
use core_library::{
    LibraryStore, PlayableRef, Playlist, PlaylistDelta, PlaylistId, StoreContext,
};
use core_runtime::events::{CoreEvent, EventBus, LibraryEvent};
use futures::StreamExt;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

use crate::descriptor::EntityDescriptor;
use crate::error::{Result, SyncError};
use crate::reconciler::{EntityReconciler, ReconcileStats, RecordOutcome};

pub struct PlaylistSyncer {
    server: Arc<dyn LibraryServerApi>,
    store: Arc<dyn LibraryStore>,
    event_bus: Arc<EventBus>,
}

impl PlaylistSyncer {
    pub fn new(
        server: Arc<dyn LibraryServerApi>,
        store: Arc<dyn LibraryStore>,
        event_bus: Arc<EventBus>,
    ) -> Self {
        Self {
            server,
            store,
            event_bus,
        }
    }

    // =========================================================================
    // Down
    // =========================================================================

    /// Refresh playlist headers from the server without touching items.
    ///
    /// Playlists the server no longer lists are deleted locally; playlists
    /// that were never uploaded are kept.
    #[instrument(skip(self))]
    pub async fn sync_playlist_list(&self) -> Result<ReconcileStats> {
        let descriptor = EntityDescriptor::for_kind(EntityKind::Playlist);
        let mut ctx = StoreContext::new(Arc::clone(&self.store));
        let mut records = self
            .server
            .fetch_page(PageRequest::all(EntityKind::Playlist, ParentScope::Library))
            .await?;

        let mut stats = ReconcileStats::default();
        let mut seen = BTreeSet::new();
        let mut created = Vec::new();

        while let Some(record) = records.next().await {
            let record = record?;
            let (Some(remote_id), Some(name)) = (record.remote_id(), descriptor.name_of(&record))
            else {
                warn!(id = ?record.id, "Skipping malformed playlist record");
                stats.malformed += 1;
                continue;
            };
            let song_count = record
                .field("song_count")
                .and_then(|count| count.parse().ok())
                .unwrap_or(0);
            seen.insert(remote_id.to_string());

            match ctx.playlist_by_remote_id(remote_id).await? {
                Some(mut playlist) => {
                    if playlist.name == name && playlist.remote_song_count == song_count {
                        stats.unchanged += 1;
                        continue;
                    }
                    playlist.name = name.to_string();
                    playlist.remote_song_count = song_count;
                    playlist.touch();
                    ctx.save_playlist(playlist);
                    stats.updated += 1;
                }
                None => {
                    let mut playlist = Playlist::new(name).with_remote_id(remote_id);
                    playlist.remote_song_count = song_count;
                    created.push((playlist.id, playlist.name.clone()));
                    ctx.save_playlist(playlist);
                    stats.added += 1;
                }
            }
        }

        let mut deleted = Vec::new();
        for playlist in ctx.playlists().await? {
            if playlist.exists_remotely() && !seen.contains(&playlist.remote_id) {
                debug!(playlist = %playlist.id, remote_id = %playlist.remote_id, "Playlist gone from server");
                ctx.delete_playlist(playlist.id);
                deleted.push(playlist.id);
                stats.removed += 1;
            }
        }

        ctx.commit().await?;

        for (id, name) in created {
            self.emit(LibraryEvent::PlaylistCreated {
                playlist_id: id.to_string(),
                name,
            });
        }
        for id in deleted {
            self.emit(LibraryEvent::PlaylistDeleted {
                playlist_id: id.to_string(),
            });
        }
        info!(
            added = stats.added,
            updated = stats.updated,
            removed = stats.removed,
            "Playlist list synced"
        );
        Ok(stats)
    }

    /// Pull one playlist's entries and reconcile its items by position.
    ///
    /// A playlist that was never uploaded is left alone. When its remote id
    /// is stale the playlist is recreated and the local items are pushed up
    /// instead.
    #[instrument(skip(self), fields(playlist = %id))]
    pub async fn sync_playlist(&self, id: PlaylistId) -> Result<PlaylistDelta> {
        let mut ctx = StoreContext::new(Arc::clone(&self.store));
        let epoch = ctx.latest_epoch().await?.ok_or(SyncError::NoSyncEpoch)?.id;
        let mut playlist = ctx
            .playlist(id)
            .await?
            .ok_or_else(|| SyncError::PlaylistNotFound(id.to_string()))?;

        if !playlist.exists_remotely() {
            debug!("Playlist not uploaded yet, nothing to pull");
            return Ok(PlaylistDelta::default());
        }
        let (remote_id, created) = self.ensure_remote_id(&mut playlist).await?;
        if created {
            self.push_items(&remote_id, &playlist.song_ids()).await?;
            return Ok(PlaylistDelta::default());
        }

        let mut songs = EntityReconciler::new(EntityKind::Song, ParentScope::Library, epoch);
        let mut episodes =
            EntityReconciler::new(EntityKind::PodcastEpisode, ParentScope::Library, epoch);
        let mut entries = self.server.fetch_playlist_entries(&remote_id).await?;
        let mut playables = Vec::new();

        while let Some(record) = entries.next().await {
            let record = record?;
            let kind = entry_kind(&record);
            let reconciler = match kind {
                EntityKind::PodcastEpisode => &mut episodes,
                _ => &mut songs,
            };
            let playable = match reconciler.apply(&mut ctx, &record).await? {
                RecordOutcome::Malformed => None,
                _ => record.remote_id().map(|entry_id| PlayableRef {
                    kind,
                    id: entry_id.to_string(),
                }),
            };
            playables.push(playable);
        }

        playlist.ensure_consistent_item_order();
        let delta = playlist.reconcile_from_remote(playables);
        playlist.ensure_consistent_item_order();
        playlist.remote_song_count = playlist.song_count();
        ctx.save_playlist(playlist);
        ctx.commit().await?;

        info!(
            reused = delta.reused,
            created = delta.created,
            changed = delta.changed,
            removed = delta.removed,
            "Playlist items synced"
        );
        self.emit_updated(id, "synced");
        Ok(delta)
    }

    // =========================================================================
    // Up
    // =========================================================================

    /// Create a playlist locally and on the server.
    ///
    /// The local playlist is kept even when the server rejects the create.
    pub async fn create_playlist(&self, name: &str) -> Result<Playlist> {
        let name = name.trim();
        if name.is_empty() {
            return Err(SyncError::InvalidInput(
                "Playlist name must not be empty".to_string(),
            ));
        }
        let mut playlist = Playlist::new(name);
        self.save(&playlist).await?;
        self.ensure_remote_id(&mut playlist).await?;
        Ok(playlist)
    }

    #[instrument(skip(self, song_ids), fields(playlist = %id, songs = song_ids.len()))]
    pub async fn add_songs(&self, id: PlaylistId, song_ids: &[String]) -> Result<Playlist> {
        let mut playlist = self.load_writable(id).await?;
        if song_ids.is_empty() {
            return Ok(playlist);
        }
        playlist.append_all(song_ids.iter().map(PlayableRef::song));
        playlist.ensure_consistent_item_order();
        self.save(&playlist).await?;

        let (remote_id, created) = self.ensure_remote_id(&mut playlist).await?;
        if created {
            self.push_items(&remote_id, &playlist.song_ids()).await?;
        } else {
            self.push_items(&remote_id, song_ids).await?;
        }
        self.emit_updated(id, "items_added");
        Ok(playlist)
    }

    #[instrument(skip(self), fields(playlist = %id))]
    pub async fn remove_item(&self, id: PlaylistId, index: usize) -> Result<Playlist> {
        let mut playlist = self.load_writable(id).await?;
        let count = playlist.song_count();
        if playlist.remove_at(index).is_none() {
            return Err(SyncError::InvalidInput(format!(
                "Index {} out of range for playlist with {} items",
                index, count
            )));
        }
        playlist.ensure_consistent_item_order();
        self.save(&playlist).await?;

        if playlist.exists_remotely() {
            self.server
                .remove_playlist_item(&playlist.remote_id, index)
                .await?;
        }
        self.emit_updated(id, "item_removed");
        Ok(playlist)
    }

    /// Move an item; a no-op move touches neither the store nor the server.
    #[instrument(skip(self), fields(playlist = %id))]
    pub async fn move_item(&self, id: PlaylistId, from: usize, to: usize) -> Result<Playlist> {
        let mut playlist = self.load_writable(id).await?;
        if !playlist.move_item(from, to) {
            debug!(from, to, "Ignoring no-op move");
            return Ok(playlist);
        }
        self.save(&playlist).await?;
        self.push_order(&playlist).await?;
        self.emit_updated(id, "item_moved");
        Ok(playlist)
    }

    #[instrument(skip(self), fields(playlist = %id))]
    pub async fn shuffle(&self, id: PlaylistId) -> Result<Playlist> {
        let mut playlist = self.load_writable(id).await?;
        playlist.shuffle(&mut rand::thread_rng());
        playlist.ensure_consistent_item_order();
        self.save(&playlist).await?;
        self.push_order(&playlist).await?;
        self.emit_updated(id, "shuffled");
        Ok(playlist)
    }

    /// Delete remotely (when the playlist was ever uploaded), then locally.
    #[instrument(skip(self), fields(playlist = %id))]
    pub async fn delete(&self, id: PlaylistId) -> Result<()> {
        let playlist = self.load(id).await?;
        if playlist.exists_remotely() && !playlist.is_smart_playlist() {
            self.server.delete_playlist(&playlist.remote_id).await?;
        }

        let mut ctx = StoreContext::new(Arc::clone(&self.store));
        ctx.delete_playlist(id);
        ctx.commit().await?;

        info!("Playlist deleted");
        self.emit(LibraryEvent::PlaylistDeleted {
            playlist_id: id.to_string(),
        });
        Ok(())
    }

    // =========================================================================
    // Helpers
    // =========================================================================

    /// Make sure the playlist exists on the server, creating it when its id
    /// is empty or unknown. Returns the remote id and whether it was created.
    async fn ensure_remote_id(&self, playlist: &mut Playlist) -> Result<(String, bool)> {
        if playlist.is_smart_playlist() {
            return Ok((playlist.remote_id.clone(), false));
        }
        if playlist.exists_remotely() {
            if self.server.fetch_playlist(&playlist.remote_id).await?.is_some() {
                return Ok((playlist.remote_id.clone(), false));
            }
            warn!(playlist = %playlist.id, remote_id = %playlist.remote_id, "Remote playlist missing, recreating");
        }

        match self.server.create_playlist(&playlist.name).await {
            Ok(remote) => {
                playlist.remote_id = remote.id.clone();
                playlist.touch();
                self.save(playlist).await?;
                info!(playlist = %playlist.id, remote_id = %remote.id, "Playlist created on server");
                self.emit(LibraryEvent::PlaylistCreated {
                    playlist_id: playlist.id.to_string(),
                    name: playlist.name.clone(),
                });
                Ok((remote.id, true))
            }
            Err(e) => {
                warn!(playlist = %playlist.id, error = %e, "Server rejected playlist create");
                playlist.remote_id.clear();
                self.save(playlist).await?;
                Err(SyncError::PlaylistNotCreated {
                    name: playlist.name.clone(),
                    message: e.to_string(),
                })
            }
        }
    }

    async fn push_items(&self, remote_id: &str, song_ids: &[String]) -> Result<()> {
        for song_id in song_ids {
            self.server.add_song_to_playlist(remote_id, song_id).await?;
        }
        Ok(())
    }

    async fn push_order(&self, playlist: &Playlist) -> Result<()> {
        if !playlist.exists_remotely() {
            return Ok(());
        }
        self.server
            .reorder_playlist(&playlist.remote_id, &playlist.song_ids())
            .await?;
        Ok(())
    }

    async fn load(&self, id: PlaylistId) -> Result<Playlist> {
        StoreContext::new(Arc::clone(&self.store))
            .playlist(id)
            .await?
            .ok_or_else(|| SyncError::PlaylistNotFound(id.to_string()))
    }

    /// Smart playlists are generated by the server and cannot be edited.
    async fn load_writable(&self, id: PlaylistId) -> Result<Playlist> {
        let playlist = self.load(id).await?;
        if playlist.is_smart_playlist() {
            return Err(SyncError::InvalidInput(format!(
                "Smart playlist {} is read-only",
                playlist.name
            )));
        }
        Ok(playlist)
    }

    async fn save(&self, playlist: &Playlist) -> Result<()> {
        let mut ctx = StoreContext::new(Arc::clone(&self.store));
        ctx.save_playlist(playlist.clone());
        ctx.commit().await?;
        Ok(())
    }

    fn emit_updated(&self, id: PlaylistId, change_type: &str) {
        self.emit(LibraryEvent::PlaylistUpdated {
            playlist_id: id.to_string(),
            change_type: change_type.to_string(),
        });
    }

    fn emit(&self, event: LibraryEvent) {
        self.event_bus.emit(CoreEvent::Library(event)).ok();
    }
}

/// Playlist entries default to songs unless the record says otherwise.
fn entry_kind(record: &RemoteRecord) -> EntityKind {
    record
        .field("kind")
        .and_then(|kind| kind.parse::<EntityKind>().ok())
        .filter(EntityKind::is_playable)
        .unwrap_or(EntityKind::Song)
}
