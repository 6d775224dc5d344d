//! Scripted in-memory media server shared by the integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use bridge_traits::error::{BridgeError, Result};
use bridge_traits::{
    EntityKind, EntityRef, LibraryMetadata, LibraryServerApi, PageRequest, ParentScope,
    RecordStream, RemotePlaylist, RemoteRecord,
};
use chrono::Utc;
use core_library::MemoryLibraryStore;
use core_runtime::events::{CoreEvent, EventBus};
use core_sync::{SyncConfig, SyncCoordinator};
use futures::{stream, StreamExt};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::broadcast::Receiver;

// ============================================================================
// Scripted Server
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchEvent {
    Started(PageRequest),
    Finished(PageRequest),
}

#[derive(Default)]
pub struct ScriptedServer {
    unsupported: Mutex<BTreeSet<EntityKind>>,
    library: Mutex<BTreeMap<EntityKind, Vec<RemoteRecord>>>,
    children: Mutex<HashMap<(EntityKind, EntityRef), Vec<RemoteRecord>>>,
    playlists: Mutex<BTreeMap<String, (String, Vec<RemoteRecord>)>>,
    failing_pages: Mutex<BTreeSet<(EntityKind, usize)>>,
    fail_metadata: AtomicBool,
    hidden_counts: Mutex<BTreeSet<EntityKind>>,
    reject_creates: AtomicBool,
    delay_ms: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    next_playlist: AtomicUsize,
    fetch_log: Mutex<Vec<FetchEvent>>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedServer {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn unsupport(&self, kind: EntityKind) {
        self.unsupported.lock().unwrap().insert(kind);
    }

    pub fn set_delay(&self, delay: Duration) {
        self.delay_ms
            .store(delay.as_millis() as usize, Ordering::SeqCst);
    }

    pub fn set_library(&self, kind: EntityKind, records: Vec<RemoteRecord>) {
        self.library.lock().unwrap().insert(kind, records);
    }

    pub fn set_children(&self, kind: EntityKind, parent: EntityRef, records: Vec<RemoteRecord>) {
        self.children.lock().unwrap().insert((kind, parent), records);
    }

    pub fn set_playlist(&self, id: &str, name: &str, entries: Vec<RemoteRecord>) {
        self.playlists
            .lock()
            .unwrap()
            .insert(id.to_string(), (name.to_string(), entries));
    }

    pub fn playlist_entries(&self, id: &str) -> Option<Vec<String>> {
        self.playlists.lock().unwrap().get(id).map(|(_, entries)| {
            entries
                .iter()
                .filter_map(|entry| entry.id.clone())
                .collect()
        })
    }

    pub fn fail_page(&self, kind: EntityKind, offset: usize) {
        self.failing_pages.lock().unwrap().insert((kind, offset));
    }

    pub fn clear_failures(&self) {
        self.failing_pages.lock().unwrap().clear();
    }

    pub fn fail_metadata(&self) {
        self.fail_metadata.store(true, Ordering::SeqCst);
    }

    /// Leave `kind` out of the metadata counts.
    pub fn hide_count(&self, kind: EntityKind) {
        self.hidden_counts.lock().unwrap().insert(kind);
    }

    pub fn reject_creates(&self) {
        self.reject_creates.store(true, Ordering::SeqCst);
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn fetch_log(&self) -> Vec<FetchEvent> {
        self.fetch_log.lock().unwrap().clone()
    }

    /// Offsets of the library-scope pages requested for `kind`, sorted.
    pub fn page_offsets(&self, kind: EntityKind) -> Vec<usize> {
        let mut offsets: Vec<usize> = self
            .fetch_log()
            .into_iter()
            .filter_map(|event| match event {
                FetchEvent::Started(request)
                    if request.kind == kind && request.scope == ParentScope::Library =>
                {
                    Some(request.offset)
                }
                _ => None,
            })
            .collect();
        offsets.sort_unstable();
        offsets
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn record_call(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }

    fn records_for(&self, request: &PageRequest) -> Vec<RemoteRecord> {
        let all = match &request.scope {
            ParentScope::Library => self
                .library
                .lock()
                .unwrap()
                .get(&request.kind)
                .cloned()
                .unwrap_or_default(),
            ParentScope::Entity(parent) => self
                .children
                .lock()
                .unwrap()
                .get(&(request.kind, parent.clone()))
                .cloned()
                .unwrap_or_default(),
        };
        all.into_iter()
            .skip(request.offset)
            .take(request.limit.unwrap_or(usize::MAX))
            .collect()
    }
}

fn into_stream(records: Vec<RemoteRecord>) -> RecordStream {
    stream::iter(records.into_iter().map(Ok)).boxed()
}

#[async_trait]
impl LibraryServerApi for ScriptedServer {
    fn dialect(&self) -> &str {
        "scripted"
    }

    fn supports(&self, kind: EntityKind) -> bool {
        !self.unsupported.lock().unwrap().contains(&kind)
    }

    async fn fetch_library_metadata(&self) -> Result<LibraryMetadata> {
        if self.fail_metadata.load(Ordering::SeqCst) {
            return Err(BridgeError::Transport("handshake timed out".to_string()));
        }
        let library = self.library.lock().unwrap();
        let hidden = self.hidden_counts.lock().unwrap();
        let mut metadata = LibraryMetadata::default();
        for kind in [EntityKind::Artist, EntityKind::Album, EntityKind::Song] {
            metadata = metadata.with_count(kind, 0);
        }
        for (kind, records) in library.iter() {
            metadata = metadata
                .with_count(*kind, records.len())
                .with_change_date(*kind, Utc::now());
        }
        for kind in hidden.iter() {
            metadata.counts.remove(kind);
        }
        Ok(metadata)
    }

    async fn fetch_page(&self, request: PageRequest) -> Result<RecordStream> {
        self.fetch_log
            .lock()
            .unwrap()
            .push(FetchEvent::Started(request.clone()));
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        let delay = self.delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay as u64)).await;
        }

        let failing = self
            .failing_pages
            .lock()
            .unwrap()
            .contains(&(request.kind, request.offset));
        let result = if failing {
            Err(BridgeError::Transport(format!(
                "page at {} failed",
                request.offset
            )))
        } else {
            Ok(into_stream(self.records_for(&request)))
        };

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.fetch_log
            .lock()
            .unwrap()
            .push(FetchEvent::Finished(request));
        result
    }

    async fn search(&self, kind: EntityKind, text: &str) -> Result<RecordStream> {
        self.record_call(format!("search {} {}", kind, text));
        let needle = text.to_lowercase();
        let matches = self
            .library
            .lock()
            .unwrap()
            .get(&kind)
            .cloned()
            .unwrap_or_default()
            .into_iter()
            .filter(|record| {
                record
                    .fields
                    .values()
                    .any(|value| value.to_lowercase().contains(&needle))
            })
            .collect();
        Ok(into_stream(matches))
    }

    async fn fetch_playlist(&self, playlist_id: &str) -> Result<Option<RemotePlaylist>> {
        Ok(self
            .playlists
            .lock()
            .unwrap()
            .get(playlist_id)
            .map(|(name, entries)| RemotePlaylist {
                id: playlist_id.to_string(),
                name: name.clone(),
                song_count: entries.len(),
            }))
    }

    async fn fetch_playlist_entries(&self, playlist_id: &str) -> Result<RecordStream> {
        let entries = self
            .playlists
            .lock()
            .unwrap()
            .get(playlist_id)
            .map(|(_, entries)| entries.clone())
            .ok_or_else(|| BridgeError::Rejected {
                code: 70,
                message: format!("playlist {} not found", playlist_id),
            })?;
        Ok(into_stream(entries))
    }

    async fn create_playlist(&self, name: &str) -> Result<RemotePlaylist> {
        self.record_call(format!("create {}", name));
        if self.reject_creates.load(Ordering::SeqCst) {
            return Err(BridgeError::Rejected {
                code: 50,
                message: "user may not create playlists".to_string(),
            });
        }
        let id = format!("pl-{}", self.next_playlist.fetch_add(1, Ordering::SeqCst) + 100);
        self.set_playlist(&id, name, Vec::new());
        Ok(RemotePlaylist {
            id,
            name: name.to_string(),
            song_count: 0,
        })
    }

    async fn add_song_to_playlist(&self, playlist_id: &str, song_id: &str) -> Result<()> {
        self.record_call(format!("add {} {}", playlist_id, song_id));
        if let Some((_, entries)) = self.playlists.lock().unwrap().get_mut(playlist_id) {
            entries.push(song(song_id));
        }
        Ok(())
    }

    async fn remove_playlist_item(&self, playlist_id: &str, index: usize) -> Result<()> {
        self.record_call(format!("remove {} {}", playlist_id, index));
        if let Some((_, entries)) = self.playlists.lock().unwrap().get_mut(playlist_id) {
            if index < entries.len() {
                entries.remove(index);
            }
        }
        Ok(())
    }

    async fn reorder_playlist(&self, playlist_id: &str, song_ids: &[String]) -> Result<()> {
        self.record_call(format!("reorder {} {}", playlist_id, song_ids.join(",")));
        if let Some((_, entries)) = self.playlists.lock().unwrap().get_mut(playlist_id) {
            *entries = song_ids.iter().map(|id| song(id)).collect();
        }
        Ok(())
    }

    async fn delete_playlist(&self, playlist_id: &str) -> Result<()> {
        self.record_call(format!("delete {}", playlist_id));
        self.playlists.lock().unwrap().remove(playlist_id);
        Ok(())
    }
}

// ============================================================================
// Fixtures
// ============================================================================

pub fn artist(id: &str) -> RemoteRecord {
    RemoteRecord::new(id).with_field("name", format!("Artist {}", id))
}

pub fn album(id: &str, artist_id: &str) -> RemoteRecord {
    RemoteRecord::new(id)
        .with_field("name", format!("Album {}", id))
        .with_reference(EntityKind::Artist, artist_id)
}

pub fn song(id: &str) -> RemoteRecord {
    RemoteRecord::new(id).with_field("title", format!("Song {}", id))
}

pub fn song_on(id: &str, album_id: &str, artist_id: &str) -> RemoteRecord {
    song(id)
        .with_reference(EntityKind::Album, album_id)
        .with_reference(EntityKind::Artist, artist_id)
}

pub fn named(id: &str) -> RemoteRecord {
    RemoteRecord::new(id).with_field("name", id)
}

pub fn artists(count: usize) -> Vec<RemoteRecord> {
    (0..count).map(|i| artist(&format!("ar{:02}", i))).collect()
}

/// A small library: 2 artists, 3 albums, 6 songs, 2 genres, 1 podcast.
pub fn seed_library(server: &ScriptedServer) {
    server.set_library(EntityKind::Genre, vec![named("jazz"), named("soul")]);
    server.set_library(EntityKind::Artist, vec![artist("ar1"), artist("ar2")]);
    server.set_library(
        EntityKind::Album,
        vec![album("al1", "ar1"), album("al2", "ar1"), album("al3", "ar2")],
    );
    server.set_library(
        EntityKind::Song,
        vec![
            song_on("s1", "al1", "ar1"),
            song_on("s2", "al1", "ar1"),
            song_on("s3", "al2", "ar1"),
            song_on("s4", "al2", "ar1"),
            song_on("s5", "al3", "ar2"),
            song_on("s6", "al3", "ar2"),
        ],
    );
    server.set_library(EntityKind::Podcast, vec![named("pod1")]);
}

pub fn config(max_concurrent_pages: usize, page_size: usize) -> SyncConfig {
    SyncConfig {
        max_concurrent_pages,
        page_size,
        prune_stale_entities: true,
    }
}

pub struct Harness {
    pub server: Arc<ScriptedServer>,
    pub store: Arc<MemoryLibraryStore>,
    pub event_bus: Arc<EventBus>,
    pub coordinator: Arc<SyncCoordinator>,
}

pub fn harness(server: Arc<ScriptedServer>, config: SyncConfig) -> Harness {
    let store = Arc::new(MemoryLibraryStore::new());
    let event_bus = Arc::new(EventBus::new(1024));
    let coordinator = Arc::new(SyncCoordinator::new(
        config,
        server.clone(),
        store.clone(),
        event_bus.clone(),
    ));
    Harness {
        server,
        store,
        event_bus,
        coordinator,
    }
}

pub fn drain(receiver: &mut Receiver<CoreEvent>) -> Vec<CoreEvent> {
    let mut events = Vec::new();
    while let Ok(event) = receiver.try_recv() {
        events.push(event);
    }
    events
}
