//! Integration tests for playlist synchronization in both directions

mod common;

use async_trait::async_trait;
use bridge_traits::error::Result as BridgeResult;
use bridge_traits::{
    BridgeError, EntityKind, LibraryMetadata, LibraryServerApi, PageRequest, RecordStream,
    RemotePlaylist, RemoteRecord,
};
use common::*;
use core_library::{
    LibraryStore, MemoryLibraryStore, PlayableRef, Playlist, PlaylistDelta, PlaylistId,
    PlaylistItem, StoreContext,
};
use core_runtime::events::EventBus;
use core_sync::{PlaylistSyncer, SyncError, SyncOutcome, SyncTarget};
use mockall::{mock, Sequence};
use std::sync::Arc;

mock! {
    Server {}

    #[async_trait]
    impl LibraryServerApi for Server {
        fn dialect(&self) -> &str;
        fn supports(&self, kind: EntityKind) -> bool;
        async fn fetch_library_metadata(&self) -> BridgeResult<LibraryMetadata>;
        async fn fetch_page(&self, request: PageRequest) -> BridgeResult<RecordStream>;
        async fn search(&self, kind: EntityKind, text: &str) -> BridgeResult<RecordStream>;
        async fn fetch_playlist(&self, playlist_id: &str) -> BridgeResult<Option<RemotePlaylist>>;
        async fn fetch_playlist_entries(&self, playlist_id: &str) -> BridgeResult<RecordStream>;
        async fn create_playlist(&self, name: &str) -> BridgeResult<RemotePlaylist>;
        async fn add_song_to_playlist(&self, playlist_id: &str, song_id: &str) -> BridgeResult<()>;
        async fn remove_playlist_item(&self, playlist_id: &str, index: usize) -> BridgeResult<()>;
        async fn reorder_playlist(&self, playlist_id: &str, song_ids: &[String]) -> BridgeResult<()>;
        async fn delete_playlist(&self, playlist_id: &str) -> BridgeResult<()>;
    }
}

fn playlist_with_songs(name: &str, remote_id: &str, songs: &[&str]) -> Playlist {
    let mut playlist = Playlist::new(name).with_remote_id(remote_id);
    playlist.append_all(songs.iter().map(|id| PlayableRef::song(*id)));
    playlist
}

async fn save(store: &Arc<MemoryLibraryStore>, playlist: Playlist) -> PlaylistId {
    let id = playlist.id;
    let mut ctx = StoreContext::new(store.clone());
    ctx.save_playlist(playlist);
    ctx.commit().await.unwrap();
    id
}

async fn load(store: &Arc<MemoryLibraryStore>, id: PlaylistId) -> Playlist {
    store.load_playlist(id).await.unwrap().unwrap()
}

fn ids(ids: &[&str]) -> Vec<String> {
    ids.iter().map(|id| id.to_string()).collect()
}

async fn synced_harness() -> Harness {
    let server = ScriptedServer::new();
    seed_library(&server);
    let h = harness(server, config(2, 2));
    h.coordinator.run_full_sync().await.unwrap();
    h
}

fn syncer_over(server: MockServer) -> (PlaylistSyncer, Arc<MemoryLibraryStore>) {
    let store = Arc::new(MemoryLibraryStore::new());
    let syncer = PlaylistSyncer::new(Arc::new(server), store.clone(), Arc::new(EventBus::new(64)));
    (syncer, store)
}

// ============================================================================
// Down
// ============================================================================

#[tokio::test]
async fn test_remote_shrinks_playlist_from_five_to_two() {
    let h = synced_harness().await;
    h.server
        .set_playlist("pl-1", "Road", vec![song("s1"), song("s9")]);
    let id = save(
        &h.store,
        playlist_with_songs("Road", "pl-1", &["s1", "s2", "s3", "s4", "s5"]),
    )
    .await;

    let outcome = h.coordinator.sync_one(SyncTarget::Playlist(id)).await.unwrap();

    assert_eq!(
        outcome,
        SyncOutcome::Playlist(PlaylistDelta {
            reused: 2,
            created: 0,
            changed: 1,
            removed: 3,
        })
    );
    let playlist = load(&h.store, id).await;
    assert_eq!(playlist.playable_ids(), ids(&["s1", "s9"]));
    assert_eq!(playlist.song_count(), 2);
    assert_eq!(playlist.remote_song_count, 2);
    assert!(playlist.changed_since_sync);
    let orders: Vec<u32> = playlist.items().iter().map(|item| item.order).collect();
    assert_eq!(orders, vec![0, 1]);
    // Entries unknown locally become songs in the library.
    assert!(h.store.load_entity(EntityKind::Song, "s9").await.unwrap().is_some());
}

#[tokio::test]
async fn test_episode_entries_keep_their_kind() {
    let h = synced_harness().await;
    h.server.set_playlist(
        "pl-1",
        "Mixed",
        vec![
            song("s1"),
            named("e1").with_field("kind", "podcast_episode"),
        ],
    );
    let id = save(&h.store, Playlist::new("Mixed").with_remote_id("pl-1")).await;

    h.coordinator.sync_one(SyncTarget::Playlist(id)).await.unwrap();

    let playlist = load(&h.store, id).await;
    let playables: Vec<Option<PlayableRef>> = playlist
        .items()
        .iter()
        .map(|item| item.playable.clone())
        .collect();
    assert_eq!(
        playables,
        vec![Some(PlayableRef::song("s1")), Some(PlayableRef::episode("e1"))]
    );
    assert!(h
        .store
        .load_entity(EntityKind::PodcastEpisode, "e1")
        .await
        .unwrap()
        .is_some());
}

#[tokio::test]
async fn test_unuploaded_playlist_is_left_alone_by_down_sync() {
    let h = synced_harness().await;
    let id = save(&h.store, playlist_with_songs("Mix", "", &["s1", "s2"])).await;

    let outcome = h.coordinator.sync_one(SyncTarget::Playlist(id)).await.unwrap();

    assert_eq!(outcome, SyncOutcome::Playlist(PlaylistDelta::default()));
    assert!(h.server.calls().is_empty());
    let playlist = load(&h.store, id).await;
    assert!(!playlist.exists_remotely());
    assert_eq!(playlist.playable_ids(), ids(&["s1", "s2"]));
}

#[tokio::test]
async fn test_first_edit_creates_and_pushes_playlist() {
    let h = synced_harness().await;
    let id = save(&h.store, playlist_with_songs("Mix", "", &["s1", "s2"])).await;

    h.coordinator
        .playlists()
        .add_songs(id, &ids(&["s3"]))
        .await
        .unwrap();

    assert_eq!(load(&h.store, id).await.remote_id, "pl-100");
    assert_eq!(
        h.server.calls(),
        vec!["create Mix", "add pl-100 s1", "add pl-100 s2", "add pl-100 s3"]
    );
    assert_eq!(
        h.server.playlist_entries("pl-100"),
        Some(ids(&["s1", "s2", "s3"]))
    );
}

#[tokio::test]
async fn test_down_sync_renumbers_sparse_stored_order() {
    let h = synced_harness().await;
    h.server
        .set_playlist("pl-1", "Road", vec![song("s1"), song("s2"), song("s3")]);
    let stored = Playlist::new("Road").with_remote_id("pl-1").with_items(vec![
        PlaylistItem::new(0, Some(PlayableRef::song("s1"))),
        PlaylistItem::new(5, Some(PlayableRef::song("s2"))),
    ]);
    let id = save(&h.store, stored).await;

    h.coordinator.sync_one(SyncTarget::Playlist(id)).await.unwrap();

    let playlist = load(&h.store, id).await;
    assert_eq!(playlist.playable_ids(), ids(&["s1", "s2", "s3"]));
    let orders: Vec<u32> = playlist.items().iter().map(|item| item.order).collect();
    assert_eq!(orders, vec![0, 1, 2]);
}

#[tokio::test]
async fn test_stale_remote_id_is_recreated() {
    let h = synced_harness().await;
    let id = save(&h.store, playlist_with_songs("Mix", "pl-gone", &["s3"])).await;

    h.coordinator.sync_one(SyncTarget::Playlist(id)).await.unwrap();

    assert_eq!(load(&h.store, id).await.remote_id, "pl-100");
    assert_eq!(h.server.playlist_entries("pl-100"), Some(ids(&["s3"])));
}

#[tokio::test]
async fn test_rejected_create_leaves_id_empty() {
    let h = synced_harness().await;
    h.server.reject_creates();
    let id = save(&h.store, Playlist::new("Mix")).await;

    let result = h
        .coordinator
        .playlists()
        .add_songs(id, &ids(&["s1"]))
        .await;

    match result {
        Err(SyncError::PlaylistNotCreated { name, .. }) => assert_eq!(name, "Mix"),
        other => panic!("expected PlaylistNotCreated, got {:?}", other.map(|p| p.name)),
    }
    let playlist = load(&h.store, id).await;
    assert!(!playlist.exists_remotely());
    // The local change was committed before the server was asked.
    assert_eq!(playlist.playable_ids(), ids(&["s1"]));
}

#[tokio::test]
async fn test_unknown_playlist_is_not_found() {
    let h = synced_harness().await;

    let result = h
        .coordinator
        .sync_one(SyncTarget::Playlist(PlaylistId::new()))
        .await;

    assert!(matches!(result, Err(SyncError::PlaylistNotFound(_))));
}

#[tokio::test]
async fn test_playlist_list_sync() {
    let server = ScriptedServer::new();
    server.set_library(
        EntityKind::Playlist,
        vec![RemoteRecord::new("pl-1")
            .with_field("name", "Road")
            .with_field("song_count", "2")],
    );
    let h = harness(server, config(2, 2));
    save(&h.store, Playlist::new("Old").with_remote_id("pl-old")).await;
    save(&h.store, Playlist::new("Draft")).await;

    let stats = h.coordinator.sync_playlists_without_items().await.unwrap();

    assert_eq!(stats.added, 1);
    assert_eq!(stats.removed, 1);
    let mut names: Vec<String> = h
        .store
        .load_playlists()
        .await
        .unwrap()
        .into_iter()
        .map(|playlist| playlist.name)
        .collect();
    names.sort();
    assert_eq!(names, vec!["Draft", "Road"]);

    let road = h.store.find_playlist_by_remote_id("pl-1").await.unwrap().unwrap();
    assert_eq!(road.remote_song_count, 2);
    assert!(road.items().is_empty());

    let again = h.coordinator.sync_playlists_without_items().await.unwrap();
    assert_eq!(again.unchanged, 1);
    assert!(!again.has_changes());
}

// ============================================================================
// Up
// ============================================================================

#[tokio::test]
async fn test_move_pushes_new_order_once() {
    let mut server = MockServer::new();
    server
        .expect_reorder_playlist()
        .withf(|playlist_id, song_ids| {
            playlist_id.to_string() == "pl-1" && song_ids.to_vec() == ids(&["s2", "s3", "s1"])
        })
        .times(1)
        .returning(|_, _| Ok(()));
    let (syncer, store) = syncer_over(server);
    let id = save(&store, playlist_with_songs("Road", "pl-1", &["s1", "s2", "s3"])).await;

    let playlist = syncer.move_item(id, 0, 2).await.unwrap();

    assert_eq!(playlist.playable_ids(), ids(&["s2", "s3", "s1"]));
    assert_eq!(load(&store, id).await.playable_ids(), ids(&["s2", "s3", "s1"]));
}

#[tokio::test]
async fn test_noop_move_touches_nothing() {
    let (syncer, store) = syncer_over(MockServer::new());
    let id = save(&store, playlist_with_songs("Road", "pl-1", &["s1", "s2"])).await;

    let playlist = syncer.move_item(id, 1, 1).await.unwrap();

    assert_eq!(playlist.playable_ids(), ids(&["s1", "s2"]));
}

#[tokio::test]
async fn test_shuffle_of_local_playlist_stays_local() {
    let (syncer, store) = syncer_over(MockServer::new());
    let id = save(&store, playlist_with_songs("Draft", "", &["s1", "s2", "s3", "s4"])).await;

    let playlist = syncer.shuffle(id).await.unwrap();

    let mut shuffled = playlist.playable_ids();
    shuffled.sort();
    assert_eq!(shuffled, ids(&["s1", "s2", "s3", "s4"]));
    let orders: Vec<u32> = playlist.items().iter().map(|item| item.order).collect();
    assert_eq!(orders, vec![0, 1, 2, 3]);
}

#[tokio::test]
async fn test_add_songs_validates_then_adds_in_order() {
    let mut server = MockServer::new();
    let mut seq = Sequence::new();
    server
        .expect_fetch_playlist()
        .times(1)
        .in_sequence(&mut seq)
        .returning(|id| {
            Ok(Some(RemotePlaylist {
                id: id.to_string(),
                name: "Road".to_string(),
                song_count: 1,
            }))
        });
    for song_id in ["s4", "s5"] {
        server
            .expect_add_song_to_playlist()
            .withf(move |playlist_id, id| {
                playlist_id.to_string() == "pl-1" && id.to_string() == song_id
            })
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok(()));
    }
    let (syncer, store) = syncer_over(server);
    let id = save(&store, playlist_with_songs("Road", "pl-1", &["s1"])).await;

    let playlist = syncer.add_songs(id, &ids(&["s4", "s5"])).await.unwrap();

    assert_eq!(playlist.playable_ids(), ids(&["s1", "s4", "s5"]));
}

#[tokio::test]
async fn test_failed_remote_remove_keeps_local_commit() {
    let mut server = MockServer::new();
    server
        .expect_remove_playlist_item()
        .withf(|_, index| *index == 1)
        .times(1)
        .returning(|_, _| Err(BridgeError::Transport("offline".to_string())));
    let (syncer, store) = syncer_over(server);
    let id = save(&store, playlist_with_songs("Road", "pl-1", &["s1", "s2", "s3"])).await;

    let result = syncer.remove_item(id, 1).await;

    assert!(matches!(result, Err(SyncError::Transport(_))));
    let playlist = load(&store, id).await;
    assert_eq!(playlist.playable_ids(), ids(&["s1", "s3"]));
    let orders: Vec<u32> = playlist.items().iter().map(|item| item.order).collect();
    assert_eq!(orders, vec![0, 1]);
}

#[tokio::test]
async fn test_remove_out_of_range_is_invalid() {
    let (syncer, store) = syncer_over(MockServer::new());
    let id = save(&store, playlist_with_songs("Road", "pl-1", &["s1"])).await;

    let result = syncer.remove_item(id, 4).await;

    assert!(matches!(result, Err(SyncError::InvalidInput(_))));
    assert_eq!(load(&store, id).await.song_count(), 1);
}

#[tokio::test]
async fn test_delete_removes_remote_then_local() {
    let mut server = MockServer::new();
    server
        .expect_delete_playlist()
        .withf(|playlist_id| playlist_id.to_string() == "pl-1")
        .times(1)
        .returning(|_| Ok(()));
    let (syncer, store) = syncer_over(server);
    let id = save(&store, playlist_with_songs("Road", "pl-1", &["s1"])).await;

    syncer.delete(id).await.unwrap();

    assert!(store.load_playlist(id).await.unwrap().is_none());
}

#[tokio::test]
async fn test_smart_playlists_are_read_only() {
    let (syncer, store) = syncer_over(MockServer::new());
    let id = save(&store, playlist_with_songs("Top", "smart_top", &["s1", "s2"])).await;

    assert!(matches!(
        syncer.move_item(id, 0, 1).await,
        Err(SyncError::InvalidInput(_))
    ));
    assert!(matches!(
        syncer.add_songs(id, &ids(&["s3"])).await,
        Err(SyncError::InvalidInput(_))
    ));
    assert_eq!(load(&store, id).await.playable_ids(), ids(&["s1", "s2"]));

    // Deleting only drops the local copy.
    syncer.delete(id).await.unwrap();
    assert!(store.load_playlist(id).await.unwrap().is_none());
}

#[tokio::test]
async fn test_reorder_pushes_only_songs() {
    let mut server = MockServer::new();
    server
        .expect_reorder_playlist()
        .withf(|playlist_id, song_ids| {
            playlist_id.to_string() == "pl-1" && song_ids.to_vec() == ids(&["s2", "s1"])
        })
        .times(1)
        .returning(|_, _| Ok(()));
    let (syncer, store) = syncer_over(server);
    let mut playlist = playlist_with_songs("Road", "pl-1", &["s1", "s2"]);
    playlist.append(PlayableRef::episode("ep1"));
    let id = save(&store, playlist).await;

    let playlist = syncer.move_item(id, 0, 1).await.unwrap();

    assert_eq!(playlist.playable_ids(), ids(&["s2", "s1", "ep1"]));
}
