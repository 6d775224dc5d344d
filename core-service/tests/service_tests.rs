//! End-to-end tests of the façade over a small fixed server

use async_trait::async_trait;
use bridge_traits::error::Result as BridgeResult;
use bridge_traits::{
    BridgeError, EntityKind, LibraryMetadata, LibraryServerApi, PageRequest, ParentScope,
    RecordStream, RemotePlaylist, RemoteRecord,
};
use core_library::{LibraryStore, MemoryLibraryStore};
use core_runtime::events::{CoreEvent, SyncEvent};
use core_runtime::CoreConfig;
use core_service::{CoreDependencies, CoreError, CoreService};
use core_sync::{SyncError, SyncTarget};
use futures::{stream, StreamExt};
use std::sync::Arc;

/// Serves a fixed list of artists and nothing else.
struct FixedServer {
    artists: Vec<RemoteRecord>,
    online: bool,
}

impl FixedServer {
    fn with_artists(count: usize) -> Arc<Self> {
        let artists = (0..count)
            .map(|i| RemoteRecord::new(format!("ar{}", i)).with_field("name", format!("Artist {}", i)))
            .collect();
        Arc::new(Self {
            artists,
            online: true,
        })
    }

    fn offline() -> Arc<Self> {
        Arc::new(Self {
            artists: Vec::new(),
            online: false,
        })
    }
}

fn empty() -> RecordStream {
    stream::empty().boxed()
}

fn unavailable<T>() -> BridgeResult<T> {
    Err(BridgeError::NotAvailable("fixed server".to_string()))
}

#[async_trait]
impl LibraryServerApi for FixedServer {
    fn dialect(&self) -> &str {
        "fixed"
    }

    fn supports(&self, kind: EntityKind) -> bool {
        kind != EntityKind::Podcast
    }

    async fn fetch_library_metadata(&self) -> BridgeResult<LibraryMetadata> {
        if !self.online {
            return Err(BridgeError::Transport("connection refused".to_string()));
        }
        Ok(LibraryMetadata::default().with_count(EntityKind::Artist, self.artists.len()))
    }

    async fn fetch_page(&self, request: PageRequest) -> BridgeResult<RecordStream> {
        if request.kind != EntityKind::Artist || request.scope != ParentScope::Library {
            return Ok(empty());
        }
        let page: Vec<_> = self
            .artists
            .iter()
            .skip(request.offset)
            .take(request.limit.unwrap_or(usize::MAX))
            .cloned()
            .map(Ok)
            .collect();
        Ok(stream::iter(page).boxed())
    }

    async fn search(&self, _kind: EntityKind, _text: &str) -> BridgeResult<RecordStream> {
        Ok(empty())
    }

    async fn fetch_playlist(&self, _id: &str) -> BridgeResult<Option<RemotePlaylist>> {
        Ok(None)
    }

    async fn fetch_playlist_entries(&self, _id: &str) -> BridgeResult<RecordStream> {
        Ok(empty())
    }

    async fn create_playlist(&self, _name: &str) -> BridgeResult<RemotePlaylist> {
        unavailable()
    }

    async fn add_song_to_playlist(&self, _pid: &str, _song: &str) -> BridgeResult<()> {
        unavailable()
    }

    async fn remove_playlist_item(&self, _pid: &str, _index: usize) -> BridgeResult<()> {
        unavailable()
    }

    async fn reorder_playlist(&self, _pid: &str, _ids: &[String]) -> BridgeResult<()> {
        unavailable()
    }

    async fn delete_playlist(&self, _pid: &str) -> BridgeResult<()> {
        unavailable()
    }
}

fn service(server: Arc<FixedServer>, page_size: usize) -> CoreService {
    let config = CoreConfig::builder()
        .server(server)
        .max_concurrent_pages(2)
        .page_size(page_size)
        .event_buffer_size(64)
        .build()
        .unwrap();
    CoreService::new(CoreDependencies::in_memory(), config)
}

#[tokio::test]
async fn test_service_uses_configured_settings() {
    let core = service(FixedServer::with_artists(0), 250);

    let coordinator = core.coordinator();
    assert_eq!(coordinator.config().page_size, 250);
    assert_eq!(coordinator.config().max_concurrent_pages, 2);
    assert!(!core.is_syncing().await);
    assert!(!core.cancel_sync().await);
}

#[tokio::test]
async fn test_full_sync_through_service() {
    let core = service(FixedServer::with_artists(7), 3);
    let mut terminal = core.subscribe().filter(CoreEvent::is_terminal);

    let report = core.run_full_sync().await.unwrap();

    assert!(report.is_complete());
    assert_eq!(report.phase(EntityKind::Artist).unwrap().pages, 3);
    assert!(report.phase(EntityKind::Podcast).unwrap().skipped);
    assert_eq!(
        core.store().load_entities(EntityKind::Artist).await.unwrap().len(),
        7
    );
    assert!(matches!(
        terminal.recv().await.unwrap(),
        CoreEvent::Sync(SyncEvent::Finished { epoch: 0, .. })
    ));
}

#[tokio::test]
async fn test_sync_errors_surface_as_core_errors() {
    let core = service(FixedServer::with_artists(1), 10);

    let result = core.sync_one(SyncTarget::Artist("ar0".to_string())).await;
    assert!(matches!(
        result,
        Err(CoreError::Sync(SyncError::NoSyncEpoch))
    ));

    core.run_full_sync().await.unwrap();
    let stats = core
        .search_remote(EntityKind::Artist, "anything")
        .await
        .unwrap();
    assert!(!stats.has_changes());
}

#[tokio::test]
async fn test_unreachable_server() {
    let core = service(FixedServer::offline(), 10);

    assert!(matches!(
        core.library_metadata().await,
        Err(CoreError::Bridge(BridgeError::Transport(_)))
    ));
    assert!(matches!(
        core.run_full_sync().await,
        Err(CoreError::Sync(SyncError::MetadataUnavailable(_)))
    ));
}

#[tokio::test]
async fn test_snapshot_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("library.json");

    // Missing snapshot: start empty.
    let deps = CoreDependencies::from_snapshot(&path).await.unwrap();
    assert!(deps.store.load_epochs().await.unwrap().is_empty());

    let store = Arc::new(MemoryLibraryStore::new());
    let config = CoreConfig::builder()
        .server(FixedServer::with_artists(4))
        .build()
        .unwrap();
    let core = CoreService::new(CoreDependencies::new(store.clone()), config);
    core.run_full_sync().await.unwrap();
    store.save_json(&path).await.unwrap();

    let restored = CoreDependencies::from_snapshot(&path).await.unwrap();
    assert_eq!(restored.store.load_entities(EntityKind::Artist).await.unwrap().len(), 4);
    assert_eq!(restored.store.load_epochs().await.unwrap().len(), 1);
}
