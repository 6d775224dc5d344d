//! Core service façade and bootstrap helpers.
//!
//! This crate wires the host-provided media server bridge and a library store
//! into the sync engine. Hosts build a [`CoreConfig`] (which carries the
//! server dialect and the tuning knobs), pick a store, and get back a
//! [`CoreService`] exposing full and partial syncs, playlist editing and the
//! progress event stream.
//!
//! ```ignore
//! use core_service::{CoreDependencies, CoreService};
//! use core_runtime::CoreConfig;
//!
//! let config = CoreConfig::builder().server(server).page_size(250).build()?;
//! let deps = CoreDependencies::from_snapshot("library.json").await?;
//! let core = CoreService::new(deps, config);
//! core.init_logging()?;
//!
//! let mut events = core.subscribe();
//! let report = core.run_full_sync().await?;
//! ```

pub mod error;

pub use error::{CoreError, Result};

use std::path::Path;
use std::sync::Arc;

use bridge_traits::{EntityKind, LibraryMetadata};
use core_library::{LibraryStore, MemoryLibraryStore};
use core_runtime::events::{EventBus, EventStream};
use core_runtime::logging::init_logging;
use core_runtime::CoreConfig;
use core_sync::{
    FullSyncReport, PlaylistSyncer, ReconcileStats, SyncConfig, SyncCoordinator, SyncOutcome,
    SyncTarget,
};
use tracing::info;

/// Aggregated handle to the storage the core writes into.
#[derive(Clone)]
pub struct CoreDependencies {
    pub store: Arc<dyn LibraryStore>,
}

impl CoreDependencies {
    pub fn new(store: Arc<dyn LibraryStore>) -> Self {
        Self { store }
    }

    /// Empty in-memory catalog.
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryLibraryStore::new()))
    }

    /// In-memory catalog restored from a JSON snapshot; starts empty when the
    /// file does not exist yet.
    pub async fn from_snapshot(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let store = if path.exists() {
            info!(path = %core_runtime::logging::strip_path(&path.to_string_lossy()), "Restoring library snapshot");
            MemoryLibraryStore::load_json(path).await?
        } else {
            MemoryLibraryStore::new()
        };
        Ok(Self::new(Arc::new(store)))
    }
}

/// Primary façade exposed to host applications.
#[derive(Clone)]
pub struct CoreService {
    config: CoreConfig,
    store: Arc<dyn LibraryStore>,
    event_bus: Arc<EventBus>,
    coordinator: Arc<SyncCoordinator>,
}

impl CoreService {
    /// Create a new service from the provided dependencies.
    pub fn new(deps: CoreDependencies, config: CoreConfig) -> Self {
        let event_bus = Arc::new(EventBus::new(config.settings.event_buffer_size));
        let coordinator = Arc::new(SyncCoordinator::new(
            SyncConfig::from(&config.settings),
            Arc::clone(&config.server),
            Arc::clone(&deps.store),
            Arc::clone(&event_bus),
        ));
        Self {
            config,
            store: deps.store,
            event_bus,
            coordinator,
        }
    }

    /// Install the global `tracing` subscriber described by the config.
    ///
    /// Optional: hosts that already own a subscriber skip this.
    pub fn init_logging(&self) -> Result<()> {
        init_logging(self.config.logging.clone())?;
        Ok(())
    }

    pub fn config(&self) -> &CoreConfig {
        &self.config
    }

    pub fn store(&self) -> Arc<dyn LibraryStore> {
        Arc::clone(&self.store)
    }

    pub fn coordinator(&self) -> Arc<SyncCoordinator> {
        Arc::clone(&self.coordinator)
    }

    /// Playlist editing and per-playlist sync.
    pub fn playlists(&self) -> Arc<PlaylistSyncer> {
        Arc::clone(self.coordinator.playlists())
    }

    /// Progress and library change events emitted from now on.
    pub fn subscribe(&self) -> EventStream {
        EventStream::new(self.event_bus.subscribe())
    }

    pub fn event_bus(&self) -> Arc<EventBus> {
        Arc::clone(&self.event_bus)
    }

    /// Counts and change dates as currently reported by the server.
    pub async fn library_metadata(&self) -> Result<LibraryMetadata> {
        Ok(self.config.server.fetch_library_metadata().await?)
    }

    pub async fn run_full_sync(&self) -> Result<FullSyncReport> {
        Ok(self.coordinator.run_full_sync().await?)
    }

    pub async fn sync_one(&self, target: SyncTarget) -> Result<SyncOutcome> {
        Ok(self.coordinator.sync_one(target).await?)
    }

    pub async fn search_remote(&self, kind: EntityKind, text: &str) -> Result<ReconcileStats> {
        Ok(self.coordinator.search_remote(kind, text).await?)
    }

    pub async fn sync_music_folders(&self) -> Result<ReconcileStats> {
        Ok(self.coordinator.sync_music_folders().await?)
    }

    pub async fn sync_podcasts_without_episodes(&self) -> Result<ReconcileStats> {
        Ok(self.coordinator.sync_podcasts_without_episodes().await?)
    }

    pub async fn sync_playlists_without_items(&self) -> Result<ReconcileStats> {
        Ok(self.coordinator.sync_playlists_without_items().await?)
    }

    /// Returns whether a full sync was running.
    pub async fn cancel_sync(&self) -> bool {
        self.coordinator.cancel_sync().await
    }

    pub async fn is_syncing(&self) -> bool {
        self.coordinator.is_syncing().await
    }
}
