//! # Sync Coordinator
//!
//! Orchestrates full and partial synchronization with a remote media server.
//!
//! ## Overview
//!
//! The `SyncCoordinator` is the central orchestrator for sync operations. It:
//! - Fetches library metadata and opens a [`SyncEpoch`](core_library::SyncEpoch)
//! - Runs one phase per entity class, strictly in sequence
//! - Fans each paged phase out into page workers bounded by a [`SlotLimiter`]
//! - Waits for every page of a phase before starting the next one
//! - Prunes entities the run did not touch (only after a clean phase)
//! - Emits progress events via `EventBus`
//!
//! ## Workflow
//!
//! ### Full Sync
//! 1. Fetch library metadata; on failure abort before writing anything
//! 2. Open a new epoch (id = number of earlier epochs)
//! 3. Genres (one listing, pruned directly)
//! 4. Artists, albums, songs (paged, `ceil(count / page_size)` pages each)
//! 5. Playlist headers, without items
//! 6. Podcasts, without episodes
//! 7. Mark the epoch done and emit `Finished` or `FinishedWithErrors`
//!
//! A class the server does not support is reported as `PhaseSkipped` and the
//! run continues. A failing page is reported as `PageFailed`; sibling pages
//! keep running and already committed pages stay.
//!
//! ### Partial Sync
//! Bypasses paging and epoch creation: one parent (artist, album, podcast,
//! playlist, directory, music folder) is reconciled against the latest epoch.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use core_sync::{SyncCoordinator, SyncTarget};
//!
//! # async fn example(coordinator: SyncCoordinator) -> core_sync::Result<()> {
//! let report = coordinator.run_full_sync().await?;
//! println!("epoch {} failed pages: {}", report.epoch, report.failed_pages());
//!
//! coordinator.sync_one(SyncTarget::Album("al-42".to_string())).await?;
//! # Ok(())
//! # }
//! ```

use bridge_traits::{
    Clock, EntityKind, EntityRef, LibraryMetadata, LibraryServerApi, PageRequest, ParentScope,
    SystemClock,
};
use core_library::{EpochId, LibraryStore, PlaylistDelta, PlaylistId, StoreContext, SyncEpoch};
use core_runtime::config::SyncSettings;
use core_runtime::events::{CoreEvent, EventBus, LibraryEvent, SyncEvent};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, error, info, instrument, warn};

use crate::error::{Result, SyncError};
use crate::limiter::SlotLimiter;
use crate::playlist_sync::PlaylistSyncer;
use crate::reconciler::{prune_stale, EntityReconciler, ReconcileStats};

/// Phases of a full sync, in execution order.
pub const FULL_SYNC_PHASES: [EntityKind; 6] = [
    EntityKind::Genre,
    EntityKind::Artist,
    EntityKind::Album,
    EntityKind::Song,
    EntityKind::Playlist,
    EntityKind::Podcast,
];

/// Engine view of the sync settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncConfig {
    /// Pages in flight at once
    pub max_concurrent_pages: usize,

    /// Records requested per page
    pub page_size: usize,

    /// Delete entities a clean paged phase did not see
    pub prune_stale_entities: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self::from(&SyncSettings::default())
    }
}

impl From<&SyncSettings> for SyncConfig {
    fn from(settings: &SyncSettings) -> Self {
        Self {
            max_concurrent_pages: settings.max_concurrent_pages,
            page_size: settings.page_size,
            prune_stale_entities: settings.prune_stale_entities,
        }
    }
}

/// Number of pages needed to cover `count` records.
pub fn page_count(count: usize, page_size: usize) -> usize {
    count.div_ceil(page_size.max(1))
}

/// Single parent to reconcile outside a full run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncTarget {
    /// Albums, then songs of an artist
    Artist(String),
    Album(String),
    /// Episodes of a podcast; vanished episodes are deleted
    Podcast(String),
    Playlist(PlaylistId),
    Directory(String),
    MusicFolder(String),
}

/// Result of a partial sync.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    Entities(ReconcileStats),
    Playlist(PlaylistDelta),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PhaseReport {
    pub kind: EntityKind,
    /// 0 for unpaged phases
    pub pages: usize,
    pub failed_pages: usize,
    pub stats: ReconcileStats,
    pub skipped: bool,
}

impl PhaseReport {
    fn skipped(kind: EntityKind) -> Self {
        Self {
            kind,
            pages: 0,
            failed_pages: 0,
            stats: ReconcileStats::default(),
            skipped: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FullSyncReport {
    pub epoch: EpochId,
    pub phases: Vec<PhaseReport>,
    pub duration_ms: u64,
}

impl FullSyncReport {
    pub fn failed_pages(&self) -> usize {
        self.phases.iter().map(|phase| phase.failed_pages).sum()
    }

    pub fn is_complete(&self) -> bool {
        self.failed_pages() == 0
    }

    pub fn phase(&self, kind: EntityKind) -> Option<&PhaseReport> {
        self.phases.iter().find(|phase| phase.kind == kind)
    }
}

/// Sync coordinator for orchestrating synchronization
pub struct SyncCoordinator {
    config: SyncConfig,
    server: Arc<dyn LibraryServerApi>,
    store: Arc<dyn LibraryStore>,
    event_bus: Arc<EventBus>,
    clock: Arc<dyn Clock>,
    playlists: Arc<PlaylistSyncer>,
    /// Limiter of the running full sync, if any
    active_run: Arc<Mutex<Option<SlotLimiter>>>,
}

impl SyncCoordinator {
    pub fn new(
        config: SyncConfig,
        server: Arc<dyn LibraryServerApi>,
        store: Arc<dyn LibraryStore>,
        event_bus: Arc<EventBus>,
    ) -> Self {
        let playlists = Arc::new(PlaylistSyncer::new(
            Arc::clone(&server),
            Arc::clone(&store),
            Arc::clone(&event_bus),
        ));
        Self {
            config,
            server,
            store,
            event_bus,
            clock: Arc::new(SystemClock),
            playlists,
            active_run: Arc::new(Mutex::new(None)),
        }
    }

    /// Replace the time source used to stamp epochs.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn playlists(&self) -> &Arc<PlaylistSyncer> {
        &self.playlists
    }

    pub async fn is_syncing(&self) -> bool {
        self.active_run.lock().await.is_some()
    }

    /// Cancel the running full sync. Pages already in flight finish; the run
    /// then ends with [`SyncError::Cancelled`]. Returns whether a run was
    /// active.
    pub async fn cancel_sync(&self) -> bool {
        match self.active_run.lock().await.as_ref() {
            Some(limiter) => {
                info!("Cancelling full sync");
                limiter.cancel();
                true
            }
            None => false,
        }
    }

    // =========================================================================
    // Full Sync
    // =========================================================================

    /// Run a full sync. Only one full sync may run at a time.
    #[instrument(skip(self), fields(dialect = %self.server.dialect()))]
    pub async fn run_full_sync(&self) -> Result<FullSyncReport> {
        let limiter = {
            let mut active = self.active_run.lock().await;
            if active.is_some() {
                warn!("Full sync requested while another one is running");
                return Err(SyncError::SyncInProgress);
            }
            let limiter = SlotLimiter::new(self.config.max_concurrent_pages);
            *active = Some(limiter.clone());
            limiter
        };

        let result = self.execute_full_sync(&limiter).await;
        self.active_run.lock().await.take();

        if let Err(e) = &result {
            error!(error = %e, "Full sync aborted");
            self.emit(CoreEvent::Sync(SyncEvent::Aborted {
                message: e.to_string(),
            }));
        }
        result
    }

    async fn execute_full_sync(&self, limiter: &SlotLimiter) -> Result<FullSyncReport> {
        let started = Instant::now();

        let metadata = self
            .server
            .fetch_library_metadata()
            .await
            .map_err(|e| SyncError::MetadataUnavailable(e.to_string()))?;

        let epoch = self.open_epoch(&metadata).await?;
        info!(epoch = %epoch.id, "Opened sync epoch");
        self.emit(CoreEvent::Sync(SyncEvent::Started { epoch: epoch.id.0 }));

        let mut phases = Vec::with_capacity(FULL_SYNC_PHASES.len());
        for kind in FULL_SYNC_PHASES {
            if limiter.is_cancelled() {
                return Err(SyncError::Cancelled);
            }
            if !self.server.supports(kind) {
                info!(kind = %kind, "Server does not support class, skipping phase");
                self.emit(CoreEvent::Sync(SyncEvent::PhaseSkipped {
                    kind,
                    reason: format!("{} does not support {}", self.server.dialect(), kind),
                }));
                phases.push(PhaseReport::skipped(kind));
                continue;
            }

            let report = match kind {
                EntityKind::Artist | EntityKind::Album | EntityKind::Song => {
                    match metadata.count(kind) {
                        Some(count) => {
                            self.run_paged_phase(kind, count, epoch.id, limiter).await?
                        }
                        // Nothing to page over, and pruning would empty the class.
                        None => {
                            warn!(kind = %kind, "Server reported no count, skipping phase");
                            self.emit(CoreEvent::Sync(SyncEvent::PhaseSkipped {
                                kind,
                                reason: format!(
                                    "{} reported no {} count",
                                    self.server.dialect(),
                                    kind
                                ),
                            }));
                            PhaseReport::skipped(kind)
                        }
                    }
                }
                _ => self.run_listing_phase(kind, epoch.id).await?,
            };
            phases.push(report);
        }

        let epoch_id = epoch.id;
        self.close_epoch(epoch).await?;

        let report = FullSyncReport {
            epoch: epoch_id,
            phases,
            duration_ms: started.elapsed().as_millis() as u64,
        };
        let failed_pages = report.failed_pages();
        if failed_pages == 0 {
            info!(epoch = %epoch_id, duration_ms = report.duration_ms, "Full sync finished");
            self.emit(CoreEvent::Sync(SyncEvent::Finished {
                epoch: epoch_id.0,
                duration_ms: report.duration_ms,
            }));
        } else {
            warn!(epoch = %epoch_id, failed_pages, "Full sync finished with errors");
            self.emit(CoreEvent::Sync(SyncEvent::FinishedWithErrors {
                epoch: epoch_id.0,
                failed_pages,
                duration_ms: report.duration_ms,
            }));
        }
        Ok(report)
    }

    async fn open_epoch(&self, metadata: &LibraryMetadata) -> Result<SyncEpoch> {
        let mut ctx = StoreContext::new(Arc::clone(&self.store));
        let epoch = ctx
            .create_epoch(metadata.change_dates.clone(), self.clock.now())
            .await?;
        ctx.commit().await?;
        Ok(epoch)
    }

    async fn close_epoch(&self, mut epoch: SyncEpoch) -> Result<()> {
        epoch.mark_done()?;
        let mut ctx = StoreContext::new(Arc::clone(&self.store));
        ctx.save_epoch(epoch);
        ctx.commit().await?;
        Ok(())
    }

    /// Dispatch one worker per page, then wait for all of them.
    #[instrument(skip(self, limiter), fields(kind = %kind))]
    async fn run_paged_phase(
        &self,
        kind: EntityKind,
        count: usize,
        epoch: EpochId,
        limiter: &SlotLimiter,
    ) -> Result<PhaseReport> {
        let page_size = self.config.page_size.max(1);
        let pages = page_count(count, page_size);
        info!(count, pages, page_size, "Starting paged phase");
        self.emit(CoreEvent::Sync(SyncEvent::PhaseStarted { kind, pages }));

        let mut workers = Vec::with_capacity(pages);
        let mut cancelled = false;
        for page in 0..pages {
            let permit = match limiter.acquire().await {
                Ok(permit) => permit,
                Err(_) => {
                    cancelled = true;
                    break;
                }
            };
            let request = PageRequest::page(kind, page * page_size, page_size);
            let server = Arc::clone(&self.server);
            let store = Arc::clone(&self.store);
            debug!(page, offset = request.offset, "Dispatching page");

            let handle = tokio::spawn(async move {
                let _permit = permit;
                sync_page(server, store, request, epoch).await
            });
            workers.push((page, handle));
        }

        // Barrier: no page of the next phase starts before these are done.
        limiter.wait_idle().await;

        let mut stats = ReconcileStats::default();
        let mut failed_pages = 0;
        let mut fatal = None;
        for (page, handle) in workers {
            let failure = match handle.await {
                Ok(Ok(page_stats)) => {
                    stats.merge(page_stats);
                    continue;
                }
                Ok(Err(e)) if e.is_fatal() => {
                    fatal.get_or_insert(e);
                    continue;
                }
                Ok(Err(e)) => e.to_string(),
                Err(join_error) => join_error.to_string(),
            };
            failed_pages += 1;
            self.report_page_failure(kind, page, failure);
        }

        if let Some(e) = fatal {
            return Err(e);
        }
        if cancelled {
            return Err(SyncError::Cancelled);
        }

        if failed_pages > 0 {
            warn!(failed_pages, "Skipping prune after failed pages");
        } else if self.config.prune_stale_entities {
            let mut ctx = StoreContext::new(Arc::clone(&self.store));
            stats.removed += prune_stale(&mut ctx, kind, epoch).await?;
            ctx.commit().await?;
        }

        Ok(self.finish_phase(kind, pages, failed_pages, stats))
    }

    /// Unpaged phase: one listing of the whole class, pruned directly.
    #[instrument(skip(self), fields(kind = %kind))]
    async fn run_listing_phase(&self, kind: EntityKind, epoch: EpochId) -> Result<PhaseReport> {
        self.emit(CoreEvent::Sync(SyncEvent::PhaseStarted { kind, pages: 0 }));

        let result = match kind {
            EntityKind::Playlist => self.playlists.sync_playlist_list().await,
            _ => self.sync_listing(kind, epoch).await,
        };
        let (stats, failed_pages) = match result {
            Ok(stats) => (stats, 0),
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                self.report_page_failure(kind, 0, e.to_string());
                (ReconcileStats::default(), 1)
            }
        };
        Ok(self.finish_phase(kind, 0, failed_pages, stats))
    }

    fn finish_phase(
        &self,
        kind: EntityKind,
        pages: usize,
        failed_pages: usize,
        stats: ReconcileStats,
    ) -> PhaseReport {
        info!(
            kind = %kind,
            added = stats.added,
            updated = stats.updated,
            removed = stats.removed,
            malformed = stats.malformed,
            failed_pages,
            "Phase finished"
        );
        self.emit(CoreEvent::Sync(SyncEvent::PhaseFinished {
            kind,
            added: stats.added,
            updated: stats.updated,
            removed: stats.removed,
            failed_pages,
        }));
        PhaseReport {
            kind,
            pages,
            failed_pages,
            stats,
            skipped: false,
        }
    }

    fn report_page_failure(&self, kind: EntityKind, page: usize, message: String) {
        warn!(kind = %kind, page, error = %message, "Page failed");
        self.emit(CoreEvent::Sync(SyncEvent::PageFailed {
            kind,
            page,
            message,
        }));
    }

    // =========================================================================
    // Partial Sync
    // =========================================================================

    /// Reconcile a single parent against the latest epoch.
    #[instrument(skip(self))]
    pub async fn sync_one(&self, target: SyncTarget) -> Result<SyncOutcome> {
        let parent = match target {
            SyncTarget::Playlist(id) => {
                self.require_support(EntityKind::Playlist)?;
                return self.playlists.sync_playlist(id).await.map(SyncOutcome::Playlist);
            }
            SyncTarget::Artist(id) => EntityRef::new(EntityKind::Artist, id),
            SyncTarget::Album(id) => EntityRef::new(EntityKind::Album, id),
            SyncTarget::Podcast(id) => EntityRef::new(EntityKind::Podcast, id),
            SyncTarget::Directory(id) => EntityRef::new(EntityKind::Directory, id),
            SyncTarget::MusicFolder(id) => EntityRef::new(EntityKind::MusicFolder, id),
        };
        if matches!(
            parent.kind,
            EntityKind::Podcast | EntityKind::Directory | EntityKind::MusicFolder
        ) {
            self.require_support(parent.kind)?;
        }
        let kinds = child_kinds(parent.kind);
        self.sync_children(parent, kinds)
            .await
            .map(SyncOutcome::Entities)
    }

    async fn sync_children(&self, parent: EntityRef, kinds: &[EntityKind]) -> Result<ReconcileStats> {
        let epoch = self.latest_epoch().await?;
        if StoreContext::new(Arc::clone(&self.store))
            .find_by_id(parent.kind, &parent.id)
            .await?
            .is_none()
        {
            return Err(SyncError::EntityNotFound(parent.to_string()));
        }

        let mut total = ReconcileStats::default();
        for &kind in kinds {
            let scope = ParentScope::Entity(parent.clone());
            let mut ctx = StoreContext::new(Arc::clone(&self.store));
            let records = self
                .server
                .fetch_page(PageRequest::all(kind, scope.clone()))
                .await?;
            let stats = EntityReconciler::new(kind, scope, epoch)
                .run(&mut ctx, records)
                .await?;
            ctx.commit().await?;

            debug!(parent = %parent, kind = %kind, ?stats, "Children synced");
            self.emit_entities_changed(kind, stats);
            total.merge(stats);
        }
        Ok(total)
    }

    /// List the server's music folders.
    #[instrument(skip(self))]
    pub async fn sync_music_folders(&self) -> Result<ReconcileStats> {
        self.standalone_listing(EntityKind::MusicFolder).await
    }

    /// Podcast headers only; episodes are fetched per podcast.
    #[instrument(skip(self))]
    pub async fn sync_podcasts_without_episodes(&self) -> Result<ReconcileStats> {
        self.standalone_listing(EntityKind::Podcast).await
    }

    /// Playlist headers only; items are fetched per playlist.
    #[instrument(skip(self))]
    pub async fn sync_playlists_without_items(&self) -> Result<ReconcileStats> {
        self.require_support(EntityKind::Playlist)?;
        self.playlists.sync_playlist_list().await
    }

    /// Search the server and merge the results into the library. Nothing is
    /// removed; blank text is a no-op.
    #[instrument(skip(self))]
    pub async fn search_remote(&self, kind: EntityKind, text: &str) -> Result<ReconcileStats> {
        let text = text.trim();
        if text.is_empty() {
            return Ok(ReconcileStats::default());
        }
        if kind == EntityKind::Playlist {
            return Err(SyncError::InvalidInput(
                "Playlists cannot be searched; sync the playlist list instead".to_string(),
            ));
        }
        self.require_support(kind)?;
        let epoch = self.latest_epoch().await?;

        let mut ctx = StoreContext::new(Arc::clone(&self.store));
        let records = self.server.search(kind, text).await?;
        let stats = EntityReconciler::new(kind, ParentScope::Library, epoch)
            .run(&mut ctx, records)
            .await?;
        ctx.commit().await?;

        self.emit_entities_changed(kind, stats);
        Ok(stats)
    }

    async fn standalone_listing(&self, kind: EntityKind) -> Result<ReconcileStats> {
        self.require_support(kind)?;
        let epoch = self.latest_epoch().await?;
        let stats = self.sync_listing(kind, epoch).await?;
        self.emit_entities_changed(kind, stats);
        Ok(stats)
    }

    async fn sync_listing(&self, kind: EntityKind, epoch: EpochId) -> Result<ReconcileStats> {
        let mut ctx = StoreContext::new(Arc::clone(&self.store));
        let records = self
            .server
            .fetch_page(PageRequest::all(kind, ParentScope::Library))
            .await?;
        let stats = EntityReconciler::new(kind, ParentScope::Library, epoch)
            .with_removal(true)
            .run(&mut ctx, records)
            .await?;
        ctx.commit().await?;
        Ok(stats)
    }

    async fn latest_epoch(&self) -> Result<EpochId> {
        StoreContext::new(Arc::clone(&self.store))
            .latest_epoch()
            .await?
            .map(|epoch| epoch.id)
            .ok_or(SyncError::NoSyncEpoch)
    }

    fn require_support(&self, kind: EntityKind) -> Result<()> {
        if self.server.supports(kind) {
            Ok(())
        } else {
            Err(SyncError::unsupported(kind))
        }
    }

    fn emit_entities_changed(&self, kind: EntityKind, stats: ReconcileStats) {
        self.emit(CoreEvent::Library(LibraryEvent::EntitiesChanged {
            kind,
            added: stats.added,
            updated: stats.updated,
            removed: stats.removed,
        }));
    }

    fn emit(&self, event: CoreEvent) {
        self.event_bus.emit(event).ok();
    }
}

/// Child classes fetched, in order, by a partial sync of `parent`.
fn child_kinds(parent: EntityKind) -> &'static [EntityKind] {
    match parent {
        EntityKind::Artist => &[EntityKind::Album, EntityKind::Song],
        EntityKind::Album => &[EntityKind::Song],
        EntityKind::Podcast => &[EntityKind::PodcastEpisode],
        EntityKind::Directory => &[EntityKind::Directory, EntityKind::Song],
        EntityKind::MusicFolder => &[EntityKind::Directory],
        _ => &[],
    }
}

/// Page worker: fetch one page into a private unit of work and commit it.
async fn sync_page(
    server: Arc<dyn LibraryServerApi>,
    store: Arc<dyn LibraryStore>,
    request: PageRequest,
    epoch: EpochId,
) -> Result<ReconcileStats> {
    let kind = request.kind;
    let offset = request.offset;
    let mut ctx = StoreContext::new(store);
    let records = server.fetch_page(request).await?;
    let stats = EntityReconciler::new(kind, ParentScope::Library, epoch)
        .run(&mut ctx, records)
        .await?;
    let summary = ctx.commit().await?;
    debug!(kind = %kind, offset, created = summary.created, updated = summary.updated, "Page committed");
    Ok(stats)
}
