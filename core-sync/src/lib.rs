//! # Library Synchronization Module
//!
//! Reconciles the local library catalog with a remote media server.
//!
//! ## Overview
//!
//! This module manages:
//! - Bounded-concurrency page fetching with a phase barrier
//! - Streaming add/update/remove reconciliation per parent collection
//! - Playlist item synchronization in both directions
//! - Multi-phase full syncs and single-parent partial syncs
//!
//! ## Components
//!
//! - **Slot Limiter** (`limiter`): Bounds in-flight pages and provides the barrier
//! - **Entity Descriptors** (`descriptor`): Per-class naming and removal rules
//! - **Entity Reconciler** (`reconciler`): Generic streaming diff/merge
//! - **Playlist Syncer** (`playlist_sync`): Down and up sync of playlist items
//! - **Sync Coordinator** (`coordinator`): Orchestrates full and partial syncs

pub mod coordinator;
pub mod descriptor;
pub mod error;
pub mod limiter;
pub mod playlist_sync;
pub mod reconciler;

pub use coordinator::{
    page_count, FullSyncReport, PhaseReport, SyncConfig, SyncCoordinator, SyncOutcome, SyncTarget,
    FULL_SYNC_PHASES,
};
pub use descriptor::{EntityDescriptor, RemovalAction};
pub use error::{Result, SyncError};
pub use limiter::{SlotLimiter, SlotPermit};
pub use playlist_sync::PlaylistSyncer;
pub use reconciler::{prune_stale, EntityReconciler, ReconcileStats, RecordOutcome};
