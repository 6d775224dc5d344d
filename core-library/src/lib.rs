//! # Library Catalog Module
//!
//! Owns the local view of the media catalog the sync engine writes into.
//!
//! ## Overview
//!
//! This module provides:
//! - Entity, playlist and sync-epoch models ([`models`])
//! - The store contract, the isolated unit of work and an in-memory store
//!   with JSON snapshots ([`store`])
//! - Order-preserving playlist operations ([`playlist`])

pub mod error;
pub mod models;
pub mod playlist;
pub mod store;

pub use error::{LibraryError, Result};
pub use models::{
    EpochId, EpochState, LibraryEntity, PlayableRef, Playlist, PlaylistId, PlaylistItem,
    SyncEpoch,
};
pub use playlist::PlaylistDelta;
pub use store::{
    ChangeSet, CommitSummary, EntityPatch, LibraryStore, MemoryLibraryStore, StoreContext,
};
