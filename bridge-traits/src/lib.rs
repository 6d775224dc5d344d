//! # Host Bridge Traits
//!
//! Contracts between the sync core and the outside world.
//!
//! ## Overview
//!
//! The core never talks to a media server directly. A host (or a dialect
//! crate) implements [`LibraryServerApi`](server::LibraryServerApi) for one
//! server family and hands it to the core. Everything the core reads from the
//! server arrives as the dialect-neutral [`RemoteRecord`](library::RemoteRecord)
//! model defined here.
//!
//! ## Traits
//!
//! - [`LibraryServerApi`](server::LibraryServerApi) - paginated catalog fetches,
//!   search, and playlist mutations, gated per entity class
//! - [`Clock`](time::Clock) - time source for deterministic testing
//! - [`LoggerSink`](time::LoggerSink) - forward structured logs to the host
//!
//! ## Error Handling
//!
//! All bridge traits use [`BridgeError`](error::BridgeError). Implementations
//! should map dialect error codes to `Rejected` and network faults to
//! `Transport`.
//!
//! ## Thread Safety
//!
//! Bridge traits require `Send + Sync`; the core shares one server handle
//! across all concurrently running page workers.

pub mod error;
pub mod library;
pub mod server;
pub mod time;

pub use error::BridgeError;

pub use library::{
    EntityKind, EntityRef, LibraryMetadata, PageRequest, ParentScope, RecordStream,
    RemotePlaylist, RemoteRecord,
};
pub use server::LibraryServerApi;
pub use time::{Clock, FixedClock, LogEntry, LogLevel, LoggerSink, MemoryLogSink, SystemClock};
