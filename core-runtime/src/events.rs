//! # Event Bus System
//!
//! Broadcasts sync progress and library changes to any number of listeners
//! using `tokio::sync::broadcast`.
//!
//! ## Overview
//!
//! The event bus system consists of:
//! - **Event Types**: [`SyncEvent`] for run/phase/page progress and
//!   [`LibraryEvent`] for changes to the local catalog
//! - **EventBus**: Central broadcast channel for publishing events
//! - **EventStream**: Receiver wrapper with optional filtering
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────┐   emit    ┌───────────┐
//! │ SyncCoordinator  ├──────────>│           │   subscribe   ┌──────────────┐
//! └──────────────────┘           │ EventBus  ├──────────────>│ UI progress  │
//! ┌──────────────────┐   emit    │ (broadcast│               └──────────────┘
//! │ PlaylistSyncer   ├──────────>│  channel) │   subscribe   ┌──────────────┐
//! └──────────────────┘           │           ├──────────────>│ Automation   │
//!                                └───────────┘               └──────────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust
//! use bridge_traits::EntityKind;
//! use core_runtime::events::{CoreEvent, EventBus, EventStream, SyncEvent};
//!
//! # #[tokio::main]
//! # async fn main() {
//! let bus = EventBus::new(100);
//! let mut stream = EventStream::new(bus.subscribe()).filter(CoreEvent::is_terminal);
//!
//! bus.emit(CoreEvent::Sync(SyncEvent::PhaseStarted {
//!     kind: EntityKind::Artist,
//!     pages: 3,
//! }))
//! .ok();
//! bus.emit(CoreEvent::Sync(SyncEvent::Finished { epoch: 1, duration_ms: 40 }))
//!     .ok();
//!
//! let event = stream.recv().await.unwrap();
//! assert!(matches!(event, CoreEvent::Sync(SyncEvent::Finished { .. })));
//! # }
//! ```
//!
//! ## Terminal Events
//!
//! Every full sync ends with exactly one of:
//! - `Finished`: all phases and pages succeeded
//! - `FinishedWithErrors`: at least one page failed; committed pages stand
//! - `Aborted`: the run stopped early (metadata unavailable, persistence
//!   failure or cancellation)
//!
//! ## Error Handling
//!
//! - **`RecvError::Lagged(n)`**: the subscriber missed `n` events; it can keep
//!   receiving.
//! - **`RecvError::Closed`**: every sender is gone; treat as shutdown.
//!
//! Emitting with no subscribers returns an error that publishers ignore.

use bridge_traits::EntityKind;
use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::broadcast;

pub use tokio::sync::broadcast::error::{RecvError, SendError};
pub use tokio::sync::broadcast::Receiver;

pub const DEFAULT_EVENT_BUFFER_SIZE: usize = 100;

// ============================================================================
// Core Event Types
// ============================================================================

/// Top-level event carried by the [`EventBus`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", content = "payload")]
pub enum CoreEvent {
    Sync(SyncEvent),
    Library(LibraryEvent),
}

impl CoreEvent {
    pub fn description(&self) -> &str {
        match self {
            CoreEvent::Sync(e) => e.description(),
            CoreEvent::Library(e) => e.description(),
        }
    }

    pub fn severity(&self) -> EventSeverity {
        match self {
            CoreEvent::Sync(SyncEvent::Aborted { .. }) => EventSeverity::Error,
            CoreEvent::Sync(SyncEvent::PageFailed { .. })
            | CoreEvent::Sync(SyncEvent::FinishedWithErrors { .. })
            | CoreEvent::Sync(SyncEvent::PhaseSkipped { .. }) => EventSeverity::Warning,
            CoreEvent::Sync(SyncEvent::Started { .. })
            | CoreEvent::Sync(SyncEvent::Finished { .. }) => EventSeverity::Info,
            _ => EventSeverity::Debug,
        }
    }

    /// Whether this event ends a full sync run.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            CoreEvent::Sync(
                SyncEvent::Finished { .. }
                    | SyncEvent::FinishedWithErrors { .. }
                    | SyncEvent::Aborted { .. }
            )
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EventSeverity {
    Debug,
    Info,
    Warning,
    Error,
}

// ============================================================================
// Sync Events
// ============================================================================

/// Progress of a sync run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum SyncEvent {
    /// A full sync opened `epoch`.
    Started { epoch: u32 },
    /// A phase began; `pages` is 0 for unpaged phases.
    PhaseStarted { kind: EntityKind, pages: usize },
    PageFailed {
        kind: EntityKind,
        page: usize,
        message: String,
    },
    /// The server does not support `kind`; the run continues.
    PhaseSkipped { kind: EntityKind, reason: String },
    PhaseFinished {
        kind: EntityKind,
        added: usize,
        updated: usize,
        removed: usize,
        failed_pages: usize,
    },
    Finished { epoch: u32, duration_ms: u64 },
    FinishedWithErrors {
        epoch: u32,
        failed_pages: usize,
        duration_ms: u64,
    },
    /// The run ended early; nothing after the failing step was applied.
    Aborted { message: String },
}

impl SyncEvent {
    fn description(&self) -> &str {
        match self {
            SyncEvent::Started { .. } => "Sync started",
            SyncEvent::PhaseStarted { .. } => "Sync phase started",
            SyncEvent::PageFailed { .. } => "Sync page failed",
            SyncEvent::PhaseSkipped { .. } => "Sync phase skipped",
            SyncEvent::PhaseFinished { .. } => "Sync phase finished",
            SyncEvent::Finished { .. } => "Sync finished",
            SyncEvent::FinishedWithErrors { .. } => "Sync finished with errors",
            SyncEvent::Aborted { .. } => "Sync aborted",
        }
    }
}

// ============================================================================
// Library Events
// ============================================================================

/// Changes to the local catalog outside of a full run's phase reports.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum LibraryEvent {
    PlaylistCreated {
        playlist_id: String,
        name: String,
    },
    PlaylistUpdated {
        playlist_id: String,
        change_type: String,
    },
    PlaylistDeleted {
        playlist_id: String,
    },
    /// Result of a partial sync or a remote search.
    EntitiesChanged {
        kind: EntityKind,
        added: usize,
        updated: usize,
        removed: usize,
    },
}

impl LibraryEvent {
    fn description(&self) -> &str {
        match self {
            LibraryEvent::PlaylistCreated { .. } => "Playlist created",
            LibraryEvent::PlaylistUpdated { .. } => "Playlist updated",
            LibraryEvent::PlaylistDeleted { .. } => "Playlist deleted",
            LibraryEvent::EntitiesChanged { .. } => "Library entities changed",
        }
    }
}

// ============================================================================
// Event Bus
// ============================================================================

/// Cloneable handle to the broadcast channel.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<CoreEvent>,
}

impl EventBus {
    /// Creates a bus buffering up to `capacity` events per lagging subscriber.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Returns the number of subscribers that received the event.
    pub fn emit(&self, event: CoreEvent) -> Result<usize, SendError<CoreEvent>> {
        self.sender.send(event)
    }

    pub fn subscribe(&self) -> Receiver<CoreEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_BUFFER_SIZE)
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("subscriber_count", &self.subscriber_count())
            .finish()
    }
}

// ============================================================================
// Event Stream Wrapper
// ============================================================================

type EventFilter = Box<dyn Fn(&CoreEvent) -> bool + Send + Sync>;

/// Receiver that skips events rejected by an optional predicate.
pub struct EventStream {
    receiver: Receiver<CoreEvent>,
    filter: Option<EventFilter>,
}

impl EventStream {
    pub fn new(receiver: Receiver<CoreEvent>) -> Self {
        Self {
            receiver,
            filter: None,
        }
    }

    pub fn filter<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&CoreEvent) -> bool + Send + Sync + 'static,
    {
        self.filter = Some(Box::new(predicate));
        self
    }

    fn accepts(&self, event: &CoreEvent) -> bool {
        self.filter.as_ref().map_or(true, |filter| filter(event))
    }

    pub async fn recv(&mut self) -> Result<CoreEvent, RecvError> {
        loop {
            let event = self.receiver.recv().await?;
            if self.accepts(&event) {
                return Ok(event);
            }
        }
    }

    /// Non-blocking receive; `None` when no matching event is queued.
    pub fn try_recv(&mut self) -> Option<Result<CoreEvent, RecvError>> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) => {
                    if self.accepts(&event) {
                        return Some(Ok(event));
                    }
                }
                Err(broadcast::error::TryRecvError::Empty) => return None,
                Err(broadcast::error::TryRecvError::Lagged(n)) => {
                    return Some(Err(RecvError::Lagged(n)))
                }
                Err(broadcast::error::TryRecvError::Closed) => return Some(Err(RecvError::Closed)),
            }
        }
    }
}

impl fmt::Debug for EventStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventStream")
            .field("has_filter", &self.filter.is_some())
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================
