use bridge_traits::BridgeError;
use core_library::LibraryError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SyncError {
    /// Network or protocol failure reported by the server bridge.
    #[error("Transport error: {0}")]
    Transport(#[from] BridgeError),

    #[error("Operation not supported by the server: {capability}")]
    Unsupported { capability: String },

    /// The local store could not read or commit. Fatal for a run.
    #[error("Persistence error: {0}")]
    Persistence(#[from] LibraryError),

    #[error("Library metadata unavailable: {0}")]
    MetadataUnavailable(String),

    #[error("A full sync is already in progress")]
    SyncInProgress,

    #[error("No sync epoch exists yet; run a full sync first")]
    NoSyncEpoch,

    #[error("Playlist {0} not found")]
    PlaylistNotFound(String),

    #[error("Entity {0} not found")]
    EntityNotFound(String),

    #[error("Playlist '{name}' could not be created on the server: {message}")]
    PlaylistNotCreated { name: String, message: String },

    #[error("Sync cancelled")]
    Cancelled,

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl SyncError {
    pub fn unsupported(capability: impl std::fmt::Display) -> Self {
        SyncError::Unsupported {
            capability: capability.to_string(),
        }
    }

    /// Errors that must end a full run instead of being reported per page.
    pub fn is_fatal(&self) -> bool {
        matches!(self, SyncError::Persistence(_) | SyncError::Cancelled)
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;
