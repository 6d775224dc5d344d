//! # Core Configuration Module
//!
//! Builder-based configuration for the sync engine.
//!
//! ## Overview
//!
//! A [`CoreConfig`] bundles the remote server bridge with the engine's
//! tuning knobs. The builder enforces fail-fast validation: a missing server
//! bridge or an out-of-range setting is reported at `build()` time with an
//! actionable message, never later during a sync.
//!
//! ## Required Dependencies
//!
//! - `LibraryServerApi` - the remote media-server dialect to sync against
//!
//! ## Settings
//!
//! | Setting | Default | Range |
//! |---------|---------|-------|
//! | `max_concurrent_pages` | 5 | 1..=64 |
//! | `page_size` | 500 | 1..=10 000 |
//! | `prune_stale_entities` | true | |
//! | `event_buffer_size` | 100 | > 0 |
//!
//! The numeric settings live in [`SyncSettings`], which serializes to JSON so
//! hosts can persist them alongside their own preferences.
//!
//! ## Usage
//!
//! ```ignore
//! use core_runtime::config::CoreConfig;
//! use std::sync::Arc;
//!
//! let config = CoreConfig::builder()
//!     .server(Arc::new(MyAmpacheServer::new(credentials)))
//!     .max_concurrent_pages(3)
//!     .page_size(250)
//!     .build()?;
//! ```
//!
//! ## Error Handling
//!
//! ```ignore
//! use core_runtime::config::CoreConfig;
//!
//! // Fails with Error::CapabilityMissing: no server bridge
//! let err = CoreConfig::builder().build().unwrap_err();
//! ```

use crate::error::{Error, Result};
use crate::events::DEFAULT_EVENT_BUFFER_SIZE;
use crate::logging::LoggingConfig;
use bridge_traits::LibraryServerApi;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

pub const DEFAULT_MAX_CONCURRENT_PAGES: usize = 5;
pub const DEFAULT_PAGE_SIZE: usize = 500;
pub const MAX_CONCURRENT_PAGES_LIMIT: usize = 64;
pub const MAX_PAGE_SIZE: usize = 10_000;

/// Tunable sync settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncSettings {
    /// Upper bound of concurrently fetched pages (limiter capacity)
    pub max_concurrent_pages: usize,

    /// Records requested per page
    pub page_size: usize,

    /// Delete entities not seen by a complete paged phase
    pub prune_stale_entities: bool,

    /// Event bus capacity
    pub event_buffer_size: usize,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            max_concurrent_pages: DEFAULT_MAX_CONCURRENT_PAGES,
            page_size: DEFAULT_PAGE_SIZE,
            prune_stale_entities: true,
            event_buffer_size: DEFAULT_EVENT_BUFFER_SIZE,
        }
    }
}

impl SyncSettings {
    pub fn validate(&self) -> Result<()> {
        if self.max_concurrent_pages == 0 || self.max_concurrent_pages > MAX_CONCURRENT_PAGES_LIMIT
        {
            return Err(Error::Config(format!(
                "max_concurrent_pages must be between 1 and {}, got {}",
                MAX_CONCURRENT_PAGES_LIMIT, self.max_concurrent_pages
            )));
        }

        if self.page_size == 0 || self.page_size > MAX_PAGE_SIZE {
            return Err(Error::Config(format!(
                "page_size must be between 1 and {}, got {}",
                MAX_PAGE_SIZE, self.page_size
            )));
        }

        if self.event_buffer_size == 0 {
            return Err(Error::Config(
                "event_buffer_size must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }

    /// Parse settings persisted as JSON; missing keys take their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        let settings: SyncSettings = serde_json::from_str(json)
            .map_err(|e| Error::Config(format!("Invalid sync settings JSON: {}", e)))?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| Error::Internal(format!("Failed to serialize sync settings: {}", e)))
    }
}

/// Core configuration for the sync engine.
///
/// Use [`CoreConfigBuilder`] to construct instances.
#[derive(Clone)]
pub struct CoreConfig {
    /// Remote media server (required)
    pub server: Arc<dyn LibraryServerApi>,

    pub settings: SyncSettings,

    pub logging: LoggingConfig,
}

impl std::fmt::Debug for CoreConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoreConfig")
            .field(
                "server",
                &format!("LibraryServerApi {{ dialect: {} }}", self.server.dialect()),
            )
            .field("settings", &self.settings)
            .field("logging", &self.logging)
            .finish()
    }
}

impl CoreConfig {
    pub fn builder() -> CoreConfigBuilder {
        CoreConfigBuilder::default()
    }

    /// Validates the configuration and returns an error if invalid.
    pub fn validate(&self) -> Result<()> {
        if self.server.dialect().trim().is_empty() {
            return Err(Error::Config(
                "Server bridge reports an empty dialect name".to_string(),
            ));
        }

        self.settings.validate()
    }
}

fn server_missing_error() -> Error {
    Error::CapabilityMissing {
        capability: "LibraryServerApi".to_string(),
        message: "A media server bridge is required to sync the library. \
                 Inject the dialect implementation (Ampache, Subsonic, ...) with .server()."
            .to_string(),
    }
}

/// Builder for constructing [`CoreConfig`] instances.
#[derive(Default)]
pub struct CoreConfigBuilder {
    server: Option<Arc<dyn LibraryServerApi>>,
    settings: SyncSettings,
    logging: Option<LoggingConfig>,
}

impl CoreConfigBuilder {
    /// Sets the remote media server bridge.
    pub fn server(mut self, server: Arc<dyn LibraryServerApi>) -> Self {
        self.server = Some(server);
        self
    }

    /// Sets the limiter capacity.
    ///
    /// Default: 5
    pub fn max_concurrent_pages(mut self, pages: usize) -> Self {
        self.settings.max_concurrent_pages = pages;
        self
    }

    /// Default: 500
    pub fn page_size(mut self, size: usize) -> Self {
        self.settings.page_size = size;
        self
    }

    /// Default: true
    pub fn prune_stale_entities(mut self, enabled: bool) -> Self {
        self.settings.prune_stale_entities = enabled;
        self
    }

    /// Default: 100
    pub fn event_buffer_size(mut self, size: usize) -> Self {
        self.settings.event_buffer_size = size;
        self
    }

    /// Replaces all numeric settings at once, e.g. with settings loaded by
    /// [`SyncSettings::from_json`].
    pub fn settings(mut self, settings: SyncSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn logging(mut self, logging: LoggingConfig) -> Self {
        self.logging = Some(logging);
        self
    }

    /// Builds the final `CoreConfig`, validating it first.
    ///
    /// # Errors
    ///
    /// - [`Error::CapabilityMissing`] when no server bridge was provided
    /// - [`Error::Config`] when a setting is out of range
    pub fn build(self) -> Result<CoreConfig> {
        let server = self.server.ok_or_else(server_missing_error)?;

        let config = CoreConfig {
            server,
            settings: self.settings,
            logging: self.logging.unwrap_or_default(),
        };

        config.validate()?;

        Ok(config)
    }
}
