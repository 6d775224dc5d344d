//! # Core Runtime Module
//!
//! Ambient infrastructure shared by the sync engine crates:
//! - Logging and tracing setup ([`logging`])
//! - Configuration with fail-fast validation ([`config`])
//! - Event bus for sync progress and library changes ([`events`])
//!
//! ## Overview
//!
//! Nothing in here knows how a library is reconciled. The crate establishes
//! the conventions the other crates follow: `tracing` for diagnostics, a
//! builder-validated [`CoreConfig`](config::CoreConfig) for settings, and a
//! broadcast [`EventBus`](events::EventBus) for progress reporting.

pub mod config;
pub mod error;
pub mod events;
pub mod logging;

pub use config::{CoreConfig, CoreConfigBuilder, SyncSettings};
pub use error::{Error, Result};
pub use events::{CoreEvent, EventBus, EventStream, LibraryEvent, SyncEvent};
