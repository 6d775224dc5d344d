//! Workspace umbrella crate.
//!
//! Re-exports the façade crates behind the `service` feature so a host can
//! depend on a single crate and still reach the engine and catalog types.

#[cfg(feature = "service")]
pub use core_library as library;
#[cfg(feature = "service")]
pub use core_service as service;
#[cfg(feature = "service")]
pub use core_sync as sync;

#[cfg(feature = "service")]
pub use core_service::{CoreDependencies, CoreError, CoreService};
