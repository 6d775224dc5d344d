//! # Page Slot Limiter
//!
//! Bounds how many page fetches are in flight during one sync run.
//!
//! ## Overview
//!
//! - [`SlotLimiter::acquire`] waits until fewer than `capacity` slots are
//!   outstanding, then hands out a [`SlotPermit`]
//! - Dropping the permit releases the slot, so a worker that fails or panics
//!   still gives its slot back
//! - [`SlotLimiter::wait_idle`] is the phase barrier: it resolves once every
//!   outstanding slot has been released
//! - [`SlotLimiter::cancel`] wakes all waiters without granting new slots;
//!   permits already handed out stay valid until their workers finish
//!
//! ## Usage
//!
//! ```ignore
//! let limiter = SlotLimiter::new(5);
//! for page in 0..pages {
//!     let permit = limiter.acquire().await?;
//!     tokio::spawn(async move {
//!         let _permit = permit;
//!         fetch_page(page).await
//!     });
//! }
//! limiter.wait_idle().await;
//! ```

use std::sync::Arc;
use tokio::sync::{watch, OwnedSemaphorePermit, Semaphore};

use crate::error::{Result, SyncError};

/// Counting limiter shared by the dispatcher and its page workers.
#[derive(Debug, Clone)]
pub struct SlotLimiter {
    semaphore: Arc<Semaphore>,
    outstanding: Arc<watch::Sender<usize>>,
    capacity: usize,
}

/// One reserved slot. Released on drop.
#[derive(Debug)]
pub struct SlotPermit {
    outstanding: Arc<watch::Sender<usize>>,
    _permit: OwnedSemaphorePermit,
}

impl Drop for SlotPermit {
    fn drop(&mut self) {
        // The count drops before the semaphore permit, so `outstanding`
        // never exceeds the capacity.
        self.outstanding
            .send_modify(|count| *count = count.saturating_sub(1));
    }
}

impl SlotLimiter {
    /// Create a limiter with `capacity` slots (at least one).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (outstanding, _) = watch::channel(0);
        Self {
            semaphore: Arc::new(Semaphore::new(capacity)),
            outstanding: Arc::new(outstanding),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of slots currently handed out.
    pub fn outstanding(&self) -> usize {
        *self.outstanding.borrow()
    }

    /// Reserve a slot, waiting while all of them are taken.
    ///
    /// Returns [`SyncError::Cancelled`] once the limiter was cancelled.
    pub async fn acquire(&self) -> Result<SlotPermit> {
        let permit = Arc::clone(&self.semaphore)
            .acquire_owned()
            .await
            .map_err(|_| SyncError::Cancelled)?;
        self.outstanding.send_modify(|count| *count += 1);
        Ok(SlotPermit {
            outstanding: Arc::clone(&self.outstanding),
            _permit: permit,
        })
    }

    /// Wait until no slot is outstanding.
    pub async fn wait_idle(&self) {
        let mut receiver = self.outstanding.subscribe();
        // The sender lives as long as `self`, so this cannot fail.
        let _ = receiver.wait_for(|count| *count == 0).await;
    }

    /// Release all waiters and refuse further acquisitions.
    pub fn cancel(&self) {
        self.semaphore.close();
    }

    pub fn is_cancelled(&self) -> bool {
        self.semaphore.is_closed()
    }
}
