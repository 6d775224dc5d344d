//! # Playlist Order Reconciler
//!
//! Keeps the `order` of a playlist's items a dense `0..count` sequence.
//!
//! ## Overview
//!
//! Items are stored sorted by `order`, so an item's position doubles as its
//! index. Every mutation below preserves the invariant when it held before;
//! [`Playlist::ensure_consistent_item_order`] repairs it when it did not
//! (stored data from an interrupted write, for example).
//!
//! ## Usage
//!
//! ```rust
//! use core_library::models::{PlayableRef, Playlist};
//!
//! let mut playlist = Playlist::new("Morning");
//! for id in ["a", "b", "c", "d"] {
//!     playlist.append(PlayableRef::song(id));
//! }
//! playlist.move_item(0, 3);
//! assert_eq!(playlist.playable_ids(), vec!["b", "c", "d", "a"]);
//! ```

use rand::seq::SliceRandom;
use rand::Rng;
use tracing::debug;

use crate::models::{PlayableRef, Playlist, PlaylistItem};

/// Outcome of [`Playlist::reconcile_from_remote`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PlaylistDelta {
    pub reused: usize,
    pub created: usize,
    /// Reused items whose playable changed.
    pub changed: usize,
    /// Trailing items the remote no longer has.
    pub removed: usize,
}

impl PlaylistDelta {
    pub fn is_unchanged(&self) -> bool {
        self.created == 0 && self.changed == 0 && self.removed == 0
    }
}

impl Playlist {
    fn resort(&mut self) {
        self.items.sort_by_key(|item| item.order);
    }

    pub fn append(&mut self, playable: PlayableRef) {
        let order = self.items.len() as u32;
        self.items.push(PlaylistItem::new(order, Some(playable)));
        self.touch();
    }

    pub fn append_all(&mut self, playables: impl IntoIterator<Item = PlayableRef>) {
        for playable in playables {
            self.append(playable);
        }
    }

    /// Remove the item at `index`; out-of-range indices are ignored.
    pub fn remove_at(&mut self, index: usize) -> Option<PlaylistItem> {
        if index >= self.items.len() {
            return None;
        }
        let removed = self.items.remove(index);
        for item in &mut self.items {
            if item.order as usize > index {
                item.order -= 1;
            }
        }
        self.touch();
        Some(removed)
    }

    /// Index of the first item referencing `playable`.
    pub fn first_index_of(&self, playable: &PlayableRef) -> Option<usize> {
        self.items
            .iter()
            .position(|item| item.playable.as_ref() == Some(playable))
    }

    /// Remove the first item referencing `playable`, if any.
    pub fn remove_first_occurrence(&mut self, playable: &PlayableRef) -> Option<PlaylistItem> {
        let index = self.first_index_of(playable)?;
        self.remove_at(index)
    }

    /// Drop every item. Returns how many were removed.
    pub fn remove_all(&mut self) -> usize {
        let removed = self.items.len();
        if removed > 0 {
            self.items.clear();
            self.touch();
        }
        removed
    }

    /// Move the item at `from` to `to`, shifting the items in between by one
    /// toward the vacated slot. No-op when `from == to` or either index is out
    /// of range; returns whether anything moved.
    pub fn move_item(&mut self, from: usize, to: usize) -> bool {
        let count = self.items.len();
        if from >= count || to >= count || from == to {
            return false;
        }

        let target_order = self.items[to].order;
        if from < to {
            for item in &mut self.items[from + 1..=to] {
                item.order = item.order.saturating_sub(1);
            }
        } else {
            for item in &mut self.items[to..from] {
                item.order += 1;
            }
        }
        self.items[from].order = target_order;

        let moved = self.items.remove(from);
        self.items.insert(to, moved);
        self.resort();
        self.touch();
        true
    }

    /// Assign a uniform random permutation of `0..count` to the items.
    pub fn shuffle<R: Rng + ?Sized>(&mut self, rng: &mut R) {
        if self.items.is_empty() {
            return;
        }
        let mut orders: Vec<u32> = (0..self.items.len() as u32).collect();
        orders.shuffle(rng);
        for (item, order) in self.items.iter_mut().zip(orders) {
            item.order = order;
        }
        self.resort();
        self.touch();
    }

    /// Align the items with the server's ordered entry list.
    ///
    /// Items are reused by position and take `order = position`, so stored
    /// gaps do not survive; a reused item whose playable differs
    /// marks the playlist as changed. Local items beyond the remote length
    /// are deleted.
    pub fn reconcile_from_remote<I>(&mut self, remote: I) -> PlaylistDelta
    where
        I: IntoIterator<Item = Option<PlayableRef>>,
    {
        let mut delta = PlaylistDelta::default();
        let mut seen = 0usize;

        for (index, playable) in remote.into_iter().enumerate() {
            seen = index + 1;
            match self.items.get_mut(index) {
                Some(item) => {
                    delta.reused += 1;
                    item.order = index as u32;
                    if item.playable != playable {
                        item.playable = playable;
                        delta.changed += 1;
                    }
                }
                None => {
                    self.items
                        .push(PlaylistItem::new(index as u32, playable));
                    delta.created += 1;
                }
            }
        }

        if self.items.len() > seen {
            delta.removed = self.items.len() - seen;
            self.items.truncate(seen);
        }

        if !delta.is_unchanged() {
            self.changed_since_sync = true;
            self.touch();
        }
        delta
    }

    /// Reassign `order = position` wherever they differ. Returns whether a
    /// repair was needed; running it twice is a no-op the second time.
    pub fn ensure_consistent_item_order(&mut self) -> bool {
        self.resort();
        let mut repaired = false;
        for (position, item) in self.items.iter_mut().enumerate() {
            if item.order as usize != position {
                item.order = position as u32;
                repaired = true;
            }
        }
        if repaired {
            debug!(playlist = %self.id, "Playlist item order repaired");
            self.touch();
        }
        repaired
    }

    /// Null every item pointing at `playable`; returns how many were hit.
    pub fn detach_playable(&mut self, playable: &PlayableRef) -> usize {
        let mut detached = 0;
        for item in &mut self.items {
            if item.playable.as_ref() == Some(playable) {
                item.playable = None;
                detached += 1;
            }
        }
        detached
    }

    /// Order of the nearest cached item strictly below `downwards_from`.
    pub fn previous_cached_index<F>(&self, downwards_from: usize, is_cached: F) -> Option<u32>
    where
        F: Fn(&PlayableRef) -> bool,
    {
        if downwards_from > self.items.len() {
            return None;
        }
        self.items
            .iter()
            .rev()
            .filter(|item| item.playable.as_ref().is_some_and(&is_cached))
            .find(|item| (item.order as usize) < downwards_from)
            .map(|item| item.order)
    }

    /// Order of the nearest cached item strictly above `upwards_from`.
    pub fn next_cached_index<F>(&self, upwards_from: usize, is_cached: F) -> Option<u32>
    where
        F: Fn(&PlayableRef) -> bool,
    {
        if upwards_from >= self.items.len() {
            return None;
        }
        self.items
            .iter()
            .filter(|item| item.playable.as_ref().is_some_and(&is_cached))
            .find(|item| item.order as usize > upwards_from)
            .map(|item| item.order)
    }

    /// Like [`Playlist::previous_cached_index`] but includes `beginning_at`.
    pub fn previous_cached_index_from<F>(&self, beginning_at: usize, is_cached: F) -> Option<u32>
    where
        F: Fn(&PlayableRef) -> bool,
    {
        self.previous_cached_index(beginning_at + 1, is_cached)
    }

    /// Like [`Playlist::next_cached_index`] but includes `beginning_at`.
    pub fn next_cached_index_from<F>(&self, beginning_at: usize, is_cached: F) -> Option<u32>
    where
        F: Fn(&PlayableRef) -> bool,
    {
        if beginning_at > self.items.len() {
            return None;
        }
        self.items
            .iter()
            .filter(|item| item.playable.as_ref().is_some_and(&is_cached))
            .find(|item| item.order as usize >= beginning_at)
            .map(|item| item.order)
    }
}
