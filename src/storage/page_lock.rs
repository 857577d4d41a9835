//! # Per-Offset Page Locks
//!
//! This module implements [`PageLock`], a map from byte offsets to
//! reader-writer locks. Transactions use one instance keyed by record
//! offsets (readers take shared locks while copying record bytes out of the
//! mapping; commit takes exclusive locks while patching headers in place)
//! and a second instance keyed by index node ids (commit serializes per-key
//! publication).
//!
//! ## Structure
//!
//! A coarse mutex guards the registry. `lock` looks up or creates the entry
//! for an offset, clones its `Arc`, releases the registry mutex, and only
//! then acquires the inner lock in the requested mode, so waiting on a
//! contended page never blocks lock traffic for other pages.
//!
//! Entries are never reclaimed; the registry is bounded by the number of
//! distinct offsets ever locked.
//!
//! ## Guards
//!
//! `lock` returns a [`PageGuard`] that releases on drop, so every exit path
//! (including error propagation mid-commit) balances its acquisitions.

use std::sync::Arc;

use hashbrown::HashMap;
use parking_lot::lock_api::{ArcRwLockReadGuard, ArcRwLockWriteGuard};
use parking_lot::{Mutex, RawRwLock, RwLock};

#[derive(Debug, Default)]
pub struct PageLock {
    entries: Mutex<HashMap<i64, Arc<RwLock<()>>>>,
}

/// Holds a page lock until dropped.
#[must_use = "the page is only locked while the guard is alive"]
pub enum PageGuard {
    Shared(ArcRwLockReadGuard<RawRwLock, ()>),
    Exclusive(ArcRwLockWriteGuard<RawRwLock, ()>),
}

impl PageLock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Locks `offset` shared (`readonly`) or exclusive.
    pub fn lock(&self, offset: i64, readonly: bool) -> PageGuard {
        let entry = {
            let mut entries = self.entries.lock();
            Arc::clone(
                entries
                    .entry(offset)
                    .or_insert_with(|| Arc::new(RwLock::new(()))),
            )
        };

        if readonly {
            PageGuard::Shared(entry.read_arc())
        } else {
            PageGuard::Exclusive(entry.write_arc())
        }
    }

    /// Number of offsets that have ever been locked.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}
