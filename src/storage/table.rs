//! # Data Table
//!
//! This module implements [`Table`], a file mapped into the process address
//! space as one growable contiguous byte region with random-access reads and
//! append-style writes.
//!
//! ## Growth
//!
//! The file grows in page-aligned steps: each step doubles the current size,
//! clamped to `[MIN_STEP, MAX_STEP]`. Growth is serialized by a dedicated
//! mutex and double-checked under it, so concurrent writers that outrun the
//! mapping trigger exactly one truncate + remap. The new view is published
//! atomically by swapping the shared mapping handle; the superseded view is
//! marked stale and unmapped once its last reference drops.
//!
//! ```text
//! writer A ──┐                       ┌── readers keep old view alive
//!            ├─> grow lock ─> ftruncate ─> map new ─> publish ─> stale old
//! writer B ──┘   (double-check: another writer may have grown already)
//! ```
//!
//! A writer that loses the race copies through the superseded view only if
//! its region still fits; otherwise the write fails with `MappingClosed`,
//! the writer re-reads the published handle and retries. No write is ever
//! lost to a concurrent remap.
//!
//! ## Allocation and the Append Cursor
//!
//! Offsets are assigned by the owned [`FreeList`]: first-fit reservation is
//! sequential until regions are released, so fresh tables fill front to
//! back. `position` is the high-water append cursor: it advances atomically
//! when a write reserves past it, and reload restores it so re-opened tables
//! keep appending where they left off.
//!
//! ## Concurrency
//!
//! | State            | Mutation                       |
//! |------------------|--------------------------------|
//! | mapping handle   | atomic swap under the grow lock |
//! | append position  | atomic max                     |
//! | free list        | its own mutex                  |
//!
//! Reads are lock-free: they clone the current mapping handle and borrow
//! bytes from it. A read concurrent with growth waits for nothing; it simply
//! sees whichever view was current when it started.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use eyre::{ensure, Result, WrapErr};
use parking_lot::{Mutex, RwLock};
use tracing::debug;

use super::{FreeList, Mapping, TableSlice};
use crate::config::{MAX_STEP, MAX_TABLE_SIZE, MIN_STEP};
use crate::error::StoreError;

#[derive(Debug)]
pub struct Table {
    file: File,
    path: PathBuf,
    free: FreeList,
    mapping: RwLock<Arc<Mapping>>,
    position: AtomicI64,
    grow_lock: Mutex<()>,
}

impl Table {
    /// Opens or creates the file at `path` and maps it. A file smaller than
    /// `MIN_STEP` (including a freshly created one) is first truncated up to
    /// `MIN_STEP`.
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&path)
            .wrap_err_with(|| format!("failed to open table file '{}'", path.display()))?;

        let size = file
            .metadata()
            .wrap_err_with(|| format!("failed to stat '{}'", path.display()))?
            .len() as i64;

        if size < MIN_STEP {
            file.set_len(MIN_STEP as u64)
                .wrap_err_with(|| format!("failed to size '{}' to {MIN_STEP} bytes", path.display()))?;
        }

        let mapping = Mapping::map(&file)
            .wrap_err_with(|| format!("failed to map '{}'", path.display()))?;

        Ok(Self {
            file,
            path,
            free: FreeList::new(MAX_TABLE_SIZE),
            mapping: RwLock::new(Arc::new(mapping)),
            position: AtomicI64::new(0),
            grow_lock: Mutex::new(()),
        })
    }

    /// The allocation manager for this table's byte range.
    pub fn free(&self) -> &FreeList {
        &self.free
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current mapped byte count.
    pub fn size(&self) -> i64 {
        self.current().len()
    }

    /// High-water append cursor.
    pub fn position(&self) -> i64 {
        self.position.load(Ordering::Acquire)
    }

    /// Overrides the append cursor; reload uses this to resume where the
    /// previous process stopped.
    pub fn set_position(&self, position: i64) {
        self.position.store(position, Ordering::Release);
    }

    /// Borrows `size` bytes at `offset` from the current view. Fails with
    /// `BoundsViolation` if the range exceeds the mapped extent. The
    /// returned slice stays valid across concurrent growth; copy it out if
    /// it must outlive the guard.
    pub fn read(&self, size: i64, offset: i64) -> Result<TableSlice> {
        self.current().slice(size, offset)
    }

    /// Reserves space for `data`, growing the file if needed, copies the
    /// bytes in, and returns the assigned offset.
    pub fn write(&self, data: &[u8]) -> Result<i64> {
        let len = data.len() as i64;
        check_record_len(len)?;

        let offset = self.free.reserve(len)?;
        self.position.fetch_max(offset + len, Ordering::AcqRel);

        if let Err(err) = self.write_reserved(data, offset) {
            self.free.release(len, offset);
            return Err(err);
        }

        Ok(offset)
    }

    /// Overwrites `data.len()` bytes in place at a known offset. The range
    /// must already lie inside the file; `write_at` never grows it.
    pub fn write_at(&self, data: &[u8], offset: i64) -> Result<()> {
        loop {
            match self.current().write(data, offset) {
                Err(err) if StoreError::MappingClosed.is(&err) => continue,
                other => return other,
            }
        }
    }

    /// Copies into a freshly reserved region, growing the mapping first when
    /// the region lies past its end.
    fn write_reserved(&self, data: &[u8], offset: i64) -> Result<()> {
        let end = offset + data.len() as i64;

        loop {
            let mapping = self.current();

            if end > mapping.len() {
                self.grow(end)?;
                continue;
            }

            match mapping.write(data, offset) {
                // Superseded mid-copy attempt: re-read the published handle.
                Err(err) if StoreError::MappingClosed.is(&err) => continue,
                other => return other,
            }
        }
    }

    /// Flushes the current view to disk.
    pub fn sync(&self) -> Result<()> {
        self.current().flush()
    }

    /// Flushes, then unmaps and closes the file.
    pub fn close(self) -> Result<()> {
        self.sync()?;
        self.current().mark_stale();
        Ok(())
    }

    fn current(&self) -> Arc<Mapping> {
        Arc::clone(&self.mapping.read())
    }

    /// Extends the file to cover `need` bytes and publishes a new view.
    fn grow(&self, need: i64) -> Result<()> {
        let _guard = self.grow_lock.lock();

        // Double-check: another writer may have grown past `need` while we
        // waited for the lock.
        let old = self.current();
        if need <= old.len() {
            return Ok(());
        }

        let new_size = grow_advise(old.len(), need);
        ensure!(
            new_size >= need,
            "table cannot grow to cover {} bytes (advised {})",
            need,
            new_size
        );

        debug!(
            path = %self.path.display(),
            old_size = old.len(),
            new_size,
            "growing data table"
        );

        old.flush_async()?;

        self.file.set_len(new_size as u64).wrap_err_with(|| {
            format!(
                "failed to extend '{}' to {} bytes",
                self.path.display(),
                new_size
            )
        })?;

        let fresh = Arc::new(
            Mapping::map(&self.file)
                .wrap_err_with(|| format!("failed to remap '{}'", self.path.display()))?,
        );

        let superseded = {
            let mut slot = self.mapping.write();
            std::mem::replace(&mut *slot, fresh)
        };
        superseded.mark_stale();

        Ok(())
    }
}

/// A single record may not exceed the largest growth step.
fn check_record_len(len: i64) -> Result<()> {
    if len > MAX_STEP {
        return Err(StoreError::DataSizeTooLarge.into());
    }
    Ok(())
}

/// Picks the new file size for a growth that must cover `need` bytes:
/// double the current size, clamp the step to `[MIN_STEP, MAX_STEP]`, and
/// round the result up to a whole page.
fn grow_advise(current: i64, need: i64) -> i64 {
    let step = current.saturating_mul(2).clamp(MIN_STEP, MAX_STEP);
    let advised = current.saturating_add(step).max(need);

    let page = page_size();
    advised
        .saturating_add(page - 1)
        .saturating_div(page)
        .saturating_mul(page)
}

fn page_size() -> i64 {
    // SAFETY: sysconf with a valid name constant has no preconditions.
    let size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    if size > 0 {
        size
    } else {
        4096
    }
}
