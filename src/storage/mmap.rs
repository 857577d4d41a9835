//! # Memory-Mapped Views
//!
//! This module implements [`Mapping`], one memory-mapped view of the data
//! file, and [`TableSlice`], an owned read guard into a view. A [`Mapping`]
//! is an internal component owned by `Table`; users never create one
//! directly.
//!
//! ## View Lifecycle
//!
//! The data file only ever grows. Growth replaces the current view with a
//! larger one; the superseded view is marked *stale* and is unmapped once the
//! last reference to it drops. Reads started against the old view remain
//! valid for as long as they hold it: every view of the file is `MAP_SHARED`,
//! so the old and new views stay coherent for the range they both cover.
//!
//! The classic solutions for remap safety carry runtime machinery — an
//! active-operation counter drained before `munmap`, hazard pointers, or
//! epochs. Here the reference count of the `Arc` holding the view *is* that
//! counter: [`TableSlice`] keeps its `Arc<Mapping>` alive, and `memmap2`
//! unmaps in `Drop` when the count reaches zero.
//!
//! ## Writes
//!
//! Writers copy through raw pointers obtained from [`memmap2::MmapRaw`],
//! which hands out `*mut u8` from `&self`. This is what permits concurrent
//! appenders: each writer owns a disjoint reserved region, so the copies
//! never overlap. A write against a stale view fails with `MappingClosed`
//! and the caller retries against the current view; this keeps every write
//! inside a view that spans its region, so a concurrent growth never loses
//! a write.
//!
//! ## Error Handling
//!
//! Out-of-range reads and writes fail with `BoundsViolation`. OS failures
//! from mapping and flushing are propagated with context.

use std::fs::File;
use std::ops::Deref;
use std::slice;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use eyre::{Result, WrapErr};
use memmap2::{MmapOptions, MmapRaw};

use crate::error::StoreError;

#[derive(Debug)]
pub(crate) struct Mapping {
    raw: MmapRaw,
    len: i64,
    stale: AtomicBool,
}

impl Mapping {
    /// Maps the file's current extent read/write/shared.
    pub(crate) fn map(file: &File) -> Result<Self> {
        let len = file
            .metadata()
            .wrap_err("failed to stat data file before mapping")?
            .len() as i64;

        let raw = MmapOptions::new()
            .map_raw(file)
            .wrap_err("failed to memory-map data file")?;

        Ok(Self {
            raw,
            len,
            stale: AtomicBool::new(false),
        })
    }

    pub(crate) fn len(&self) -> i64 {
        self.len
    }

    /// Marks this view superseded. Writes observe the flag and retry against
    /// the replacement; reads in flight keep the view alive via their `Arc`.
    pub(crate) fn mark_stale(&self) {
        self.stale.store(true, Ordering::Release);
    }

    pub(crate) fn is_stale(&self) -> bool {
        self.stale.load(Ordering::Acquire)
    }

    /// Borrows `size` bytes at `offset` as an owned slice guard.
    pub(crate) fn slice(self: &Arc<Self>, size: i64, offset: i64) -> Result<TableSlice> {
        if size < 0 || offset < 0 || offset + size > self.len {
            return Err(StoreError::BoundsViolation.into());
        }

        Ok(TableSlice {
            mapping: Arc::clone(self),
            offset: offset as usize,
            len: size as usize,
        })
    }

    /// Copies `data` into the view at `offset`.
    pub(crate) fn write(&self, data: &[u8], offset: i64) -> Result<()> {
        if self.is_stale() {
            return Err(StoreError::MappingClosed.into());
        }

        if offset < 0 || offset + data.len() as i64 > self.len {
            return Err(StoreError::BoundsViolation.into());
        }

        // SAFETY: copying into the mapped region through a raw pointer is
        // safe because:
        // 1. The bounds check above keeps offset..offset+len inside the view
        // 2. Callers write into regions they reserved; reservations never
        //    overlap, so concurrent copies touch disjoint bytes
        // 3. In-place overwrites of shared bytes (header patches) are
        //    serialized by the caller through page locks
        // 4. The view stays mapped for the duration of &self
        unsafe {
            std::ptr::copy_nonoverlapping(
                data.as_ptr(),
                self.raw.as_mut_ptr().add(offset as usize),
                data.len(),
            );
        }

        Ok(())
    }

    /// Schedules a writeback of the view without waiting for it.
    pub(crate) fn flush_async(&self) -> Result<()> {
        self.raw
            .flush_async()
            .wrap_err("failed to schedule mmap writeback")
    }

    /// Synchronously flushes the full view to disk.
    pub(crate) fn flush(&self) -> Result<()> {
        self.raw.flush().wrap_err("failed to sync mmap to disk")
    }
}

/// An owned view of table bytes. Holds the mapping it was served from alive,
/// so the bytes stay valid across concurrent growth; copy them out if they
/// must outlive the guard.
pub struct TableSlice {
    mapping: Arc<Mapping>,
    offset: usize,
    len: usize,
}

impl Deref for TableSlice {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        // SAFETY: offset and len were bounds-checked against the mapping
        // when the slice was created, and `mapping` keeps the region mapped
        // for the lifetime of this guard. Bytes a reader may hold a slice
        // over are only rewritten under a page lock, which the transaction
        // layer acquires before reading.
        unsafe { slice::from_raw_parts(self.mapping.raw.as_ptr().add(self.offset), self.len) }
    }
}

impl AsRef<[u8]> for TableSlice {
    fn as_ref(&self) -> &[u8] {
        self
    }
}

impl std::fmt::Debug for TableSlice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TableSlice")
            .field("offset", &self.offset)
            .field("len", &self.len)
            .finish()
    }
}
