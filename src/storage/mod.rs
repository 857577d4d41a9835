//! # Storage Module
//!
//! This module provides the storage layer for RaxDB: a single data file
//! mapped into the process address space, an allocation manager for its byte
//! range, and the per-offset locks that coordinate concurrent access to
//! records and index nodes.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │                  Table                       │
//! │   append cursor · growth · read/write        │
//! ├──────────────────────┬───────────────────────┤
//! │       FreeList       │        Mapping        │
//! │  reserve/allocate/   │   one mmap view,      │
//! │  release, coalescing │   swapped on growth   │
//! └──────────────────────┴───────────────────────┘
//!                  PageLock
//!        per-offset reader/writer locks
//! ```
//!
//! Record writes reserve disjoint regions from the [`FreeList`] and copy
//! into the current [`Mapping`]; growth publishes a larger view without
//! blocking readers, which keep the old view alive through [`TableSlice`]
//! guards until they finish.
//!
//! ## Zero-Copy Reads
//!
//! [`Table::read`] hands out slices that point directly into the mapped
//! file. The transaction layer copies record bytes out while holding a
//! shared page lock; everything else (reload, header inspection) reads in
//! place.
//!
//! ## Module Organization
//!
//! - `mmap`: one memory-mapped view and its slice guard
//! - `table`: the growable region, append cursor, and growth protocol
//! - `freelist`: sorted free-region list with coalescing
//! - `page_lock`: per-offset reader/writer lock registry

mod freelist;
mod mmap;
mod page_lock;
mod table;

pub use freelist::{FreeList, Region};
pub use mmap::TableSlice;
pub use page_lock::{PageGuard, PageLock};
pub use table::Table;

pub(crate) use mmap::Mapping;
