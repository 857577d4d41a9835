//! # RaxDB - Embedded Persistent Key-Value Store
//!
//! RaxDB is an embedded, single-process key-value store mapping arbitrary
//! byte keys to arbitrary byte values. Durability comes from a single
//! memory-mapped data file; lookups go through an in-memory radix tree
//! rebuilt on every open; concurrency is MVCC with snapshot reads and
//! optimistic, conflict-checked writes.
//!
//! ## Quick Start
//!
//! ```ignore
//! use raxdb::Database;
//!
//! let db = Database::open("./my.db")?;
//!
//! db.set("user:1", "alice")?;
//! assert_eq!(db.get("user:1")?, b"alice");
//!
//! db.update(|tx| {
//!     tx.set("user:2", "bob")?;
//!     tx.set("user:3", "carol")
//! })?;
//!
//! db.close()?;
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────────────────────────────────┐
//! │              Database                  │
//! │   open/close · view(tx) · update(tx)   │
//! └───────┬──────────────────┬─────────────┘
//!         │                  │
//!  ┌──────▼──────┐    ┌──────▼──────┐
//!  │    Radix    │    │ Transaction │
//!  │ (256-way,   │    │ (MVCC, page │
//!  │  in-memory) │    │  locks)     │
//!  └──────┬──────┘    └──────┬──────┘
//!         │                  │
//!  ┌──────▼──────────────────▼──────┐
//!  │             Table              │
//!  │  mmap · FreeList · atomic remap │
//!  └──────────────┬─────────────────┘
//!                 │
//!          ┌──────▼──────┐
//!          │   OS file   │
//!          └─────────────┘
//! ```
//!
//! ## Storage Model
//!
//! Records are append-only triples `header ‖ key ‖ value`; an update writes
//! a new record chained to the one it replaces and re-points the index. The
//! file grows in page-aligned steps (64 KiB minimum) and is never shrunk in
//! place; opening with compaction rewrites live records into a fresh file
//! and keeps the old one as a backup.
//!
//! ## Concurrency Model
//!
//! All public APIs are safe under arbitrary concurrent callers. Readers
//! never block: table growth publishes a new mapping while in-flight reads
//! keep the old one alive. Writers reserve disjoint regions up front and
//! serialize only at commit, per index node, so transactions over disjoint
//! keys commit in parallel and conflicting ones fail fast with
//! [`StoreError::WriteConflict`].
//!
//! ## Module Overview
//!
//! - [`storage`]: memory-mapped table, free-region tracking, page locks
//! - [`radix`]: the in-memory radix-tree index
//! - [`mvcc`]: record headers and transactions
//! - [`database`]: the public façade
//! - [`config`]: sizing constants
//! - [`error`]: typed error kinds

pub mod config;
pub mod database;
pub mod error;
pub mod mvcc;
pub mod radix;
pub mod storage;

pub use database::Database;
pub use error::StoreError;
pub use mvcc::Transaction;
