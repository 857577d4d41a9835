//! # RaxDB Configuration Constants
//!
//! This module centralizes the sizing constants for the data table and the
//! radix index. Constants that depend on each other are co-located and their
//! relationships are enforced through compile-time assertions.
//!
//! ## Dependency Graph
//!
//! ```text
//! MIN_STEP (64 KiB)
//!       │
//!       ├─> smallest file size a fresh table is truncated to
//!       │
//!       └─> lower clamp for every growth step
//!
//! MAX_STEP (1 GiB)
//!       │
//!       ├─> upper clamp for every growth step
//!       │
//!       └─> largest record a single write may carry
//!
//! MAX_TABLE_SIZE (i64::MAX)
//!       │
//!       └─> initial extent of the free list; the sum of free and reserved
//!           regions always equals this value
//!
//! MAX_PREFIX (128)
//!       │
//!       └─> longest byte prefix a radix node may compress; longer key
//!           remainders are chained across multiple nodes
//! ```
//!
//! ## Critical Invariants
//!
//! 1. `MIN_STEP <= MAX_STEP` (growth clamp is a valid range)
//! 2. `MIN_STEP` is a multiple of 4096 (the first truncate is page aligned
//!    for every page size the supported platforms report)
//! 3. `MAX_PREFIX` fits the edge-byte + prefix segmentation of long keys

/// Smallest increment the data table grows by, and the size a freshly
/// created file is truncated to.
pub const MIN_STEP: i64 = 1 << 16;

/// Largest increment the data table grows by. Also bounds the size of a
/// single record.
pub const MAX_STEP: i64 = 1 << 30;

/// Maximum addressable extent of a table. The free list is seeded with one
/// region of this size.
pub const MAX_TABLE_SIZE: i64 = i64::MAX;

/// Longest prefix a radix node stores inline. Key remainders longer than
/// this are split across a chain of nodes.
pub const MAX_PREFIX: usize = 128;

const _: () = assert!(MIN_STEP <= MAX_STEP, "growth clamp must be a valid range");
const _: () = assert!(MIN_STEP % 4096 == 0, "initial truncate must be page aligned");
const _: () = assert!(MAX_PREFIX > 1, "prefix segments carry an edge byte plus at least one prefix byte");
