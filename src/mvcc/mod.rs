//! # Multi-Version Concurrency Control
//!
//! RaxDB keeps every version of a value: an update appends a new record and
//! chains it to the one it supersedes. Transactions coordinate through the
//! version metadata in each record's header rather than through a central
//! lock table.
//!
//! ## Version Chains
//!
//! ```text
//!        index ──> [ record @ 4096 ]          newest version
//!                    xmin: 7  xmax: 0
//!                    psize: 64, poffset: 0 ──> [ record @ 0 ]
//!                                                xmin: 3  xmax: 7
//!                                                psize: 0 (first version)
//! ```
//!
//! The index always points at the newest committed version. Readers with an
//! older snapshot walk the chain until they reach a version whose `xmin`
//! precedes them. Chains are strictly decreasing in age, so the walk always
//! terminates.
//!
//! ## Isolation Model
//!
//! - Snapshot reads: a transaction sees the database as of its begin — a
//!   version is visible only if its creator has a lower txid and was not in
//!   flight at that moment (the transaction manager tracks in-flight
//!   writers). Later creations are skipped via the chain walk. Write skew
//!   between distinct keys is not prevented.
//! - One writer per key: commit holds an exclusive page lock per index node,
//!   serializing publication per key while disjoint key sets proceed in
//!   parallel.
//! - Optimistic conflicts: commit re-reads each current version under its
//!   node lock; a version with `xmax` set or created by a later transaction
//!   fails the commit with `WriteConflict` before anything is mutated.
//!
//! ## Key Structures
//!
//! - [`RecordHeader`]: the 48-byte version header in front of every record
//! - [`Transaction`]: per-transaction state (pending writes, observed reads)
//! - `TransactionManager`: txid allocation and in-flight writer tracking

pub mod record_header;
pub mod transaction;

pub use record_header::RecordHeader;
pub use transaction::Transaction;
