//! # MVCC Transactions
//!
//! This module implements [`Transaction`], the unit of work against a
//! database: snapshot reads, buffered writes, optimistic commit with
//! write-conflict detection, and rollback.
//!
//! ## Write Path
//!
//! `set` persists the new record to the data file immediately — header with
//! `xmin = txid`, then key, then value — but does not touch the index. The
//! write is remembered as pending; until commit it is visible only to this
//! transaction (read-your-own-writes).
//!
//! ## Commit Protocol
//!
//! ```text
//! 1. resolve   ensure an index node exists for every pending key
//! 2. lock      exclusive page locks on those nodes, ascending id order
//! 3. check     every current version must be live (xmax == 0) and visible
//!              to this snapshot, otherwise WriteConflict — nothing has
//!              been mutated yet
//! 4. patch     new headers get psize/poffset; current versions get xmax
//! 5. publish   index nodes point at the new records; locks drop
//! ```
//!
//! All conflict checks complete before the first header patch, so a
//! conflicted commit fails without leaving half-updated state. Acquiring
//! node locks in sorted order makes commits over overlapping key sets
//! deadlock-free. Transactions over disjoint keys commit in parallel.
//!
//! A key written more than once in one transaction commits as a fully
//! linked chain: each record points at the one written before it, every
//! superseded record gets `xmax` set, and the index ends up on the last
//! write. No record is left live but unreachable.
//!
//! ## Read Path and Visibility
//!
//! `get` trusts the index pointer: it never consults `xmax`, so a version
//! obsoleted after this transaction's snapshot is still served. What it does
//! check is `xmin` — a version is invisible if it was created by a
//! transaction that began later (`xmin > txid`) or by one that was still in
//! flight when this transaction began (tracked by `TransactionManager`).
//! The read follows the previous-version chain until it finds a version the
//! snapshot may see. Two reads of the same key inside one transaction
//! therefore return the same bytes even if another transaction commits in
//! between.
//!
//! Each chain hop copies bytes out under a shared page lock on the record
//! offset, serializing against the exclusive lock commit takes while
//! patching that record's header.
//!
//! ## Rollback
//!
//! Pending records return their reserved regions to the free list. Index
//! placeholders created by a concurrent commit's resolve step stay behind;
//! they carry no entry and a later commit of the same key reuses them.

use std::sync::atomic::{AtomicU64, Ordering};

use eyre::{ensure, Result};
use hashbrown::HashMap;
use parking_lot::Mutex;
use smallvec::SmallVec;
use tracing::trace;

use super::record_header::RecordHeader;
use crate::error::StoreError;
use crate::radix::{Entry, Radix};
use crate::storage::{PageGuard, PageLock, Table};

/// Allocates transaction ids and tracks which write transactions are in
/// flight. Every transaction snapshots the in-flight set when it begins:
/// versions created by those transactions stay invisible to it even after
/// they commit, which is what pins a snapshot for the transaction's
/// lifetime.
pub(crate) struct TransactionManager {
    next_txid: AtomicU64,
    active: Mutex<Vec<u64>>,
}

impl TransactionManager {
    /// `first` is the first txid to hand out; reload seeds it past the ids
    /// already present in the data file.
    pub(crate) fn new(first: u64) -> Self {
        Self {
            next_txid: AtomicU64::new(first),
            active: Mutex::new(Vec::new()),
        }
    }

    /// Allocates a txid and captures the in-flight write set. Write
    /// transactions are registered in that set until [`Self::finish`].
    pub(crate) fn begin(&self, readonly: bool) -> (u64, SmallVec<[u64; 8]>) {
        let mut active = self.active.lock();
        let txid = self.next_txid.fetch_add(1, Ordering::SeqCst);
        let snapshot = SmallVec::from_slice(&active);

        if !readonly {
            active.push(txid);
        }

        (txid, snapshot)
    }

    pub(crate) fn finish(&self, txid: u64) {
        self.active.lock().retain(|t| *t != txid);
    }
}

#[derive(Debug, Clone)]
pub(crate) struct PendingWrite {
    key: Vec<u8>,
    size: i64,
    offset: i64,
}

pub struct Transaction<'db> {
    table: &'db Table,
    index: &'db Radix,
    record_locks: &'db PageLock,
    node_locks: &'db PageLock,
    manager: &'db TransactionManager,
    txid: u64,
    /// Write transactions in flight when this one began; their versions are
    /// never visible here.
    snapshot: SmallVec<[u64; 8]>,
    readonly: bool,
    writes: SmallVec<[PendingWrite; 16]>,
    reads: SmallVec<[i64; 16]>,
    finished: bool,
}

impl<'db> Transaction<'db> {
    pub(crate) fn new(
        table: &'db Table,
        index: &'db Radix,
        record_locks: &'db PageLock,
        node_locks: &'db PageLock,
        manager: &'db TransactionManager,
        readonly: bool,
    ) -> Self {
        let (txid, snapshot) = manager.begin(readonly);
        Self {
            table,
            index,
            record_locks,
            node_locks,
            manager,
            txid,
            snapshot,
            readonly,
            writes: SmallVec::new(),
            reads: SmallVec::new(),
            finished: readonly,
        }
    }

    pub fn id(&self) -> u64 {
        self.txid
    }

    pub fn is_readonly(&self) -> bool {
        self.readonly
    }

    /// Record offsets this transaction has observed through the index.
    pub fn reads(&self) -> &[i64] {
        &self.reads
    }

    /// Whether a version created by `xmin` belongs to this snapshot: it must
    /// predate this transaction and must not come from a transaction that
    /// was still in flight when this one began.
    fn sees(&self, xmin: u64) -> bool {
        xmin <= self.txid && !self.snapshot.contains(&xmin)
    }

    /// Returns the value stored under `key`.
    ///
    /// A write transaction sees its own pending writes first. Otherwise the
    /// index pointer is followed, walking back through the version chain
    /// until a version visible to this snapshot is found.
    pub fn get(&mut self, key: impl AsRef<[u8]>) -> Result<Vec<u8>> {
        let key = key.as_ref();

        if !self.readonly {
            if let Some(pending) = self.writes.iter().rev().find(|w| w.key == key) {
                let record = self.table.read(pending.size, pending.offset)?;
                let header = RecordHeader::from_bytes(&record);
                return Ok(record[header.data_offset() as usize..].to_vec());
            }
        }

        let entry = self
            .index
            .lookup(key)
            .ok_or(StoreError::NotFound)?;

        if !self.readonly {
            self.reads.push(entry.offset);
        }

        let mut size = entry.size;
        let mut offset = entry.offset;

        loop {
            let _page = self.record_locks.lock(offset, true);

            let record = self.table.read(size, offset)?;
            let header = RecordHeader::from_bytes(&record);

            if self.sees(header.xmin) {
                let start = header.data_offset() as usize;
                let end = start + header.dsize as usize;
                return Ok(record[start..end].to_vec());
            }

            if !header.has_prev_version() {
                // Every version of this key postdates our snapshot.
                return Err(StoreError::NotFound.into());
            }

            size = header.psize;
            offset = header.poffset;
        }
    }

    /// Writes `value` under `key`. The record is persisted now; the index is
    /// only updated when the transaction commits.
    pub fn set(&mut self, key: impl AsRef<[u8]>, value: impl AsRef<[u8]>) -> Result<()> {
        let key = key.as_ref();
        let value = value.as_ref();

        if self.readonly {
            return Err(StoreError::ReadOnlyTransaction.into());
        }

        // A zero-length key is unrepresentable: reload treats ksize < 1 as
        // the end-of-data marker.
        ensure!(!key.is_empty(), "key must not be empty");

        let header = RecordHeader::new(self.txid, key.len() as i64, value.len() as i64);
        let record = header.encode(key, value);

        let offset = self.table.write(&record)?;

        self.writes.push(PendingWrite {
            key: key.to_vec(),
            size: record.len() as i64,
            offset,
        });

        Ok(())
    }

    /// Publishes every pending write, or fails with `WriteConflict` and
    /// publishes nothing.
    pub(crate) fn commit(&mut self) -> Result<()> {
        if self.writes.is_empty() {
            self.finish();
            return Ok(());
        }

        // Resolve an index node per write; new keys get placeholder nodes
        // that stay invisible until published below.
        let targets: SmallVec<[u32; 16]> = self
            .writes
            .iter()
            .map(|w| self.index.ensure(&w.key))
            .collect();

        // Exclusive node locks in ascending id order; duplicates collapse so
        // a transaction writing one key twice locks its node once.
        let mut lock_order: SmallVec<[u32; 16]> = targets.clone();
        lock_order.sort_unstable();
        lock_order.dedup();

        let _node_guards: SmallVec<[PageGuard; 16]> = lock_order
            .iter()
            .map(|id| self.node_locks.lock(*id as i64, false))
            .collect();

        // Conflict-check every write before mutating anything. A current
        // version with xmax set, or created by a transaction that began
        // after us, means we lost the race for this key. A key written more
        // than once in this transaction chains each record to the one
        // before it, so only the first write per node checks against the
        // index; the rest link to their own predecessor.
        let mut previous: SmallVec<[Entry; 16]> = SmallVec::with_capacity(targets.len());
        let mut staged: HashMap<u32, Entry> = HashMap::new();

        for (write, node) in self.writes.iter().zip(&targets) {
            let prev = match staged.get(node) {
                Some(entry) => *entry,
                None => {
                    let prev = self.index.entry_of(*node);

                    if prev.size > 0 {
                        let bytes = self.table.read(RecordHeader::SIZE as i64, prev.offset)?;
                        let header = RecordHeader::from_bytes(&bytes);

                        if header.xmax != 0 || !self.sees(header.xmin) {
                            trace!(
                                txid = self.txid,
                                offset = prev.offset,
                                xmin = header.xmin,
                                xmax = header.xmax,
                                "write conflict"
                            );
                            return Err(StoreError::WriteConflict.into());
                        }
                    }

                    prev
                }
            };

            previous.push(prev);
            staged.insert(*node, Entry::new(write.size, write.offset));
        }

        // Point of no return: patch the new records' back-pointers and
        // obsolete the versions they supersede.
        for (write, prev) in self.writes.iter().zip(&previous) {
            let bytes = self.table.read(RecordHeader::SIZE as i64, write.offset)?;
            let mut header = RecordHeader::from_bytes(&bytes);
            drop(bytes);
            header.psize = prev.size;
            header.poffset = prev.offset;
            self.table.write_at(&header.to_bytes(), write.offset)?;

            if prev.size > 0 {
                let _page = self.record_locks.lock(prev.offset, false);
                let bytes = self.table.read(RecordHeader::SIZE as i64, prev.offset)?;
                let mut header = RecordHeader::from_bytes(&bytes);
                drop(bytes);
                header.xmax = self.txid;
                self.table.write_at(&header.to_bytes(), prev.offset)?;
            }
        }

        // Make the new versions reachable.
        for (write, node) in self.writes.iter().zip(&targets) {
            self.index.set_entry(*node, Entry::new(write.size, write.offset));
        }

        self.finish();
        Ok(())
    }

    /// Returns every pending record's region to the free list. The index was
    /// never pointed at them, so nothing else needs undoing.
    pub(crate) fn rollback(&mut self) {
        for write in self.writes.drain(..) {
            self.table.free().release(write.size, write.offset);
        }

        self.finish();
    }

    fn finish(&mut self) {
        self.finished = true;
        if !self.readonly {
            self.manager.finish(self.txid);
        }
    }
}

impl Drop for Transaction<'_> {
    fn drop(&mut self) {
        if !self.finished {
            self.rollback();
        }
    }
}
