//! # Database Façade
//!
//! This module provides [`Database`], the public entry point that wires the
//! data table, the radix index, the page-lock registries, and the txid
//! allocator together.
//!
//! ## Open Path
//!
//! ```text
//! Database::open(path)
//!     │
//!     ▼
//! Table::new ──> mmap the data file (truncating a fresh one to 64 KiB)
//!     │
//!     ▼
//! reload ──> walk records from offset 0:
//!            · stop at the zeroed tail (ksize < 1)
//!            · index the live version of every key (xmax == 0)
//!            · register every record's region with the free list
//!            · remember the highest transaction id seen
//!     │
//!     ▼
//! append cursor restored · txid counter seeded past the file's history
//! ```
//!
//! The index lives only in memory; it is rebuilt this way on every open.
//!
//! ## Compaction
//!
//! `open_with_compaction` renames the existing file to `<path>.backup`,
//! creates a fresh file at `path`, and copies only live records (xmax == 0)
//! across while rebuilding the index against their new offsets. Obsolete
//! versions and orphans are left behind in the backup. The previous-version
//! pointers of copied records are cleared — their predecessors do not exist
//! in the new file. Compaction refuses to run if a backup already exists.
//!
//! ## Transactions
//!
//! `view` runs a closure with a read-only transaction; there is no commit
//! work to do. `update` runs a closure with a read/write transaction,
//! commits when it returns `Ok`, and rolls back when it returns an error or
//! the commit itself conflicts. `get`/`set` are single-operation wrappers.
//!
//! Every public method is safe under arbitrary concurrent callers; the
//! façade itself adds no locking beyond what the components carry.

use std::fs;
use std::path::{Path, PathBuf};

use eyre::{ensure, Result, WrapErr};
use tracing::{debug, info};

use crate::mvcc::transaction::TransactionManager;
use crate::mvcc::{RecordHeader, Transaction};
use crate::radix::{Entry, Radix};
use crate::storage::{PageLock, Table};

pub struct Database {
    data: Table,
    index: Radix,
    record_locks: PageLock,
    node_locks: PageLock,
    transactions: TransactionManager,
}

impl Database {
    /// Opens the data file at `path` (creating it if absent) and rebuilds
    /// the index from its records.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::open_inner(path.as_ref(), false)
    }

    /// Like [`Database::open`], but first compacts the file: the existing
    /// data moves to `<path>.backup` and only live records are copied into a
    /// fresh file. Fails if a backup already exists.
    pub fn open_with_compaction<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::open_inner(path.as_ref(), true)
    }

    fn open_inner(path: &Path, compaction: bool) -> Result<Self> {
        let index = Radix::new();
        let existing = path.exists();
        let mut max_txid = 0;

        let data = if compaction && existing {
            let backup = backup_path(path);
            ensure!(
                !backup.exists(),
                "could not back up data file: '{}' already exists",
                backup.display()
            );

            fs::rename(path, &backup).wrap_err_with(|| {
                format!(
                    "failed to move '{}' to '{}'",
                    path.display(),
                    backup.display()
                )
            })?;

            let source = Table::new(&backup)?;
            let data = Table::new(path)?;
            max_txid = reload_compacting(&source, &data, &index)?;
            source.close()?;

            info!(
                path = %path.display(),
                records = index.len(),
                "compacted data file"
            );

            data
        } else {
            let data = Table::new(path)?;
            if existing {
                max_txid = reload(&data, &index)?;
            }
            data
        };

        debug!(
            path = %path.display(),
            position = data.position(),
            keys = index.len(),
            "database open"
        );

        Ok(Self {
            data,
            index,
            record_locks: PageLock::new(),
            node_locks: PageLock::new(),
            transactions: TransactionManager::new(max_txid + 1),
        })
    }

    pub fn path(&self) -> &Path {
        self.data.path()
    }

    /// Runs `f` with a read-only transaction. Reads inside the closure share
    /// one snapshot; there is no commit work on return.
    pub fn view<T>(&self, f: impl FnOnce(&mut Transaction<'_>) -> Result<T>) -> Result<T> {
        let mut tx = self.begin(true);
        f(&mut tx)
    }

    /// Runs `f` with a read/write transaction. If the closure returns `Ok`,
    /// the transaction commits; a closure error or a commit conflict rolls
    /// everything back.
    pub fn update<T>(&self, f: impl FnOnce(&mut Transaction<'_>) -> Result<T>) -> Result<T> {
        let mut tx = self.begin(false);

        let value = match f(&mut tx) {
            Ok(value) => value,
            Err(err) => {
                tx.rollback();
                return Err(err);
            }
        };

        match tx.commit() {
            Ok(()) => Ok(value),
            Err(err) => {
                tx.rollback();
                Err(err)
            }
        }
    }

    /// Returns the value stored under `key`.
    pub fn get(&self, key: impl AsRef<[u8]>) -> Result<Vec<u8>> {
        self.view(|tx| tx.get(key.as_ref()))
    }

    /// Stores `value` under `key` in a single-operation transaction.
    pub fn set(&self, key: impl AsRef<[u8]>, value: impl AsRef<[u8]>) -> Result<()> {
        self.update(|tx| tx.set(key.as_ref(), value.as_ref()))
    }

    /// Flushes the data file to disk.
    pub fn sync(&self) -> Result<()> {
        self.data.sync()
    }

    /// Flushes and closes the data file. Dropping a `Database` without
    /// calling this leaves writeback to the OS.
    pub fn close(self) -> Result<()> {
        self.data.close()
    }

    fn begin(&self, readonly: bool) -> Transaction<'_> {
        Transaction::new(
            &self.data,
            &self.index,
            &self.record_locks,
            &self.node_locks,
            &self.transactions,
            readonly,
        )
    }
}

fn backup_path(path: &Path) -> PathBuf {
    let mut os = path.as_os_str().to_os_string();
    os.push(".backup");
    PathBuf::from(os)
}

/// Walks the data file and rebuilds the index in place. Returns the highest
/// transaction id found so the txid counter can resume past it.
fn reload(data: &Table, index: &Radix) -> Result<u64> {
    let size = data.size();
    let mut pos = 0i64;
    let mut max_txid = 0u64;

    while pos + RecordHeader::SIZE as i64 <= size {
        let bytes = data.read(RecordHeader::SIZE as i64, pos)?;
        let header = RecordHeader::from_bytes(&bytes);
        drop(bytes);

        // The zeroed tail left by truncation marks the end of the data.
        if header.ksize < 1 {
            break;
        }

        max_txid = max_txid.max(header.xmin).max(header.xmax);
        let total = header.total_size();

        // Free-space reuse means scan order is not version order: a
        // superseded record can sit at a higher offset than its
        // replacement. Liveness comes from xmax, never from position.
        if header.xmax == 0 {
            let key = data
                .read(header.ksize, pos + RecordHeader::SIZE as i64)?
                .to_vec();
            index.insert(&key, Entry::new(total, pos));
        }

        // Superseded records stay allocated: version chains still point at
        // their bytes.
        data.free()
            .allocate(total, pos)
            .wrap_err("data file contains overlapping records")?;

        pos += total;
    }

    data.set_position(pos);
    Ok(max_txid)
}

/// Walks `source` and copies only live records into `dest`, rebuilding the
/// index against their new offsets.
fn reload_compacting(source: &Table, dest: &Table, index: &Radix) -> Result<u64> {
    let size = source.size();
    let mut pos = 0i64;
    let mut max_txid = 0u64;

    while pos + RecordHeader::SIZE as i64 <= size {
        let bytes = source.read(RecordHeader::SIZE as i64, pos)?;
        let header = RecordHeader::from_bytes(&bytes);
        drop(bytes);

        if header.ksize < 1 {
            break;
        }

        max_txid = max_txid.max(header.xmin).max(header.xmax);
        let total = header.total_size();

        // Obsolete versions stay behind in the backup.
        if header.xmax == 0 {
            let mut record = source.read(total, pos)?.to_vec();

            // Predecessor versions are not carried over, so the chain
            // pointer must not survive the copy.
            let mut copied = header;
            copied.psize = 0;
            copied.poffset = 0;
            copied.write_to(&mut record);

            let key_end = RecordHeader::SIZE + copied.ksize as usize;
            let new_pos = dest.write(&record)?;
            index.insert(&record[RecordHeader::SIZE..key_end], Entry::new(total, new_pos));
        }

        pos += total;
    }

    Ok(max_txid)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StoreError;

    fn scratch_db() -> (tempfile::TempDir, Database) {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open(dir.path().join("test.db")).unwrap();
        (dir, db)
    }

    #[test]
    fn set_then_get_returns_the_value() {
        let (_dir, db) = scratch_db();

        db.set("test-key", "test").unwrap();
        assert_eq!(db.get("test-key").unwrap(), b"test");

        db.set("test-key", "test-1234").unwrap();
        assert_eq!(db.get("test-key").unwrap(), b"test-1234");
    }

    #[test]
    fn get_of_missing_key_is_not_found() {
        let (_dir, db) = scratch_db();

        let err = db.get("missing").unwrap_err();
        assert_eq!(StoreError::of(&err), Some(StoreError::NotFound));
    }

    #[test]
    fn set_on_view_transaction_is_rejected() {
        let (_dir, db) = scratch_db();

        let err = db
            .view(|tx| tx.set("key", "value"))
            .unwrap_err();
        assert_eq!(StoreError::of(&err), Some(StoreError::ReadOnlyTransaction));
    }

    #[test]
    fn empty_keys_are_rejected() {
        let (_dir, db) = scratch_db();

        assert!(db.set("", "value").is_err());
    }

    #[test]
    fn transaction_reads_its_own_pending_writes() {
        let (_dir, db) = scratch_db();
        db.set("key", "old").unwrap();

        db.update(|tx| {
            tx.set("key", "new")?;
            assert_eq!(tx.get("key")?, b"new");
            tx.set("fresh", "first")?;
            assert_eq!(tx.get("fresh")?, b"first");
            Ok(())
        })
        .unwrap();

        assert_eq!(db.get("key").unwrap(), b"new");
    }

    #[test]
    fn update_tracks_observed_read_offsets() {
        let (_dir, db) = scratch_db();
        db.set("key", "value").unwrap();

        db.update(|tx| {
            assert!(tx.reads().is_empty());
            tx.get("key")?;
            assert_eq!(tx.reads().len(), 1);
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn failed_update_leaves_no_trace() {
        let (_dir, db) = scratch_db();
        db.set("key", "kept").unwrap();

        let err = db.update(|tx| -> Result<()> {
            tx.set("key", "discarded")?;
            tx.set("other", "discarded")?;
            eyre::bail!("abort")
        });

        assert!(err.is_err());
        assert_eq!(db.get("key").unwrap(), b"kept");
        let missing = db.get("other").unwrap_err();
        assert_eq!(StoreError::of(&missing), Some(StoreError::NotFound));
    }

    #[test]
    fn multi_key_update_commits_atomically() {
        let (_dir, db) = scratch_db();

        db.update(|tx| {
            tx.set("a", "1")?;
            tx.set("b", "2")?;
            tx.set("c", "3")
        })
        .unwrap();

        assert_eq!(db.get("a").unwrap(), b"1");
        assert_eq!(db.get("b").unwrap(), b"2");
        assert_eq!(db.get("c").unwrap(), b"3");
    }

    #[test]
    fn position_and_data_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.db");

        let db = Database::open(&path).unwrap();
        db.set("test-key", "test").unwrap();
        db.set("test-key-2", "test-1").unwrap();
        db.set("test-key-2", "test-2").unwrap();
        let position = db.data.position();
        db.close().unwrap();

        let db = Database::open(&path).unwrap();
        assert_eq!(db.data.position(), position);
        assert_eq!(db.get("test-key").unwrap(), b"test");
        assert_eq!(db.get("test-key-2").unwrap(), b"test-2");
        db.close().unwrap();
    }

    #[test]
    fn txids_resume_past_persisted_history() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.db");

        let db = Database::open(&path).unwrap();
        for i in 0..10 {
            db.set("key", format!("v{i}")).unwrap();
        }
        db.close().unwrap();

        // A fresh transaction must still see data committed by the previous
        // process, which requires the txid counter to land past its ids.
        let db = Database::open(&path).unwrap();
        assert_eq!(db.get("key").unwrap(), b"v9");

        db.set("key", "v10").unwrap();
        assert_eq!(db.get("key").unwrap(), b"v10");
    }

    #[test]
    fn same_key_written_twice_in_one_update_chains_in_write_order() {
        let (_dir, db) = scratch_db();
        db.set("key", "base").unwrap();

        db.update(|tx| {
            tx.set("key", "mid")?;
            tx.set("key", "last")
        })
        .unwrap();

        assert_eq!(db.get("key").unwrap(), b"last");

        // The index points at the final write, which chains to the
        // intermediate write, which chains to the pre-transaction version.
        // Both superseded records are obsoleted, not left live.
        let entry = db.index.lookup(b"key").unwrap();
        let newest = db.data.read(entry.size, entry.offset).unwrap();
        let newest_header = RecordHeader::from_bytes(&newest);
        assert!(newest_header.has_prev_version());

        let mid = db.data.read(newest_header.psize, newest_header.poffset).unwrap();
        let mid_header = RecordHeader::from_bytes(&mid);
        assert_eq!(mid_header.xmin, newest_header.xmin);
        assert_eq!(mid_header.xmax, newest_header.xmin);
        let start = mid_header.data_offset() as usize;
        assert_eq!(&mid[start..start + mid_header.dsize as usize], b"mid");
        assert!(mid_header.has_prev_version());

        let base = db.data.read(mid_header.psize, mid_header.poffset).unwrap();
        let base_header = RecordHeader::from_bytes(&base);
        assert_eq!(base_header.xmax, newest_header.xmin);
        let start = base_header.data_offset() as usize;
        assert_eq!(&base[start..start + base_header.dsize as usize], b"base");
    }

    #[test]
    fn updated_keys_chain_to_their_previous_version() {
        let (_dir, db) = scratch_db();

        db.set("key", "version-1").unwrap();
        db.set("key", "version-2").unwrap();

        let entry = db.index.lookup(b"key").unwrap();
        let record = db.data.read(entry.size, entry.offset).unwrap();
        let header = RecordHeader::from_bytes(&record);

        assert!(header.has_prev_version());

        let prev = db.data.read(header.psize, header.poffset).unwrap();
        let prev_header = RecordHeader::from_bytes(&prev);
        assert_eq!(prev_header.xmax, header.xmin);

        let start = prev_header.data_offset() as usize;
        let end = start + prev_header.dsize as usize;
        assert_eq!(&prev[start..end], b"version-1");
    }
}
