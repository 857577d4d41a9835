//! # Record Header
//!
//! This module defines the 48-byte header written in front of every record
//! in the data table. The header carries the MVCC version metadata and the
//! key/value geometry needed to walk the file.
//!
//! ## Binary Layout (48 bytes, little-endian)
//!
//! ```text
//! +--------+--------+--------+----------+--------+--------+
//! | xmin   | xmax   | psize  | poffset  | dsize  | ksize  |
//! | u64    | u64    | i64    | i64      | i64    | i64    |
//! +--------+--------+--------+----------+--------+--------+
//! ```
//!
//! - `xmin`: transaction id that created this version (> 0 once committed)
//! - `xmax`: transaction id that obsoleted it (0 = live)
//! - `psize`/`poffset`: size and offset of the previous version's record
//!   (`psize == 0` means no previous version)
//! - `dsize`/`ksize`: value and key byte counts
//!
//! A record is `header ‖ key ‖ value`; its total size is
//! `SIZE + ksize + dsize` and the value begins at `SIZE + ksize`.
//!
//! ## Encoding
//!
//! Fields are serialized explicitly in little-endian order so files are
//! byte-for-byte stable across machines of the same endianness. Parsing is
//! manual byte slicing rather than struct transmutation: header bytes come
//! straight out of the mmap at arbitrary record offsets, so no alignment can
//! be assumed.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordHeader {
    pub xmin: u64,
    pub xmax: u64,
    pub psize: i64,
    pub poffset: i64,
    pub dsize: i64,
    pub ksize: i64,
}

impl RecordHeader {
    pub const SIZE: usize = 48;

    /// A live first version owned by `xmin`, with no predecessor.
    pub fn new(xmin: u64, ksize: i64, dsize: i64) -> Self {
        Self {
            xmin,
            xmax: 0,
            psize: 0,
            poffset: 0,
            dsize,
            ksize,
        }
    }

    #[inline(always)]
    pub fn from_bytes(slice: &[u8]) -> Self {
        debug_assert!(slice.len() >= Self::SIZE);
        Self {
            xmin: u64::from_le_bytes(slice[0..8].try_into().unwrap()),
            xmax: u64::from_le_bytes(slice[8..16].try_into().unwrap()),
            psize: i64::from_le_bytes(slice[16..24].try_into().unwrap()),
            poffset: i64::from_le_bytes(slice[24..32].try_into().unwrap()),
            dsize: i64::from_le_bytes(slice[32..40].try_into().unwrap()),
            ksize: i64::from_le_bytes(slice[40..48].try_into().unwrap()),
        }
    }

    #[inline(always)]
    pub fn write_to(&self, slice: &mut [u8]) {
        debug_assert!(slice.len() >= Self::SIZE);
        slice[0..8].copy_from_slice(&self.xmin.to_le_bytes());
        slice[8..16].copy_from_slice(&self.xmax.to_le_bytes());
        slice[16..24].copy_from_slice(&self.psize.to_le_bytes());
        slice[24..32].copy_from_slice(&self.poffset.to_le_bytes());
        slice[32..40].copy_from_slice(&self.dsize.to_le_bytes());
        slice[40..48].copy_from_slice(&self.ksize.to_le_bytes());
    }

    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        self.write_to(&mut buf);
        buf
    }

    /// Size of the whole record: header, key, and value.
    pub fn total_size(&self) -> i64 {
        Self::SIZE as i64 + self.ksize + self.dsize
    }

    /// Offset of the value bytes within the record.
    pub fn data_offset(&self) -> i64 {
        Self::SIZE as i64 + self.ksize
    }

    pub fn has_prev_version(&self) -> bool {
        self.psize != 0
    }

    /// Assembles the full record: header, then key, then value.
    pub fn encode(&self, key: &[u8], value: &[u8]) -> Vec<u8> {
        debug_assert_eq!(key.len() as i64, self.ksize);
        debug_assert_eq!(value.len() as i64, self.dsize);

        let mut record = Vec::with_capacity(self.total_size() as usize);
        record.extend_from_slice(&self.to_bytes());
        record.extend_from_slice(key);
        record.extend_from_slice(value);
        record
    }
}
