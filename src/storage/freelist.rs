//! # Free-Region Tracking
//!
//! This module implements [`FreeList`], the allocation manager for the data
//! table. It tracks which byte ranges of the table are free so record writes
//! can reserve non-conflicting regions, and so the reload path can mark
//! regions occupied by records already on disk.
//!
//! ## Representation
//!
//! Free space is a list of `{offset, size}` regions kept sorted by ascending
//! offset, seeded with a single region spanning the whole addressable table.
//! Regions never overlap, and the union of free and reserved regions always
//! equals `[0, MAX_TABLE_SIZE)`.
//!
//! ## Allocation Strategy
//!
//! `reserve` is first-fit: it takes space from the lowest-offset region large
//! enough. While nothing has been released this degenerates into sequential
//! append, which is what gives fresh records their increasing offsets.
//! `release` reinserts a region in sorted position and coalesces with
//! abutting neighbours so fragmentation collapses back into larger regions.
//! `allocate` carves a specific range out of the region enclosing it; reload
//! uses it to register every record found in the file.
//!
//! ## Thread Safety
//!
//! A single mutex guards the region list. All three mutating operations
//! acquire it; the list is never observed mid-mutation.

use eyre::{Result, WrapErr};
use parking_lot::Mutex;

use crate::error::StoreError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Region {
    pub offset: i64,
    pub size: i64,
}

impl Region {
    fn end(&self) -> i64 {
        self.offset + self.size
    }
}

#[derive(Debug)]
pub struct FreeList {
    max_size: i64,
    regions: Mutex<Vec<Region>>,
}

impl FreeList {
    /// Creates a free list covering `[0, max_size)`.
    pub fn new(max_size: i64) -> Self {
        Self {
            max_size,
            regions: Mutex::new(vec![Region {
                offset: 0,
                size: max_size,
            }]),
        }
    }

    /// Reserves `size` bytes from the first region that can hold them and
    /// returns the assigned offset. Fails with `NoFreeSpace` when no region
    /// is large enough.
    pub fn reserve(&self, size: i64) -> Result<i64> {
        let mut regions = self.regions.lock();

        for i in 0..regions.len() {
            if regions[i].size >= size {
                let offset = regions[i].offset;
                regions[i].offset += size;
                regions[i].size -= size;

                if regions[i].size == 0 {
                    regions.remove(i);
                }

                return Ok(offset);
            }
        }

        Err(StoreError::NoFreeSpace.into())
    }

    /// Marks the specific range `[offset, offset + size)` as occupied. The
    /// range must lie entirely inside one free region; reload uses this to
    /// register records already present in the file.
    pub fn allocate(&self, size: i64, offset: i64) -> Result<()> {
        let mut regions = self.regions.lock();

        let i = match regions
            .iter()
            .position(|r| r.offset <= offset && offset + size <= r.end())
        {
            Some(i) => i,
            None => {
                return Err(eyre::Report::from(StoreError::NoFreeSpace))
                    .wrap_err_with(|| {
                        format!("region at offset {offset} (size {size}) is not free")
                    });
            }
        };

        let enclosing = regions[i];
        let leading = offset - enclosing.offset;
        let trailing = enclosing.end() - (offset + size);

        match (leading > 0, trailing > 0) {
            (true, true) => {
                regions[i].size = leading;
                regions.insert(
                    i + 1,
                    Region {
                        offset: offset + size,
                        size: trailing,
                    },
                );
            }
            (true, false) => regions[i].size = leading,
            (false, true) => {
                regions[i].offset = offset + size;
                regions[i].size = trailing;
            }
            (false, false) => {
                regions.remove(i);
            }
        }

        Ok(())
    }

    /// Returns `[offset, offset + size)` to the free list, merging with
    /// abutting neighbours.
    pub fn release(&self, size: i64, offset: i64) {
        let mut regions = self.regions.lock();

        let i = regions.partition_point(|r| r.offset < offset);

        let merges_prev = i > 0 && regions[i - 1].end() == offset;
        let merges_next = i < regions.len() && offset + size == regions[i].offset;

        match (merges_prev, merges_next) {
            (true, true) => {
                regions[i - 1].size += size + regions[i].size;
                regions.remove(i);
            }
            (true, false) => regions[i - 1].size += size,
            (false, true) => {
                regions[i].offset = offset;
                regions[i].size += size;
            }
            (false, false) => regions.insert(i, Region { offset, size }),
        }
    }

    /// Returns the number of reserved bytes and the current region count.
    pub fn stats(&self) -> (i64, usize) {
        let regions = self.regions.lock();
        let free: i64 = regions.iter().map(|r| r.size).sum();
        (self.max_size - free, regions.len())
    }

    /// True while no space has ever been reserved (or everything reserved
    /// has been released again).
    pub fn empty(&self) -> bool {
        let regions = self.regions.lock();
        regions.len() == 1 && regions[0].offset == 0 && regions[0].size == self.max_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;

    #[test]
    fn reserve_is_sequential_from_zero() {
        let free = FreeList::new(1 << 30);

        assert_eq!(free.reserve(1 << 12).unwrap(), 0);
        assert_eq!(free.reserve(1 << 12).unwrap(), 4096);
    }

    #[test]
    fn released_region_is_reused_first_fit() {
        let free = FreeList::new(1 << 30);

        assert_eq!(free.reserve(4096).unwrap(), 0);
        assert_eq!(free.reserve(4096).unwrap(), 4096);

        free.release(4096, 0);

        assert_eq!(free.reserve(4096).unwrap(), 0);
    }

    #[test]
    fn release_in_the_middle_is_reused() {
        let free = FreeList::new(1 << 30);

        for _ in 0..4 {
            free.reserve(4096).unwrap();
        }

        free.release(4096, 4096);

        assert_eq!(free.reserve(4096).unwrap(), 4096);
    }

    #[test]
    fn full_release_coalesces_to_single_region() {
        let free = FreeList::new(1 << 30);

        for _ in 0..5 {
            free.reserve(4096).unwrap();
        }

        free.release(20480, 0);

        let regions = free.regions.lock();
        assert_eq!(regions.len(), 1);
        assert_eq!(regions[0].offset, 0);
        assert_eq!(regions[0].size, 1 << 30);
    }

    #[test]
    fn scattered_releases_coalesce_with_neighbours() {
        let free = FreeList::new(1 << 30);

        for _ in 0..9 {
            free.reserve(4096).unwrap();
        }

        free.release(4096, 8192);
        free.release(4096, 20480);
        {
            let regions = free.regions.lock();
            assert_eq!(regions.len(), 3);
        }

        free.release(4096, 12288);
        free.release(4096, 16384);

        let regions = free.regions.lock();
        assert_eq!(regions.len(), 2);
        assert_eq!(regions[0].offset, 8192);
        assert_eq!(regions[0].size, 16384);
    }

    #[test]
    fn allocate_splits_the_enclosing_region() {
        let free = FreeList::new(1 << 20);

        free.allocate(100, 500).unwrap();

        let regions = free.regions.lock();
        assert_eq!(
            *regions,
            vec![
                Region {
                    offset: 0,
                    size: 500
                },
                Region {
                    offset: 600,
                    size: (1 << 20) - 600
                },
            ]
        );
    }

    #[test]
    fn allocate_at_region_start_trims_it() {
        let free = FreeList::new(1 << 20);

        free.allocate(4096, 0).unwrap();

        assert_eq!(free.reserve(16).unwrap(), 4096);
    }

    #[test]
    fn allocate_of_reserved_range_fails() {
        let free = FreeList::new(1 << 20);
        free.reserve(4096).unwrap();

        let err = free.allocate(4096, 0).unwrap_err();
        assert_eq!(StoreError::of(&err), Some(StoreError::NoFreeSpace));
    }

    #[test]
    fn reserve_larger_than_any_region_fails() {
        let free = FreeList::new(1024);
        free.reserve(1000).unwrap();

        let err = free.reserve(100).unwrap_err();
        assert_eq!(StoreError::of(&err), Some(StoreError::NoFreeSpace));
    }

    #[test]
    fn empty_tracks_full_round_trips() {
        let free = FreeList::new(1 << 20);
        assert!(free.empty());

        let off = free.reserve(512).unwrap();
        assert!(!free.empty());

        free.release(512, off);
        assert!(free.empty());
    }

    #[test]
    fn randomized_reserve_release_conserves_space() {
        let mut rng = rand::thread_rng();
        let max = 1 << 24;
        let free = FreeList::new(max);
        let mut held: Vec<(i64, i64)> = Vec::new();

        for _ in 0..2000 {
            if held.is_empty() || rng.gen_bool(0.6) {
                let size = rng.gen_range(1..4096);
                if let Ok(offset) = free.reserve(size) {
                    held.push((size, offset));
                }
            } else {
                let (size, offset) = held.swap_remove(rng.gen_range(0..held.len()));
                free.release(size, offset);
            }

            let reserved: i64 = held.iter().map(|(s, _)| s).sum();
            let (allocated, _) = free.stats();
            assert_eq!(allocated, reserved);

            let regions = free.regions.lock();
            for pair in regions.windows(2) {
                assert!(pair[0].end() <= pair[1].offset, "regions overlap or are unsorted");
            }
        }
    }
}
