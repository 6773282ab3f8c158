//! The per-process region table and hole finder.
//!
//! Regions are kept in a bounded vector sorted by base address. All
//! placement decisions go through [`RegionTable::place`], which keeps the
//! table ordered and non-overlapping by construction.

use heapless::Vec;

use crate::fs::FileRef;
use crate::mm::phys::page_round_up;
use crate::mm::{KERNBASE, MAX_MMAPS, MMAPBASE, MmapError, MmapResult};
use crate::posix::MapFlags;

/// One mapping descriptor.
#[derive(Debug, Clone, Default)]
pub struct MmapRegion {
    /// Page-aligned virtual start address.
    pub base: usize,
    /// Requested length in bytes; the extent runs from `base` onward.
    pub length: usize,
    /// Leaf PTE permission bits wired for this region's pages.
    pub perm: usize,
    /// Mapping flags as given to `mmap`.
    pub flags: MapFlags,
    /// Backing file; `None` for anonymous regions.
    pub file: Option<FileRef>,
    /// Byte offset into the file for the first byte of the region.
    pub offset: usize,
    /// Bytes already populated, for resuming partial materialization.
    pub stored: usize,
    /// Non-zero on a fork child of a SHARED region: the frames are
    /// borrowed from the parent and must not be freed here.
    pub ref_count: u32,
}

impl MmapRegion {
    /// One past the last byte of the region.
    pub fn end(&self) -> usize {
        self.base + self.length
    }

    /// One past the last page the region occupies.
    pub fn page_end(&self) -> usize {
        page_round_up(self.end())
    }

    pub fn is_shared(&self) -> bool {
        self.flags.contains(MapFlags::SHARED)
    }

    pub fn is_anonymous(&self) -> bool {
        self.flags.contains(MapFlags::ANONYMOUS)
    }

    /// Whether the frames belong to another process's cohort member.
    pub fn is_borrowed(&self) -> bool {
        self.ref_count > 0
    }

    pub fn covers(&self, va: usize) -> bool {
        self.base <= va && va < self.end()
    }
}

/// Fixed-capacity, address-ordered table of mapping descriptors.
#[derive(Debug, Default)]
pub struct RegionTable {
    regions: Vec<MmapRegion, MAX_MMAPS>,
}

impl RegionTable {
    pub fn new() -> RegionTable {
        RegionTable {
            regions: Vec::new(),
        }
    }

    /// Number of live descriptors.
    pub fn total(&self) -> usize {
        self.regions.len()
    }

    pub fn get(&self, idx: usize) -> Option<&MmapRegion> {
        self.regions.get(idx)
    }

    pub fn get_mut(&mut self, idx: usize) -> Option<&mut MmapRegion> {
        self.regions.get_mut(idx)
    }

    /// Iterate over live descriptors in address order.
    pub fn iter(&self) -> impl Iterator<Item = &MmapRegion> {
        self.regions.iter()
    }

    /// Insert a skeleton descriptor holding only `base` and `length` at
    /// `idx`, shifting the tail one slot right. The caller fills in the
    /// remaining fields.
    pub fn insert_at(&mut self, idx: usize, base: usize, length: usize) -> MmapResult<()> {
        debug_assert!(idx <= self.regions.len());
        if base < MMAPBASE || page_round_up(base + length) > KERNBASE {
            return Err(MmapError::InvalidArgument);
        }
        let skeleton = MmapRegion {
            base,
            length,
            ..MmapRegion::default()
        };
        self.regions
            .insert(idx, skeleton)
            .map_err(|_| MmapError::CapacityExceeded)
    }

    /// Drop entry `idx`, shifting the tail one slot left.
    pub fn remove_at(&mut self, idx: usize) {
        debug_assert!(idx < self.regions.len());
        self.regions.remove(idx);
    }

    /// Index of the region whose base equals the page-rounded `addr`.
    pub fn find_by_base(&self, addr: usize) -> Option<usize> {
        let base = page_round_up(addr);
        self.regions.iter().position(|r| r.base == base)
    }

    /// Index of the region covering `va`, if any.
    pub fn find_covering(&self, va: usize) -> Option<usize> {
        self.regions.iter().position(|r| r.covers(va))
    }

    /// Choose a placement for a new region of `length` bytes and insert a
    /// skeleton entry for it, returning its index.
    ///
    /// A non-zero `requested` base is tried first; when it does not fit and
    /// `fixed` is clear, placement falls back to the first hole scanning
    /// from `MMAPBASE` upward. On failure the table is unchanged.
    pub fn place(&mut self, length: usize, requested: usize, fixed: bool) -> MmapResult<usize> {
        debug_assert!(length > 0);
        if requested != 0 {
            match self.place_at(requested, length) {
                Ok(idx) => return Ok(idx),
                Err(err) if fixed => return Err(err),
                Err(_) => {}
            }
        }
        self.place_anywhere(length)
    }

    /// Try the exact base the caller asked for. Fits iff the candidate
    /// extent intersects no existing region's extent.
    fn place_at(&mut self, base: usize, length: usize) -> MmapResult<usize> {
        if base + length > KERNBASE {
            return Err(MmapError::CapacityExceeded);
        }
        let mut idx = self.regions.len();
        for (i, r) in self.regions.iter().enumerate() {
            if base < r.end() && r.base < base + length {
                return Err(MmapError::CapacityExceeded);
            }
            if r.base > base {
                idx = i;
                break;
            }
        }
        self.insert_at(idx, base, length)?;
        Ok(idx)
    }

    /// First-fit scan: the hole between neighbors `i` and `i+1` runs from
    /// the page after region `i` to the page where region `i+1` starts; an
    /// exact fit is acceptable. When no internal gap fits, the region is
    /// appended after the last live entry.
    fn place_anywhere(&mut self, length: usize) -> MmapResult<usize> {
        let total = self.regions.len();
        let mut idx = total;
        let mut start = match self.regions.last() {
            None => MMAPBASE,
            Some(last) => last.page_end(),
        };
        for i in 0..total.saturating_sub(1) {
            let gap_lo = self.regions[i].page_end();
            let gap_hi = page_round_up(self.regions[i + 1].base);
            if gap_hi - gap_lo >= length {
                idx = i + 1;
                start = gap_lo;
                break;
            }
        }
        if start + length > KERNBASE {
            return Err(MmapError::CapacityExceeded);
        }
        self.insert_at(idx, start, length)?;
        Ok(idx)
    }
}
