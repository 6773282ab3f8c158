//! The mapping core: lazy population, fork duplication, unmap and teardown.
//!
//! An [`AddressSpace`] pairs one page directory with one region table. The
//! syscall front installs descriptors without wiring any pages; the fault
//! hook materializes pages one at a time; fork duplicates the whole set
//! with shared-vs-private semantics; unmap releases frames and writes
//! shared file-backed regions back to their file.

extern crate alloc;

use alloc::vec::Vec;
use core::ptr;

use crate::fs::FileRef;
use crate::mm::phys::{Frame, PAGE_SIZE, page_round_down, page_round_up};
use crate::mm::region::RegionTable;
use crate::mm::vm::{PageDir, VmError, flags::*};
use crate::mm::{KERNBASE, MAX_MMAPS, MMAPBASE, MmapError, MmapResult};
use crate::posix::{MapFlags, ProtFlags};

/// Translate requested protection bits into leaf PTE permissions.
///
/// `PROT_NONE` is stored verbatim (no access bits at all, so any user touch
/// traps); anything else gets the user bit, and write access implies read.
fn prot_to_perm(prot: ProtFlags) -> usize {
    if prot.is_empty() {
        return 0;
    }
    let mut perm = PTE_U;
    if prot.contains(ProtFlags::READ) {
        perm |= PTE_R;
    }
    if prot.contains(ProtFlags::WRITE) {
        perm |= PTE_W | PTE_R;
    }
    perm
}

/// One process's virtual address space: page directory plus region table.
#[derive(Debug)]
pub struct AddressSpace {
    pagedir: PageDir,
    regions: RegionTable,
}

impl AddressSpace {
    /// Allocate an empty address space.
    pub fn new() -> MmapResult<AddressSpace> {
        let pagedir = PageDir::new().ok_or(MmapError::OutOfMemory)?;
        Ok(AddressSpace {
            pagedir,
            regions: RegionTable::new(),
        })
    }

    /// The region table, in address order.
    pub fn regions(&self) -> &RegionTable {
        &self.regions
    }

    /// Frame address backing `va`, or `None` while the page is unwired.
    pub fn translate(&self, va: usize) -> Option<usize> {
        self.pagedir.translate(va)
    }

    /// Copy bytes out of this address space, as a user load would.
    pub fn copy_in(&self, dst: &mut [u8], src_va: usize) -> Result<(), VmError> {
        self.pagedir.copy_in(dst, src_va)
    }

    /// Copy bytes into this address space, as a user store would.
    pub fn copy_out(&mut self, dst_va: usize, src: &[u8]) -> Result<(), VmError> {
        self.pagedir.copy_out(dst_va, src)
    }

    // ========================================================================
    // Create mapping
    // ========================================================================

    /// Install a new region and return its base address. No pages are wired
    /// here; the fault hook does that on first touch.
    pub fn mmap(
        &mut self,
        addr: usize,
        file: Option<FileRef>,
        length: usize,
        offset: usize,
        flags: MapFlags,
        prot: ProtFlags,
    ) -> MmapResult<usize> {
        if flags.contains(MapFlags::PRIVATE) == flags.contains(MapFlags::SHARED) {
            return Err(MmapError::InvalidArgument);
        }
        if length == 0 {
            return Err(MmapError::InvalidArgument);
        }
        let anonymous = flags.contains(MapFlags::ANONYMOUS);
        let file = if anonymous { None } else { file };
        if !anonymous {
            let f = file.as_ref().ok_or(MmapError::InvalidArgument)?;
            if !f.readable {
                return Err(MmapError::PermissionDenied);
            }
            if flags.contains(MapFlags::SHARED) && prot.contains(ProtFlags::WRITE) && !f.writable {
                return Err(MmapError::PermissionDenied);
            }
        }
        if self.regions.total() == MAX_MMAPS {
            return Err(MmapError::CapacityExceeded);
        }
        if addr != 0 {
            let end = addr.checked_add(length).ok_or(MmapError::InvalidArgument)?;
            if addr < MMAPBASE || addr % PAGE_SIZE != 0 || end > KERNBASE {
                return Err(MmapError::InvalidArgument);
            }
        }
        let fixed = flags.contains(MapFlags::FIXED);
        if fixed && addr == 0 {
            return Err(MmapError::InvalidArgument);
        }

        let idx = self.regions.place(length, addr, fixed)?;
        let region = self.regions.get_mut(idx).ok_or(MmapError::CapacityExceeded)?;
        region.flags = flags;
        region.perm = prot_to_perm(prot);
        region.offset = if anonymous { 0 } else { offset };
        region.file = file;
        let base = region.base;
        log::debug!(
            "mmap: placed [{:#x}, {:#x}) flags={:?} prot={:?}",
            base,
            base + length,
            flags,
            prot
        );
        Ok(base)
    }

    // ========================================================================
    // Populator
    // ========================================================================

    /// Materialize `len` bytes of region `idx` starting at the page-aligned
    /// address `va`: one fresh zeroed frame per page, filled from the
    /// backing file when there is one, then wired with the region's
    /// permissions. Pages that are already wired are skipped; for
    /// file-backed regions the `stored` cursor marks how far the populated
    /// prefix reaches, so resuming skips straight past it. On failure every
    /// page wired by this call is released again.
    fn populate(&mut self, idx: usize, va: usize, len: usize) -> MmapResult<()> {
        let (base, length, perm, file, offset, stored) = {
            let r = self.regions.get(idx).ok_or(MmapError::NotFound)?;
            (r.base, r.length, r.perm, r.file.clone(), r.offset, r.stored)
        };
        debug_assert!(va >= base && va % PAGE_SIZE == 0);
        let end = core::cmp::min(page_round_up(va + len), page_round_up(base + length));

        // Pages below base + stored were populated earlier; resume after them.
        let prefix_end = base + page_round_up(stored);
        let mut newly: Vec<usize> = Vec::new();
        let mut cur = va;
        if file.is_some() && cur < prefix_end {
            cur = core::cmp::min(end, prefix_end);
        }
        while cur < end {
            if self.pagedir.translate(cur).is_some() {
                cur += PAGE_SIZE;
                continue;
            }
            let Some(mut frame) = Frame::alloc() else {
                self.rollback(&newly);
                return Err(MmapError::OutOfMemory);
            };
            if let Some(f) = &file {
                // Reads past end-of-file fall short and leave the tail zero.
                f.inode.read_page(offset + (cur - base), frame.as_mut_slice());
            }
            let pa = frame.addr();
            if self.pagedir.map_pages(cur, PAGE_SIZE, pa, perm).is_err() {
                drop(frame);
                self.rollback(&newly);
                return Err(MmapError::OutOfMemory);
            }
            frame.into_raw();
            newly.push(cur);
            cur += PAGE_SIZE;
        }

        // The cursor only moves while the populated prefix stays contiguous:
        // a fault beyond a hole must not claim the hole as populated.
        if file.is_some() && va <= prefix_end && end > base + stored {
            if let Some(r) = self.regions.get_mut(idx) {
                r.stored = core::cmp::min(length, end - base);
            }
        }
        Ok(())
    }

    /// Undo the wirings of the current populate call.
    fn rollback(&mut self, newly: &[usize]) {
        for &va in newly {
            if let Some(pa) = self.pagedir.unmap_page(va) {
                // SAFETY: this call wired the frame; the PTE was its only owner.
                drop(unsafe { Frame::from_raw(pa) });
            }
        }
    }

    // ========================================================================
    // Fault hook
    // ========================================================================

    /// Called from the trap handler on a page fault at `va`. Populates the
    /// faulting page when a live region covers the address; otherwise the
    /// fault is unhandled and the error goes back to the trap path.
    pub fn handle_fault(&mut self, va: usize) -> MmapResult<()> {
        let idx = self.regions.find_covering(va).ok_or(MmapError::NotFound)?;
        log::trace!("fault: va={:#x} lands in region {}", va, idx);
        self.populate(idx, page_round_down(va), PAGE_SIZE)
    }

    // ========================================================================
    // Fork duplicator
    // ========================================================================

    /// Duplicate every region into `child`, which must be empty. SHARED
    /// regions share frames (forcing any unwired parent page in first) and
    /// mark the child as borrowing them; PRIVATE regions deep-copy wired
    /// pages and stay lazy for the rest. On error the caller tears the
    /// partially-built child down.
    pub fn fork_into(&mut self, child: &mut AddressSpace) -> MmapResult<()> {
        debug_assert_eq!(child.regions.total(), 0);
        for i in 0..self.regions.total() {
            let (base, length, perm, flags, file, offset, stored) = {
                let r = self.regions.get(i).ok_or(MmapError::NotFound)?;
                (r.base, r.length, r.perm, r.flags, r.file.clone(), r.offset, r.stored)
            };
            let shared = flags.contains(MapFlags::SHARED);

            child.regions.insert_at(i, base, length)?;
            {
                let c = child.regions.get_mut(i).ok_or(MmapError::CapacityExceeded)?;
                c.perm = perm;
                c.flags = flags;
                c.file = file;
                c.offset = offset;
                c.stored = stored;
                c.ref_count = if shared { 1 } else { 0 };
            }

            let mut va = base;
            while va < base + length {
                if shared {
                    if self.pagedir.translate(va).is_none() {
                        // Fault the page into the parent first so both
                        // sides end up on the same frame.
                        self.populate(i, va, PAGE_SIZE)?;
                    }
                    let pa = self.pagedir.translate(va).ok_or(MmapError::OutOfMemory)?;
                    child
                        .pagedir
                        .map_pages(va, PAGE_SIZE, page_round_down(pa), perm)
                        .map_err(|_| MmapError::OutOfMemory)?;
                } else if let Some(pa) = self.pagedir.translate(va) {
                    let mut frame = Frame::alloc().ok_or(MmapError::OutOfMemory)?;
                    // SAFETY: `pa` is a frame wired in the parent; both
                    // sides are whole pages.
                    unsafe {
                        ptr::copy_nonoverlapping(
                            pa as *const u8,
                            frame.as_mut_slice().as_mut_ptr(),
                            PAGE_SIZE,
                        );
                    }
                    let addr = frame.addr();
                    child
                        .pagedir
                        .map_pages(va, PAGE_SIZE, addr, perm)
                        .map_err(|_| MmapError::OutOfMemory)?;
                    frame.into_raw();
                }
                va += PAGE_SIZE;
            }

            // Forced populations above advanced the parent's cursor.
            let stored_now = self.regions.get(i).map(|r| r.stored).unwrap_or(stored);
            if let Some(c) = child.regions.get_mut(i) {
                c.stored = stored_now;
            }
        }
        Ok(())
    }

    // ========================================================================
    // Unmap & teardown
    // ========================================================================

    /// Unmap from the start of the region whose base matches `addr`.
    ///
    /// SHARED, writable, file-backed regions are written back to their file
    /// first. Frames are freed unless the region borrows them from a fork
    /// parent. When the rounded length covers the whole region the
    /// descriptor goes away; otherwise the region shrinks from the low end.
    pub fn munmap(&mut self, addr: usize, length: usize) -> MmapResult<()> {
        if length == 0 {
            return Err(MmapError::InvalidArgument);
        }
        let idx = self.regions.find_by_base(addr).ok_or(MmapError::NotFound)?;
        let (base, region_len, perm, flags, file, offset, borrowed) = {
            let r = self.regions.get(idx).ok_or(MmapError::NotFound)?;
            (
                r.base,
                r.length,
                r.perm,
                r.flags,
                r.file.clone(),
                r.offset,
                r.is_borrowed(),
            )
        };

        if flags.contains(MapFlags::SHARED)
            && !flags.contains(MapFlags::ANONYMOUS)
            && perm & PTE_W != 0
        {
            let f = file.as_ref().ok_or(MmapError::IoError)?;
            self.write_back(idx, base, region_len, f, offset)?;
        }

        let unmap_len = page_round_up(core::cmp::min(length, region_len));
        self.release_frames(base, core::cmp::min(unmap_len, region_len), borrowed);

        if unmap_len >= region_len {
            self.regions.remove_at(idx);
        } else if let Some(r) = self.regions.get_mut(idx) {
            // Low-end shrink; a region never splits in two.
            r.base += unmap_len;
            r.length -= unmap_len;
            if r.file.is_some() {
                r.offset += unmap_len;
            }
            r.stored = r.stored.saturating_sub(unmap_len);
        }
        log::debug!("munmap: [{:#x}, +{:#x}) done", addr, length);
        Ok(())
    }

    /// Write the whole region back to its file at the region's offset.
    /// Unfaulted pages are materialized first so the file gets its own
    /// bytes back rather than zeros.
    fn write_back(
        &mut self,
        idx: usize,
        base: usize,
        len: usize,
        file: &FileRef,
        offset: usize,
    ) -> MmapResult<()> {
        log::debug!("writeback: region [{:#x}, +{:#x}) -> offset {}", base, len, offset);
        self.populate(idx, base, len)?;
        file.seek(offset);
        let mut buf = alloc::vec![0u8; PAGE_SIZE];
        let mut va = base;
        let mut remaining = len;
        while remaining > 0 {
            let n = core::cmp::min(PAGE_SIZE, remaining);
            self.pagedir
                .copy_in(&mut buf[..n], va)
                .map_err(|_| MmapError::IoError)?;
            let written = file.write(&buf[..n]).map_err(|_| MmapError::IoError)?;
            if written != n {
                return Err(MmapError::IoError);
            }
            va += n;
            remaining -= n;
        }
        Ok(())
    }

    /// Clear the PTEs of `[base, base + span)` and free the frames unless
    /// the region borrows them.
    fn release_frames(&mut self, base: usize, span: usize, borrowed: bool) {
        let mut va = base;
        while va < base + span {
            if let Some(pa) = self.pagedir.unmap_page(va) {
                if !borrowed {
                    // SAFETY: an owned region's PTE was the frame's only owner.
                    drop(unsafe { Frame::from_raw(pa) });
                }
            }
            va += PAGE_SIZE;
        }
    }

    /// Process-exit teardown: unmap every remaining region, highest index
    /// first. Borrowed regions skip frame freeing inside `munmap`; an unmap
    /// error drops the descriptor anyway so exit always converges.
    pub fn teardown(&mut self) {
        while self.regions.total() > 0 {
            let idx = self.regions.total() - 1;
            let (base, length, borrowed) = match self.regions.get(idx) {
                Some(r) => (r.base, r.length, r.is_borrowed()),
                None => break,
            };
            if let Err(err) = self.munmap(base, length) {
                log::warn!(
                    "teardown: dropping region at {:#x} after unmap error {:?}",
                    base,
                    err
                );
                self.release_frames(base, length, borrowed);
                self.regions.remove_at(idx);
            }
        }
    }
}
