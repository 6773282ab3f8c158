//! File objects consumed by the memory-mapping core.
//!
//! The mapping core needs very little from the file layer: access bits, a
//! page-granular inode read for populating file-backed regions, and a
//! seek-then-write path for writing shared regions back on unmap. Inode
//! contents live in memory here; the on-disk filesystem and the descriptor
//! table are the surrounding kernel's business.

extern crate alloc;

use alloc::sync::Arc;
use alloc::vec::Vec;
use spin::Mutex;

use crate::mm::phys::PAGE_SIZE;

/// Shared handle to an open file.
pub type FileRef = Arc<File>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FsError {
    PermissionDenied,
}

/// An in-memory inode.
#[derive(Debug)]
pub struct Inode {
    /// Inode number
    pub inum: u32,
    data: Mutex<Vec<u8>>,
}

impl Inode {
    pub fn new(inum: u32, contents: &[u8]) -> Arc<Inode> {
        Arc::new(Inode {
            inum,
            data: Mutex::new(contents.to_vec()),
        })
    }

    /// Current file size in bytes.
    pub fn size(&self) -> usize {
        self.data.lock().len()
    }

    /// Read up to `dst.len()` bytes (at most one page) starting at byte
    /// `off`. Returns the number of bytes copied; a read at or past
    /// end-of-file copies nothing, leaving `dst` untouched.
    pub fn read_page(&self, off: usize, dst: &mut [u8]) -> usize {
        debug_assert!(dst.len() <= PAGE_SIZE);
        let data = self.data.lock();
        if off >= data.len() {
            return 0;
        }
        let n = core::cmp::min(dst.len(), data.len() - off);
        dst[..n].copy_from_slice(&data[off..off + n]);
        n
    }

    /// Write `src` at byte `off`, growing the file when the write runs past
    /// the current end. Returns the number of bytes written.
    pub fn write_at(&self, off: usize, src: &[u8]) -> usize {
        let mut data = self.data.lock();
        if data.len() < off + src.len() {
            data.resize(off + src.len(), 0);
        }
        data[off..off + src.len()].copy_from_slice(src);
        src.len()
    }

    /// A copy of the current contents.
    pub fn contents(&self) -> Vec<u8> {
        self.data.lock().clone()
    }
}

/// An open file: an inode plus access mode and a read/write offset.
#[derive(Debug)]
pub struct File {
    pub readable: bool,
    pub writable: bool,
    pub inode: Arc<Inode>,
    off: Mutex<usize>,
}

impl File {
    pub fn open(inode: Arc<Inode>, readable: bool, writable: bool) -> FileRef {
        Arc::new(File {
            readable,
            writable,
            inode,
            off: Mutex::new(0),
        })
    }

    /// Move the file offset.
    pub fn seek(&self, off: usize) {
        *self.off.lock() = off;
    }

    /// Current file offset.
    pub fn offset(&self) -> usize {
        *self.off.lock()
    }

    /// Write at the current offset and advance it.
    pub fn write(&self, src: &[u8]) -> Result<usize, FsError> {
        if !self.writable {
            return Err(FsError::PermissionDenied);
        }
        let mut off = self.off.lock();
        let n = self.inode.write_at(*off, src);
        *off += n;
        Ok(n)
    }
}
