//! POSIX-facing constants for the memory-mapping syscalls.

use bitflags::bitflags;

bitflags! {
    /// `mmap` mapping flags. Exactly one of `SHARED`/`PRIVATE` is required;
    /// `ANONYMOUS` and `FIXED` are independent modifiers.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct MapFlags: u32 {
        /// Writes are visible to other processes mapping the same region.
        const SHARED = 0x01;
        /// Changes stay local to this process.
        const PRIVATE = 0x02;
        /// Place the mapping exactly at the given address or fail.
        const FIXED = 0x10;
        /// Zero-filled memory with no backing file.
        const ANONYMOUS = 0x20;
    }
}

bitflags! {
    /// `mmap` protection bits. `PROT_NONE` is the empty set; write access
    /// implies read access.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct ProtFlags: u32 {
        const READ = 0x1;
        const WRITE = 0x2;
    }
}

/// No access at all; any user touch of the region traps.
pub const PROT_NONE: ProtFlags = ProtFlags::empty();

/// Sentinel returned by the raw `mmap` entry point on failure.
pub const MAP_FAILED: usize = usize::MAX;
