//! Memory management syscalls

use super::common::{SyscallError, SyscallResult};
use crate::fs::FileRef;
use crate::posix::{MAP_FAILED, MapFlags, ProtFlags};
use crate::proc::Process;

/// `mmap(addr, file, length, offset, flags, prot)`
///
/// Validates the raw arguments, installs a region descriptor and returns
/// its base address. No pages are wired; population happens on fault.
pub fn sys_mmap(
    proc: &mut Process,
    addr: usize,
    file: Option<FileRef>,
    length: isize,
    offset: isize,
    flags: u32,
    prot: u32,
) -> SyscallResult {
    log::trace!(
        "mmap: pid={} addr={:#x} length={} offset={} flags={:#x} prot={:#x}",
        proc.pid,
        addr,
        length,
        offset,
        flags,
        prot
    );
    if length <= 0 || offset < 0 {
        return Err(SyscallError::InvalidArgument);
    }
    let flags = MapFlags::from_bits_truncate(flags);
    let prot = ProtFlags::from_bits_truncate(prot);
    let base = proc
        .mem
        .mmap(addr, file, length as usize, offset as usize, flags, prot)?;
    Ok(base as u64)
}

/// `munmap(addr, length)`
pub fn sys_munmap(proc: &mut Process, addr: usize, length: usize) -> SyscallResult {
    log::trace!("munmap: pid={} addr={:#x} length={}", proc.pid, addr, length);
    proc.mem.munmap(addr, length)?;
    Ok(0)
}

/// Raw `mmap` entry point: the base address on success, `MAP_FAILED`
/// otherwise.
pub fn mmap(
    proc: &mut Process,
    addr: usize,
    file: Option<FileRef>,
    length: isize,
    offset: isize,
    flags: u32,
    prot: u32,
) -> usize {
    match sys_mmap(proc, addr, file, length, offset, flags, prot) {
        Ok(base) => base as usize,
        Err(err) => {
            log::debug!("mmap: failed with {:?}", err);
            MAP_FAILED
        }
    }
}

/// Raw `munmap` entry point: `0` on success, `-1` otherwise.
pub fn munmap(proc: &mut Process, addr: usize, length: usize) -> i32 {
    match sys_munmap(proc, addr, length) {
        Ok(_) => 0,
        Err(err) => {
            log::debug!("munmap: failed with {:?}", err);
            -1
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mm::{MMAPBASE, PAGE_SIZE};

    fn anon_flags() -> u32 {
        (MapFlags::PRIVATE | MapFlags::ANONYMOUS).bits()
    }

    fn rw() -> u32 {
        (ProtFlags::READ | ProtFlags::WRITE).bits()
    }

    #[test]
    fn test_negative_length_rejected() {
        let mut proc = Process::new().expect("proc");
        assert_eq!(
            sys_mmap(&mut proc, 0, None, -1, 0, anon_flags(), rw()),
            Err(SyscallError::InvalidArgument)
        );
        proc.exit();
    }

    #[test]
    fn test_negative_offset_rejected() {
        let mut proc = Process::new().expect("proc");
        assert_eq!(
            sys_mmap(&mut proc, 0, None, PAGE_SIZE as isize, -4, anon_flags(), rw()),
            Err(SyscallError::InvalidArgument)
        );
        proc.exit();
    }

    #[test]
    fn test_raw_front_returns_sentinels() {
        let mut proc = Process::new().expect("proc");
        let base = mmap(&mut proc, 0, None, PAGE_SIZE as isize, 0, anon_flags(), rw());
        assert_eq!(base, MMAPBASE);
        assert_eq!(munmap(&mut proc, base, PAGE_SIZE), 0);
        assert_eq!(munmap(&mut proc, base, PAGE_SIZE), -1);
        assert_eq!(mmap(&mut proc, 0, None, 0, 0, anon_flags(), rw()), MAP_FAILED);
        proc.exit();
    }
}
