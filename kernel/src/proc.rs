//! Minimal process object.
//!
//! A process owns exactly one address space. The process table, scheduler
//! and trap dispatch live in the surrounding kernel; fork and exit here
//! drive only the memory side of those paths.

use core::sync::atomic::{AtomicU32, Ordering};

use crate::mm::{AddressSpace, MmapResult};

static NEXT_PID: AtomicU32 = AtomicU32::new(1);

/// One process: pid plus address space.
#[derive(Debug)]
pub struct Process {
    pub pid: u32,
    pub mem: AddressSpace,
}

impl Process {
    /// Create a process with an empty address space.
    pub fn new() -> MmapResult<Process> {
        Ok(Process {
            pid: NEXT_PID.fetch_add(1, Ordering::SeqCst),
            mem: AddressSpace::new()?,
        })
    }

    /// Fork the memory image: duplicate every region into a fresh child.
    /// A failed duplication tears the partially-built child down before
    /// the error propagates to the process-creation path.
    pub fn fork(&mut self) -> MmapResult<Process> {
        let mut child = Process::new()?;
        log::debug!("fork: pid {} -> {}", self.pid, child.pid);
        if let Err(err) = self.mem.fork_into(&mut child.mem) {
            child.mem.teardown();
            return Err(err);
        }
        Ok(child)
    }

    /// Process exit: release every remaining mapping.
    pub fn exit(&mut self) {
        log::debug!("exit: pid {}", self.pid);
        self.mem.teardown();
    }
}
