//! Rill kernel
//!
//! A small teaching operating system kernel. This crate carries the
//! per-process memory-mapping subsystem: the `mmap`/`munmap` facility, the
//! lazy page populator driven from the page-fault path, and the fork-time
//! duplication of a process's mapping set.
//!
//! # Architecture
//!
//! - **Memory management** (`mm`): frame allocation, software page tables,
//!   the per-process region table and the mapping core.
//! - **File objects** (`fs`): the minimal file/inode surface the mapping
//!   core reads from and writes back to.
//! - **Processes** (`proc`): a process owns one address space; fork and
//!   exit drive the duplicator and teardown.
//! - **System calls** (`syscalls`): argument validation and error mapping
//!   for the `mmap`/`munmap` entry points.
//!
//! The page-fault trap handler, the process table and the syscall dispatch
//! shim live in the surrounding kernel; this crate exposes the hooks they
//! call into.

#![cfg_attr(not(test), no_std)]
#![allow(dead_code)]

extern crate alloc;

pub mod fs;
pub mod mm;
pub mod posix;
pub mod proc;
pub mod syscalls;
