//! Junction kernel core
//!
//! This crate is the CORE of a small teaching operating-system kernel: a
//! physical-frame allocator backed by a coremap, a per-process address space
//! with three regions (code, data, stack), TLB fault handling with
//! copy-on-fork semantics, POSIX-like process lifecycle syscalls
//! (`fork`/`exec`/`exit`/`waitpid`), and a direction-fair intersection
//! admission monitor.
//!
//! Hardware TLB register access, raw physical-frame stealing before the
//! coremap is alive, ELF loading, the VFS layer, thread scheduling, and the
//! kernel heap allocator are external collaborators this crate consumes
//! through the traits in [`external`]; it does not implement them. See
//! `external::test_support` for the deterministic stand-ins the test suite
//! runs against.

#![no_std]

extern crate alloc;

// This crate ships no bare-metal boot path (out of scope — see `external`):
// it only needs *a* global allocator to exercise its alloc-backed data
// structures, so it borrows the host system allocator the same way the
// teacher's `lib.rs` does for its own host/test configuration.
extern crate std;
#[global_allocator]
static SYSTEM_ALLOCATOR: std::alloc::System = std::alloc::System;

pub mod error;
pub mod external;
pub mod intersection;
pub mod log_service;
pub mod mm;
pub mod process;
pub mod sync;

pub use error::KernelError;
pub use intersection::{Direction, Intersection};
pub use mm::{addrspace::AddressSpace, coremap::Coremap, PAGE_SIZE};
pub use process::{ProcessId, ProcessTable};
