//! Virtual memory subsystem: coremap-backed physical frame allocator,
//! per-process address spaces, and TLB fault handling.

pub mod addrspace;
pub mod coremap;
pub mod fault;

/// Size of a physical frame / virtual page, in bytes.
pub const PAGE_SIZE: usize = 4096;

/// Fixed number of pages reserved for the user stack region.
pub const STACKPAGES: usize = 12;

/// Top (highest) user-space virtual address; the stack grows down from here.
pub const USERSTACK: usize = 0x8000_0000;

/// Maximum number of live processes this core tracks at once.
pub const MAX_PROCESSES: usize = 4096;

pub use addrspace::AddressSpace;
pub use coremap::Coremap;
