//! External collaborators this core consumes but does not implement.
//!
//! Hardware TLB access, pre-coremap frame stealing, ELF loading, the VFS,
//! cross-address-space copies, and thread scheduling are all out of scope
//! (see the crate-level docs): a real kernel hands this core already-working
//! implementations of these. The traits below name the interfaces it
//! consumes; [`test_support`] supplies deterministic in-memory stand-ins so
//! the rest of the crate can be exercised end-to-end without a real
//! bootloader, disk, or MMU behind it.

use alloc::string::String;
use alloc::vec::Vec;

use crate::error::KernelResult;

/// Pre-coremap physical RAM bounds and stealing, `ram_getsize`/`ram_stealmem`.
pub trait RamSizer {
    /// Returns `[lo, hi)`, the manageable physical address range.
    fn ram_getsize(&self) -> (usize, usize);
    /// Steals `n` bytes of physical memory before the coremap exists. Leaks
    /// are accepted; this primitive has no free counterpart.
    fn ram_stealmem(&self, n: usize) -> usize;
}

/// Raw byte access to physical RAM by frame address. A real kernel needs no
/// such trait (physical memory is just memory); this core's own test harness
/// does, since its "physical RAM" is a host-side buffer rather than an
/// actual address space. `mm::addrspace::AddressSpace::copy`/`prepare_load`
/// use this to move and zero page contents.
pub trait PhysicalMemory {
    fn read_frame(&self, paddr: usize, out: &mut [u8]);
    fn write_frame(&self, paddr: usize, data: &[u8]);
    fn zero_frame(&self, paddr: usize, len: usize);
}

/// MIPS-style software-managed TLB: `tlb_read`/`tlb_write`/`tlb_random`.
pub trait TlbDevice {
    /// Number of hardware TLB slots.
    fn num_tlb(&self) -> usize;
    /// Reads slot `idx` as `(entry_hi, entry_lo)`, or `None` if invalid.
    fn tlb_read(&self, idx: usize) -> Option<(u32, u32)>;
    /// Writes `(entry_hi, entry_lo)` into slot `idx`.
    fn tlb_write(&self, idx: usize, entry_hi: u32, entry_lo: u32);
    /// Writes `(entry_hi, entry_lo)` into a hardware-chosen random slot.
    fn tlb_random(&self, entry_hi: u32, entry_lo: u32);
    /// Invalidates every slot (used by `as_activate`).
    fn invalidate_all(&self);
}

/// Fills in an address space's region definitions from an ELF image and
/// returns its entry point, `load_elf(vnode, &entry_vaddr)`.
pub trait ElfLoader {
    fn load_elf(&self, path: &str, into: &mut crate::mm::addrspace::AddressSpace) -> KernelResult<usize>;
}

/// Minimal VFS surface this core calls through exec, `vfs_open`/`vfs_close`.
pub trait Vfs {
    fn vfs_open(&self, path: &str) -> KernelResult<u64>;
    fn vfs_close(&self, handle: u64);
}

/// Cross-address-space copies, `copyin`/`copyinstr`/`copyout`.
pub trait UserCopy {
    fn copyin(&self, user_src: usize, len: usize) -> KernelResult<Vec<u8>>;
    fn copyinstr(&self, user_src: usize, max_len: usize) -> KernelResult<String>;
    fn copyout(&self, data: &[u8], user_dst: usize) -> KernelResult<()>;
}

/// Thread scheduling primitives this core calls into but does not implement:
/// `thread_fork`, `thread_exit`, `proc_remthread`.
pub trait Scheduler {
    /// Starts a new thread in `child_pid` running `entry`, returns without
    /// waiting for it to run.
    fn thread_fork(&self, child_pid: crate::process::ProcessId, entry: ForkEntry) -> KernelResult<()>;
    /// Terminates the calling thread. Never returns on a real scheduler.
    fn thread_exit(&self, exit_code: i32) -> !;
    /// Detaches the calling thread from its process's thread list.
    fn proc_remthread(&self);
}

/// What a forked child's first instruction should observe: trapframe state
/// is architecture glue out of scope here (see `spec` design notes on
/// fork), so this models only what `enter_forked_process` needs to produce —
/// syscall return value 0 and the PC advanced past the `fork` trap.
#[derive(Debug, Clone, Copy)]
pub struct ForkEntry {
    pub return_value: i32,
    pub pc_advanced: bool,
}

/// Deterministic in-memory implementations of the traits above, used by this
/// crate's own test suite in place of a real kernel environment.
pub mod test_support {
    use alloc::collections::BTreeMap;
    use alloc::string::{String, ToString};
    use alloc::vec::Vec;
    use core::sync::atomic::{AtomicUsize, Ordering};

    use super::{ElfLoader, ForkEntry, PhysicalMemory, RamSizer, Scheduler, TlbDevice, UserCopy, Vfs};
    use crate::error::{FaultReason, KernelError, KernelResult};
    use crate::mm::addrspace::AddressSpace;
    use crate::process::ProcessId;
    use crate::sync::Mutex;

    /// A flat slab of bytes standing in for physical RAM, `[0, size)`. Backs
    /// both [`RamSizer`] (bounds/stealing) and [`PhysicalMemory`] (byte
    /// content), since on a host test there is no real physical address
    /// space behind either.
    pub struct FakeRam {
        next_steal: AtomicUsize,
        size: usize,
        bytes: Mutex<Vec<u8>>,
    }

    impl FakeRam {
        pub fn new(size: usize) -> Self {
            Self {
                next_steal: AtomicUsize::new(0),
                size,
                bytes: Mutex::new(alloc::vec![0u8; size]),
            }
        }
    }

    impl RamSizer for FakeRam {
        fn ram_getsize(&self) -> (usize, usize) {
            (0, self.size)
        }

        fn ram_stealmem(&self, n: usize) -> usize {
            let rounded = (n + crate::mm::PAGE_SIZE - 1) / crate::mm::PAGE_SIZE * crate::mm::PAGE_SIZE;
            self.next_steal.fetch_add(rounded, Ordering::SeqCst)
        }
    }

    impl PhysicalMemory for FakeRam {
        fn read_frame(&self, paddr: usize, out: &mut [u8]) {
            let bytes = self.bytes.lock();
            out.copy_from_slice(&bytes[paddr..paddr + out.len()]);
        }

        fn write_frame(&self, paddr: usize, data: &[u8]) {
            let mut bytes = self.bytes.lock();
            bytes[paddr..paddr + data.len()].copy_from_slice(data);
        }

        fn zero_frame(&self, paddr: usize, len: usize) {
            let mut bytes = self.bytes.lock();
            bytes[paddr..paddr + len].fill(0);
        }
    }

    /// A fixed-size TLB backed by an in-memory slot array.
    pub struct FakeTlb {
        slots: Mutex<Vec<Option<(u32, u32)>>>,
    }

    impl FakeTlb {
        pub fn new(num_slots: usize) -> Self {
            Self {
                slots: Mutex::new(alloc::vec![None; num_slots]),
            }
        }
    }

    impl TlbDevice for FakeTlb {
        fn num_tlb(&self) -> usize {
            self.slots.lock().len()
        }

        fn tlb_read(&self, idx: usize) -> Option<(u32, u32)> {
            self.slots.lock()[idx]
        }

        fn tlb_write(&self, idx: usize, entry_hi: u32, entry_lo: u32) {
            self.slots.lock()[idx] = Some((entry_hi, entry_lo));
        }

        fn tlb_random(&self, entry_hi: u32, entry_lo: u32) {
            let mut slots = self.slots.lock();
            let len = slots.len();
            slots[0.max(len.saturating_sub(1))] = Some((entry_hi, entry_lo));
        }

        fn invalidate_all(&self) {
            let mut slots = self.slots.lock();
            for slot in slots.iter_mut() {
                *slot = None;
            }
        }
    }

    /// A toy "ELF" that is just region sizes recorded ahead of time by a
    /// test, keyed by path.
    pub struct FakeElfLoader {
        images: BTreeMap<String, FakeImage>,
    }

    pub struct FakeImage {
        pub code_pages: usize,
        pub data_pages: usize,
        pub entry_point: usize,
    }

    impl FakeElfLoader {
        pub fn new() -> Self {
            Self {
                images: BTreeMap::new(),
            }
        }

        pub fn register(&mut self, path: &str, image: FakeImage) {
            self.images.insert(path.to_string(), image);
        }
    }

    impl Default for FakeElfLoader {
        fn default() -> Self {
            Self::new()
        }
    }

    impl ElfLoader for FakeElfLoader {
        fn load_elf(&self, path: &str, into: &mut AddressSpace) -> KernelResult<usize> {
            let image = self.images.get(path).ok_or(KernelError::Fault(FaultReason::Unmapped))?;
            into.define_region(0x0040_0000, image.code_pages * crate::mm::PAGE_SIZE, true, false, true)?;
            into.define_region(
                0x0040_0000 + image.code_pages * crate::mm::PAGE_SIZE,
                image.data_pages * crate::mm::PAGE_SIZE,
                true,
                true,
                false,
            )?;
            Ok(image.entry_point)
        }
    }

    /// A VFS that only ever "opens" paths an ELF loader has images for.
    pub struct FakeVfs;

    impl Vfs for FakeVfs {
        fn vfs_open(&self, _path: &str) -> KernelResult<u64> {
            Ok(1)
        }

        fn vfs_close(&self, _handle: u64) {}
    }

    /// Copies to/from a flat in-memory "user address space" buffer.
    pub struct FakeUserSpace {
        memory: Mutex<Vec<u8>>,
    }

    impl FakeUserSpace {
        pub fn new(size: usize) -> Self {
            Self {
                memory: Mutex::new(alloc::vec![0u8; size]),
            }
        }
    }

    impl UserCopy for FakeUserSpace {
        fn copyin(&self, user_src: usize, len: usize) -> KernelResult<Vec<u8>> {
            let memory = self.memory.lock();
            memory
                .get(user_src..user_src + len)
                .map(|s| s.to_vec())
                .ok_or(KernelError::Fault(FaultReason::Unmapped))
        }

        fn copyinstr(&self, user_src: usize, max_len: usize) -> KernelResult<String> {
            let memory = self.memory.lock();
            let slice = memory
                .get(user_src..user_src + max_len)
                .ok_or(KernelError::Fault(FaultReason::Unmapped))?;
            let end = slice.iter().position(|&b| b == 0).unwrap_or(slice.len());
            String::from_utf8(slice[..end].to_vec()).map_err(|_| KernelError::InvalidArgument { name: "string" })
        }

        fn copyout(&self, data: &[u8], user_dst: usize) -> KernelResult<()> {
            let mut memory = self.memory.lock();
            let dst = memory
                .get_mut(user_dst..user_dst + data.len())
                .ok_or(KernelError::Fault(FaultReason::Unmapped))?;
            dst.copy_from_slice(data);
            Ok(())
        }
    }

    /// A deterministic single-threaded "scheduler": `thread_fork` runs the
    /// child's entry thunk synchronously via a caller-supplied hook rather
    /// than a real preemptive thread, since no real thread implementation
    /// exists in this crate.
    pub struct FakeScheduler {
        on_fork: Mutex<Option<alloc::boxed::Box<dyn Fn(ProcessId, ForkEntry) + Send>>>,
    }

    impl FakeScheduler {
        pub fn new() -> Self {
            Self {
                on_fork: Mutex::new(None),
            }
        }

        pub fn set_fork_hook(&self, hook: impl Fn(ProcessId, ForkEntry) + Send + 'static) {
            *self.on_fork.lock() = Some(alloc::boxed::Box::new(hook));
        }
    }

    impl Default for FakeScheduler {
        fn default() -> Self {
            Self::new()
        }
    }

    impl Scheduler for FakeScheduler {
        fn thread_fork(&self, child_pid: ProcessId, entry: ForkEntry) -> KernelResult<()> {
            if let Some(hook) = self.on_fork.lock().as_ref() {
                hook(child_pid, entry);
            }
            Ok(())
        }

        fn thread_exit(&self, _exit_code: i32) -> ! {
            panic!("thread_exit called with no real thread to tear down");
        }

        fn proc_remthread(&self) {}
    }
}
