//! `execv`: replaces the calling process's address space with a freshly
//! loaded program image.

use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;

use super::exit;
use super::pcb::Process;
use super::table::ProcessTable;
use crate::error::{KernelError, KernelResult};
use crate::external::{ElfLoader, PhysicalMemory, RamSizer, Scheduler, TlbDevice, UserCopy, Vfs};
use crate::log_service::{klog, LogLevel};
use crate::mm::addrspace::AddressSpace;
use crate::mm::coremap::Coremap;
use crate::mm::fault;

/// Bound on `argv` length and on each argument's length, mirroring the
/// original's `ARG_MAX`-style limits. An unbounded copy-in would let user
/// code force an arbitrarily large kernel allocation.
pub const MAX_ARGS: usize = 64;
pub const MAX_ARG_LEN: usize = 128;

const USIZE_BYTES: usize = core::mem::size_of::<usize>();

/// Copies in a NUL-pointer-terminated `argv` array: first the pointer
/// array itself (one `usize` at a time, since its length isn't known up
/// front), then each pointed-to string. Two passes, matching the
/// original's "count them, then copy them" shape rather than growing a
/// buffer one byte at a time.
pub fn copyin_argv(user: &dyn UserCopy, argv_uaddr: usize) -> KernelResult<Vec<String>> {
    let mut pointers = Vec::new();
    for i in 0..=MAX_ARGS {
        let slot = user.copyin(argv_uaddr + i * USIZE_BYTES, USIZE_BYTES)?;
        let ptr = usize::from_ne_bytes(slot.as_slice().try_into().map_err(|_| KernelError::InvalidArgument {
            name: "argv",
        })?);
        if ptr == 0 {
            break;
        }
        if i == MAX_ARGS {
            return Err(KernelError::InvalidArgument { name: "argv" });
        }
        pointers.push(ptr);
    }

    let mut argv = Vec::with_capacity(pointers.len());
    for ptr in pointers {
        argv.push(user.copyinstr(ptr, MAX_ARG_LEN)?);
    }
    Ok(argv)
}

/// `sys_execv(path, argv)`.
///
/// Copying in argv and opening the file can still fail cleanly: the
/// caller's existing address space is untouched and the error simply
/// propagates. Past that, a fresh address space is created, switched in,
/// and activated — the point of no return, matching the original's
/// `curproc_setas(as); as_activate();` running before `load_elf` rather
/// than after it. From here the caller's old program is already gone, so
/// any failure (ELF load, `prepare_load`, `define_args`) terminates the
/// process via [`exit::exit`] instead of returning an `Err` the caller
/// could mistake for "still running".
#[allow(clippy::too_many_arguments)]
pub fn exec(
    proc: &Arc<Process>,
    path: &str,
    argv_uaddr: usize,
    vfs: &dyn Vfs,
    elf: &dyn ElfLoader,
    user: &dyn UserCopy,
    coremap: &Coremap,
    ram: &dyn RamSizer,
    phys: &dyn PhysicalMemory,
    tlb: &dyn TlbDevice,
    table: &ProcessTable,
    scheduler: &dyn Scheduler,
) -> KernelResult<(usize, usize, usize)> {
    let argv = copyin_argv(user, argv_uaddr).inspect_err(|_| klog(LogLevel::Warn, "proc", "exec argv copy-in failed"))?;

    let handle = vfs.vfs_open(path).inspect_err(|_| klog(LogLevel::Warn, "proc", "exec vfs_open failed"))?;

    // Point of no return: install a fresh, still-empty address space and
    // activate it before the ELF image is even looked at.
    let old_as = proc.address_space.lock().replace(AddressSpace::create());
    fault::activate(tlb);

    let loaded = (|| -> KernelResult<(usize, usize, usize)> {
        let entry_point = {
            let mut guard = proc.address_space.lock();
            let aspace = guard.as_mut().expect("just installed");
            let entry_point = elf.load_elf(path, aspace)?;
            aspace.prepare_load(coremap, ram, phys)?;
            aspace.complete_load();
            entry_point
        };

        let stack_ptr = {
            let guard = proc.address_space.lock();
            let aspace = guard.as_ref().expect("just installed");
            aspace.define_stack()
        };

        let argv_sp = {
            let mut guard = proc.address_space.lock();
            let aspace = guard.as_mut().expect("just installed");
            aspace.define_args(&argv, user)?
        };

        Ok((entry_point, stack_ptr, argv_sp))
    })();

    vfs.vfs_close(handle);

    // The pre-exec address space is only safe to drop once nothing above
    // can still need the old mappings — the switch already happened, so
    // this is just reclaiming its frames.
    if let Some(mut old) = old_as {
        old.destroy(coremap);
    }

    match loaded {
        Ok(triple) => {
            klog(LogLevel::Debug, "proc", "exec replaced address space");
            Ok(triple)
        }
        // Not unit-testable end to end for the same reason `exit` itself
        // isn't: `scheduler.thread_exit` never returns, and this crate's
        // `panic = "abort"` profile means a test can't catch-unwind across
        // it either. `exit::finish_exit`, which does the actual teardown
        // this path relies on, is exercised directly by `exit`'s own tests.
        Err(_) => {
            klog(LogLevel::Warn, "proc", "exec failed after address space switch; terminating process");
            exit::exit(proc, -1, table, coremap, scheduler)
        }
    }
}
