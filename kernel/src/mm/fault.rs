//! Fault handler / TLB manager.
//!
//! Translates a faulting virtual address through the current address
//! space, installs a TLB entry, and enforces the code-after-load read-only
//! latch. No demand paging: every page of a loaded address space already
//! owns a frame by the time user code can fault on it, so a miss here means
//! either an unmapped address or a disabled write, never "allocate now".

use super::addrspace::{AddressSpace, RegionKind};
use super::PAGE_SIZE;
use crate::error::{FaultReason, KernelError, KernelResult};
use crate::external::TlbDevice;
use crate::log_service::{klog, LogLevel};

/// MIPS `TLBLO_VALID` bit: present.
pub const TLBLO_VALID: u32 = 1 << 9;
/// MIPS `TLBLO_DIRTY` bit: writable. Missing dirty means write-protected.
pub const TLBLO_DIRTY: u32 = 1 << 10;

/// The three fault kinds this handler distinguishes. Unlike the `int`-typed
/// original, an out-of-range "unknown kind" cannot be constructed here —
/// exhaustiveness replaces the EINVAL-for-unknown-kind branch the C
/// original needed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultKind {
    Read,
    Write,
    ReadOnly,
}

/// `vm_fault(kind, vaddr)`. Masking local interrupts for the duration of the
/// TLB probe+write is the caller's responsibility (this crate has no
/// interrupt controller to mask); this function assumes it already runs
/// with interrupts disabled, per the single-CPU assumption.
pub fn fault(
    kind: FaultKind,
    vaddr: usize,
    aspace: &AddressSpace,
    tlb: &dyn TlbDevice,
) -> KernelResult<()> {
    if kind == FaultKind::ReadOnly {
        klog(LogLevel::Warn, "vm", "write to read-only code page");
        return Err(KernelError::Fault(FaultReason::ReadOnly));
    }

    let (region_kind, index) = aspace.locate(vaddr).ok_or_else(|| {
        klog(LogLevel::Warn, "vm", "fault on unmapped address");
        KernelError::Fault(FaultReason::Unmapped)
    })?;
    let pte = aspace.pte(region_kind, index).filter(|p| p.valid).ok_or_else(|| {
        klog(LogLevel::Warn, "vm", "fault on unmapped address");
        KernelError::Fault(FaultReason::Unmapped)
    })?;

    let page = vaddr & !(PAGE_SIZE - 1);
    let entry_hi = page as u32;
    let mut entry_lo = (pte.frame as u32) | TLBLO_VALID | TLBLO_DIRTY;
    if region_kind == RegionKind::Code && aspace.load_complete {
        entry_lo &= !TLBLO_DIRTY;
    }

    install(tlb, entry_hi, entry_lo);
    klog(LogLevel::Trace, "vm", "tlb entry installed");
    Ok(())
}

/// Scans for an invalid TLB slot to write; if every slot is valid, falls
/// back to the hardware random-replacement instruction.
fn install(tlb: &dyn TlbDevice, entry_hi: u32, entry_lo: u32) {
    for idx in 0..tlb.num_tlb() {
        if tlb.tlb_read(idx).is_none() {
            tlb.tlb_write(idx, entry_hi, entry_lo);
            return;
        }
    }
    tlb.tlb_random(entry_hi, entry_lo);
}

/// `as_activate`: invalidates the entire TLB on a context switch into this
/// address space.
pub fn activate(tlb: &dyn TlbDevice) {
    tlb.invalidate_all();
}

/// `as_deactivate`: nothing to do; the next `activate` will invalidate.
pub fn deactivate(_tlb: &dyn TlbDevice) {}

/// `vm_tlbshootdown`: cross-CPU TLB shootdown is unimplemented on this
/// single-CPU core. Invoking it is a fatal error, per spec.
pub fn tlbshootdown() -> ! {
    panic!("vm_tlbshootdown invoked: multi-CPU TLB shootdown is unimplemented");
}
