//! Per-process address space: three regions (code, data, stack), each a
//! flat array of page-table entries mapping page index to physical frame.

use alloc::string::String;
use alloc::vec::Vec;

use super::coremap::Coremap;
use super::{PAGE_SIZE, STACKPAGES, USERSTACK};
use crate::error::{KernelError, KernelResult};
use crate::external::{PhysicalMemory, RamSizer, UserCopy};
use crate::log_service::{klog, LogLevel};

fn oom_frame() -> KernelError {
    klog(LogLevel::Warn, "vm", "frame allocation failed");
    KernelError::OutOfMemory { requested: 1, available: 0 }
}

/// A single page-table entry: a physical frame and its validity bit.
#[derive(Debug, Clone, Copy)]
pub struct Pte {
    pub frame: usize,
    pub valid: bool,
}

impl Pte {
    const fn empty() -> Self {
        Self {
            frame: 0,
            valid: false,
        }
    }
}

/// One of the two growable regions (code or data).
#[derive(Debug, Clone)]
pub struct Region {
    pub vbase: usize,
    pub npages: usize,
    pub readable: bool,
    pub writable: bool,
    pub executable: bool,
    pub ptes: Vec<Pte>,
}

impl Region {
    fn new(vbase: usize, npages: usize, r: bool, w: bool, x: bool) -> Self {
        Self {
            vbase,
            npages,
            readable: r,
            writable: w,
            executable: x,
            ptes: alloc::vec![Pte::empty(); npages],
        }
    }
}

/// Which defined region (if any) a virtual address falls into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegionKind {
    Code,
    Data,
    Stack,
}

pub struct AddressSpace {
    pub region1: Option<Region>,
    pub region2: Option<Region>,
    pub stack: [Pte; STACKPAGES],
    pub load_complete: bool,
    pub argv_addr: Option<usize>,
}

impl Default for AddressSpace {
    fn default() -> Self {
        Self::create()
    }
}

impl AddressSpace {
    /// `as_create`: a zeroed record, no regions defined, no frames owned.
    pub fn create() -> Self {
        Self {
            region1: None,
            region2: None,
            stack: [Pte::empty(); STACKPAGES],
            load_complete: false,
            argv_addr: None,
        }
    }

    /// `as_define_region`. The first call fills region 1 (code), the second
    /// region 2 (data); a third fails with [`KernelError::Unimplemented`].
    /// Permission bits are accepted but not enforced page-by-page — only
    /// the `load_complete` latch on region 1 is enforced, by the fault
    /// handler.
    pub fn define_region(
        &mut self,
        vaddr: usize,
        size: usize,
        r: bool,
        w: bool,
        x: bool,
    ) -> KernelResult<()> {
        let vbase = round_down(vaddr, PAGE_SIZE);
        let extra = vaddr - vbase;
        let npages = round_up(size + extra, PAGE_SIZE) / PAGE_SIZE;

        if self.region1.is_none() {
            self.region1 = Some(Region::new(vbase, npages, r, w, x));
            Ok(())
        } else if self.region2.is_none() {
            self.region2 = Some(Region::new(vbase, npages, r, w, x));
            Ok(())
        } else {
            Err(KernelError::Unimplemented)
        }
    }

    /// `as_prepare_load`: allocates one physical frame per page across all
    /// three regions and zeroes each frame. Must precede an ELF load. On
    /// partial failure, already-allocated frames remain owned — `destroy`
    /// will free them.
    pub fn prepare_load(
        &mut self,
        coremap: &Coremap,
        ram: &dyn RamSizer,
        phys: &dyn PhysicalMemory,
    ) -> KernelResult<()> {
        if let Some(region) = self.region1.as_mut() {
            allocate_region_frames(region, coremap, ram, phys)?;
        }
        if let Some(region) = self.region2.as_mut() {
            allocate_region_frames(region, coremap, ram, phys)?;
        }
        for pte in self.stack.iter_mut() {
            let frame = coremap.alloc_frame(ram).ok_or_else(oom_frame)?;
            phys.zero_frame(frame, PAGE_SIZE);
            *pte = Pte { frame, valid: true };
        }
        Ok(())
    }

    /// `as_complete_load`: latches region 1 read-only. Thereafter the fault
    /// handler installs its TLB entries without the dirty bit, so a write
    /// takes `VM_FAULT_READONLY`.
    pub fn complete_load(&mut self) {
        self.load_complete = true;
    }

    /// `as_define_stack`: the user-space stack top.
    pub fn define_stack(&self) -> usize {
        USERSTACK
    }

    /// `as_define_args`: lays argv onto the top of the (already mapped and
    /// activated) user stack — strings first, packed back-to-back and
    /// null-terminated with the *total* block rounded up to 4 bytes (not
    /// each string individually), then a null pointer, then pointers to
    /// each string in reverse index order, then the stack pointer rounded
    /// down to 8 bytes. Records the user-space argv address and returns the
    /// new stack pointer.
    pub fn define_args(&mut self, argv: &[String], user: &dyn UserCopy) -> KernelResult<usize> {
        let mut sp = USERSTACK;

        let mut packed = Vec::new();
        let mut offsets = alloc::vec![0usize; argv.len()];
        for (i, arg) in argv.iter().enumerate() {
            offsets[i] = packed.len();
            packed.extend_from_slice(arg.as_bytes());
            packed.push(0);
        }
        let padded_len = round_up(packed.len(), 4);
        packed.resize(padded_len, 0);

        sp -= padded_len;
        if padded_len > 0 {
            user.copyout(&packed, sp)?;
        }
        let string_addrs: Vec<usize> = offsets.iter().map(|&off| sp + off).collect();

        sp -= core::mem::size_of::<usize>();
        user.copyout(&0usize.to_ne_bytes(), sp)?;

        for &addr in string_addrs.iter().rev() {
            sp -= core::mem::size_of::<usize>();
            user.copyout(&addr.to_ne_bytes(), sp)?;
        }

        let argv_addr = sp;
        sp = round_down(sp, 8);

        self.argv_addr = Some(argv_addr);
        Ok(sp)
    }

    /// `as_copy`: deep clone. New region arrays, a freshly allocated
    /// physical frame per valid PTE, byte-wise copy of page contents.
    /// Shares nothing — the fork instant fully separates parent and child
    /// memory.
    pub fn copy(&self, coremap: &Coremap, ram: &dyn RamSizer, phys: &dyn PhysicalMemory) -> KernelResult<Self> {
        let mut dst = Self::create();
        dst.load_complete = self.load_complete;

        if let Some(region) = &self.region1 {
            dst.region1 = Some(copy_region(region, coremap, ram, phys)?);
        }
        if let Some(region) = &self.region2 {
            dst.region2 = Some(copy_region(region, coremap, ram, phys)?);
        }
        for (i, pte) in self.stack.iter().enumerate() {
            if pte.valid {
                let frame = copy_one_frame(pte.frame, coremap, ram, phys)?;
                dst.stack[i] = Pte { frame, valid: true };
            }
        }
        Ok(dst)
    }

    /// `as_destroy`: frees every valid PTE's physical frame.
    pub fn destroy(&mut self, coremap: &Coremap) {
        if let Some(region) = self.region1.take() {
            free_region_frames(&region, coremap);
        }
        if let Some(region) = self.region2.take() {
            free_region_frames(&region, coremap);
        }
        for pte in self.stack.iter_mut() {
            if pte.valid {
                coremap.free_pages(pte.frame);
            }
            *pte = Pte::empty();
        }
    }

    /// Locates the region containing `vaddr` (page-aligned before lookup)
    /// and the PTE index within it, per the fault handler's translation
    /// order: region 1, then region 2, then the stack.
    pub fn locate(&self, vaddr: usize) -> Option<(RegionKind, usize)> {
        let page = round_down(vaddr, PAGE_SIZE);

        if let Some(region) = &self.region1 {
            if page >= region.vbase && page < region.vbase + region.npages * PAGE_SIZE {
                return Some((RegionKind::Code, (page - region.vbase) / PAGE_SIZE));
            }
        }
        if let Some(region) = &self.region2 {
            if page >= region.vbase && page < region.vbase + region.npages * PAGE_SIZE {
                return Some((RegionKind::Data, (page - region.vbase) / PAGE_SIZE));
            }
        }
        let stack_base = USERSTACK - STACKPAGES * PAGE_SIZE;
        if page >= stack_base && page < USERSTACK {
            return Some((RegionKind::Stack, (page - stack_base) / PAGE_SIZE));
        }
        None
    }

    pub fn pte(&self, kind: RegionKind, index: usize) -> Option<Pte> {
        match kind {
            RegionKind::Code => self.region1.as_ref().map(|r| r.ptes[index]),
            RegionKind::Data => self.region2.as_ref().map(|r| r.ptes[index]),
            RegionKind::Stack => Some(self.stack[index]),
        }
    }
}

fn allocate_region_frames(
    region: &mut Region,
    coremap: &Coremap,
    ram: &dyn RamSizer,
    phys: &dyn PhysicalMemory,
) -> KernelResult<()> {
    for pte in region.ptes.iter_mut() {
        let frame = coremap.alloc_frame(ram).ok_or_else(oom_frame)?;
        phys.zero_frame(frame, PAGE_SIZE);
        *pte = Pte { frame, valid: true };
    }
    Ok(())
}

fn copy_region(
    region: &Region,
    coremap: &Coremap,
    ram: &dyn RamSizer,
    phys: &dyn PhysicalMemory,
) -> KernelResult<Region> {
    let mut dst = Region::new(
        region.vbase,
        region.npages,
        region.readable,
        region.writable,
        region.executable,
    );
    for (i, pte) in region.ptes.iter().enumerate() {
        if pte.valid {
            let frame = copy_one_frame(pte.frame, coremap, ram, phys)?;
            dst.ptes[i] = Pte { frame, valid: true };
        }
    }
    Ok(dst)
}

fn copy_one_frame(
    src_frame: usize,
    coremap: &Coremap,
    ram: &dyn RamSizer,
    phys: &dyn PhysicalMemory,
) -> KernelResult<usize> {
    let dst_frame = coremap.alloc_frame(ram).ok_or_else(oom_frame)?;
    let mut buf = alloc::vec![0u8; PAGE_SIZE];
    phys.read_frame(src_frame, &mut buf);
    phys.write_frame(dst_frame, &buf);
    Ok(dst_frame)
}

fn free_region_frames(region: &Region, coremap: &Coremap) {
    for pte in &region.ptes {
        if pte.valid {
            coremap.free_pages(pte.frame);
        }
    }
}

fn round_down(value: usize, align: usize) -> usize {
    value & !(align - 1)
}

fn round_up(value: usize, align: usize) -> usize {
    (value + align - 1) & !(align - 1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::external::test_support::FakeRam;

    fn ram_and_coremap(frames: usize) -> (FakeRam, Coremap) {
        let ram = FakeRam::new(frames * PAGE_SIZE);
        let coremap = Coremap::with_base(0, frames);
        (ram, coremap)
    }

    #[test]
    fn third_define_region_is_unimplemented() {
        let mut aspace = AddressSpace::create();
        aspace.define_region(0x1000, PAGE_SIZE, true, false, true).unwrap();
        aspace.define_region(0x2000, PAGE_SIZE, true, true, false).unwrap();
        let err = aspace.define_region(0x3000, PAGE_SIZE, true, true, false).unwrap_err();
        assert_eq!(err, KernelError::Unimplemented);
    }

    #[test]
    fn prepare_load_allocates_distinct_zeroed_frames() {
        let (ram, coremap) = ram_and_coremap(64);
        let mut aspace = AddressSpace::create();
        aspace.define_region(0x1000, 2 * PAGE_SIZE, true, false, true).unwrap();
        aspace.prepare_load(&coremap, &ram, &ram).unwrap();

        let region = aspace.region1.as_ref().unwrap();
        assert!(region.ptes.iter().all(|p| p.valid));
        assert_ne!(region.ptes[0].frame, region.ptes[1].frame);
        for pte in &aspace.stack {
            assert!(pte.valid);
        }
    }

    #[test]
    fn copy_produces_independent_byte_identical_memory() {
        let (ram, coremap) = ram_and_coremap(64);
        let mut parent = AddressSpace::create();
        parent.define_region(0x1000, PAGE_SIZE, true, false, true).unwrap();
        parent.prepare_load(&coremap, &ram, &ram).unwrap();

        let parent_frame = parent.region1.as_ref().unwrap().ptes[0].frame;
        let mut page = alloc::vec![0u8; PAGE_SIZE];
        page[0] = 0xAB;
        ram.write_frame(parent_frame, &page);

        let child = parent.copy(&coremap, &ram, &ram).unwrap();
        let child_frame = child.region1.as_ref().unwrap().ptes[0].frame;
        assert_ne!(child_frame, parent_frame);

        let mut child_page = alloc::vec![0u8; PAGE_SIZE];
        ram.read_frame(child_frame, &mut child_page);
        assert_eq!(child_page[0], 0xAB);

        // Parent writes after the fork instant must not reach the child.
        page[0] = 0xCD;
        ram.write_frame(parent_frame, &page);
        ram.read_frame(child_frame, &mut child_page);
        assert_eq!(child_page[0], 0xAB);
    }

    #[test]
    fn locate_resolves_code_data_and_stack() {
        let mut aspace = AddressSpace::create();
        aspace.define_region(0x1000, PAGE_SIZE, true, false, true).unwrap();
        aspace.define_region(0x2000, PAGE_SIZE, true, true, false).unwrap();

        assert_eq!(aspace.locate(0x1000), Some((RegionKind::Code, 0)));
        assert_eq!(aspace.locate(0x2000), Some((RegionKind::Data, 0)));
        let stack_base = USERSTACK - STACKPAGES * PAGE_SIZE;
        assert_eq!(aspace.locate(stack_base), Some((RegionKind::Stack, 0)));
        assert_eq!(aspace.locate(0xDEAD_0000), None);
    }

    #[test]
    fn define_args_round_trips_through_user_copy() {
        use crate::external::test_support::FakeUserSpace;
        use alloc::string::ToString;

        let user = FakeUserSpace::new(USERSTACK);
        let mut aspace = AddressSpace::create();
        let argv: Vec<String> = alloc::vec!["prog".to_string(), "arg1".to_string()];
        let sp = aspace.define_args(&argv, &user).unwrap();
        assert_eq!(sp % 8, 0);

        let argv_addr = aspace.argv_addr.unwrap();
        let usize_bytes = core::mem::size_of::<usize>();

        let ptr0_bytes = user.copyin(argv_addr, usize_bytes).unwrap();
        let ptr0 = usize::from_ne_bytes(ptr0_bytes.as_slice().try_into().unwrap());
        assert_eq!(user.copyinstr(ptr0, 128).unwrap(), "prog");

        let ptr1_bytes = user.copyin(argv_addr + usize_bytes, usize_bytes).unwrap();
        let ptr1 = usize::from_ne_bytes(ptr1_bytes.as_slice().try_into().unwrap());
        assert_eq!(user.copyinstr(ptr1, 128).unwrap(), "arg1");

        // The trailing null pointer follows the last argv pointer.
        let null_bytes = user.copyin(argv_addr + 2 * usize_bytes, usize_bytes).unwrap();
        assert_eq!(usize::from_ne_bytes(null_bytes.as_slice().try_into().unwrap()), 0);
    }

    #[test]
    fn destroy_frees_every_valid_pte() {
        let (ram, coremap) = ram_and_coremap(64);
        let mut aspace = AddressSpace::create();
        aspace.define_region(0x1000, PAGE_SIZE, true, false, true).unwrap();
        aspace.prepare_load(&coremap, &ram, &ram).unwrap();
        aspace.destroy(&coremap);

        let total = 1 + STACKPAGES;
        assert!(coremap.alloc_pages(&ram, total).is_some());
    }
}
