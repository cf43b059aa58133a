//! Physical frame allocator backed by a coremap.
//!
//! The coremap is one slot per manageable physical frame. A free slot holds
//! `0`. An allocated run of `n` frames stores `n, n-1, …, 1` across its
//! slots, so `free_pages` can recover the run length from the head slot
//! alone, without a separate per-allocation metadata table.

use alloc::vec::Vec;

use spin::Mutex;

use super::PAGE_SIZE;
use crate::error::{KernelError, KernelResult};
use crate::external::RamSizer;

enum State {
    NotReady,
    Ready { base_paddr: usize, slots: Vec<usize> },
}

/// The physical frame allocator. Before [`Coremap::bootstrap`], every
/// allocation falls through to the RAM sizer's steal primitive and no free
/// is possible — matching the "before bootstrap... no free is possible"
/// contract real kernel boot relies on.
pub struct Coremap {
    state: Mutex<State>,
}

impl Default for Coremap {
    fn default() -> Self {
        Self::new()
    }
}

impl Coremap {
    pub const fn new() -> Self {
        Self {
            state: Mutex::new(State::NotReady),
        }
    }

    /// Builds an already-bootstrapped coremap directly over `[base_paddr,
    /// base_paddr + num_frames * PAGE_SIZE)`, skipping the RAM-sizer dance.
    /// Useful for tests and other settings where the manageable range is
    /// already known.
    pub fn with_base(base_paddr: usize, num_frames: usize) -> Self {
        Self {
            state: Mutex::new(State::Ready {
                base_paddr,
                slots: alloc::vec![0usize; num_frames],
            }),
        }
    }

    pub fn is_ready(&self) -> bool {
        matches!(&*self.state.lock(), State::Ready { .. })
    }

    /// One-time bootstrap: reserves the frames needed to store the coremap
    /// itself out of the manageable range it is about to track.
    pub fn bootstrap(&self, ram: &dyn RamSizer) {
        let (lo, hi) = ram.ram_getsize();
        let lo = round_up(lo, PAGE_SIZE);
        assert!(hi > lo, "ram_getsize returned an empty or inverted range");
        let n = (hi - lo) / PAGE_SIZE;

        let slot_bytes = n * core::mem::size_of::<usize>();
        let coremap_pages = (slot_bytes + PAGE_SIZE - 1) / PAGE_SIZE;
        assert!(coremap_pages < n, "not enough RAM to even hold the coremap");

        let base_paddr = lo + coremap_pages * PAGE_SIZE;
        let manageable = n - coremap_pages;

        let mut state = self.state.lock();
        *state = State::Ready {
            base_paddr,
            slots: alloc::vec![0usize; manageable],
        };
        crate::log_service::klog(
            crate::log_service::LogLevel::Debug,
            "mm",
            "coremap bootstrap complete",
        );
    }

    /// Returns the physical base address of a contiguous run of `n` free
    /// frames, or `None` on failure. First-fit over the coremap, lowest
    /// index wins ties. Before bootstrap, falls through to
    /// `ram.ram_stealmem`. Returns `Option` rather than a `0`-means-failure
    /// sentinel: physical address `0` is a legitimately allocatable frame
    /// whenever the manageable range itself starts at `0`.
    pub fn alloc_pages(&self, ram: &dyn RamSizer, n: usize) -> Option<usize> {
        assert!(n > 0, "alloc_pages(0) is meaningless");
        let mut state = self.state.lock();
        match &mut *state {
            State::NotReady => Some(ram.ram_stealmem(n * PAGE_SIZE)),
            State::Ready { base_paddr, slots } => match first_fit(slots, n) {
                Some(start) => {
                    for k in 0..n {
                        slots[start + k] = n - k;
                    }
                    Some(*base_paddr + start * PAGE_SIZE)
                }
                None => None,
            },
        }
    }

    /// Frees the run previously returned by `alloc_pages(paddr)`. Panics if
    /// `paddr` does not name the head of a run actually allocated here — a
    /// coremap head-run-length mismatch is a kernel-internal invariant
    /// violation, not a recoverable error.
    pub fn free_pages(&self, paddr: usize) {
        let mut state = self.state.lock();
        match &mut *state {
            State::Ready { base_paddr, slots } => {
                assert!(paddr >= *base_paddr, "free_pages: paddr below managed range");
                let start = (paddr - *base_paddr) / PAGE_SIZE;
                assert!(start < slots.len(), "free_pages: paddr above managed range");
                let run = slots[start];
                assert!(run > 0, "free_pages: double free or unallocated paddr");
                for k in 0..run {
                    assert_eq!(
                        slots[start + k],
                        run - k,
                        "coremap head-run-length mismatch"
                    );
                    slots[start + k] = 0;
                }
            }
            State::NotReady => panic!("free_pages called before bootstrap"),
        }
    }

    /// `alloc_kpages(n) -> kvaddr`. This crate assumes an identity-mapped
    /// kernel segment, so the kernel virtual address equals the physical
    /// one.
    pub fn alloc_kpages(&self, ram: &dyn RamSizer, n: usize) -> KernelResult<usize> {
        self.alloc_pages(ram, n).ok_or_else(|| {
            crate::log_service::klog(crate::log_service::LogLevel::Warn, "mm", "coremap exhausted");
            KernelError::OutOfMemory { requested: n, available: self.free_frame_count() }
        })
    }

    pub fn free_kpages(&self, kvaddr: usize) {
        self.free_pages(kvaddr);
    }

    /// Allocates exactly one frame, the common case for page-fault-time and
    /// `prepare_load` per-page allocation.
    pub fn alloc_frame(&self, ram: &dyn RamSizer) -> Option<usize> {
        self.alloc_pages(ram, 1)
    }

    fn free_frame_count(&self) -> usize {
        match &*self.state.lock() {
            State::NotReady => 0,
            State::Ready { slots, .. } => slots.iter().filter(|&&s| s == 0).count(),
        }
    }
}

fn first_fit(slots: &[usize], n: usize) -> Option<usize> {
    let mut run_start = 0usize;
    let mut run_len = 0usize;
    for (i, &slot) in slots.iter().enumerate() {
        if slot == 0 {
            if run_len == 0 {
                run_start = i;
            }
            run_len += 1;
            if run_len == n {
                return Some(run_start);
            }
        } else {
            run_len = 0;
        }
    }
    None
}

fn round_up(value: usize, align: usize) -> usize {
    (value + align - 1) / align * align
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::external::test_support::FakeRam;

    #[test]
    fn first_fit_allocation_boundary_scenario() {
        let coremap = Coremap::with_base(0, 8);
        let ram = FakeRam::new(0);

        let p1 = coremap.alloc_pages(&ram, 3).unwrap();
        assert_eq!(p1, 0);
        assert_eq!(slots_of(&coremap), alloc::vec![3, 2, 1, 0, 0, 0, 0, 0]);

        let p2 = coremap.alloc_pages(&ram, 2).unwrap();
        assert_eq!(p2, 3 * PAGE_SIZE);
        assert_eq!(slots_of(&coremap), alloc::vec![3, 2, 1, 2, 1, 0, 0, 0]);

        coremap.free_pages(p1);
        assert_eq!(slots_of(&coremap), alloc::vec![0, 0, 0, 2, 1, 0, 0, 0]);
    }

    #[test]
    fn no_space_returns_none() {
        let coremap = Coremap::with_base(0, 4);
        let ram = FakeRam::new(0);
        assert!(coremap.alloc_pages(&ram, 4).is_some());
        assert_eq!(coremap.alloc_pages(&ram, 1), None);
    }

    #[test]
    fn alloc_then_free_restores_prior_state() {
        let coremap = Coremap::with_base(0, 16);
        let ram = FakeRam::new(0);
        let before = slots_of(&coremap);
        let p = coremap.alloc_pages(&ram, 5).unwrap();
        coremap.free_pages(p);
        assert_eq!(slots_of(&coremap), before);
    }

    #[test]
    #[should_panic(expected = "head-run-length mismatch")]
    fn free_with_corrupted_run_panics() {
        let coremap = Coremap::with_base(0, 8);
        let ram = FakeRam::new(0);
        let p = coremap.alloc_pages(&ram, 3).unwrap();
        // Corrupt the run in the middle to simulate a bad free target.
        if let State::Ready { slots, .. } = &mut *coremap.state.lock() {
            slots[1] = 99;
        }
        coremap.free_pages(p);
    }

    #[test]
    fn not_ready_falls_through_to_steal() {
        let coremap = Coremap::new();
        assert!(!coremap.is_ready());
        let ram = FakeRam::new(0);
        let first = coremap.alloc_pages(&ram, 2).unwrap();
        let second = coremap.alloc_pages(&ram, 1).unwrap();
        assert_ne!(first, second);
    }

    fn slots_of(coremap: &Coremap) -> Vec<usize> {
        match &*coremap.state.lock() {
            State::Ready { slots, .. } => slots.clone(),
            State::NotReady => alloc::vec![],
        }
    }
}
