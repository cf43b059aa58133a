//! End-to-end fork -> exec -> exit -> wait, driven entirely through the
//! crate's public API and `external::test_support` fakes, the same shape as
//! the teacher's `kernel/tests/process_tests.rs`.
//!
//! `test_support::FakeScheduler::thread_exit` panics (there is no real
//! thread to tear down), which is fine for the unit tests elsewhere that
//! only drive the non-diverging `process::exit::finish_exit` directly, but
//! is unusable here: this suite wants to call the real, diverging
//! `process::exit` so the fork -> exec -> exit -> wait pipeline is exercised
//! exactly as a caller would use it. `ParkingScheduler` below reuses
//! `FakeScheduler`'s fork-hook dispatch but replaces `thread_exit` with a
//! spin-forever park, since this crate has no real thread to hand control
//! back to either — spinning forever, unlike panicking, doesn't take the
//! test process down with it, as long as nothing joins that thread.

use std::sync::Arc as StdArc;

use junction_kernel::error::KernelResult;
use junction_kernel::external::test_support::{FakeElfLoader, FakeImage, FakeRam, FakeTlb, FakeUserSpace, FakeVfs};
use junction_kernel::external::{ForkEntry, Scheduler};
use junction_kernel::process::{self, ProcessId};
use junction_kernel::{Coremap, ProcessTable, PAGE_SIZE};

struct ParkingScheduler {
    on_fork: std::sync::Mutex<Option<Box<dyn Fn(ProcessId, ForkEntry) + Send>>>,
}

impl ParkingScheduler {
    fn new() -> Self {
        Self {
            on_fork: std::sync::Mutex::new(None),
        }
    }

    fn set_fork_hook(&self, hook: impl Fn(ProcessId, ForkEntry) + Send + 'static) {
        *self.on_fork.lock().unwrap() = Some(Box::new(hook));
    }
}

impl Scheduler for ParkingScheduler {
    fn thread_fork(&self, child_pid: ProcessId, entry: ForkEntry) -> KernelResult<()> {
        if let Some(hook) = self.on_fork.lock().unwrap().as_ref() {
            hook(child_pid, entry);
        }
        Ok(())
    }

    fn thread_exit(&self, _exit_code: i32) -> ! {
        loop {
            std::hint::spin_loop();
        }
    }

    fn proc_remthread(&self) {}
}

fn write_argv(user: &FakeUserSpace, strings: &[&str]) -> usize {
    let argv_base = 0x2000;
    let mut string_cursor = 0x3000usize;
    let mut pointer_bytes = Vec::new();
    for s in strings {
        user.copyout(s.as_bytes(), string_cursor).unwrap();
        user.copyout(&[0u8], string_cursor + s.len()).unwrap();
        pointer_bytes.extend_from_slice(&string_cursor.to_ne_bytes());
        string_cursor += s.len() + 1;
    }
    pointer_bytes.extend_from_slice(&0usize.to_ne_bytes());
    user.copyout(&pointer_bytes, argv_base).unwrap();
    argv_base
}

#[test]
fn fork_exec_exit_wait_round_trip() {
    let table = StdArc::new(ProcessTable::new());
    let coremap = StdArc::new(Coremap::with_base(0, 64));
    let ram = StdArc::new(FakeRam::new(64 * PAGE_SIZE));
    let tlb = StdArc::new(FakeTlb::new(4));
    let user = StdArc::new(FakeUserSpace::new(1 << 16));
    let vfs = StdArc::new(FakeVfs);
    let mut elf_builder = FakeElfLoader::new();
    elf_builder.register(
        "/bin/child",
        FakeImage {
            code_pages: 1,
            data_pages: 1,
            entry_point: 0x0040_0000,
        },
    );
    let elf = StdArc::new(elf_builder);
    let scheduler = StdArc::new(ParkingScheduler::new());

    let parent = table.create_root();
    {
        let mut guard = parent.address_space.lock();
        let aspace = guard.as_mut().unwrap();
        aspace.define_region(0x1000, PAGE_SIZE, true, false, true).unwrap();
        aspace.prepare_load(&coremap, ram.as_ref(), ram.as_ref()).unwrap();
    }

    let argv_addr = write_argv(&user, &["child"]);

    {
        let table = table.clone();
        let coremap = coremap.clone();
        let ram = ram.clone();
        let tlb = tlb.clone();
        let user = user.clone();
        let vfs = vfs.clone();
        let elf = elf.clone();
        let scheduler2 = scheduler.clone();
        scheduler.set_fork_hook(move |child_pid, _entry| {
            let table = table.clone();
            let coremap = coremap.clone();
            let ram = ram.clone();
            let tlb = tlb.clone();
            let user = user.clone();
            let vfs = vfs.clone();
            let elf = elf.clone();
            let scheduler2 = scheduler2.clone();
            std::thread::spawn(move || {
                let child = table.get(child_pid).expect("child inserted before thread_fork runs");
                process::exec(
                    &child,
                    "/bin/child",
                    argv_addr,
                    vfs.as_ref(),
                    elf.as_ref(),
                    user.as_ref(),
                    &coremap,
                    ram.as_ref(),
                    ram.as_ref(),
                    tlb.as_ref(),
                    &table,
                    scheduler2.as_ref(),
                )
                .expect("the registered image loads cleanly");

                process::exit(&child, 42, &table, &coremap, scheduler2.as_ref());
            });
        });
    }

    let child_pid = process::fork(&parent, &table, &coremap, ram.as_ref(), ram.as_ref(), scheduler.as_ref()).unwrap();

    let (reaped_pid, status) = process::waitpid(&parent, child_pid, 0, &table).unwrap();
    assert_eq!(reaped_pid, child_pid);
    assert_eq!(status, process::mkwait_exit(42));
    assert!(table.get(child_pid).is_none(), "waitpid reaps the child's table entry");
}
