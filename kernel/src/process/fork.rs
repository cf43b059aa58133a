//! `fork`: creates a child process as a deep, independent copy of the
//! caller's address space.

use alloc::sync::Arc;

use super::pcb::Process;
use super::table::ProcessTable;
use super::ProcessId;
use crate::error::{KernelError, KernelResult};
use crate::external::{ForkEntry, PhysicalMemory, RamSizer, Scheduler};
use crate::log_service::{klog, LogLevel};
use crate::mm::coremap::Coremap;

/// `sys_fork`. Deep-clones the caller's address space, creates the child's
/// record under its own lock, then appends the child to the caller's
/// `children` under the caller's lock. Starts the child thread via
/// `scheduler.thread_fork`, which is handed the entry state
/// `enter_forked_process` needs (return value 0, PC advanced past the
/// `fork` trap) rather than a real trapframe — trapframe mechanics are
/// architecture glue out of scope here.
pub fn fork(
    parent: &Arc<Process>,
    table: &ProcessTable,
    coremap: &Coremap,
    ram: &dyn RamSizer,
    phys: &dyn PhysicalMemory,
    scheduler: &dyn Scheduler,
) -> KernelResult<ProcessId> {
    let child_address_space = {
        let parent_as = parent.address_space.lock();
        let parent_as = parent_as.as_ref().ok_or(KernelError::InvalidState {
            expected: "address space",
            actual: "none",
        })?;
        parent_as.copy(coremap, ram, phys)?
    };

    let pid = table.alloc_pid();
    let child = Arc::new(Process::new(pid, Some(Arc::downgrade(parent))));
    *child.address_space.lock() = Some(child_address_space);
    table.insert(child.clone());

    {
        // Under the caller's lock: append the child.
        let mut parent_info = parent.info.lock();
        parent_info.children.push(child.clone());
    }

    scheduler.thread_fork(
        pid,
        ForkEntry {
            return_value: 0,
            pc_advanced: true,
        },
    ).inspect_err(|_| klog(LogLevel::Warn, "proc", "fork failed to start child thread"))?;

    klog(LogLevel::Debug, "proc", "fork created child process");
    Ok(pid)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::external::test_support::{FakeRam, FakeScheduler};
    use crate::mm::PAGE_SIZE;

    #[test]
    fn fork_gives_child_an_independent_copy_and_links_parent() {
        let table = ProcessTable::new();
        let coremap = Coremap::with_base(0, 64);
        let ram = FakeRam::new(64 * PAGE_SIZE);
        let scheduler = FakeScheduler::new();

        let parent = table.create_root();
        {
            let mut guard = parent.address_space.lock();
            let aspace = guard.as_mut().unwrap();
            aspace.define_region(0x1000, PAGE_SIZE, true, false, true).unwrap();
            aspace.prepare_load(&coremap, &ram, &ram).unwrap();
        }

        let child_pid = fork(&parent, &table, &coremap, &ram, &ram, &scheduler).unwrap();
        assert_ne!(child_pid, parent.pid);

        let child = table.get(child_pid).unwrap();
        assert_eq!(parent.info.lock().children.len(), 1);
        assert!(child
            .info
            .lock()
            .parent
            .as_ref()
            .unwrap()
            .upgrade()
            .is_some());

        let parent_frame = parent.address_space.lock().as_ref().unwrap().pte(
            crate::mm::addrspace::RegionKind::Code,
            0,
        );
        let child_frame = child.address_space.lock().as_ref().unwrap().pte(
            crate::mm::addrspace::RegionKind::Code,
            0,
        );
        assert_ne!(parent_frame.unwrap().frame, child_frame.unwrap().frame);
    }

    #[test]
    fn fork_hands_the_child_pid_and_entry_state_to_the_fork_hook() {
        let table = ProcessTable::new();
        let coremap = Coremap::with_base(0, 16);
        let ram = FakeRam::new(16 * PAGE_SIZE);
        let scheduler = FakeScheduler::new();

        let seen = std::sync::Arc::new(std::sync::Mutex::new(None));
        let seen_in_hook = seen.clone();
        scheduler.set_fork_hook(move |child_pid, entry| {
            *seen_in_hook.lock().unwrap() = Some((child_pid, entry.return_value, entry.pc_advanced));
        });

        let parent = table.create_root();
        let child_pid = fork(&parent, &table, &coremap, &ram, &ram, &scheduler).unwrap();

        let (hook_pid, return_value, pc_advanced) = seen.lock().unwrap().expect("hook must run during thread_fork");
        assert_eq!(hook_pid, child_pid);
        assert_eq!(return_value, 0);
        assert!(pc_advanced);
    }
}
