//! Process record (PCB): pid, parent link, children list, exit state, wait
//! condition, and owned address-space handle.

use alloc::sync::{Arc, Weak};
use alloc::vec::Vec;

use crate::mm::addrspace::AddressSpace;
use crate::sync::{CondVar, Mutex};

/// Process ID. Unique among live processes; never reused while the
/// process's record is reachable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ProcessId(pub u64);

impl core::fmt::Display for ProcessId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Fields protected by `Process::info`: everything but `pid`, which is
/// immutable after creation. `parent` is a weak, pointer-only relation —
/// never ownership, so a parent's exit can sever it without keeping the
/// child record alive. `children` holds strong references: a child stays
/// alive (even after it exits) until its parent reaps it or exits itself.
pub struct ProcessInfo {
    pub exited: bool,
    pub exit_status: i32,
    pub children: Vec<Arc<Process>>,
    pub parent: Option<Weak<Process>>,
}

pub struct Process {
    pub pid: ProcessId,
    pub address_space: Mutex<Option<AddressSpace>>,
    pub info: Mutex<ProcessInfo>,
    /// Condition variable the parent blocks on in `waitpid`, associated
    /// with `info`'s lock: signalled by this process's own `exit`.
    pub parent_signal: CondVar,
}

impl Process {
    pub fn new(pid: ProcessId, parent: Option<Weak<Process>>) -> Self {
        Self {
            pid,
            address_space: Mutex::new(Some(AddressSpace::create())),
            info: Mutex::new(ProcessInfo {
                exited: false,
                exit_status: 0,
                children: Vec::new(),
                parent,
            }),
            parent_signal: CondVar::new(),
        }
    }

    /// `sys_getpid`: `pid` is immutable after creation, so no lock is
    /// needed to read it.
    pub fn getpid(&self) -> ProcessId {
        self.pid
    }
}
