//! Global process table: pid allocation and lookup by pid.
//!
//! Parent/child linkage lives on `Process` itself (strong `children`, weak
//! `parent`); the table exists only so a freshly forked process and its
//! eventual reaper can find each other's record, and so `waitpid` can drop
//! the table's own reference once a child is reaped.

use alloc::collections::BTreeMap;
use alloc::sync::Arc;
use core::sync::atomic::{AtomicU64, Ordering};

use spin::Mutex;

use super::pcb::{Process, ProcessId};

pub struct ProcessTable {
    next_pid: AtomicU64,
    registry: Mutex<BTreeMap<ProcessId, Arc<Process>>>,
}

impl Default for ProcessTable {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessTable {
    pub fn new() -> Self {
        Self {
            next_pid: AtomicU64::new(1),
            registry: Mutex::new(BTreeMap::new()),
        }
    }

    pub(crate) fn alloc_pid(&self) -> ProcessId {
        ProcessId(self.next_pid.fetch_add(1, Ordering::Relaxed))
    }

    pub(crate) fn insert(&self, process: Arc<Process>) {
        self.registry.lock().insert(process.pid, process);
    }

    pub fn get(&self, pid: ProcessId) -> Option<Arc<Process>> {
        self.registry.lock().get(&pid).cloned()
    }

    pub fn remove(&self, pid: ProcessId) {
        self.registry.lock().remove(&pid);
    }

    /// Creates the init process: no parent, a fresh pid.
    pub fn create_root(&self) -> Arc<Process> {
        let pid = self.alloc_pid();
        let process = Arc::new(Process::new(pid, None));
        self.insert(process.clone());
        process
    }

    pub fn len(&self) -> usize {
        self.registry.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pids_are_unique_and_increasing() {
        let table = ProcessTable::new();
        let a = table.create_root();
        let b = table.create_root();
        assert!(b.pid.0 > a.pid.0);
    }

    #[test]
    fn remove_drops_the_table_reference() {
        let table = ProcessTable::new();
        let root = table.create_root();
        let pid = root.pid;
        assert!(table.get(pid).is_some());
        table.remove(pid);
        assert!(table.get(pid).is_none());
    }
}
