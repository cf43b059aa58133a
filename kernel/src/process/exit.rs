//! `exit`: tears down the calling process's address space, reparents or
//! reaps its children, and hands its exit status to its own parent (or
//! discards it if orphaned).

use alloc::sync::Arc;

use super::mkwait_exit;
use super::pcb::Process;
use super::table::ProcessTable;
use crate::external::Scheduler;
use crate::log_service::{klog, LogLevel};
use crate::mm::coremap::Coremap;

/// Address-space teardown, child reaping/orphaning, and parent
/// notification — everything about exit except leaving the scheduler.
/// Split out from [`exit`] so it can be driven from a test without a
/// scheduler that must itself diverge. Returns whether no parent remains
/// to reap this process's record, i.e. whether the caller should remove it
/// from `table` immediately rather than leave it for `waitpid`.
///
/// Address-space teardown happens in its own scope so the lock is released
/// before `info` is taken — a child reaping its own children while its
/// parent is mid-destroy must never be able to observe a half-destroyed
/// `info` guarded by a still-held address-space lock.
pub(crate) fn finish_exit(proc: &Arc<Process>, code: i32, table: &ProcessTable, coremap: &Coremap) -> bool {
    {
        let mut guard = proc.address_space.lock();
        if let Some(mut aspace) = guard.take() {
            aspace.destroy(coremap);
        }
    }

    let destroy_self;
    {
        let mut info = proc.info.lock();

        // Reap already-exited children outright; orphan the rest by
        // clearing their parent link, so their own exit finds no parent to
        // signal.
        let mut still_living = alloc::vec::Vec::new();
        for child in info.children.drain(..) {
            if child.info.lock().exited {
                table.remove(child.pid);
            } else {
                child.info.lock().parent = None;
                still_living.push(child);
            }
        }
        info.children = still_living;

        destroy_self = match &info.parent {
            Some(weak) => match weak.upgrade() {
                Some(_) => {
                    info.exited = true;
                    info.exit_status = mkwait_exit(code);
                    false
                }
                None => true,
            },
            None => true,
        };

        if !destroy_self {
            proc.parent_signal.signal();
        }
    }

    klog(LogLevel::Debug, "proc", "process exiting");
    destroy_self
}

/// `sys__exit`. Never returns: the caller's thread is gone by the time this
/// function would otherwise return control to it.
pub fn exit(proc: &Arc<Process>, code: i32, table: &ProcessTable, coremap: &Coremap, scheduler: &dyn Scheduler) -> ! {
    let destroy_self = finish_exit(proc, code, table, coremap);

    scheduler.proc_remthread();

    if destroy_self {
        table.remove(proc.pid);
    }

    scheduler.thread_exit(code)
}
