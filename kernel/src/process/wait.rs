//! `waitpid`: blocks the caller until a specific child has exited, reaps
//! it, and returns its status.

use alloc::sync::Arc;

use super::pcb::Process;
use super::table::ProcessTable;
use super::ProcessId;
use crate::error::{KernelError, KernelResult};
use crate::log_service::{klog, LogLevel};

/// `sys_waitpid(pid, &status, options)`. Only `options == 0` is supported;
/// anything else is an invalid argument, matching the original's
/// unsupported-`WNOHANG`/`WUNTRACED` rejection.
///
/// The caller's `info` lock is held for the entire wait so a concurrent
/// second `waitpid` on the same pid (or a concurrent `fork` appending a
/// new child) never races with the child lookup or removal below; the
/// child's own `info` lock nests inside it only while actually checking or
/// waiting on `exited`, matching the parent-before-child lock ordering
/// `exit`/`fork` also use.
pub fn waitpid(
    caller: &Arc<Process>,
    pid: ProcessId,
    options: i32,
    table: &ProcessTable,
) -> KernelResult<(ProcessId, i32)> {
    if options != 0 {
        return Err(KernelError::InvalidArgument { name: "options" });
    }

    let mut caller_info = caller.info.lock();

    let child_index = caller_info.children.iter().position(|c| c.pid == pid).ok_or_else(|| {
        klog(LogLevel::Warn, "proc", "waitpid: no such child");
        KernelError::NoSuchChild
    })?;
    let child = caller_info.children[child_index].clone();

    let status = {
        let mut child_info = child.info.lock();
        while !child_info.exited {
            child_info = child.parent_signal.wait(&child.info, child_info);
        }
        child_info.exit_status
    };

    caller_info.children.remove(child_index);
    drop(caller_info);

    table.remove(pid);

    klog(LogLevel::Debug, "proc", "waitpid reaped child");
    Ok((pid, status))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mm::coremap::Coremap;
    use crate::process::exit::finish_exit;

    #[test]
    fn waiting_on_an_already_exited_child_returns_immediately() {
        let table = ProcessTable::new();
        let coremap = Coremap::with_base(0, 16);
        let parent = table.create_root();
        let child_pid = table.alloc_pid();
        let child = Arc::new(Process::new(child_pid, Some(Arc::downgrade(&parent))));
        table.insert(child.clone());
        parent.info.lock().children.push(child.clone());

        finish_exit(&child, 5, &table, &coremap);

        let (reaped_pid, status) = waitpid(&parent, child_pid, 0, &table).unwrap();
        assert_eq!(reaped_pid, child_pid);
        assert_eq!(status, crate::process::mkwait_exit(5));
        assert!(parent.info.lock().children.is_empty());
        assert!(table.get(child_pid).is_none());
    }

    #[test]
    fn waiting_on_an_unknown_pid_is_no_such_child() {
        let table = ProcessTable::new();
        let parent = table.create_root();
        let err = waitpid(&parent, ProcessId(9999), 0, &table).unwrap_err();
        assert_eq!(err, KernelError::NoSuchChild);
    }

    #[test]
    fn nonzero_options_are_rejected() {
        let table = ProcessTable::new();
        let parent = table.create_root();
        let err = waitpid(&parent, parent.pid, 1, &table).unwrap_err();
        assert_eq!(err, KernelError::InvalidArgument { name: "options" });
    }
}
