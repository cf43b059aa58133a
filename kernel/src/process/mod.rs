//! Process lifecycle: records, the global table, and the fork/exec/exit/
//! wait operations that create, replace, and tear them down.

pub mod exec;
pub mod exit;
pub mod fork;
pub mod pcb;
pub mod table;
pub mod wait;

pub use exec::exec;
pub use exit::exit;
pub use fork::fork;
pub use pcb::{Process, ProcessId, ProcessInfo};
pub use table::ProcessTable;
pub use wait::waitpid;

/// `MKWAIT_EXIT`: packs a normal exit code into the status word `waitpid`
/// hands back, matching the original's low-byte-reserved encoding.
pub const fn mkwait_exit(code: i32) -> i32 {
    code << 8
}

/// Maximum number of simultaneously live processes.
pub const MAX_PROCESSES: usize = super::mm::MAX_PROCESSES;
