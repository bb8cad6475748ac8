//! Process management: PCBs, the process table, creation and teardown,
//! fork with copy-on-write, exec, and the wait/exit protocol.

pub mod fork;
pub mod lifecycle;
pub mod loader;
pub mod pcb;
pub mod table;
pub mod wait;

pub use pcb::{Process, ProcessState, WAIT_ANY_CHILD};
pub use table::MAX_PROCESSES;

/// Default time quantum in timer ticks.
pub const DEFAULT_TIME_SLICE: u32 = 10;

/// Priority assigned to processes that do not ask for one.
pub const DEFAULT_PRIORITY: u32 = 5;

/// Lowest priority level (0 is highest).
pub const MAX_PRIORITY: u32 = 10;

/// Kernel and user stacks are one page each.
pub const STACK_SIZE: usize = crate::mm::PAGE_SIZE;

/// Slot index of the RUNNING process, if any.
pub fn current_slot() -> Option<usize> {
    crate::sched::current_slot()
}

/// The RUNNING process's PCB.
pub fn current_process_mut() -> Option<&'static mut Process> {
    current_slot().and_then(table::process_mut)
}

/// Pid of the RUNNING process (0 when idle).
pub fn current_pid() -> u32 {
    current_process_mut().map(|p| p.pid).unwrap_or(0)
}

pub fn init() {
    crate::println!("[PROCESS] table ready, {} slots", MAX_PROCESSES);
}
