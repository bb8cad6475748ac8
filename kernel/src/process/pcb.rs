//! Process control block.

use crate::arch::context::Context;
use crate::fs::file::FileTable;
use crate::mm::AddressSpace;

/// Maximum length of a process name.
pub const NAME_LEN: usize = 32;

/// Maximum length of the working-directory path (NUL-terminated).
pub const CWD_LEN: usize = 256;

/// Maximum length of the spawn-argument buffer (NUL-terminated).
pub const SPAWN_ARG_LEN: usize = 256;

/// Sentinel pid meaning "any child" for WAITID.
pub const WAIT_ANY_CHILD: u32 = 0xFFFF_FFFF;

/// Process states
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    /// Ready to run, sitting in a priority queue
    Ready = 0,
    /// Currently executing (the scheduler's current pointer)
    Running = 1,
    /// Waiting for I/O or an event
    Blocked = 2,
    /// Sleeping until an absolute tick
    Sleeping = 3,
    /// Exited, awaiting parent to reap
    Zombie = 4,
    /// Fully reaped; the slot is free for reuse
    Terminated = 5,
    /// Parked on a synchronization primitive
    Waiting = 6,
}

/// Process Control Block
pub struct Process {
    /// Process ID (unique, positive; 0 only in a free slot)
    pub pid: u32,
    /// Parent process ID (0 if none / orphaned)
    pub parent_pid: u32,
    /// Process name, NUL-padded
    pub name: [u8; NAME_LEN],
    pub state: ProcessState,
    /// Priority, 0 = highest
    pub priority: u32,
    /// Time quantum in ticks
    pub time_slice: u32,
    /// Ticks consumed from the current quantum
    pub time_used: u32,
    /// Lifetime tick count, for stats
    pub total_cpu_time: u64,
    /// Saved CPU state
    pub context: Context,
    /// Virtual address space (user processes)
    pub address_space: Option<AddressSpace>,
    /// Physical frame backing the kernel stack
    pub kernel_stack_frame: u32,
    /// Physical frame backing the initial user stack page
    pub user_stack_frame: u32,
    /// Program break region `[heap_start, heap_end)`
    pub heap_start: u32,
    pub heap_end: u32,
    /// True once the process has entered user mode
    pub has_started: bool,
    /// Absolute tick at which a sleeper wakes
    pub sleep_until: u64,
    /// Queue-age counter for starvation prevention
    pub age: u32,
    /// Tick at which the process last ran
    pub last_run_time: u64,
    /// Kernel frame ESP captured by the syscall stub; non-zero exactly
    /// while the process is blocked inside a syscall
    pub saved_syscall_esp: u32,
    /// Value placed in EAX when a parked syscall resumes
    pub pending_syscall_return: u32,
    /// Current working directory, absolute, NUL-terminated
    pub cwd: [u8; CWD_LEN],
    /// Argument string handed over by exec, NUL-terminated
    pub spawn_arg: [u8; SPAWN_ARG_LEN],
    /// Pid the process is blocked waiting on (0 = none)
    pub waiting_on_pid: u32,
    /// User pointer WAITID stores the status through (0 = none)
    pub wait_status_user_ptr: u32,
    /// Completed-child info captured before the waiter asked (races)
    pub pending_child_pid: u32,
    pub pending_child_status: i32,
    /// Exit status recorded at termination
    pub exit_status: i32,
    /// Whether a waiter has already collected this child's status
    pub has_been_waited: bool,
    /// Per-process file descriptor table
    pub file_table: FileTable,
}

impl Process {
    /// A blank PCB for a fresh slot.
    pub fn new(pid: u32, name: &str, priority: u32) -> Self {
        let mut pcb = Self {
            pid,
            parent_pid: 0,
            name: [0; NAME_LEN],
            state: ProcessState::Ready,
            priority,
            time_slice: super::DEFAULT_TIME_SLICE,
            time_used: 0,
            total_cpu_time: 0,
            context: Context::default(),
            address_space: None,
            kernel_stack_frame: 0,
            user_stack_frame: 0,
            heap_start: crate::mm::USER_HEAP_START,
            heap_end: crate::mm::USER_HEAP_START,
            has_started: false,
            sleep_until: 0,
            age: 0,
            last_run_time: 0,
            saved_syscall_esp: 0,
            pending_syscall_return: 0,
            cwd: [0; CWD_LEN],
            spawn_arg: [0; SPAWN_ARG_LEN],
            waiting_on_pid: 0,
            wait_status_user_ptr: 0,
            pending_child_pid: 0,
            pending_child_status: 0,
            exit_status: 0,
            has_been_waited: false,
            file_table: FileTable::new(),
        };
        pcb.set_name(name);
        pcb.cwd[0] = b'/';
        pcb
    }

    pub fn set_name(&mut self, name: &str) {
        let bytes = name.as_bytes();
        let len = bytes.len().min(NAME_LEN - 1);
        self.name[..len].copy_from_slice(&bytes[..len]);
        self.name[len..].fill(0);
    }

    pub fn name(&self) -> &str {
        let len = self.name.iter().position(|&b| b == 0).unwrap_or(NAME_LEN);
        core::str::from_utf8(&self.name[..len]).unwrap_or("?")
    }

    pub fn cwd(&self) -> &str {
        let len = self.cwd.iter().position(|&b| b == 0).unwrap_or(CWD_LEN);
        core::str::from_utf8(&self.cwd[..len]).unwrap_or("/")
    }

    pub fn set_cwd(&mut self, path: &str) {
        let bytes = path.as_bytes();
        let len = bytes.len().min(CWD_LEN - 1);
        self.cwd[..len].copy_from_slice(&bytes[..len]);
        self.cwd[len..].fill(0);
    }

    pub fn spawn_arg(&self) -> &str {
        let len = self
            .spawn_arg
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(SPAWN_ARG_LEN);
        core::str::from_utf8(&self.spawn_arg[..len]).unwrap_or("")
    }

    pub fn set_spawn_arg(&mut self, arg: &str) {
        let bytes = arg.as_bytes();
        let len = bytes.len().min(SPAWN_ARG_LEN - 1);
        self.spawn_arg[..len].copy_from_slice(&bytes[..len]);
        self.spawn_arg[len..].fill(0);
    }

    /// Whether the process still counts against the live-process total.
    pub fn is_live(&self) -> bool {
        !matches!(self.state, ProcessState::Zombie | ProcessState::Terminated)
    }
}
