//! Fixed-size process table.
//!
//! PCBs live in a 16-slot array addressed by index; the scheduler's queues
//! hold slot indices, never pointers. A freed slot is `None` and reusable.

use spin::Mutex;

use super::pcb::{Process, ProcessState};
use crate::error::{KernelResult, SchedError};

/// Number of PCB slots.
pub const MAX_PROCESSES: usize = 16;

pub struct ProcessTable {
    slots: [Option<Process>; MAX_PROCESSES],
    next_pid: u32,
    live_count: usize,
}

impl ProcessTable {
    pub const fn new() -> Self {
        Self {
            slots: [const { None }; MAX_PROCESSES],
            next_pid: 1,
            live_count: 0,
        }
    }

    /// Claim a free slot, build a fresh PCB in it, and return the slot
    /// index and pid.
    pub fn allocate(&mut self, name: &str, priority: u32) -> KernelResult<(usize, u32)> {
        if self.live_count >= MAX_PROCESSES {
            return Err(SchedError::TooManyProcesses.into());
        }
        let slot = self
            .slots
            .iter()
            .position(|s| s.is_none())
            .ok_or(SchedError::TooManyProcesses)?;
        let pid = self.next_pid;
        self.next_pid += 1;
        self.slots[slot] = Some(Process::new(pid, name, priority));
        self.live_count += 1;
        Ok((slot, pid))
    }

    /// Free a slot after teardown. The pid becomes invalid immediately.
    pub fn release(&mut self, slot: usize) {
        if self.slots[slot].take().is_some() && self.live_count > 0 {
            self.live_count -= 1;
        }
    }

    pub fn slot_of_pid(&self, pid: u32) -> Option<usize> {
        if pid == 0 {
            return None;
        }
        self.slots
            .iter()
            .position(|s| s.as_ref().is_some_and(|p| p.pid == pid))
    }

    pub fn live_count(&self) -> usize {
        self.live_count
    }
}

/// Global process table.
static PROCESS_TABLE: Mutex<ProcessTable> = Mutex::new(ProcessTable::new());

/// Run a closure with the table locked.
pub fn with_table<R>(f: impl FnOnce(&mut ProcessTable) -> R) -> R {
    f(&mut PROCESS_TABLE.lock())
}

/// Borrow the PCB in a slot for the rest of the kernel's lifetime.
///
/// The `'static` escape mirrors how the slots are actually used: one CPU,
/// and every caller path either runs with interrupts disabled or on behalf
/// of the owning process. The table lock is held only for the lookup.
pub fn process_mut(slot: usize) -> Option<&'static mut Process> {
    let mut table = PROCESS_TABLE.lock();
    let process = table.slots.get_mut(slot)?.as_mut()?;
    // SAFETY: slots have a stable address inside a static array and are
    // only released through `release`, which the single-CPU execution
    // model serializes against all users of this reference.
    Some(unsafe { &mut *(process as *mut Process) })
}

/// Look up a PCB by pid.
pub fn process_by_pid(pid: u32) -> Option<(usize, &'static mut Process)> {
    let slot = PROCESS_TABLE.lock().slot_of_pid(pid)?;
    process_mut(slot).map(|p| (slot, p))
}

/// Find a zombie child of `parent_pid` that has not been reported yet.
pub fn find_zombie_child(parent_pid: u32) -> Option<(usize, &'static mut Process)> {
    for slot in 0..MAX_PROCESSES {
        if let Some(p) = process_mut(slot) {
            if p.parent_pid == parent_pid && p.state == ProcessState::Zombie && !p.has_been_waited {
                return Some((slot, p));
            }
        }
    }
    None
}

/// Whether `parent_pid` has any child in any state.
pub fn has_child(parent_pid: u32) -> bool {
    (0..MAX_PROCESSES).any(|slot| {
        process_mut(slot).is_some_and(|p| p.parent_pid == parent_pid && p.pid != 0)
    })
}

/// Clear the parent link of every child of `parent_pid` (orphan policy).
/// Returns the slots of any zombie children left behind, for the reaper.
pub fn orphan_children(parent_pid: u32) -> slot_list::SlotList {
    let mut zombies = slot_list::SlotList::new();
    for slot in 0..MAX_PROCESSES {
        if let Some(p) = process_mut(slot) {
            if p.parent_pid == parent_pid {
                p.parent_pid = 0;
                if p.state == ProcessState::Zombie {
                    zombies.push(slot);
                }
            }
        }
    }
    zombies
}

/// Number of live (non-zombie, non-terminated) processes.
pub fn live_count() -> usize {
    PROCESS_TABLE.lock().live_count()
}

/// Tiny fixed-capacity slot list, enough for every PCB slot.
pub mod slot_list {
    use super::MAX_PROCESSES;

    pub struct SlotList {
        slots: [usize; MAX_PROCESSES],
        len: usize,
    }

    impl SlotList {
        pub const fn new() -> Self {
            Self {
                slots: [0; MAX_PROCESSES],
                len: 0,
            }
        }

        pub fn push(&mut self, slot: usize) {
            if self.len < MAX_PROCESSES {
                self.slots[self.len] = slot;
                self.len += 1;
            }
        }

        pub fn iter(&self) -> impl Iterator<Item = usize> + '_ {
            self.slots[..self.len].iter().copied()
        }

        pub fn is_empty(&self) -> bool {
            self.len == 0
        }
    }

    impl Default for SlotList {
        fn default() -> Self {
            Self::new()
        }
    }
}

/// Reset the table to empty. Test-only.
#[cfg(not(target_os = "none"))]
pub fn reset_for_tests() {
    let mut table = PROCESS_TABLE.lock();
    *table = ProcessTable::new();
}
