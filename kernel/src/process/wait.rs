//! The wait/exit protocol.
//!
//! A child's transition to ZOMBIE happens before its parent is resumed, so
//! the woken parent always reads the final exit status. WAIT takes an
//! explicit child pid and returns the status; WAITID accepts 0 for "any
//! child", returns the child pid, and stores the status through a
//! validated user pointer. Orphaned zombies are collected by a tick-time
//! kernel reaper and their status is discarded.

use crate::error::SyscallError;
use crate::mm::user_validation;
use crate::process::{pcb::ProcessState, table, WAIT_ANY_CHILD};
use crate::sched::{self, SwitchAction};

/// What a wait-family syscall decided.
pub enum WaitOutcome {
    /// The child had already exited; the value is the syscall return.
    Ready(i32),
    /// The caller parked; the action hands the CPU onward.
    Parked(SwitchAction),
}

/// Free a zombie's remaining resources (kernel stack, PCB slot). The
/// caller must have collected the status first, and the zombie must not be
/// the running process.
pub fn reap(slot: usize) {
    if let Some(p) = table::process_mut(slot) {
        if p.state == ProcessState::Zombie {
            p.state = ProcessState::Terminated;
            super::lifecycle::teardown(slot);
        }
    }
}

/// The trivial kernel reaper: collect zombies whose parent link is gone.
/// Called from the scheduler tick; skips the running process (its kernel
/// stack may still be live during the exit transition).
pub fn reap_orphans() {
    let current = sched::current_slot();
    for slot in 0..table::MAX_PROCESSES {
        if Some(slot) == current {
            continue;
        }
        if let Some(p) = table::process_mut(slot) {
            if p.state == ProcessState::Zombie && p.parent_pid == 0 {
                reap(slot);
            }
        }
    }
}

/// Tell a parent that `child_slot` exited with `status`.
///
/// If the parent is blocked in WAIT on this child (or any child), deliver
/// the result into its resume slot, wake it, and mark the child for the
/// reaper. Otherwise record the completion on the parent for a later
/// WAITID(any) and leave the zombie for a synchronous reap.
pub fn notify_parent_of_exit(child_slot: usize, parent_pid: u32, status: i32) {
    let Some(child) = table::process_mut(child_slot) else {
        return;
    };
    let child_pid = child.pid;

    let Some((parent_slot, parent)) = table::process_by_pid(parent_pid) else {
        return;
    };

    let waiting_on_this = parent.state == ProcessState::Blocked
        && (parent.waiting_on_pid == child_pid || parent.waiting_on_pid == WAIT_ANY_CHILD);

    if !waiting_on_this {
        // Completion raced ahead of the wait call; remember it for a
        // subsequent WAITID(any).
        parent.pending_child_pid = child_pid;
        parent.pending_child_status = status;
        return;
    }

    // WAITID delivers the status through the stored user pointer and
    // returns the pid; WAIT returns the status directly.
    if parent.wait_status_user_ptr != 0 {
        if let Some(space) = parent.address_space.as_ref() {
            let _ = user_validation::copy_to_user(
                space,
                parent.wait_status_user_ptr,
                &status.to_le_bytes(),
            );
        }
        parent.pending_syscall_return = child_pid;
    } else {
        parent.pending_syscall_return = status as u32;
    }
    parent.waiting_on_pid = 0;
    parent.wait_status_user_ptr = 0;

    // The status has been consumed; the reaper may collect the child.
    child.has_been_waited = true;
    child.parent_pid = 0;

    sched::wake(parent_slot);
}

/// WAIT(pid): block until the explicit child exits, then return its
/// status.
pub fn wait_on(pid: u32) -> Result<WaitOutcome, SyscallError> {
    let cur = super::current_process_mut().ok_or(SyscallError::IoError)?;
    if pid == 0 {
        return Err(SyscallError::InvalidParameter);
    }
    let Some((target_slot, target)) = table::process_by_pid(pid) else {
        return Err(SyscallError::InvalidParameter);
    };
    if target.parent_pid != cur.pid {
        return Err(SyscallError::PermissionDenied);
    }

    if target.state == ProcessState::Zombie {
        let status = target.exit_status;
        target.has_been_waited = true;
        reap(target_slot);
        return Ok(WaitOutcome::Ready(status));
    }

    cur.waiting_on_pid = pid;
    cur.wait_status_user_ptr = 0;
    Ok(WaitOutcome::Parked(sched::block_current(
        ProcessState::Blocked,
    )))
}

/// WAITID(pid | 0, statusPtr): block until the child (or any child, for 0)
/// exits; the child pid is the return value and the status is stored
/// through `status_ptr`.
pub fn waitid(pid: u32, status_ptr: u32) -> Result<WaitOutcome, SyscallError> {
    let cur = super::current_process_mut().ok_or(SyscallError::IoError)?;
    let cur_pid = cur.pid;

    // Validate the pointer up front so a bad buffer fails fast instead of
    // after the child exits.
    if status_ptr != 0 {
        let space = cur.address_space.as_ref().ok_or(SyscallError::IoError)?;
        user_validation::validate_range(space, status_ptr, 4, true)
            .map_err(|_| SyscallError::InvalidParameter)?;
    }

    if pid != 0 {
        let Some((target_slot, target)) = table::process_by_pid(pid) else {
            return Err(SyscallError::InvalidParameter);
        };
        if target.parent_pid != cur_pid {
            return Err(SyscallError::PermissionDenied);
        }
        if target.state == ProcessState::Zombie {
            let status = target.exit_status;
            target.has_been_waited = true;
            reap(target_slot);
            deliver_status(status_ptr, status)?;
            return Ok(WaitOutcome::Ready(pid as i32));
        }
        cur.waiting_on_pid = pid;
        cur.wait_status_user_ptr = status_ptr;
        return Ok(WaitOutcome::Parked(sched::block_current(
            ProcessState::Blocked,
        )));
    }

    // Any-child wait: a completion may already be pending from a race.
    if cur.pending_child_pid != 0 {
        let child_pid = cur.pending_child_pid;
        let status = cur.pending_child_status;
        cur.pending_child_pid = 0;
        cur.pending_child_status = 0;
        if let Some((zslot, z)) = table::process_by_pid(child_pid) {
            if z.state == ProcessState::Zombie {
                z.has_been_waited = true;
                reap(zslot);
            }
        }
        deliver_status(status_ptr, status)?;
        return Ok(WaitOutcome::Ready(child_pid as i32));
    }

    if let Some((zslot, zombie)) = table::find_zombie_child(cur_pid) {
        let status = zombie.exit_status;
        let child_pid = zombie.pid;
        zombie.has_been_waited = true;
        reap(zslot);
        deliver_status(status_ptr, status)?;
        return Ok(WaitOutcome::Ready(child_pid as i32));
    }

    if !table::has_child(cur_pid) {
        return Err(SyscallError::InvalidParameter);
    }

    cur.waiting_on_pid = WAIT_ANY_CHILD;
    cur.wait_status_user_ptr = status_ptr;
    Ok(WaitOutcome::Parked(sched::block_current(
        ProcessState::Blocked,
    )))
}

fn deliver_status(status_ptr: u32, status: i32) -> Result<(), SyscallError> {
    if status_ptr == 0 {
        return Ok(());
    }
    let cur = super::current_process_mut().ok_or(SyscallError::IoError)?;
    let space = cur.address_space.as_ref().ok_or(SyscallError::IoError)?;
    user_validation::copy_to_user(space, status_ptr, &status.to_le_bytes())
        .map_err(|_| SyscallError::InvalidParameter)
}
