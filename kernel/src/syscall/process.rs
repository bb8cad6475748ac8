//! Process-management system calls.

use super::{caller, caller_space, park, SUCCESS};
use crate::error::SyscallError;
use crate::mm::{self, user_validation, FRAME_ALLOCATOR, PAGE_SIZE};
use crate::process::{fork, lifecycle, loader, wait, wait::WaitOutcome};
use crate::sched;

/// EXIT(status): terminate the caller. Never returns to the caller.
pub fn sys_exit(status: i32) -> i32 {
    let action = lifecycle::exit_current(status);
    park(action)
}

/// YIELD: cooperative reschedule.
pub fn sys_yield() -> i32 {
    if let Ok(p) = caller() {
        p.pending_syscall_return = SUCCESS as u32;
    }
    let action = sched::yield_now();
    park(action)
}

/// GET_PID: the caller's pid.
pub fn sys_getpid() -> i32 {
    crate::process::current_pid() as i32
}

/// SLEEP(ticks): block until `schedulerTicks + ticks`.
pub fn sys_sleep(ticks: u32) -> i32 {
    if let Ok(p) = caller() {
        p.pending_syscall_return = SUCCESS as u32;
    }
    let action = sched::sleep_current(ticks as u64);
    park(action)
}

/// FORK: duplicate the caller. Parent gets the child pid, the child
/// resumes with 0.
pub fn sys_fork() -> i32 {
    match fork::fork_current() {
        Ok(child_pid) => child_pid as i32,
        Err(e) => SyscallError::from(e).as_i32(),
    }
}

/// EXEC(path, arg): load an ELF at an absolute path and spawn it as a
/// child of the caller; returns the child pid without yielding.
pub fn sys_exec(path_ptr: u32, arg_ptr: u32) -> i32 {
    let (_p, space) = match caller_space() {
        Ok(v) => v,
        Err(e) => return e.as_i32(),
    };
    let path = match user_validation::str_from_user(space, path_ptr) {
        Ok(path) => path,
        Err(_) => return SyscallError::InvalidParameter.as_i32(),
    };
    let arg = if arg_ptr != 0 {
        match user_validation::str_from_user(space, arg_ptr) {
            Ok(arg) => Some(arg),
            Err(_) => return SyscallError::InvalidParameter.as_i32(),
        }
    } else {
        None
    };

    match loader::exec(&path, arg.as_deref()) {
        Ok(pid) => pid as i32,
        Err(e) => SyscallError::from(e).as_i32(),
    }
}

/// GETSPAWNARG(buf, size): copy the exec argument into a user buffer.
pub fn sys_getspawnarg(buf: u32, size: u32) -> i32 {
    if buf == 0 || size == 0 {
        return SyscallError::InvalidParameter.as_i32();
    }
    let (p, space) = match caller_space() {
        Ok(v) => v,
        Err(e) => return e.as_i32(),
    };
    let arg = p.spawn_arg();
    let n = arg.len().min(size as usize - 1);
    let mut out = alloc::vec::Vec::with_capacity(n + 1);
    out.extend_from_slice(&arg.as_bytes()[..n]);
    out.push(0);
    match user_validation::copy_to_user(space, buf, &out) {
        Ok(()) => SUCCESS,
        Err(_) => SyscallError::InvalidParameter.as_i32(),
    }
}

/// WAIT(pid): block until the explicit child exits; returns its status.
pub fn sys_wait(pid: u32) -> i32 {
    match wait::wait_on(pid) {
        Ok(WaitOutcome::Ready(status)) => status,
        Ok(WaitOutcome::Parked(action)) => park(action),
        Err(e) => e.as_i32(),
    }
}

/// WAITID(pid | 0, statusPtr): block until the child (any for 0) exits;
/// returns the child pid, status through the pointer.
pub fn sys_waitid(pid: u32, status_ptr: u32) -> i32 {
    match wait::waitid(pid, status_ptr) {
        Ok(WaitOutcome::Ready(value)) => value,
        Ok(WaitOutcome::Parked(action)) => park(action),
        Err(e) => e.as_i32(),
    }
}

/// PS: report the current pid.
pub fn sys_ps() -> i32 {
    crate::process::current_pid() as i32
}

/// KILL(pid): force-terminate a process.
pub fn sys_kill(pid: u32) -> i32 {
    match lifecycle::terminate_process(pid) {
        Ok(crate::sched::SwitchAction::None) => SUCCESS,
        // Killing the caller: hand the CPU onward.
        Ok(action) => park(action),
        Err(_) => SyscallError::InvalidParameter.as_i32(),
    }
}

/// SBRK(delta): move the program break by a signed delta; returns the old
/// break on success.
pub fn sys_sbrk(delta: i32) -> i32 {
    let (p, _) = match caller_space() {
        Ok(v) => v,
        Err(e) => return e.as_i32(),
    };
    let old_end = p.heap_end;
    let new_end = old_end.wrapping_add(delta as u32);
    match set_break(new_end) {
        Ok(()) => old_end as i32,
        Err(e) => e.as_i32(),
    }
}

/// BRK(new): set the program break to an absolute address.
pub fn sys_brk(new_end: u32) -> i32 {
    match set_break(new_end) {
        Ok(()) => SUCCESS,
        Err(e) => e.as_i32(),
    }
}

/// Grow or shrink the caller's heap `[heap_start, heap_end)`, mapping
/// zeroed frames for new pages and releasing frames of vacated ones.
/// A growth that fails partway unwinds every page it mapped, so the
/// mappings never extend past the recorded break.
fn set_break(new_end: u32) -> Result<(), SyscallError> {
    let p = caller()?;
    if new_end < p.heap_start || new_end > mm::USER_STACK_TOP - crate::elf::USER_STACK_BYTES {
        return Err(SyscallError::InvalidParameter);
    }
    let space = p.address_space.as_mut().ok_or(SyscallError::IoError)?;

    let old_pages_end = mm::page_align_up(p.heap_end);
    let new_pages_end = mm::page_align_up(new_end);

    if new_pages_end > old_pages_end {
        let mut page = old_pages_end;
        while page < new_pages_end {
            let frame = match FRAME_ALLOCATOR.lock().allocate_zeroed() {
                Ok(frame) => frame,
                Err(_) => {
                    release_heap_pages(space, old_pages_end, page);
                    return Err(SyscallError::NoSpace);
                }
            };
            if space.map_page(page, frame, true, true).is_err() {
                let _ = FRAME_ALLOCATOR.lock().free(frame);
                release_heap_pages(space, old_pages_end, page);
                return Err(SyscallError::NoSpace);
            }
            page += PAGE_SIZE as u32;
        }
    } else if new_pages_end < old_pages_end {
        release_heap_pages(space, new_pages_end, old_pages_end);
    }

    p.heap_end = new_end;
    Ok(())
}

/// Unmap the heap pages in `[from, to)` and drop their frames through the
/// refcounts.
fn release_heap_pages(space: &mut crate::mm::AddressSpace, from: u32, to: u32) {
    let mut page = from;
    while page < to {
        if let Some(pa) = space.translate(page) {
            let frame = mm::page_align_down(pa);
            let _ = space.unmap_page(page);
            let mut allocator = FRAME_ALLOCATOR.lock();
            if allocator.decref(frame) == 0 {
                let _ = allocator.free(frame);
            }
        }
        page += PAGE_SIZE as u32;
    }
}
