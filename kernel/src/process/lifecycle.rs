//! Process creation and termination.

use crate::arch::context::Context;
use crate::error::{KernelResult, SchedError};
use crate::mm::{self, address_space::release_user_frames, AddressSpace, FRAME_ALLOCATOR, PAGE_SIZE};
use crate::process::{pcb::ProcessState, table};
use crate::sched::{self, SwitchAction};

/// Kernel-window virtual address of a stack's top, given its frame.
pub fn kernel_stack_top(frame: u32) -> u32 {
    mm::KERNEL_SPACE_START
        .wrapping_add(frame)
        .wrapping_add(PAGE_SIZE as u32)
}

/// Build a user process around a prepared address space and entry point
/// (the exec path). Returns the new pid.
pub fn create_process_from_elf(
    mut space: AddressSpace,
    entry: u32,
    user_stack_top: u32,
    name: &str,
    priority: u32,
) -> KernelResult<u32> {
    let kernel_stack_frame = match FRAME_ALLOCATOR.lock().allocate_zeroed() {
        Ok(frame) => frame,
        Err(e) => {
            release_user_frames(&mut space);
            space.destroy();
            return Err(e.into());
        }
    };

    let (slot, pid) = match table::with_table(|t| t.allocate(name, priority)) {
        Ok(v) => v,
        Err(e) => {
            let _ = FRAME_ALLOCATOR.lock().free(kernel_stack_frame);
            release_user_frames(&mut space);
            space.destroy();
            return Err(e);
        }
    };

    let p = table::process_mut(slot).ok_or(SchedError::NoSuchProcess { pid })?;
    p.kernel_stack_frame = kernel_stack_frame;
    p.context = Context::new_user(entry, user_stack_top, kernel_stack_top(kernel_stack_frame));
    p.address_space = Some(space);
    p.state = ProcessState::Ready;
    sched::admit(slot);
    Ok(pid)
}

/// Build a user process from a kernel-resident entry function (the
/// embedded demo programs): fresh address space, a one-page user stack,
/// and the program's code projected to the conventional text base.
pub fn create_user_process(entry: u32, name: &str, priority: u32) -> KernelResult<u32> {
    let mut space = AddressSpace::new_user()?;

    // One-page user stack at the top of user space.
    let stack_frame = FRAME_ALLOCATOR.lock().allocate_zeroed()?;
    let stack_base = mm::USER_STACK_TOP - PAGE_SIZE as u32;
    if let Err(e) = space.map_page(stack_base, stack_frame, true, true) {
        let _ = FRAME_ALLOCATOR.lock().free(stack_frame);
        space.destroy();
        return Err(e);
    }

    let user_entry = map_embedded_program(&mut space, entry)?;
    // Leave a few words of slack below the top, matching the stack setup.
    create_process_from_elf(space, user_entry, mm::USER_STACK_TOP - 16, name, priority)
}

/// Project the kernel-resident code pages around `entry` into user space
/// at the conventional text base, read-only, and return the translated
/// entry address. Only meaningful on bare metal, where kernel code lives
/// in the high window; host tests use the entry untouched.
#[cfg(all(target_arch = "x86", target_os = "none"))]
fn map_embedded_program(space: &mut AddressSpace, entry: u32) -> KernelResult<u32> {
    let entry_page = mm::page_align_down(entry);
    let phys_page = entry_page - mm::KERNEL_SPACE_START;
    // Four pages cover the demo programs, which are small leaf functions.
    let mapped_pages = 4u32;
    for i in 0..mapped_pages {
        space.map_page(
            mm::USER_TEXT_START + i * PAGE_SIZE as u32,
            phys_page + i * PAGE_SIZE as u32,
            false,
            true,
        )?;
    }
    Ok(mm::USER_TEXT_START + (entry - entry_page))
}

#[cfg(not(all(target_arch = "x86", target_os = "none")))]
fn map_embedded_program(_space: &mut AddressSpace, entry: u32) -> KernelResult<u32> {
    Ok(entry)
}

/// Free everything a PCB owns and release its slot. The kernel stack frame
/// is freed here, so this must never run on the stack it frees (callers
/// tear down the *current* process only after switching away).
pub fn teardown(slot: usize) {
    let Some(p) = table::process_mut(slot) else {
        return;
    };
    if let Some(mut space) = p.address_space.take() {
        release_user_frames(&mut space);
        space.destroy();
    }
    if p.kernel_stack_frame != 0 {
        let _ = FRAME_ALLOCATOR.lock().free(p.kernel_stack_frame);
        p.kernel_stack_frame = 0;
    }
    // Dropping the table closes every descriptor (Arc refs).
    p.file_table = crate::fs::FileTable::new();
    sched::remove_from_all_queues(slot);
    table::with_table(|t| t.release(slot));
}

/// Terminate the current process with an exit status: release its memory,
/// transition to ZOMBIE, notify a blocked waiter, and hand the CPU to the
/// next process. The returned action never resumes the caller; the zombie
/// PCB (and the kernel stack this call still stands on) survives until the
/// parent reaps it or the tick-time reaper collects it.
pub fn exit_current(status: i32) -> SwitchAction {
    let Some(slot) = sched::current_slot() else {
        return SwitchAction::None;
    };
    let Some(p) = table::process_mut(slot) else {
        return SwitchAction::None;
    };

    p.exit_status = status;

    // Release the address space eagerly; only the PCB remains.
    if let Some(mut space) = p.address_space.take() {
        release_user_frames(&mut space);
        space.destroy();
    }
    p.file_table = crate::fs::FileTable::new();

    // Orphan policy: surviving children lose their parent link; zombie
    // children nobody will ever wait for are collected by the reaper.
    let pid = p.pid;
    let _ = table::orphan_children(pid);

    p.state = ProcessState::Zombie;
    let parent_pid = p.parent_pid;
    if parent_pid != 0 {
        super::wait::notify_parent_of_exit(slot, parent_pid, status);
    }

    sched::retire_current()
}

/// Forcefully terminate a process (the KILL syscall). The target goes
/// straight to TERMINATED; a parent blocked waiting on it is woken with a
/// fatal status, any other pending status is discarded.
pub fn terminate_process(pid: u32) -> KernelResult<SwitchAction> {
    let (slot, p) = table::process_by_pid(pid).ok_or(SchedError::NoSuchProcess { pid })?;

    if sched::current_slot() == Some(slot) {
        return Ok(exit_current(FATAL_STATUS));
    }

    // Wake a parent blocked on this child before the pid disappears.
    let parent_pid = p.parent_pid;
    p.state = ProcessState::Zombie;
    p.exit_status = FATAL_STATUS;
    if parent_pid != 0 {
        super::wait::notify_parent_of_exit(slot, parent_pid, FATAL_STATUS);
    }
    // Not the running process, so its stack is not in use: reclaim now.
    teardown(slot);
    Ok(SwitchAction::None)
}

/// Status recorded for faults and kills.
pub const FATAL_STATUS: i32 = -1;

/// Terminate the current process after an unrecoverable fault.
pub fn fault_current() -> SwitchAction {
    if let Some(p) = super::current_process_mut() {
        crate::println!(
            "[PROCESS] pid {} killed by fault at eip {:#x}",
            p.pid,
            p.context.eip
        );
    }
    exit_current(FATAL_STATUS)
}
