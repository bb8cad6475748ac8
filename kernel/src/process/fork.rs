//! Fork with copy-on-write.
//!
//! The child duplicates the parent's PCB and shares every user page
//! read-only: both sides lose the write bit, the frame gains a reference,
//! and the first write on either side resolves through the page-fault
//! handler into a private copy.

use crate::error::{KernelResult, SchedError};
use crate::mm::{self, AddressSpace, FRAME_ALLOCATOR, PAGE_SIZE};
use crate::process::{pcb::ProcessState, table};
use crate::sched;

/// Fork the current process. The parent receives the child pid; the child
/// resumes at the post-fork instruction with 0 in its return register.
pub fn fork_current() -> KernelResult<u32> {
    let parent = super::current_process_mut().ok_or(SchedError::NoCurrentProcess)?;
    if parent.address_space.is_none() {
        return Err(SchedError::NoCurrentProcess.into());
    }
    let parent_pid = parent.pid;

    let (child_slot, child_pid) =
        table::with_table(|t| t.allocate(parent.name(), parent.priority))?;

    let child_kernel_stack = match FRAME_ALLOCATOR.lock().allocate_zeroed() {
        Ok(frame) => frame,
        Err(e) => {
            table::with_table(|t| t.release(child_slot));
            return Err(e.into());
        }
    };

    let mut child_space = match AddressSpace::new_user() {
        Ok(space) => space,
        Err(e) => {
            let _ = FRAME_ALLOCATOR.lock().free(child_kernel_stack);
            table::with_table(|t| t.release(child_slot));
            return Err(e);
        }
    };

    // Share every user page copy-on-write: install the same frame in the
    // child read-only, drop the parent's write bit, and count the extra
    // reference. Kernel-range mappings are shared by construction.
    let parent_space = parent
        .address_space
        .as_mut()
        .ok_or(SchedError::NoCurrentProcess)?;
    let mut share_error = None;
    parent_space.for_each_user_entry(|va, entry| {
        if share_error.is_some() {
            return;
        }
        let Some(pa) = entry.addr() else {
            return;
        };
        if let Err(e) = child_space.map_page(va, pa, false, true) {
            share_error = Some(e);
            return;
        }
        let mut flags = entry.flags();
        flags.remove(mm::PageFlags::WRITABLE);
        entry.set_flags(flags);
        crate::arch::tlb_flush_entry(va);
        FRAME_ALLOCATOR.lock().incref(pa);
    });
    if let Some(e) = share_error {
        mm::address_space::release_user_frames(&mut child_space);
        child_space.destroy();
        let _ = FRAME_ALLOCATOR.lock().free(child_kernel_stack);
        table::with_table(|t| t.release(child_slot));
        return Err(e);
    }

    let child = table::process_mut(child_slot).ok_or(SchedError::NoSuchProcess {
        pid: child_pid,
    })?;

    // Duplicate the PCB: context, priority, cwd, spawn argument, heap
    // bounds. Identity fields stay the child's own.
    child.parent_pid = parent_pid;
    child.context = parent.context;
    child.context.eax = 0;
    child.time_slice = parent.time_slice;
    child.heap_start = parent.heap_start;
    child.heap_end = parent.heap_end;
    child.cwd = parent.cwd;
    child.spawn_arg = parent.spawn_arg;
    child.has_started = parent.has_started;
    child.kernel_stack_frame = child_kernel_stack;
    child.address_space = Some(child_space);

    // Descriptors: shared vnode, duplicated position.
    child.file_table = parent.file_table.clone_for_fork();

    // Replicate the parent's parked syscall frame onto the child's kernel
    // stack so the child resumes at the instruction after the fork call.
    if parent.saved_syscall_esp != 0 {
        let parent_stack_base = super::lifecycle::kernel_stack_top(parent.kernel_stack_frame)
            .wrapping_sub(PAGE_SIZE as u32);
        let offset = parent.saved_syscall_esp.wrapping_sub(parent_stack_base);
        // SAFETY: both stack frames are single pages reachable through the
        // kernel window; offset stays within the page.
        unsafe {
            core::ptr::copy_nonoverlapping(
                mm::phys_to_virt(parent.kernel_stack_frame),
                mm::phys_to_virt(child_kernel_stack),
                PAGE_SIZE,
            );
        }
        child.saved_syscall_esp = super::lifecycle::kernel_stack_top(child_kernel_stack)
            .wrapping_sub(PAGE_SIZE as u32)
            .wrapping_add(offset);
        child.pending_syscall_return = 0;
    }

    child.state = ProcessState::Ready;
    sched::admit(child_slot);
    Ok(child_pid)
}
