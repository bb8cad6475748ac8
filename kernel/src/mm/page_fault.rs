//! Page-fault handling and copy-on-write resolution.
//!
//! The architecture trap handler decodes the error code and CR2 into a
//! [`PageFaultInfo`] and calls [`handle_page_fault`]. A write to a present,
//! read-only user page whose frame is shared gets a private copy; a write to
//! an exclusively-owned read-only page gets its write bit back. Anything
//! else is unrecoverable and the faulting process is terminated.

use super::{frame_allocator::FRAME_ALLOCATOR, AddressSpace, PAGE_SIZE};
use crate::error::{KernelError, KernelResult, MemError};

/// Reason a page fault occurred, decoded from the error code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageFaultReason {
    /// Page is not present in the page table.
    NotPresent,
    /// Write to a read-only page.
    WriteToReadOnly,
    /// User-mode code touched a kernel-only page.
    UserModeKernelAccess,
    /// Any other protection violation.
    ProtectionViolation,
}

/// Information about a page fault collected by the trap handler.
#[derive(Debug, Clone, Copy)]
pub struct PageFaultInfo {
    /// The virtual address that caused the fault (CR2).
    pub faulting_address: u32,
    /// Why the fault occurred.
    pub reason: PageFaultReason,
    /// Whether the access was a write.
    pub was_write: bool,
    /// Whether the fault occurred in user mode.
    pub was_user_mode: bool,
    /// Instruction pointer at the time of the fault.
    pub instruction_pointer: u32,
}

/// Decode an x86 page-fault error code.
///
/// Error code bits (Intel SDM):
/// - Bit 0 (P):   0 = not-present, 1 = protection violation
/// - Bit 1 (W/R): 0 = read, 1 = write
/// - Bit 2 (U/S): 0 = supervisor, 1 = user
pub fn from_error_code(error_code: u32, cr2: u32, eip: u32) -> PageFaultInfo {
    let present = (error_code & 1) != 0;
    let was_write = (error_code & 2) != 0;
    let was_user = (error_code & 4) != 0;

    let reason = if !present {
        PageFaultReason::NotPresent
    } else if was_write {
        PageFaultReason::WriteToReadOnly
    } else if was_user {
        PageFaultReason::UserModeKernelAccess
    } else {
        PageFaultReason::ProtectionViolation
    };

    PageFaultInfo {
        faulting_address: cr2,
        reason,
        was_write,
        was_user_mode: was_user,
        instruction_pointer: eip,
    }
}

/// How a copy-on-write fault was resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CowOutcome {
    /// The shared frame was copied into a fresh private frame.
    Copied { new_frame: u32 },
    /// The frame had a single owner; the write bit was restored in place.
    MadeWritable,
}

/// Resolve a write fault on a present read-only user page.
///
/// Shared frame (refcount > 1, or conservative mode): allocate a private
/// frame, copy the 4 KiB, install it writable, drop one reference on the
/// old frame. Sole owner: just set the write bit. The TLB entry is flushed
/// by the mapping update in either case.
pub fn resolve_cow(space: &mut AddressSpace, faulting_address: u32) -> KernelResult<CowOutcome> {
    let va = super::page_align_down(faulting_address);
    let flags = space
        .page_flags(va)
        .ok_or(MemError::NotMapped { addr: va })?;
    if flags.contains(super::PageFlags::WRITABLE) {
        // A write fault on a writable page is not CoW; let the caller kill.
        return Err(MemError::BadUserPointer { addr: va }.into());
    }
    let old_frame = super::page_align_down(
        space
            .translate(va)
            .ok_or(MemError::NotMapped { addr: va })?,
    );

    let shared = FRAME_ALLOCATOR.lock().refcount(old_frame) > 1;
    if !shared {
        space.protect_page(va, true)?;
        return Ok(CowOutcome::MadeWritable);
    }

    let new_frame = FRAME_ALLOCATOR.lock().allocate()?;
    // SAFETY: both frames are live and reachable through the kernel window;
    // the new frame has no other references yet.
    unsafe {
        core::ptr::copy_nonoverlapping(
            super::phys_to_virt(old_frame),
            super::phys_to_virt(new_frame),
            PAGE_SIZE,
        );
    }
    space.map_page(va, new_frame, true, true)?;
    let remaining = FRAME_ALLOCATOR.lock().decref(old_frame);
    if remaining == 0 {
        // Raced down to zero owners; return the frame.
        FRAME_ALLOCATOR.lock().free(old_frame)?;
    }
    Ok(CowOutcome::Copied { new_frame })
}

/// Main page-fault entry. Returns `Ok` when the fault was resolved and the
/// faulting instruction can be restarted; `Err` means the current process
/// must be terminated (user fault) or the kernel must halt (kernel fault).
pub fn handle_page_fault(info: PageFaultInfo) -> KernelResult<()> {
    if !info.was_user_mode {
        // Kernel-mode faults are never recoverable.
        return Err(MemError::NotMapped {
            addr: info.faulting_address,
        }
        .into());
    }

    if info.was_write
        && info.reason == PageFaultReason::WriteToReadOnly
        && info.faulting_address < super::USER_SPACE_END
    {
        let process = crate::process::current_process_mut().ok_or(KernelError::NotInitialized {
            subsystem: "process",
        })?;
        if let Some(space) = process.address_space.as_mut() {
            return resolve_cow(space, info.faulting_address).map(|_| ());
        }
    }

    Err(MemError::BadUserPointer {
        addr: info.faulting_address,
    }
    .into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mm::{PageFlags, FRAME_ALLOCATOR};
    use crate::test_support::arena_init;

    #[test]
    fn error_code_decoding() {
        let info = from_error_code(0b111, 0x4000_0010, 0x0804_8000);
        assert_eq!(info.reason, PageFaultReason::WriteToReadOnly);
        assert!(info.was_write);
        assert!(info.was_user_mode);

        let info = from_error_code(0b100, 0x1000, 0);
        assert_eq!(info.reason, PageFaultReason::NotPresent);

        let info = from_error_code(0b101, 0xC000_0000, 0);
        assert_eq!(info.reason, PageFaultReason::UserModeKernelAccess);
    }

    #[test]
    fn sole_owner_gets_write_bit_back() {
        arena_init();
        let mut space = crate::mm::AddressSpace::new_user().unwrap();
        let frame = FRAME_ALLOCATOR.lock().allocate().unwrap();
        space.map_page(0x2000_0000, frame, false, true).unwrap();

        let outcome = resolve_cow(&mut space, 0x2000_0123).unwrap();
        assert_eq!(outcome, CowOutcome::MadeWritable);
        assert!(space
            .page_flags(0x2000_0000)
            .unwrap()
            .contains(PageFlags::WRITABLE));
        assert_eq!(space.translate(0x2000_0000), Some(frame));

        space.unmap_page(0x2000_0000).unwrap();
        FRAME_ALLOCATOR.lock().free(frame).unwrap();
        space.destroy();
    }

    #[test]
    fn shared_frame_is_copied_with_contents() {
        arena_init();
        let mut parent = crate::mm::AddressSpace::new_user().unwrap();
        let mut child = crate::mm::AddressSpace::new_user().unwrap();
        let frame = FRAME_ALLOCATOR.lock().allocate().unwrap();

        // Fill the shared frame with a pattern.
        // SAFETY: frame is exclusively owned here and window-reachable.
        unsafe {
            core::ptr::write_bytes(crate::mm::phys_to_virt(frame), 0x11, PAGE_SIZE);
        }

        parent.map_page(0x3000_0000, frame, false, true).unwrap();
        child.map_page(0x3000_0000, frame, false, true).unwrap();
        FRAME_ALLOCATOR.lock().incref(frame);

        let outcome = resolve_cow(&mut child, 0x3000_0000).unwrap();
        let CowOutcome::Copied { new_frame } = outcome else {
            panic!("expected a copy, got {outcome:?}");
        };
        assert_ne!(new_frame, frame);

        // The copy carries the original bytes and is now writable.
        let mut byte = [0u8; 1];
        crate::mm::user_validation::copy_from_user(&child, 0x3000_0000, &mut byte).unwrap();
        assert_eq!(byte[0], 0x11);
        assert!(child
            .page_flags(0x3000_0000)
            .unwrap()
            .contains(PageFlags::WRITABLE));

        // The parent still sees the original frame, back to one owner.
        assert_eq!(parent.translate(0x3000_0000), Some(frame));
        assert_eq!(FRAME_ALLOCATOR.lock().refcount(frame), 1);

        child.unmap_page(0x3000_0000).unwrap();
        FRAME_ALLOCATOR.lock().free(new_frame).unwrap();
        parent.unmap_page(0x3000_0000).unwrap();
        FRAME_ALLOCATOR.lock().free(frame).unwrap();
        parent.destroy();
        child.destroy();
    }

    #[test]
    fn write_fault_on_writable_page_is_not_cow() {
        arena_init();
        let mut space = crate::mm::AddressSpace::new_user().unwrap();
        let frame = FRAME_ALLOCATOR.lock().allocate().unwrap();
        space.map_page(0x2100_0000, frame, true, true).unwrap();
        assert!(resolve_cow(&mut space, 0x2100_0000).is_err());
        space.unmap_page(0x2100_0000).unwrap();
        FRAME_ALLOCATOR.lock().free(frame).unwrap();
        space.destroy();
    }

    #[test]
    fn unmapped_fault_is_unrecoverable() {
        arena_init();
        let mut space = crate::mm::AddressSpace::new_user().unwrap();
        assert!(resolve_cow(&mut space, 0x6000_0000).is_err());
        space.destroy();
    }
}
