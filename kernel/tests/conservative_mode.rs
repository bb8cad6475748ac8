//! Refcount-table overflow forces copy-on-write to copy.
//!
//! Lives in its own binary: the conservative latch is sticky on the
//! global allocator and must not leak into other suites.

mod common;

use common::{lock_kernel, reset_kernel};
use ember_kernel::mm::{
    self,
    page_fault::{resolve_cow, CowOutcome},
    AddressSpace, FRAME_ALLOCATOR,
};

#[test]
fn overflow_makes_cow_copy_even_sole_owners() {
    let _g = lock_kernel();
    reset_kernel();

    // A read-only page owned by exactly one address space: without
    // overflow this resolves by flipping the write bit in place.
    let mut space = AddressSpace::new_user().unwrap();
    let frame = FRAME_ALLOCATOR.lock().allocate().unwrap();
    // SAFETY: fresh frame inside the test arena.
    unsafe {
        core::ptr::write_bytes(mm::phys_to_virt(frame), 0x42, mm::PAGE_SIZE);
    }
    space.map_page(0x2000_0000, frame, false, true).unwrap();

    // Flood the table with synthetic shared frames until it overflows.
    {
        let mut allocator = FRAME_ALLOCATOR.lock();
        let mut fake = 0x4000_0000u32;
        while !allocator.is_conservative() {
            allocator.incref(fake);
            fake += mm::PAGE_SIZE as u32;
        }
    }

    // The frame is untracked, so conservative mode reports it shared and
    // the resolver must copy rather than alias.
    let outcome = resolve_cow(&mut space, 0x2000_0000).unwrap();
    let CowOutcome::Copied { new_frame } = outcome else {
        panic!("conservative mode must force a copy, got {outcome:?}");
    };
    assert_ne!(new_frame, frame);

    // The copy carries the original contents and is writable.
    let mut byte = [0u8; 1];
    mm::user_validation::copy_from_user(&space, 0x2000_0000, &mut byte).unwrap();
    assert_eq!(byte[0], 0x42);
    assert!(space
        .page_flags(0x2000_0000)
        .unwrap()
        .contains(mm::PageFlags::WRITABLE));

    // Teardown leaks conservatively: decref of the untracked original
    // reports a survivor, so it is never freed out from under a
    // potential sharer.
    assert_eq!(FRAME_ALLOCATOR.lock().decref(frame), 1);
}
