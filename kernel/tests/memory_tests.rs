//! Frame allocator and address-space invariants.

mod common;

use common::{lock_kernel, reset_kernel};
use ember_kernel::mm::{
    self, page_fault::{resolve_cow, CowOutcome}, AddressSpace, PageFlags, FRAME_ALLOCATOR,
};

/// Shared frames carry a reference per mapping; sole owners stay
/// untracked.
#[test]
fn refcount_tracks_mapping_count() {
    let _g = lock_kernel();
    reset_kernel();

    let frame = FRAME_ALLOCATOR.lock().allocate().unwrap();
    let mut spaces = Vec::new();
    for i in 0..3 {
        let mut space = AddressSpace::new_user().unwrap();
        space.map_page(0x1000_0000 + i * 0x1000, frame, false, true).unwrap();
        if i > 0 {
            FRAME_ALLOCATOR.lock().incref(frame);
        }
        spaces.push(space);
    }
    assert_eq!(FRAME_ALLOCATOR.lock().refcount(frame), 3);

    // Unwind one mapping at a time; the count follows.
    for (i, space) in spaces.iter_mut().enumerate() {
        space.unmap_page(0x1000_0000 + i as u32 * 0x1000).unwrap();
        let remaining = FRAME_ALLOCATOR.lock().decref(frame);
        if i < 2 {
            assert!(remaining >= 1);
        } else {
            assert_eq!(remaining, 0);
            FRAME_ALLOCATOR.lock().free(frame).unwrap();
        }
    }
    for mut space in spaces {
        space.destroy();
    }
}

/// Every user mapping is either writable with one owner or read-only
/// with shared owners: the fork sharing discipline.
#[test]
fn shared_pages_are_never_writable() {
    let _g = lock_kernel();
    reset_kernel();

    let mut parent = AddressSpace::new_user().unwrap();
    let mut child = AddressSpace::new_user().unwrap();

    let private = FRAME_ALLOCATOR.lock().allocate().unwrap();
    let shared = FRAME_ALLOCATOR.lock().allocate().unwrap();
    parent.map_page(0x0804_8000, private, true, true).unwrap();
    parent.map_page(0x0804_9000, shared, false, true).unwrap();
    child.map_page(0x0804_9000, shared, false, true).unwrap();
    FRAME_ALLOCATOR.lock().incref(shared);

    let mut violations = 0;
    for space in [&mut parent, &mut child] {
        space.for_each_user_entry(|_va, entry| {
            let frame = mm::page_align_down(entry.addr().unwrap());
            let refs = FRAME_ALLOCATOR.lock().refcount(frame);
            let writable = entry.flags().contains(PageFlags::WRITABLE);
            if writable && refs != 1 {
                violations += 1;
            }
        });
    }
    assert_eq!(violations, 0);

    child.unmap_page(0x0804_9000).unwrap();
    assert_eq!(FRAME_ALLOCATOR.lock().decref(shared), 1);
    parent.unmap_page(0x0804_9000).unwrap();
    assert_eq!(FRAME_ALLOCATOR.lock().decref(shared), 0);
    FRAME_ALLOCATOR.lock().free(shared).unwrap();
    parent.unmap_page(0x0804_8000).unwrap();
    FRAME_ALLOCATOR.lock().free(private).unwrap();
    parent.destroy();
    child.destroy();
}

/// A CoW break copies bytes, restores write access, and releases one
/// reference on the shared frame.
#[test]
fn cow_break_isolates_the_writer() {
    let _g = lock_kernel();
    reset_kernel();

    let mut a = AddressSpace::new_user().unwrap();
    let mut b = AddressSpace::new_user().unwrap();
    let frame = FRAME_ALLOCATOR.lock().allocate().unwrap();
    // SAFETY: freshly allocated frame inside the test arena.
    unsafe {
        core::ptr::write_bytes(mm::phys_to_virt(frame), 0x5A, mm::PAGE_SIZE);
    }
    a.map_page(0x2000_0000, frame, false, true).unwrap();
    b.map_page(0x2000_0000, frame, false, true).unwrap();
    FRAME_ALLOCATOR.lock().incref(frame);

    let outcome = resolve_cow(&mut b, 0x2000_0040).unwrap();
    let CowOutcome::Copied { new_frame } = outcome else {
        panic!("shared frame must be copied, got {outcome:?}");
    };

    // Writer got the bytes and write access; reader kept the original.
    mm::user_validation::copy_to_user(&b, 0x2000_0000, &[0xAA]).unwrap();
    let mut readback = [0u8; 2];
    mm::user_validation::copy_from_user(&b, 0x2000_0000, &mut readback).unwrap();
    assert_eq!(readback, [0xAA, 0x5A]);
    let mut original = [0u8; 1];
    mm::user_validation::copy_from_user(&a, 0x2000_0000, &mut original).unwrap();
    assert_eq!(original, [0x5A]);

    // The second write on the now-sole owner flips the bit in place.
    let outcome = resolve_cow(&mut a, 0x2000_0000).unwrap();
    assert_eq!(outcome, CowOutcome::MadeWritable);
    assert_eq!(a.translate(0x2000_0000), Some(frame));

    a.unmap_page(0x2000_0000).unwrap();
    FRAME_ALLOCATOR.lock().free(frame).unwrap();
    b.unmap_page(0x2000_0000).unwrap();
    FRAME_ALLOCATOR.lock().free(new_frame).unwrap();
    a.destroy();
    b.destroy();
}

/// The allocator reports exhaustion instead of handing out junk, and
/// recovers once frames return.
#[test]
fn exhaustion_and_recovery() {
    let _g = lock_kernel();
    reset_kernel();

    let mut taken = Vec::new();
    loop {
        match FRAME_ALLOCATOR.lock().allocate() {
            Ok(frame) => taken.push(frame),
            Err(e) => {
                assert_eq!(e, ember_kernel::error::MemError::OutOfFrames);
                break;
            }
        }
    }
    assert!(!taken.is_empty());

    // An address space cannot be built without frames.
    assert!(AddressSpace::new_user().is_err());

    for frame in taken.drain(..) {
        FRAME_ALLOCATOR.lock().free(frame).unwrap();
    }
    let mut space = AddressSpace::new_user().unwrap();
    space.destroy();
}
