//! Shared fixtures for the integration suites.
//!
//! Every test that touches the kernel's global state (frame allocator,
//! scheduler, process table, VFS, keyboard ring) takes the kernel lock
//! first and resets through `reset_kernel`.

#![allow(dead_code)]

use std::sync::{Mutex, MutexGuard};

use ember_kernel::arch::context::Context;
use ember_kernel::fs::{blockdev::RamDisk, fat::FatFileSystem};
use ember_kernel::mm::{self, AddressSpace};
use ember_kernel::process::{self, table, ProcessState};
use ember_kernel::sched;
use ember_kernel::test_support;

static KERNEL_LOCK: Mutex<()> = Mutex::new(());

/// Serialize a test against all other kernel-global tests in this binary.
pub fn lock_kernel() -> MutexGuard<'static, ()> {
    KERNEL_LOCK.lock().unwrap_or_else(|e| e.into_inner())
}

/// Reset every kernel global the suites touch. The caller must hold the
/// kernel lock.
pub fn reset_kernel() {
    test_support::arena_init();
    sched::reset_for_tests();
    // Release the memory of any processes a previous test left behind
    // before dropping the table, so the arena does not leak dry.
    for slot in 0..process::MAX_PROCESSES {
        process::lifecycle::teardown(slot);
    }
    table::reset_for_tests();
    ember_kernel::fs::reset_for_tests();
    ember_kernel::drivers::keyboard::clear_buffer();
}

/// Mount a freshly formatted FAT volume on a RAM disk as the root.
pub fn mount_fresh_fs() {
    let disk = Box::new(RamDisk::new("testdisk", 1024));
    let fs = FatFileSystem::format(disk, 1).expect("format");
    ember_kernel::fs::mount_root(std::sync::Arc::new(fs)).expect("mount");
}

/// A writable scratch address inside every spawned process's stack.
pub const USER_BUF: u32 = mm::USER_STACK_TOP - 256;

/// Build a ready user process with a real address space and a mapped
/// 64 KiB stack (usable as scratch buffers for syscall arguments).
pub fn spawn_user(name: &str, priority: u32) -> (usize, u32) {
    let mut space = AddressSpace::new_user().expect("address space");
    let stack_top = ember_kernel::elf::setup_user_stack(&mut space).expect("stack");

    let (slot, pid) = table::with_table(|t| t.allocate(name, priority)).expect("slot");
    let p = table::process_mut(slot).expect("pcb");
    p.address_space = Some(space);
    // No kernel stack frame on the host; the context just needs a
    // plausible top for the bookkeeping fields.
    p.context = Context::new_user(mm::USER_TEXT_START, stack_top - 16, 0xC010_0000);
    p.state = ProcessState::Ready;
    sched::admit(slot);
    (slot, pid)
}

/// Make `slot` the RUNNING process.
pub fn run_process(slot: usize) {
    sched::force_current(Some(slot));
}

/// Copy a NUL-terminated string into a process's user memory at `va`.
pub fn poke_user_str(slot: usize, va: u32, s: &str) {
    let p = table::process_mut(slot).expect("pcb");
    let space = p.address_space.as_ref().expect("space");
    let mut bytes = s.as_bytes().to_vec();
    bytes.push(0);
    mm::user_validation::copy_to_user(space, va, &bytes).expect("copy_to_user");
}

/// Read back `len` bytes of a process's user memory.
pub fn peek_user(slot: usize, va: u32, len: usize) -> Vec<u8> {
    let p = table::process_mut(slot).expect("pcb");
    let space = p.address_space.as_ref().expect("space");
    let mut buf = vec![0u8; len];
    mm::user_validation::copy_from_user(space, va, &mut buf).expect("copy_from_user");
    buf
}

/// Read a NUL-terminated string out of a process's user memory.
pub fn peek_user_str(slot: usize, va: u32, max: usize) -> String {
    let bytes = peek_user(slot, va, max);
    let len = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    String::from_utf8_lossy(&bytes[..len]).into_owned()
}
