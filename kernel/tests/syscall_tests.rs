//! Syscall dispatch: argument validation, ABI codes, blocking input, and
//! the heap calls.

mod common;

use common::{
    lock_kernel, mount_fresh_fs, peek_user, peek_user_str, poke_user_str, reset_kernel,
    run_process, spawn_user, USER_BUF,
};
use ember_kernel::fs::OpenFlags;
use ember_kernel::mm;
use ember_kernel::process::{table, ProcessState};
use ember_kernel::sched;
use ember_kernel::syscall::{handle_syscall, Syscall};

fn call(call: Syscall, a1: u32, a2: u32, a3: u32) -> i32 {
    handle_syscall(call as u32, a1, a2, a3)
}

/// Untrusted pointers produce error codes, never kernel faults.
#[test]
fn bad_pointers_are_rejected() {
    let _g = lock_kernel();
    reset_kernel();
    mount_fresh_fs();

    let (slot, _) = spawn_user("badptr", 5);
    run_process(slot);

    // Null and unmapped string pointers.
    assert_eq!(call(Syscall::Write, 0, 0, 0), -2);
    assert_eq!(call(Syscall::WriteColored, 0x7000_0000, 0x1F, 0), -2);
    assert_eq!(call(Syscall::Open, 0xB000_0000, 0, 0), -2);
    // Kernel-range pointer.
    assert_eq!(call(Syscall::Chdir, 0xC000_1000, 0, 0), -2);
    // Output buffer in unmapped space.
    assert_eq!(call(Syscall::GetCwd, 0x7000_0000, 64, 0), -2);
    assert_eq!(call(Syscall::GetSpawnArg, 0, 16, 0), -2);
}

/// GET_PID and PS both report the caller; unknown numbers are
/// INVALID_SYSCALL.
#[test]
fn identity_calls() {
    let _g = lock_kernel();
    reset_kernel();

    let (slot, pid) = spawn_user("ident", 5);
    run_process(slot);
    assert_eq!(call(Syscall::GetPid, 0, 0, 0), pid as i32);
    assert_eq!(call(Syscall::Ps, 0, 0, 0), pid as i32);
    assert_eq!(handle_syscall(777, 0, 0, 0), -1);
}

/// CHDIR validates existence and kind; GETCWD reports the stored path.
#[test]
fn working_directory_calls() {
    let _g = lock_kernel();
    reset_kernel();
    mount_fresh_fs();
    ember_kernel::fs::mkdir("/home").unwrap();
    ember_kernel::fs::open(
        "/notdir",
        OpenFlags::from_raw(OpenFlags::RAW_READ_WRITE | OpenFlags::RAW_CREATE),
    )
    .unwrap();

    let (slot, _) = spawn_user("cwd", 5);
    run_process(slot);

    poke_user_str(slot, USER_BUF, "/home");
    assert_eq!(call(Syscall::Chdir, USER_BUF, 0, 0), 0);
    assert_eq!(call(Syscall::GetCwd, USER_BUF + 64, 32, 0), 0);
    assert_eq!(peek_user_str(slot, USER_BUF + 64, 32), "/home");

    // Relative paths are refused for CHDIR.
    poke_user_str(slot, USER_BUF, "home");
    assert_eq!(call(Syscall::Chdir, USER_BUF, 0, 0), -2);

    // Missing target and non-directories.
    poke_user_str(slot, USER_BUF, "/absent");
    assert_eq!(call(Syscall::Chdir, USER_BUF, 0, 0), -8);
    poke_user_str(slot, USER_BUF, "/notdir");
    assert_eq!(call(Syscall::Chdir, USER_BUF, 0, 0), -6);
}

/// File calls respect access modes and positions; descriptors are
/// per-process.
#[test]
fn file_descriptor_calls() {
    let _g = lock_kernel();
    reset_kernel();
    mount_fresh_fs();

    let (slot, _) = spawn_user("files", 5);
    run_process(slot);

    poke_user_str(slot, USER_BUF, "/log.txt");
    let fd = call(
        Syscall::Open,
        USER_BUF,
        OpenFlags::RAW_READ_WRITE | OpenFlags::RAW_CREATE,
        0,
    );
    assert!(fd >= 0);

    poke_user_str(slot, USER_BUF + 64, "stream payload");
    assert_eq!(call(Syscall::WriteFile, fd as u32, USER_BUF + 64, 14), 14);

    // The stream position advanced; reading continues from EOF until the
    // position is implicitly rewound by reopening.
    assert_eq!(call(Syscall::ReadFile, fd as u32, USER_BUF + 128, 14), 0);

    assert_eq!(call(Syscall::Close, fd as u32, 0, 0), 0);
    assert_eq!(call(Syscall::Close, fd as u32, 0, 0), -2);
    assert_eq!(call(Syscall::ReadFile, fd as u32, USER_BUF, 4), -2);

    // Read-only descriptors refuse writes and vice versa.
    poke_user_str(slot, USER_BUF, "/log.txt");
    let ro = call(Syscall::Open, USER_BUF, 0, 0);
    assert!(ro >= 0);
    assert_eq!(call(Syscall::ReadFile, ro as u32, USER_BUF + 128, 14), 14);
    assert_eq!(peek_user(slot, USER_BUF + 128, 14), b"stream payload");
    assert_eq!(call(Syscall::WriteFile, ro as u32, USER_BUF + 64, 4), -3);

    let wo = call(Syscall::Open, USER_BUF, OpenFlags::RAW_WRITE_ONLY, 0);
    assert!(wo >= 0);
    assert_eq!(call(Syscall::ReadFile, wo as u32, USER_BUF + 128, 4), -3);
}

/// MKDIR/RMDIR through the ABI carry the fixed codes.
#[test]
fn directory_calls_map_codes() {
    let _g = lock_kernel();
    reset_kernel();
    mount_fresh_fs();

    let (slot, _) = spawn_user("dirs", 5);
    run_process(slot);

    poke_user_str(slot, USER_BUF, "/d");
    assert_eq!(call(Syscall::Mkdir, USER_BUF, 0, 0), 0);
    assert_eq!(call(Syscall::Mkdir, USER_BUF, 0, 0), -5);
    assert_eq!(call(Syscall::Rmdir, USER_BUF, 0, 0), 0);
    assert_eq!(call(Syscall::Rmdir, USER_BUF, 0, 0), -8);

    // READDIR fills the caller's entry buffer.
    poke_user_str(slot, USER_BUF, "/");
    let entry_buf = USER_BUF + 512;
    assert_eq!(call(Syscall::ReadDir, USER_BUF, 0, entry_buf), -8);
    assert_eq!(call(Syscall::Mkdir, {
        poke_user_str(slot, USER_BUF + 32, "/sub");
        USER_BUF + 32
    }, 0, 0), 0);
    poke_user_str(slot, USER_BUF, "/");
    assert_eq!(call(Syscall::ReadDir, USER_BUF, 0, entry_buf), 0);
    let name = peek_user_str(slot, entry_buf, 32);
    assert_eq!(name, "SUB");
}

/// GETCH parks the caller until the keyboard delivers; TRYGETCH drains
/// the ring without blocking (scenario: blocked GETCH resumed with 'K').
#[test]
fn getch_blocks_until_input() {
    let _g = lock_kernel();
    reset_kernel();

    let (reader, _) = spawn_user("reader", 5);
    let (other, _) = spawn_user("other", 5);

    run_process(reader);
    assert_eq!(call(Syscall::TryGetch, 0, 0, 0), 0);

    // No character pending: the caller parks on the input queue.
    call(Syscall::Getch, 0, 0, 0);
    assert_eq!(
        table::process_mut(reader).unwrap().state,
        ProcessState::Blocked
    );
    assert_eq!(sched::snapshot().input_waiting, 1);

    // Other ready processes keep running while the reader is blocked.
    sched::dispatch(sched::tick());
    assert_eq!(sched::current_slot(), Some(other));

    // The keystroke wakes the reader with ASCII 75 as its return value.
    ember_kernel::drivers::keyboard::deliver_char(b'K');
    let p = table::process_mut(reader).unwrap();
    assert_eq!(p.state, ProcessState::Ready);
    assert_eq!(p.pending_syscall_return, 75);

    // A character with no readers waiting surfaces through TRYGETCH.
    ember_kernel::drivers::keyboard::deliver_char(b'q');
    run_process(reader);
    assert_eq!(call(Syscall::TryGetch, 0, 0, 0), b'q' as i32);
    assert_eq!(call(Syscall::TryGetch, 0, 0, 0), 0);
}

/// SBRK grows and shrinks the heap with page-granular mappings; BRK sets
/// it absolutely; both reject breaks outside the heap range.
#[test]
fn heap_calls_manage_the_break() {
    let _g = lock_kernel();
    reset_kernel();

    let (slot, _) = spawn_user("heap", 5);
    run_process(slot);

    let heap_start = table::process_mut(slot).unwrap().heap_start;

    // Grow by 3 pages; the old break comes back.
    let delta = 3 * mm::PAGE_SIZE as u32;
    assert_eq!(call(Syscall::Sbrk, delta, 0, 0), heap_start as i32);

    // The new pages are writable user memory.
    {
        let p = table::process_mut(slot).unwrap();
        assert_eq!(p.heap_end, heap_start + delta);
        let space = p.address_space.as_ref().unwrap();
        assert!(space
            .page_flags(heap_start)
            .unwrap()
            .contains(mm::PageFlags::WRITABLE));
        mm::user_validation::copy_to_user(space, heap_start, b"heap bytes").unwrap();
    }
    assert_eq!(peek_user(slot, heap_start, 10), b"heap bytes");

    // SBRK(0) reports the current break without moving it.
    assert_eq!(
        call(Syscall::Sbrk, 0, 0, 0),
        (heap_start + delta) as i32
    );

    // Shrink back to one page via BRK; vacated pages are unmapped.
    assert_eq!(
        call(Syscall::Brk, heap_start + mm::PAGE_SIZE as u32, 0, 0),
        0
    );
    let p = table::process_mut(slot).unwrap();
    let space = p.address_space.as_ref().unwrap();
    assert!(space.translate(heap_start).is_some());
    assert_eq!(space.translate(heap_start + mm::PAGE_SIZE as u32), None);

    // Below heap_start or colliding with the stack region: invalid.
    assert_eq!(call(Syscall::Brk, heap_start - 4096, 0, 0), -2);
    assert_eq!(call(Syscall::Brk, mm::USER_STACK_TOP, 0, 0), -2);
}

/// A heap growth that runs out of frames partway unwinds completely: no
/// mapping survives above the break, the partially-claimed frames return
/// to the allocator, and a later retry neither leaks nor overwrites.
#[test]
fn failed_heap_growth_unwinds() {
    let _g = lock_kernel();
    reset_kernel();

    let (slot, _) = spawn_user("oom", 5);
    run_process(slot);
    let heap_start = table::process_mut(slot).unwrap().heap_start;
    let delta = 3 * mm::PAGE_SIZE as u32;

    // Leave exactly three free frames: the first heap page costs a data
    // frame plus the new page-table frame, the second a data frame, and
    // the third request fails.
    let mut hoard = Vec::new();
    while ember_kernel::test_support::free_frame_count() > 3 {
        hoard.push(ember_kernel::mm::FRAME_ALLOCATOR.lock().allocate().unwrap());
    }
    assert_eq!(call(Syscall::Sbrk, delta, 0, 0), -4);

    // The break did not move and nothing is mapped above it.
    {
        let p = table::process_mut(slot).unwrap();
        assert_eq!(p.heap_end, heap_start);
        let space = p.address_space.as_ref().unwrap();
        assert_eq!(space.translate(heap_start), None);
        assert_eq!(space.translate(heap_start + mm::PAGE_SIZE as u32), None);
    }
    // Both data frames came back; only the page-table frame stays with
    // the address space (reclaimed when the space is destroyed).
    assert_eq!(ember_kernel::test_support::free_frame_count(), 2);

    // With frames available again the same growth succeeds, consuming
    // exactly one frame per page, and a shrink returns them all.
    for frame in hoard {
        ember_kernel::mm::FRAME_ALLOCATOR.lock().free(frame).unwrap();
    }
    let before_retry = ember_kernel::test_support::free_frame_count();
    assert_eq!(call(Syscall::Sbrk, delta, 0, 0), heap_start as i32);
    assert_eq!(
        ember_kernel::test_support::free_frame_count(),
        before_retry - 3
    );
    assert_eq!(call(Syscall::Brk, heap_start, 0, 0), 0);
    assert_eq!(ember_kernel::test_support::free_frame_count(), before_retry);
}

/// Console writes copy the string out of user space and render it into
/// the scrollback.
#[test]
fn console_write_calls() {
    let _g = lock_kernel();
    reset_kernel();

    let (slot, _) = spawn_user("writer", 5);
    run_process(slot);

    poke_user_str(slot, USER_BUF, "hello console");
    assert_eq!(call(Syscall::WriteColored, USER_BUF, 0x1A, 0), 0);
    let lines = ember_kernel::drivers::console::visible_lines();
    assert!(lines.iter().any(|l| l == "hello console"));

    poke_user_str(slot, USER_BUF, "a");
    assert_eq!(call(Syscall::WritePrintf, USER_BUF, 0, 0), 0);
    poke_user_str(slot, USER_BUF, "b");
    assert_eq!(call(Syscall::WritePrintf, USER_BUF, 0, 0), 0);
    let lines = ember_kernel::drivers::console::visible_lines();
    assert!(lines.iter().any(|l| l == "ab"));
}

/// YIELD hands the CPU to the next ready process at the same level.
#[test]
fn yield_requeues_the_caller() {
    let _g = lock_kernel();
    reset_kernel();

    let (a, _) = spawn_user("ya", 5);
    let (b, _) = spawn_user("yb", 5);

    sched::dispatch(sched::tick());
    assert_eq!(sched::current_slot(), Some(a));

    call(Syscall::Yield, 0, 0, 0);
    assert_eq!(sched::current_slot(), Some(b));
    assert!(sched::is_queued(a));
    assert_eq!(table::process_mut(a).unwrap().state, ProcessState::Ready);
}
