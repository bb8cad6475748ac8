//! Embedded demo programs.
//!
//! Small ring-3 functions spawned at boot when no disk image provides an
//! init binary. Each exercises a slice of the syscall surface: the three
//! counters demonstrate priority scheduling, the fork demo shows CoW
//! isolation, and the echo loop drives blocking keyboard input.

use super::{exit, fork, getch, getpid, sleep, wait, write_colored, yield_cpu};
use crate::drivers::console::color;

fn count_loop(label: &str, color: u8, iterations: u32) -> ! {
    let mut n = 0u32;
    while n < iterations {
        if n % 50 == 0 {
            write_colored(label, color);
        }
        n = n.wrapping_add(1);
        yield_cpu();
    }
    exit(0)
}

/// High-priority counter.
pub extern "C" fn counter_high() {
    count_loop("H\0", color::GREEN_ON_BLUE, 500);
}

/// Medium-priority counter.
pub extern "C" fn counter_mid() {
    count_loop("M\0", color::YELLOW_ON_BLUE, 500);
}

/// Low-priority counter.
pub extern "C" fn counter_low() {
    count_loop("L\0", color::RED_ON_BLUE, 500);
}

/// Fork once; the child writes and exits, the parent waits and reports
/// the status.
pub extern "C" fn fork_demo() {
    let pid = fork();
    if pid == 0 {
        write_colored("child: hello from fork\0", color::CYAN_ON_BLUE);
        exit(7);
    }
    let status = wait(pid as u32);
    if status == 7 {
        write_colored("parent: child exited cleanly\0", color::GREEN_ON_BLUE);
    } else {
        write_colored("parent: unexpected child status\0", color::RED_ON_BLUE);
    }
    exit(0);
}

/// Sleep three times, proving the sleep queue ordering survives mixing
/// with other runnable processes.
pub extern "C" fn sleeper_demo() {
    let pid = getpid();
    let mut round = 0;
    while round < 3 {
        sleep(10 + pid as u32);
        write_colored("z\0", color::MAGENTA_ON_BLUE);
        round += 1;
    }
    exit(0);
}

/// Echo keyboard input until Escape.
pub extern "C" fn echo_demo() {
    loop {
        let ch = getch();
        if ch == 0x1B {
            break;
        }
        let line = [ch as u8, 0];
        write_colored(core::str::from_utf8(&line).unwrap_or("?\0"), color::WHITE_ON_BLUE);
    }
    exit(0);
}
