//! EmberOS kernel library.
//!
//! A small self-hosted 32-bit x86 kernel: priority-scheduled preemptive
//! processes with copy-on-write fork, `int 0x80` syscalls with a parked
//! kernel-stack blocking model, ELF32 loading, and a FAT-style
//! cluster-chain filesystem behind a compact VFS.
//!
//! The crate builds for two targets. On `i686-unknown-none` it is the real
//! kernel. On the host every hardware touchpoint compiles to a stub or a
//! simulated equivalent, and the whole logic core runs under the standard
//! test harness.

#![no_std]

extern crate alloc;

// Host target: pull in std and delegate to the system allocator so test
// code using Vec/String runs normally.
#[cfg(not(target_os = "none"))]
extern crate std;

#[cfg(all(target_arch = "x86", target_os = "none"))]
use linked_list_allocator::LockedHeap;

#[cfg(all(target_arch = "x86", target_os = "none"))]
#[global_allocator]
pub static ALLOCATOR: LockedHeap = LockedHeap::empty();

#[cfg(not(target_os = "none"))]
#[global_allocator]
static SYSTEM_ALLOCATOR: std::alloc::System = std::alloc::System;

#[macro_use]
pub mod print;

pub mod arch;
pub mod drivers;
pub mod elf;
pub mod error;
pub mod fs;
pub mod irq;
pub mod log_service;
pub mod mm;
pub mod process;
pub mod sched;
pub mod serial;
pub mod sync;
pub mod syscall;
pub mod userspace;

#[cfg(not(target_os = "none"))]
pub mod test_support;

// Re-exports for the boot path and tests.
pub use error::{KernelError, KernelResult};
pub use mm::{MemoryRegion, MemoryRegionKind, FRAME_SIZE, PAGE_SIZE};
pub use process::{Process, ProcessState};

/// Panic in kernel context: report and halt. The host test harness keeps
/// std's unwinding panic instead.
#[cfg(all(target_os = "none", not(test)))]
#[panic_handler]
fn panic(info: &core::panic::PanicInfo) -> ! {
    serial_println!("[PANIC] {}", info);
    println!("[PANIC] {}", info);
    irq::halt_system("kernel panic")
}
