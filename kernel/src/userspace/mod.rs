//! User-side support: syscall invocation wrappers, the error string table
//! the shell reports codes through, and the embedded demo programs the
//! kernel can spawn when no disk image is present.
//!
//! On bare metal the wrappers issue `int 0x80`; on the host they call the
//! dispatcher directly, which keeps the whole wrapper layer testable.

pub mod programs;

use crate::syscall::Syscall;

/// Raw three-argument syscall.
#[cfg(all(target_arch = "x86", target_os = "none"))]
pub fn syscall3(num: u32, arg1: u32, arg2: u32, arg3: u32) -> i32 {
    let ret: i32;
    // SAFETY: the syscall gate preserves all registers except EAX, which
    // carries the return value.
    unsafe {
        core::arch::asm!(
            "int 0x80",
            inlateout("eax") num => ret,
            in("ebx") arg1,
            in("ecx") arg2,
            in("edx") arg3,
        );
    }
    ret
}

#[cfg(not(all(target_arch = "x86", target_os = "none")))]
pub fn syscall3(num: u32, arg1: u32, arg2: u32, arg3: u32) -> i32 {
    crate::syscall::handle_syscall(num, arg1, arg2, arg3)
}

pub fn syscall0(num: u32) -> i32 {
    syscall3(num, 0, 0, 0)
}

pub fn syscall1(num: u32, arg1: u32) -> i32 {
    syscall3(num, arg1, 0, 0)
}

pub fn syscall2(num: u32, arg1: u32, arg2: u32) -> i32 {
    syscall3(num, arg1, arg2, 0)
}

/// Terminate the calling process.
pub fn exit(status: i32) -> ! {
    syscall1(Syscall::Exit as u32, status as u32);
    // The kernel never returns from EXIT; satisfy the type system.
    loop {
        core::hint::spin_loop();
    }
}

pub fn write_colored(text: &str, color: u8) -> i32 {
    syscall2(
        Syscall::WriteColored as u32,
        text.as_ptr() as usize as u32,
        color as u32,
    )
}

pub fn yield_cpu() -> i32 {
    syscall0(Syscall::Yield as u32)
}

pub fn getpid() -> i32 {
    syscall0(Syscall::GetPid as u32)
}

pub fn sleep(ticks: u32) -> i32 {
    syscall1(Syscall::Sleep as u32, ticks)
}

pub fn getch() -> i32 {
    syscall0(Syscall::Getch as u32)
}

pub fn fork() -> i32 {
    syscall0(Syscall::Fork as u32)
}

pub fn wait(pid: u32) -> i32 {
    syscall1(Syscall::Wait as u32, pid)
}

pub fn exec(path: &str, arg: Option<&str>) -> i32 {
    syscall2(
        Syscall::Exec as u32,
        path.as_ptr() as usize as u32,
        arg.map(|a| a.as_ptr() as usize as u32).unwrap_or(0),
    )
}

/// Human-readable names for the ABI result codes, as the shell prints
/// them.
pub fn error_name(code: i32) -> &'static str {
    match code {
        0 => "SUCCESS",
        -1 => "INVALID_SYSCALL",
        -2 => "INVALID_PARAMETER",
        -3 => "PERMISSION_DENIED",
        -4 => "NO_SPACE",
        -5 => "FILE_EXISTS",
        -6 => "NOT_DIRECTORY",
        -7 => "IS_DIRECTORY",
        -8 => "FILE_NOT_FOUND",
        -9 => "IO_ERROR",
        _ => "UNKNOWN",
    }
}
