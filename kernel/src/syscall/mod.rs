//! System call dispatcher.
//!
//! Entry is `int 0x80` with the call number in EAX and up to three
//! arguments in EBX/ECX/EDX. The assembly stub passes the kernel frame ESP
//! as a fifth argument; it is recorded in the caller's PCB before dispatch
//! so a handler that blocks can park the stack and be resumed later with
//! `pending_syscall_return` in EAX.
//!
//! Handlers never panic on caller errors: every failure is translated into
//! one of the fixed negative ABI codes.

mod console;
mod fs;
mod process;

use crate::error::SyscallError;
use crate::sched::SwitchAction;

/// System call numbers. 0-7 are the historical assignments; the rest
/// extend the table without renumbering.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Syscall {
    Exit = 0,
    Write = 1,
    Getch = 2,
    Yield = 3,
    GetPid = 4,
    Sleep = 5,
    WriteColored = 6,
    WritePrintf = 7,
    TryGetch = 8,
    Open = 9,
    Close = 10,
    ReadFile = 11,
    WriteFile = 12,
    ReadDir = 13,
    Mkdir = 14,
    Rmdir = 15,
    Chdir = 16,
    GetCwd = 17,
    GetCwdPtr = 18,
    Exec = 19,
    GetSpawnArg = 20,
    Wait = 21,
    WaitId = 22,
    Ps = 23,
    Kill = 24,
    Fork = 25,
    Sbrk = 26,
    Brk = 27,
}

impl TryFrom<u32> for Syscall {
    type Error = ();

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        Ok(match value {
            0 => Syscall::Exit,
            1 => Syscall::Write,
            2 => Syscall::Getch,
            3 => Syscall::Yield,
            4 => Syscall::GetPid,
            5 => Syscall::Sleep,
            6 => Syscall::WriteColored,
            7 => Syscall::WritePrintf,
            8 => Syscall::TryGetch,
            9 => Syscall::Open,
            10 => Syscall::Close,
            11 => Syscall::ReadFile,
            12 => Syscall::WriteFile,
            13 => Syscall::ReadDir,
            14 => Syscall::Mkdir,
            15 => Syscall::Rmdir,
            16 => Syscall::Chdir,
            17 => Syscall::GetCwd,
            18 => Syscall::GetCwdPtr,
            19 => Syscall::Exec,
            20 => Syscall::GetSpawnArg,
            21 => Syscall::Wait,
            22 => Syscall::WaitId,
            23 => Syscall::Ps,
            24 => Syscall::Kill,
            25 => Syscall::Fork,
            26 => Syscall::Sbrk,
            27 => Syscall::Brk,
            _ => return Err(()),
        })
    }
}

/// C-level entry called from the assembly stub.
///
/// The caller reference is captured before dispatch: a handler that blocks
/// switches the current process away, and both the parked ESP and the
/// eventual return value belong to the original caller.
#[no_mangle]
pub extern "C" fn syscall_handler(
    syscall_num: u32,
    arg1: u32,
    arg2: u32,
    arg3: u32,
    kernel_frame_esp: u32,
) -> i32 {
    // Capture the original caller before dispatch: a blocking handler
    // switches `current` away, and both the parked ESP and the eventual
    // return value belong to this PCB, not whatever runs next.
    let caller = crate::process::current_process_mut();
    if let Some(p) = crate::process::current_process_mut() {
        p.saved_syscall_esp = kernel_frame_esp;
    }

    let ret = handle_syscall(syscall_num, arg1, arg2, arg3);

    if let Some(p) = caller {
        p.pending_syscall_return = ret as u32;
        // A synchronously-completed call returns through the stub; only a
        // blocked caller keeps its parked stack anchor.
        if p.state == crate::process::ProcessState::Running {
            p.saved_syscall_esp = 0;
        }
    }
    ret
}

/// Dispatch one system call. Public for the host test harness, which
/// drives the kernel through this exact boundary.
pub fn handle_syscall(syscall_num: u32, arg1: u32, arg2: u32, arg3: u32) -> i32 {
    let Ok(call) = Syscall::try_from(syscall_num) else {
        return SyscallError::InvalidSyscall.as_i32();
    };

    match call {
        Syscall::Exit => process::sys_exit(arg1 as i32),
        Syscall::Write => console::sys_write(arg1, arg2, arg3),
        Syscall::Getch => console::sys_getch(),
        Syscall::Yield => process::sys_yield(),
        Syscall::GetPid => process::sys_getpid(),
        Syscall::Sleep => process::sys_sleep(arg1),
        Syscall::WriteColored => console::sys_write_colored(arg1, arg2),
        Syscall::WritePrintf => console::sys_write_printf(arg1, arg2),
        Syscall::TryGetch => console::sys_trygetch(),
        Syscall::Open => fs::sys_open(arg1, arg2),
        Syscall::Close => fs::sys_close(arg1 as i32),
        Syscall::ReadFile => fs::sys_read_file(arg1 as i32, arg2, arg3),
        Syscall::WriteFile => fs::sys_write_file(arg1 as i32, arg2, arg3),
        Syscall::ReadDir => fs::sys_readdir(arg1, arg2, arg3),
        Syscall::Mkdir => fs::sys_mkdir(arg1),
        Syscall::Rmdir => fs::sys_rmdir(arg1),
        Syscall::Chdir => fs::sys_chdir(arg1),
        Syscall::GetCwd => fs::sys_getcwd(arg1, arg2),
        Syscall::GetCwdPtr => fs::sys_getcwd_ptr(),
        Syscall::Exec => process::sys_exec(arg1, arg2),
        Syscall::GetSpawnArg => process::sys_getspawnarg(arg1, arg2),
        Syscall::Wait => process::sys_wait(arg1),
        Syscall::WaitId => process::sys_waitid(arg1, arg2),
        Syscall::Ps => process::sys_ps(),
        Syscall::Kill => process::sys_kill(arg1),
        Syscall::Fork => process::sys_fork(),
        Syscall::Sbrk => process::sys_sbrk(arg1 as i32),
        Syscall::Brk => process::sys_brk(arg1),
    }
}

/// Success return value.
pub const SUCCESS: i32 = 0;

/// Apply a blocking handler's switch decision.
///
/// On bare metal this hands the CPU over and parks: the caller's stack is
/// left intact behind `saved_syscall_esp` and execution only returns to
/// user space through the resume primitive. On the host the decision is
/// recorded and the dispatcher returns so tests can observe the state.
pub(crate) fn park(action: SwitchAction) -> i32 {
    crate::sched::dispatch(action);

    #[cfg(all(target_arch = "x86", target_os = "none"))]
    {
        // Nothing runnable: idle until an interrupt schedules someone.
        // The parked caller is resumed via its saved stack, never here.
        crate::arch::idle_forever();
    }

    #[cfg(not(all(target_arch = "x86", target_os = "none")))]
    {
        SUCCESS
    }
}

/// The caller's PCB, or the IO_ERROR code when no process is running.
pub(crate) fn caller() -> Result<&'static mut crate::process::Process, SyscallError> {
    crate::process::current_process_mut().ok_or(SyscallError::IoError)
}

/// Borrow the caller's address space for argument marshalling.
pub(crate) fn caller_space(
) -> Result<(&'static mut crate::process::Process, &'static crate::mm::AddressSpace), SyscallError>
{
    let p = caller()?;
    let space = p.address_space.as_ref().ok_or(SyscallError::IoError)?;
    // SAFETY: the PCB outlives the syscall; see process::table for the
    // single-CPU aliasing model.
    let space = unsafe { &*(space as *const crate::mm::AddressSpace) };
    Ok((caller()?, space))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_syscall_number_is_rejected() {
        assert_eq!(handle_syscall(9999, 0, 0, 0), -1);
        assert!(Syscall::try_from(28).is_err());
        assert_eq!(Syscall::try_from(0), Ok(Syscall::Exit));
        assert_eq!(Syscall::try_from(25), Ok(Syscall::Fork));
    }
}
