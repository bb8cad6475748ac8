//! Console output and keyboard input system calls.

use super::{caller, caller_space, park, SUCCESS};
use crate::drivers::{console, keyboard};
use crate::error::SyscallError;
use crate::mm::user_validation;
use crate::sched;

/// WRITE(line, col, str): append a line to the console. The line/column
/// arguments are accepted but currently ignored.
pub fn sys_write(_line: u32, _col: u32, str_ptr: u32) -> i32 {
    write_with_color(str_ptr, console::color::WHITE_ON_BLUE, true)
}

/// WRITE_COLORED(str, color): append a colored line (auto-newline).
pub fn sys_write_colored(str_ptr: u32, color: u32) -> i32 {
    let color = if color == 0 {
        console::color::WHITE_ON_BLUE
    } else {
        color as u8
    };
    write_with_color(str_ptr, color, true)
}

/// WRITE_PRINTF(str, color): append without an implicit newline.
pub fn sys_write_printf(str_ptr: u32, color: u32) -> i32 {
    let color = if color == 0 {
        console::color::WHITE_ON_BLUE
    } else {
        color as u8
    };
    write_with_color(str_ptr, color, false)
}

fn write_with_color(str_ptr: u32, color: u8, auto_newline: bool) -> i32 {
    if str_ptr == 0 {
        return SyscallError::InvalidParameter.as_i32();
    }
    let (_p, space) = match caller_space() {
        Ok(v) => v,
        Err(e) => return e.as_i32(),
    };
    let text = match user_validation::str_from_user(space, str_ptr) {
        Ok(text) => text,
        Err(_) => return SyscallError::InvalidParameter.as_i32(),
    };
    if auto_newline {
        console::add_message(&text, color);
    } else {
        console::add_printf_output(&text, color);
    }
    SUCCESS
}

/// GETCH: return a buffered character immediately, or block until the
/// keyboard IRQ delivers one.
pub fn sys_getch() -> i32 {
    if let Some(ch) = keyboard::try_getch() {
        return ch as i32;
    }
    // Park on the input-wait queue; the keyboard IRQ wakes exactly one
    // waiter with the character preloaded as the resume value.
    if let Ok(p) = caller() {
        p.pending_syscall_return = 0;
    }
    let action = sched::block_current_for_input();
    park(action)
}

/// TRYGETCH: non-blocking read; 0 when no input is pending.
pub fn sys_trygetch() -> i32 {
    keyboard::try_getch().map(|ch| ch as i32).unwrap_or(0)
}
