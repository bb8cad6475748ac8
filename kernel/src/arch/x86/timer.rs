//! Programmable interval timer (PIT channel 0).
//!
//! Drives the scheduler tick. The input clock is 1.193182 MHz; a divisor of
//! 11932 gives the 100 Hz tick the scheduler constants assume.

use x86::io::outb;

const PIT_CHANNEL0: u16 = 0x40;
const PIT_COMMAND: u16 = 0x43;

/// PIT input frequency in Hz.
const PIT_INPUT_HZ: u32 = 1_193_182;

/// Scheduler tick rate.
pub const TICK_HZ: u32 = 100;

/// Program channel 0 as a rate generator at [`TICK_HZ`] and unmask IRQ 0.
pub fn init() {
    let divisor = (PIT_INPUT_HZ / TICK_HZ) as u16;
    // SAFETY: command 0x36 = channel 0, lobyte/hibyte access, mode 3
    // (square wave); the divisor follows in two writes.
    unsafe {
        outb(PIT_COMMAND, 0x36);
        outb(PIT_CHANNEL0, (divisor & 0xFF) as u8);
        outb(PIT_CHANNEL0, (divisor >> 8) as u8);
    }
    super::pic::enable_irq(0);
    crate::println!("[PIT] channel 0 at {} Hz", TICK_HZ);
}
