//! Interrupt and exception core.
//!
//! Hardware IRQs (vectors 32-47) route through a 16-entry handler table;
//! CPU exceptions dispatch per a fixed policy: recoverable software
//! interrupts skip the two-byte `int` instruction, unrecoverable faults in
//! user mode terminate the process, and kernel-mode violations halt the
//! machine with a named reason. Handlers run with interrupts disabled and
//! never nest.

use core::sync::atomic::{AtomicU32, Ordering};

use spin::Mutex;

use crate::arch::context::TrapFrame;
use crate::mm::page_fault;

/// IRQ lines on the legacy PIC pair.
pub const IRQ_LINES: usize = 16;

/// First CPU vector the PICs deliver to.
pub const IRQ_BASE_VECTOR: u32 = 32;

/// The timer line.
pub const IRQ_TIMER: u8 = 0;
/// The keyboard line.
pub const IRQ_KEYBOARD: u8 = 1;

/// Handler signature for hardware interrupts.
pub type IrqHandler = fn(&mut TrapFrame);

static HANDLERS: Mutex<[Option<IrqHandler>; IRQ_LINES]> = Mutex::new([None; IRQ_LINES]);

static IRQ_COUNTS: [AtomicU32; IRQ_LINES] = [const { AtomicU32::new(0) }; IRQ_LINES];

/// Register a handler for one IRQ line.
pub fn register_handler(irq: u8, handler: IrqHandler) -> bool {
    if irq as usize >= IRQ_LINES {
        return false;
    }
    HANDLERS.lock()[irq as usize] = Some(handler);
    true
}

pub fn unregister_handler(irq: u8) -> bool {
    if irq as usize >= IRQ_LINES {
        return false;
    }
    HANDLERS.lock()[irq as usize] = None;
    true
}

/// Times an IRQ line has fired since boot.
pub fn irq_count(irq: u8) -> u32 {
    IRQ_COUNTS
        .get(irq as usize)
        .map(|c| c.load(Ordering::Relaxed))
        .unwrap_or(0)
}

/// Entry point for every vectored trap (except the syscall gate).
pub fn dispatch_trap(frame: &mut TrapFrame) {
    let vector = frame.vector;
    if vector < 32 {
        handle_exception(frame);
        return;
    }

    if let Some(irq) = vector.checked_sub(IRQ_BASE_VECTOR).filter(|&i| i < 16) {
        IRQ_COUNTS[irq as usize].fetch_add(1, Ordering::Relaxed);
        let handler = HANDLERS.lock()[irq as usize];
        match handler {
            Some(handler) => handler(frame),
            None => log::warn!("unhandled IRQ {irq}"),
        }
        #[cfg(all(target_arch = "x86", target_os = "none"))]
        crate::arch::x86::pic::send_eoi(irq as u8);
        return;
    }

    halt_system("unknown interrupt vector");
}

/// Names for the CPU exception vectors.
pub fn exception_name(vector: u32) -> &'static str {
    match vector {
        0 => "Division Error",
        1 => "Debug",
        2 => "Non-Maskable Interrupt",
        3 => "Breakpoint",
        4 => "Overflow",
        5 => "Bound Range Exceeded",
        6 => "Invalid Opcode",
        7 => "Device Not Available",
        8 => "Double Fault",
        10 => "Invalid TSS",
        11 => "Segment Not Present",
        12 => "Stack Fault",
        13 => "General Protection Fault",
        14 => "Page Fault",
        16 => "x87 FPU Error",
        17 => "Alignment Check",
        18 => "Machine Check",
        19 => "SIMD FPU Error",
        20 => "Virtualization Error",
        21 => "Control Protection Error",
        _ => "Reserved Exception",
    }
}

fn handle_exception(frame: &mut TrapFrame) {
    match frame.vector {
        // Software-triggered recoverables: skip the two-byte `int imm8`
        // and continue.
        3 | 4 | 5 | 6 | 7 | 16 | 19 => {
            log::debug!(
                "{} at eip {:#x}, skipping",
                exception_name(frame.vector),
                frame.eip
            );
            frame.eip += 2;
        }

        // Debug and NMI are acknowledged and ignored.
        1 | 2 => {
            log::debug!("{}", exception_name(frame.vector));
        }

        // Page fault: give the CoW resolver a chance first.
        14 => {
            let info = page_fault::from_error_code(frame.error_code, read_cr2(), frame.eip);
            match page_fault::handle_page_fault(info) {
                Ok(()) => {}
                Err(_) if info.was_user_mode => kill_faulting_process(frame),
                Err(_) => halt_system("page fault in kernel mode"),
            }
        }

        // Faults that are survivable only when user code raised them.
        0 | 11 | 12 | 13 => {
            if frame.from_user_mode() {
                kill_faulting_process(frame);
            } else {
                halt_system(exception_name(frame.vector));
            }
        }

        // Critical machine state: always halt.
        8 | 10 | 17 | 18 | 20 | 21 => halt_system(exception_name(frame.vector)),

        _ => halt_system("reserved exception"),
    }
}

fn kill_faulting_process(frame: &mut TrapFrame) {
    crate::println!(
        "[EXC] {} in pid {} at eip {:#x}",
        exception_name(frame.vector),
        crate::process::current_pid(),
        frame.eip
    );
    let action = crate::process::lifecycle::fault_current();
    crate::sched::dispatch(action);
    // On bare metal the dispatch never returns here for a killed process;
    // on the host the state machine keeps going.
}

/// Faulting-address register.
#[cfg(all(target_arch = "x86", target_os = "none"))]
fn read_cr2() -> u32 {
    // SAFETY: reading CR2 has no side effects.
    unsafe { x86::controlregs::cr2() as u32 }
}

#[cfg(not(all(target_arch = "x86", target_os = "none")))]
fn read_cr2() -> u32 {
    TEST_CR2.load(Ordering::Acquire)
}

/// Injected CR2 value for host tests.
#[cfg(not(all(target_arch = "x86", target_os = "none")))]
pub static TEST_CR2: AtomicU32 = AtomicU32::new(0);

/// Stop the machine with a reason on the console. Favored over silent
/// corruption for kernel-internal invariant violations.
pub fn halt_system(reason: &str) -> ! {
    crate::println!("[HALT] {}", reason);
    crate::serial_println!("[HALT] {}", reason);
    #[cfg(all(target_arch = "x86", target_os = "none"))]
    {
        crate::arch::disable_interrupts();
        loop {
            crate::arch::halt();
        }
    }
    #[cfg(not(all(target_arch = "x86", target_os = "none")))]
    {
        panic!("halt_system: {reason}");
    }
}

/// Timer tick (IRQ 0): drive the scheduler. The switch decision takes
/// effect on return from the interrupt.
pub fn timer_handler(_frame: &mut TrapFrame) {
    let action = crate::sched::tick();
    crate::sched::dispatch(action);
}

/// Keyboard (IRQ 1): read and translate the scancode, wake a blocked
/// reader.
pub fn keyboard_handler(_frame: &mut TrapFrame) {
    crate::drivers::keyboard::handle_irq();
}

/// Install the default handlers.
pub fn init() {
    register_handler(IRQ_TIMER, timer_handler);
    register_handler(IRQ_KEYBOARD, keyboard_handler);
    crate::println!("[IRQ] timer and keyboard handlers registered");
}
