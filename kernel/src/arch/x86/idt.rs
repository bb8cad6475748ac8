//! Interrupt descriptor table and trap entry stubs.
//!
//! Every vector funnels through `trap_common`, which materializes a
//! [`TrapFrame`](crate::arch::context::TrapFrame) and calls into
//! [`crate::irq`]. The syscall vector 0x80 has its own stub (see
//! [`super::syscall`]) because its exit path doubles as the blocked-syscall
//! resume target.

use core::mem::size_of;

use spin::Mutex;

#[derive(Clone, Copy)]
#[repr(C, packed)]
struct IdtEntry {
    offset_low: u16,
    selector: u16,
    zero: u8,
    type_attr: u8,
    offset_high: u16,
}

impl IdtEntry {
    const fn missing() -> Self {
        Self {
            offset_low: 0,
            selector: 0,
            zero: 0,
            type_attr: 0,
            offset_high: 0,
        }
    }

    fn new(handler: u32, type_attr: u8) -> Self {
        Self {
            offset_low: (handler & 0xFFFF) as u16,
            selector: super::gdt::KERNEL_CODE,
            zero: 0,
            type_attr,
            offset_high: (handler >> 16) as u16,
        }
    }
}

#[repr(C, packed)]
struct IdtPointer {
    limit: u16,
    base: u32,
}

/// Present, ring-0, 32-bit interrupt gate (interrupts masked on entry).
const GATE_INTERRUPT: u8 = 0x8E;
/// Present, ring-0, 32-bit trap gate (interrupts stay enabled).
const GATE_TRAP: u8 = 0x8F;
/// Interrupt gate reachable from ring 3 (the syscall vector).
const GATE_USER_INTERRUPT: u8 = 0xEE;

static IDT: Mutex<[IdtEntry; 256]> = Mutex::new([IdtEntry::missing(); 256]);

// Exception and IRQ entry stubs. Vectors with a hardware error code skip the
// dummy push; everything else pushes 0 so the frame layout is uniform.
core::arch::global_asm!(
    r#"
    .section .text

    .macro EXC_NOERR n
    .global exception_stub_\n
    exception_stub_\n:
        push 0
        push \n
        jmp trap_common
    .endm

    .macro EXC_ERR n
    .global exception_stub_\n
    exception_stub_\n:
        push \n
        jmp trap_common
    .endm

    .macro IRQ_STUB n
    .global irq_stub_\n
    irq_stub_\n:
        push 0
        push \n + 32
        jmp trap_common
    .endm

    EXC_NOERR 0
    EXC_NOERR 1
    EXC_NOERR 2
    EXC_NOERR 3
    EXC_NOERR 4
    EXC_NOERR 5
    EXC_NOERR 6
    EXC_NOERR 7
    EXC_ERR   8
    EXC_NOERR 9
    EXC_ERR   10
    EXC_ERR   11
    EXC_ERR   12
    EXC_ERR   13
    EXC_ERR   14
    EXC_NOERR 16
    EXC_ERR   17
    EXC_NOERR 18
    EXC_NOERR 19
    EXC_NOERR 20
    EXC_ERR   21

    IRQ_STUB 0
    IRQ_STUB 1
    IRQ_STUB 2
    IRQ_STUB 3
    IRQ_STUB 4
    IRQ_STUB 5
    IRQ_STUB 6
    IRQ_STUB 7
    IRQ_STUB 8
    IRQ_STUB 9
    IRQ_STUB 10
    IRQ_STUB 11
    IRQ_STUB 12
    IRQ_STUB 13
    IRQ_STUB 14
    IRQ_STUB 15

    // Common trap path: build the register frame, switch to kernel data
    // segments, hand the frame to Rust, restore and return.
    trap_common:
        pusha
        push ds
        push es
        push fs
        push gs
        mov ax, 0x10
        mov ds, ax
        mov es, ax
        mov fs, ax
        mov gs, ax
        push esp
        call trap_dispatch
        add esp, 4
        pop gs
        pop fs
        pop es
        pop ds
        popa
        add esp, 8
        iretd
    "#
);

macro_rules! declare_stubs {
    ($($name:ident),* $(,)?) => {
        extern "C" {
            $(fn $name();)*
        }
    };
}

declare_stubs!(
    exception_stub_0,
    exception_stub_1,
    exception_stub_2,
    exception_stub_3,
    exception_stub_4,
    exception_stub_5,
    exception_stub_6,
    exception_stub_7,
    exception_stub_8,
    exception_stub_9,
    exception_stub_10,
    exception_stub_11,
    exception_stub_12,
    exception_stub_13,
    exception_stub_14,
    exception_stub_16,
    exception_stub_17,
    exception_stub_18,
    exception_stub_19,
    exception_stub_20,
    exception_stub_21,
    irq_stub_0,
    irq_stub_1,
    irq_stub_2,
    irq_stub_3,
    irq_stub_4,
    irq_stub_5,
    irq_stub_6,
    irq_stub_7,
    irq_stub_8,
    irq_stub_9,
    irq_stub_10,
    irq_stub_11,
    irq_stub_12,
    irq_stub_13,
    irq_stub_14,
    irq_stub_15,
);

/// Rust-side landing point for every non-syscall vector.
#[no_mangle]
extern "C" fn trap_dispatch(frame: &mut crate::arch::context::TrapFrame) {
    crate::irq::dispatch_trap(frame);
}

fn set_gate(vector: usize, handler: unsafe extern "C" fn(), type_attr: u8) {
    IDT.lock()[vector] = IdtEntry::new(handler as usize as u32, type_attr);
}

/// Build the IDT: CPU exceptions, remapped hardware IRQs, and the
/// user-reachable syscall gate; then load it.
pub fn init() {
    let exceptions: [(usize, unsafe extern "C" fn()); 21] = [
        (0, exception_stub_0),
        (1, exception_stub_1),
        (2, exception_stub_2),
        (3, exception_stub_3),
        (4, exception_stub_4),
        (5, exception_stub_5),
        (6, exception_stub_6),
        (7, exception_stub_7),
        (8, exception_stub_8),
        (9, exception_stub_9),
        (10, exception_stub_10),
        (11, exception_stub_11),
        (12, exception_stub_12),
        (13, exception_stub_13),
        (14, exception_stub_14),
        (16, exception_stub_16),
        (17, exception_stub_17),
        (18, exception_stub_18),
        (19, exception_stub_19),
        (20, exception_stub_20),
        (21, exception_stub_21),
    ];
    for (vector, stub) in exceptions {
        // Breakpoint and overflow are trap gates so debugging can nest.
        let attr = if vector == 3 || vector == 4 {
            GATE_TRAP
        } else {
            GATE_INTERRUPT
        };
        set_gate(vector, stub, attr);
    }

    let irqs: [unsafe extern "C" fn(); 16] = [
        irq_stub_0,
        irq_stub_1,
        irq_stub_2,
        irq_stub_3,
        irq_stub_4,
        irq_stub_5,
        irq_stub_6,
        irq_stub_7,
        irq_stub_8,
        irq_stub_9,
        irq_stub_10,
        irq_stub_11,
        irq_stub_12,
        irq_stub_13,
        irq_stub_14,
        irq_stub_15,
    ];
    for (line, stub) in irqs.iter().enumerate() {
        set_gate(32 + line, *stub, GATE_INTERRUPT);
    }

    set_gate(0x80, super::syscall::syscall_entry, GATE_USER_INTERRUPT);

    load();
    crate::println!("[IDT] loaded, syscall gate at 0x80");
}

/// Load the IDT register.
pub fn load() {
    let idt = IDT.lock();
    let pointer = IdtPointer {
        limit: (size_of::<[IdtEntry; 256]>() - 1) as u16,
        base: idt.as_ptr() as u32,
    };
    // SAFETY: the IDT lives in a static and every installed gate points at
    // a stub defined in this object file.
    unsafe {
        core::arch::asm!("lidt [{}]", in(reg) core::ptr::addr_of!(pointer));
    }
}
