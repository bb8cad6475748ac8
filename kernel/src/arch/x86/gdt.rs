//! Global descriptor table and task state segment.
//!
//! Six descriptors: null, kernel code/data, user code/data, TSS. The TSS
//! only supplies `ss0:esp0` so ring-3 → ring-0 transitions land on the
//! current process's kernel stack.

use core::mem::size_of;

use spin::Mutex;

/// Selectors, fixed by descriptor order.
pub const KERNEL_CODE: u16 = 0x08;
pub const KERNEL_DATA: u16 = 0x10;
pub const USER_CODE: u16 = 0x18 | 3;
pub const USER_DATA: u16 = 0x20 | 3;
pub const TSS_SELECTOR: u16 = 0x28;

#[derive(Clone, Copy)]
#[repr(C, packed)]
struct GdtEntry {
    limit_low: u16,
    base_low: u16,
    base_mid: u8,
    access: u8,
    granularity: u8,
    base_high: u8,
}

impl GdtEntry {
    const fn new(base: u32, limit: u32, access: u8, granularity: u8) -> Self {
        Self {
            limit_low: (limit & 0xFFFF) as u16,
            base_low: (base & 0xFFFF) as u16,
            base_mid: ((base >> 16) & 0xFF) as u8,
            access,
            granularity: (((limit >> 16) & 0x0F) as u8) | (granularity & 0xF0),
            base_high: ((base >> 24) & 0xFF) as u8,
        }
    }

    const fn null() -> Self {
        Self::new(0, 0, 0, 0)
    }
}

#[repr(C, packed)]
struct GdtPointer {
    limit: u16,
    base: u32,
}

/// 32-bit task state segment. Only ss0/esp0 are consulted.
#[derive(Clone, Copy)]
#[repr(C, packed)]
struct TaskStateSegment {
    prev_task: u32,
    esp0: u32,
    ss0: u32,
    unused: [u32; 22],
    iomap_base: u16,
    reserved: u16,
}

impl TaskStateSegment {
    const fn new() -> Self {
        Self {
            prev_task: 0,
            esp0: 0,
            ss0: KERNEL_DATA as u32,
            unused: [0; 22],
            iomap_base: size_of::<TaskStateSegment>() as u16,
            reserved: 0,
        }
    }
}

static TSS: Mutex<TaskStateSegment> = Mutex::new(TaskStateSegment::new());

static GDT: Mutex<[GdtEntry; 6]> = Mutex::new([GdtEntry::null(); 6]);

/// Build and load the GDT, then load the task register.
pub fn init() {
    let tss_base = {
        let tss = TSS.lock();
        &*tss as *const TaskStateSegment as u32
    };
    let tss_limit = size_of::<TaskStateSegment>() as u32 - 1;

    let mut gdt = GDT.lock();
    gdt[0] = GdtEntry::null();
    // access: present | ring | code/data | type; granularity: 4K pages, 32-bit
    gdt[1] = GdtEntry::new(0, 0xFFFFF, 0x9A, 0xC0); // kernel code
    gdt[2] = GdtEntry::new(0, 0xFFFFF, 0x92, 0xC0); // kernel data
    gdt[3] = GdtEntry::new(0, 0xFFFFF, 0xFA, 0xC0); // user code
    gdt[4] = GdtEntry::new(0, 0xFFFFF, 0xF2, 0xC0); // user data
    gdt[5] = GdtEntry::new(tss_base, tss_limit, 0x89, 0x00); // available TSS

    let pointer = GdtPointer {
        limit: (size_of::<[GdtEntry; 6]>() - 1) as u16,
        base: gdt.as_ptr() as u32,
    };

    // SAFETY: the GDT and TSS live in statics, so the loaded descriptors
    // stay valid for the kernel's lifetime. Selector constants match the
    // descriptor order built above.
    unsafe {
        core::arch::asm!(
            "lgdt [{ptr}]",
            "mov ax, {kdata}",
            "mov ds, ax",
            "mov es, ax",
            "mov fs, ax",
            "mov gs, ax",
            "mov ss, ax",
            // Far jump to reload CS.
            "push {kcode}",
            "lea eax, [2f]",
            "push eax",
            "retf",
            "2:",
            "mov ax, {tss}",
            "ltr ax",
            ptr = in(reg) core::ptr::addr_of!(pointer),
            kdata = const KERNEL_DATA as u32,
            kcode = const KERNEL_CODE as u32,
            tss = const TSS_SELECTOR as u32,
            out("eax") _,
        );
    }
    crate::println!("[GDT] descriptors loaded, TSS at {:#x}", tss_base);
}

/// Point the TSS at the kernel stack of the process about to run. Every
/// ring-3 entry (interrupt or syscall) switches to this stack.
pub fn set_kernel_stack(esp0: u32) {
    TSS.lock().esp0 = esp0;
}
