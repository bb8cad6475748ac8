//! Architecture support.
//!
//! The kernel targets 32-bit x86. Everything that touches privileged state
//! lives behind the free functions here; on the host target they compile to
//! stubs so the logic core stays testable.

pub mod context;

#[cfg(all(target_arch = "x86", target_os = "none"))]
pub mod x86;

#[cfg(all(target_arch = "x86", target_os = "none"))]
mod imp {
    /// Invalidate one TLB entry.
    pub fn tlb_flush_entry(va: u32) {
        // SAFETY: invlpg has no side effects beyond dropping a translation.
        unsafe { x86::tlb::flush(va as usize) }
    }

    /// Invalidate the whole TLB by reloading CR3.
    pub fn tlb_flush_all() {
        // SAFETY: rewriting CR3 with its current value only drops cached
        // translations.
        unsafe {
            let cr3 = x86::controlregs::cr3();
            x86::controlregs::cr3_write(cr3);
        }
    }

    /// Load a page-directory base into CR3.
    pub fn load_page_directory(phys: u32) {
        // SAFETY: callers pass a valid page-directory frame; the kernel half
        // of every directory is identical so kernel execution continues.
        unsafe { x86::controlregs::cr3_write(phys as u64) }
    }

    pub fn enable_interrupts() {
        // SAFETY: sti is safe once the IDT and PIC are programmed.
        unsafe { x86::irq::enable() }
    }

    pub fn disable_interrupts() {
        // SAFETY: cli only masks maskable interrupts.
        unsafe { x86::irq::disable() }
    }

    pub fn interrupts_enabled() -> bool {
        // SAFETY: reading EFLAGS has no side effects.
        let flags = unsafe { x86::bits32::eflags::read() };
        flags.contains(x86::bits32::eflags::EFlags::FLAGS_IF)
    }

    /// Halt until the next interrupt.
    pub fn halt() {
        // SAFETY: hlt resumes on the next interrupt.
        unsafe { x86::halt() }
    }

    /// Park the CPU forever with interrupts on (the kernel idle state).
    pub fn idle_forever() -> ! {
        loop {
            enable_interrupts();
            halt();
        }
    }
}

#[cfg(not(all(target_arch = "x86", target_os = "none")))]
mod imp {
    use core::sync::atomic::{AtomicBool, Ordering};

    static INTERRUPTS: AtomicBool = AtomicBool::new(true);

    pub fn tlb_flush_entry(_va: u32) {}
    pub fn tlb_flush_all() {}
    pub fn load_page_directory(_phys: u32) {}

    pub fn enable_interrupts() {
        INTERRUPTS.store(true, Ordering::Release);
    }

    pub fn disable_interrupts() {
        INTERRUPTS.store(false, Ordering::Release);
    }

    pub fn interrupts_enabled() -> bool {
        INTERRUPTS.load(Ordering::Acquire)
    }

    pub fn halt() {}

    pub fn idle_forever() -> ! {
        panic!("idle_forever on the host target");
    }
}

pub use imp::{
    disable_interrupts, enable_interrupts, halt, idle_forever, interrupts_enabled,
    load_page_directory, tlb_flush_all, tlb_flush_entry,
};
