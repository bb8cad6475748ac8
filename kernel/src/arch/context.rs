//! Saved CPU state and the context-switch / resume primitives.
//!
//! The [`Context`] layout is fixed: the switch assembly addresses fields by
//! byte offset. `kernel_esp` (offset 56) anchors preempted kernel stacks;
//! `user_esp` holds the ring-3 stack pointer for first entry.

/// Saved CPU state for a process.
#[derive(Debug, Clone, Copy, Default)]
#[repr(C)]
pub struct Context {
    pub eax: u32,
    pub ebx: u32,
    pub ecx: u32,
    pub edx: u32,
    pub esi: u32,
    pub edi: u32,
    pub esp: u32,
    pub ebp: u32,
    pub ds: u32,
    pub es: u32,
    pub fs: u32,
    pub gs: u32,
    pub eip: u32,
    pub eflags: u32,
    /// Kernel-mode stack pointer (context-switch anchor).
    pub kernel_esp: u32,
    /// User-mode stack pointer for first entry to ring 3.
    pub user_esp: u32,
}

/// Kernel data selector.
pub const KERNEL_DATA_SELECTOR: u32 = 0x10;
/// User data selector (RPL 3).
pub const USER_DATA_SELECTOR: u32 = 0x23;
/// User code selector (RPL 3).
pub const USER_CODE_SELECTOR: u32 = 0x1B;
/// EFLAGS with IF set (interrupts enabled) plus the always-one bit.
pub const EFLAGS_IF: u32 = 0x202;

impl Context {
    /// Initial context for a user process: entry point, ring-3 selectors,
    /// interrupts enabled, stacks top-aligned.
    pub fn new_user(entry: u32, user_stack_top: u32, kernel_stack_top: u32) -> Self {
        Self {
            eip: entry,
            eflags: EFLAGS_IF,
            ds: USER_DATA_SELECTOR,
            es: USER_DATA_SELECTOR,
            fs: USER_DATA_SELECTOR,
            gs: USER_DATA_SELECTOR,
            // One word of slack below the top, matching the stack setup.
            kernel_esp: kernel_stack_top - 4,
            user_esp: user_stack_top,
            ..Default::default()
        }
    }
}

/// The register frame pushed by the interrupt/syscall entry stubs, in stack
/// order (lowest address first).
#[derive(Debug, Clone, Copy, Default)]
#[repr(C)]
pub struct TrapFrame {
    pub gs: u32,
    pub fs: u32,
    pub es: u32,
    pub ds: u32,
    // pusha block
    pub edi: u32,
    pub esi: u32,
    pub ebp: u32,
    pub esp_dummy: u32,
    pub ebx: u32,
    pub edx: u32,
    pub ecx: u32,
    pub eax: u32,
    pub vector: u32,
    pub error_code: u32,
    // hardware-pushed
    pub eip: u32,
    pub cs: u32,
    pub eflags: u32,
    /// Present only on privilege-level change.
    pub user_esp: u32,
    pub user_ss: u32,
}

impl TrapFrame {
    /// Whether the interrupted code was running in ring 3.
    pub fn from_user_mode(&self) -> bool {
        self.cs & 3 == 3
    }
}

#[cfg(all(target_arch = "x86", target_os = "none"))]
mod imp {
    use super::Context;

    core::arch::global_asm!(
        r#"
        .section .text

        // context_switch(old: *mut Context, new: *const Context)
        //
        // Saves the callee-saved registers and kernel ESP of the outgoing
        // context, then restores the incoming one. Returns on the incoming
        // context's stack.
        .global context_switch
        context_switch:
            mov eax, [esp + 4]      // old
            mov [eax + 4],  ebx
            mov [eax + 16], esi
            mov [eax + 20], edi
            mov [eax + 28], ebp
            mov [eax + 56], esp     // kernel_esp

            mov eax, [esp + 8]      // new
            mov ebx, [eax + 4]
            mov esi, [eax + 16]
            mov edi, [eax + 20]
            mov ebp, [eax + 28]
            mov esp, [eax + 56]
            ret

        // enter_user_mode(entry: u32, user_esp: u32) -> !
        //
        // Builds an iret frame for ring 3 and drops into it.
        .global enter_user_mode
        enter_user_mode:
            mov ecx, [esp + 4]      // entry
            mov edx, [esp + 8]      // user esp
            mov ax, 0x23
            mov ds, ax
            mov es, ax
            mov fs, ax
            mov gs, ax
            push 0x23               // ss
            push edx                // esp
            push 0x202              // eflags (IF set)
            push 0x1B               // cs
            push ecx                // eip
            iretd

        // resume_from_syscall_stack(esp: u32, return_value: u32) -> !
        //
        // Installs a parked syscall kernel stack and completes the syscall
        // as if the handler had just returned `return_value`.
        .global resume_from_syscall_stack
        resume_from_syscall_stack:
            mov ecx, [esp + 8]      // pending return value
            mov esp, [esp + 4]      // parked frame base
            mov [esp + 44], ecx     // overwrite frame EAX slot (gs..eax = 11 words)
            jmp syscall_exit_path
        "#
    );

    extern "C" {
        pub fn context_switch(old: *mut Context, new: *const Context);
        pub fn enter_user_mode(entry: u32, user_esp: u32) -> !;
        pub fn resume_from_syscall_stack(esp: u32, return_value: u32) -> !;
    }
}

#[cfg(all(target_arch = "x86", target_os = "none"))]
pub use imp::{context_switch, enter_user_mode, resume_from_syscall_stack};

/// Host stubs: the scheduler state machine runs in tests without real
/// stack switching. Each primitive records its last invocation.
#[cfg(not(all(target_arch = "x86", target_os = "none")))]
mod imp {
    use core::sync::atomic::{AtomicU32, Ordering};

    use super::Context;

    pub static LAST_RESUMED_ESP: AtomicU32 = AtomicU32::new(0);
    pub static LAST_RESUME_VALUE: AtomicU32 = AtomicU32::new(0);
    pub static LAST_USER_ENTRY: AtomicU32 = AtomicU32::new(0);

    /// # Safety
    /// Host stub; no real stack switching happens.
    pub unsafe fn context_switch(_old: *mut Context, _new: *const Context) {}

    /// Host stub: records the entry point instead of dropping to ring 3.
    pub fn enter_user_mode_recorded(entry: u32, _user_esp: u32) {
        LAST_USER_ENTRY.store(entry, Ordering::Release);
    }

    /// Host stub: records the parked-stack resume instead of performing it.
    pub fn resume_recorded(esp: u32, return_value: u32) {
        LAST_RESUMED_ESP.store(esp, Ordering::Release);
        LAST_RESUME_VALUE.store(return_value, Ordering::Release);
    }
}

#[cfg(not(all(target_arch = "x86", target_os = "none")))]
pub use imp::{
    context_switch, enter_user_mode_recorded, resume_recorded, LAST_RESUMED_ESP,
    LAST_RESUME_VALUE, LAST_USER_ENTRY,
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_context_has_ring3_selectors_and_interrupts() {
        let ctx = Context::new_user(0x0804_8000, 0xC000_0000, 0xC010_0000);
        assert_eq!(ctx.eip, 0x0804_8000);
        assert_eq!(ctx.ds, USER_DATA_SELECTOR);
        assert_eq!(ctx.eflags & 0x200, 0x200);
        assert_eq!(ctx.kernel_esp, 0xC010_0000 - 4);
        assert_eq!(ctx.user_esp, 0xC000_0000);
    }

    #[test]
    fn trap_frame_privilege_check() {
        let mut frame = TrapFrame::default();
        frame.cs = 0x08;
        assert!(!frame.from_user_mode());
        frame.cs = USER_CODE_SELECTOR;
        assert!(frame.from_user_mode());
    }

    #[test]
    fn kernel_esp_offset_matches_switch_assembly() {
        // The switch code stores ESP at byte offset 56.
        assert_eq!(core::mem::offset_of!(Context, kernel_esp), 56);
        assert_eq!(core::mem::offset_of!(Context, ebx), 4);
        assert_eq!(core::mem::offset_of!(Context, esi), 16);
        assert_eq!(core::mem::offset_of!(Context, edi), 20);
        assert_eq!(core::mem::offset_of!(Context, ebp), 28);
    }
}
