//! Syscall entry stub (vector 0x80).
//!
//! The stub builds the same frame as `trap_common`, records nothing itself:
//! the C-level dispatcher receives the frame base as its fifth argument and
//! stores it into the caller's PCB (`saved_syscall_esp`). The exit label is
//! shared with [`resume_from_syscall_stack`](crate::arch::context): a parked
//! process re-enters exactly there with EAX rewritten to the pending result.

core::arch::global_asm!(
    r#"
    .section .text

    // Frame layout (esp-relative after the segment pushes):
    //   0 gs  4 fs  8 es  12 ds
    //   16 edi 20 esi 24 ebp 28 esp 32 ebx 36 edx 40 ecx 44 eax
    //   48 vector 52 error 56 eip 60 cs 64 eflags 68 useresp 72 ss
    .global syscall_entry
    syscall_entry:
        push 0
        push 0x80
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
        mov ebp, esp
        push ebp                // arg 5: kernel frame esp
        mov eax, [ebp + 44]     // syscall number (caller EAX)
        mov ebx, [ebp + 32]     // arg1 (caller EBX)
        mov ecx, [ebp + 40]     // arg2 (caller ECX)
        mov edx, [ebp + 36]     // arg3 (caller EDX)
        push edx
        push ecx
        push ebx
        push eax
        call syscall_handler
        add esp, 20
        mov [esp + 44], eax     // result into the frame's EAX slot

    .global syscall_exit_path
    syscall_exit_path:
        pop gs
        pop fs
        pop es
        pop ds
        popa
        add esp, 8
        iretd
    "#
);

extern "C" {
    pub fn syscall_entry();
}
