//! Kernel heap.
//!
//! The heap lives in the reserved kernel-structures window so it never
//! competes with the frame allocator. On the host target the system
//! allocator is used instead and this module is a no-op.

/// Physical base of the kernel heap, inside the reserved window.
pub const HEAP_PHYS_BASE: u32 = super::KERNEL_STRUCTURES_BASE;

/// Heap size: half of the reserved window (512 KiB).
pub const HEAP_BYTES: usize = (super::KERNEL_STRUCTURES_SIZE / 2) as usize;

/// Initialize the kernel heap allocator over the reserved window.
#[cfg(all(target_arch = "x86", target_os = "none"))]
pub fn init() {
    let base = super::phys_to_virt(HEAP_PHYS_BASE);
    // SAFETY: the reserved window is excluded from the frame allocator and
    // mapped through the kernel window; nothing else uses this range.
    unsafe {
        crate::ALLOCATOR.lock().init(base, HEAP_BYTES);
    }
}

#[cfg(not(all(target_arch = "x86", target_os = "none")))]
pub fn init() {}
