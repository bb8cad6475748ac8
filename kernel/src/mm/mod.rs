//! Memory management for the EmberOS kernel.
//!
//! Physical frames come from a boot-populated free stack with per-frame
//! reference counts ([`frame_allocator`]); virtual memory is classic 32-bit
//! two-level paging ([`page_table`], [`address_space`]). The kernel window
//! `[3 GiB, 3 GiB + KERNEL_WINDOW_BYTES)` is identity-mapped over low
//! physical memory and shared into every address space.

pub mod address_space;
pub mod frame_allocator;
pub mod heap;
pub mod page_fault;
pub mod page_table;
pub mod user_validation;

pub use address_space::AddressSpace;
pub use frame_allocator::{FrameAllocator, FRAME_ALLOCATOR};
pub use page_fault::{handle_page_fault, PageFaultInfo, PageFaultReason};
pub use page_table::{PageFlags, PageTable, PAGE_TABLE_ENTRIES};

use core::sync::atomic::{AtomicUsize, Ordering};

/// Size of a page / physical frame (4 KiB).
pub const PAGE_SIZE: usize = 4096;

/// Size of a physical frame, alias kept for symmetry with page granularity.
pub const FRAME_SIZE: usize = PAGE_SIZE;

/// User space spans `[0, 3 GiB)`.
pub const USER_SPACE_END: u32 = 0xC000_0000;

/// Kernel space starts at 3 GiB and is identical in every address space.
pub const KERNEL_SPACE_START: u32 = 0xC000_0000;

/// The user stack top sits at the kernel boundary and grows down.
pub const USER_STACK_TOP: u32 = 0xC000_0000;

/// User heap grows upward from 1 GiB.
pub const USER_HEAP_START: u32 = 0x4000_0000;

/// Conventional ELF text base used when the image does not dictate one.
pub const USER_TEXT_START: u32 = 0x0804_8000;

/// Extent of the identity-mapped kernel window (16 MiB). Every physical
/// frame the allocator hands out lives below this bound so the kernel can
/// reach it through the window.
pub const KERNEL_WINDOW_BYTES: u32 = 16 * 1024 * 1024;

/// Base of the reserved kernel-structures region (2 MiB): kernel heap and
/// early boot structures. Excluded from the frame allocator.
pub const KERNEL_STRUCTURES_BASE: u32 = 0x0020_0000;

/// Size of the reserved kernel-structures region (1 MiB).
pub const KERNEL_STRUCTURES_SIZE: u32 = 0x0010_0000;

/// Kind of a memory region reported by the boot environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryRegionKind {
    /// RAM the frame allocator may consume
    Usable,
    /// Firmware / device reserved
    Reserved,
    /// ACPI tables, reclaimable after parsing
    AcpiReclaimable,
    /// ACPI non-volatile storage
    AcpiNvs,
    /// Known-bad RAM
    Defective,
}

/// One `(base, length, type)` record from the boot memory map.
#[derive(Debug, Clone, Copy)]
pub struct MemoryRegion {
    pub base: u64,
    pub length: u64,
    pub kind: MemoryRegionKind,
}

impl MemoryRegion {
    pub const fn new(base: u64, length: u64, kind: MemoryRegionKind) -> Self {
        Self { base, length, kind }
    }

    pub fn is_usable(&self) -> bool {
        self.kind == MemoryRegionKind::Usable
    }
}

/// Offset added to a physical address to reach it from kernel code.
///
/// On bare metal this is [`KERNEL_SPACE_START`] (the kernel window). Tests
/// point it at a simulated physical arena instead, so page-table walks and
/// CoW copies operate on real bytes in both configurations.
static PHYS_MEM_OFFSET: AtomicUsize = AtomicUsize::new(0);

/// Install the physical-window offset. Called once during paging init (or by
/// a test fixture installing its arena).
pub fn set_phys_offset(offset: usize) {
    PHYS_MEM_OFFSET.store(offset, Ordering::Release);
}

pub fn phys_offset() -> usize {
    PHYS_MEM_OFFSET.load(Ordering::Acquire)
}

/// Translate a physical address into a dereferenceable kernel pointer.
#[inline]
pub fn phys_to_virt(pa: u32) -> *mut u8 {
    (phys_offset() + pa as usize) as *mut u8
}

/// Align an address down to a page boundary.
#[inline]
pub const fn page_align_down(addr: u32) -> u32 {
    addr & !(PAGE_SIZE as u32 - 1)
}

/// Align an address up to a page boundary.
#[inline]
pub const fn page_align_up(addr: u32) -> u32 {
    (addr + PAGE_SIZE as u32 - 1) & !(PAGE_SIZE as u32 - 1)
}

/// Whether an address sits on a page boundary.
#[inline]
pub const fn is_page_aligned(addr: u32) -> bool {
    addr & (PAGE_SIZE as u32 - 1) == 0
}

/// Initialize the memory subsystem from the boot memory map: install the
/// kernel window offset, seed the frame allocator, build the kernel address
/// space, switch to it, and bring up the kernel heap.
#[cfg(all(target_arch = "x86", target_os = "none"))]
pub fn init(regions: &[MemoryRegion]) -> crate::error::KernelResult<()> {
    set_phys_offset(KERNEL_SPACE_START as usize);

    {
        let mut allocator = FRAME_ALLOCATOR.lock();
        allocator.init(regions, KERNEL_STRUCTURES_BASE);
        crate::println!(
            "[MM] frame allocator: {} frames free",
            allocator.free_frames()
        );
    }

    // Paging is already on from the boot stub's transitional directory;
    // switching installs the real kernel directory.
    let kernel_space = address_space::init_kernel_space()?;
    kernel_space.switch_to();

    heap::init();
    crate::println!("[MM] paging enabled, kernel heap ready");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_alignment_helpers() {
        assert_eq!(page_align_down(0x1fff), 0x1000);
        assert_eq!(page_align_up(0x1001), 0x2000);
        assert_eq!(page_align_up(0x1000), 0x1000);
        assert!(is_page_aligned(0x8000));
        assert!(!is_page_aligned(0x8004));
    }

    #[test]
    fn layout_constants_are_consistent() {
        assert_eq!(USER_SPACE_END, KERNEL_SPACE_START);
        assert_eq!(USER_STACK_TOP, USER_SPACE_END);
        assert!(USER_TEXT_START < USER_HEAP_START);
        assert!(USER_HEAP_START < USER_STACK_TOP);
        assert!(KERNEL_STRUCTURES_BASE >= 0x0010_0000);
    }
}
