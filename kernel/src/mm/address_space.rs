//! Per-process virtual address spaces.
//!
//! An [`AddressSpace`] owns one page-directory frame. User mappings live in
//! directory entries 0..768; entries 768..1023 cover the kernel window and
//! are copied verbatim from the kernel directory into every space, so the
//! kernel range shares page tables by construction.

use spin::Once;

use super::{
    frame_allocator::FRAME_ALLOCATOR,
    page_table::{
        directory_index, table_index, PageFlags, PageTable, PageTableEntry,
        KERNEL_DIRECTORY_START, PAGE_TABLE_ENTRIES,
    },
    phys_to_virt, PAGE_SIZE,
};
use crate::error::{KernelResult, MemError};

/// Snapshot of the kernel directory's high entries, shared into every user
/// address space at creation.
static KERNEL_DIRECTORY_ENTRIES: Once<[u32; PAGE_TABLE_ENTRIES - KERNEL_DIRECTORY_START]> =
    Once::new();

/// Physical address of the directory most recently loaded via `switch_to`.
/// On bare metal this mirrors CR3; tests use it to assert exec atomicity.
static ACTIVE_DIRECTORY: core::sync::atomic::AtomicU32 = core::sync::atomic::AtomicU32::new(0);

/// A virtual address space bound to one page-directory frame.
pub struct AddressSpace {
    page_directory: u32,
    kernel: bool,
}

impl AddressSpace {
    /// Create a fresh user address space. The kernel half is inherited from
    /// the kernel directory when one has been built.
    pub fn new_user() -> KernelResult<Self> {
        let dir = FRAME_ALLOCATOR.lock().allocate_zeroed()?;
        let space = Self {
            page_directory: dir,
            kernel: false,
        };

        if let Some(kernel_entries) = KERNEL_DIRECTORY_ENTRIES.get() {
            let directory = space.directory_mut();
            for (i, raw) in kernel_entries.iter().enumerate() {
                directory[KERNEL_DIRECTORY_START + i] = PageTableEntry::from_raw(*raw);
            }
        }

        Ok(space)
    }

    /// Wrap an existing directory frame (used by the kernel-space builder).
    fn from_directory(page_directory: u32, kernel: bool) -> Self {
        Self {
            page_directory,
            kernel,
        }
    }

    /// Physical address of the page directory (the CR3 value).
    pub fn directory_phys(&self) -> u32 {
        self.page_directory
    }

    pub fn is_kernel(&self) -> bool {
        self.kernel
    }

    #[allow(clippy::mut_from_ref)]
    fn directory_mut(&self) -> &mut PageTable {
        // SAFETY: the directory frame is owned by this address space for its
        // whole lifetime and is reachable through the kernel window. Single
        // CPU; callers serialize through the owning process.
        unsafe { &mut *(phys_to_virt(self.page_directory) as *mut PageTable) }
    }

    /// Map one page. Creates the page table on demand; overwrites any
    /// previous mapping at `va` and flushes that TLB entry.
    pub fn map_page(&mut self, va: u32, pa: u32, writable: bool, user: bool) -> KernelResult<()> {
        if !super::is_page_aligned(va) {
            return Err(MemError::Unaligned { addr: va }.into());
        }
        if !super::is_page_aligned(pa) {
            return Err(MemError::Unaligned { addr: pa }.into());
        }

        let table = self.table_for(va, true)?.ok_or(MemError::NoSpace)?;
        let mut flags = PageFlags::PRESENT;
        if writable {
            flags |= PageFlags::WRITABLE;
        }
        if user {
            flags |= PageFlags::USER;
        }
        table[table_index(va)].set(pa, flags);
        crate::arch::tlb_flush_entry(va);
        Ok(())
    }

    /// Unmap one page and flush its TLB entry. The underlying frame is the
    /// caller's responsibility.
    pub fn unmap_page(&mut self, va: u32) -> KernelResult<()> {
        let table = self
            .table_for(va, false)?
            .ok_or(MemError::NotMapped { addr: va })?;
        let entry = &mut table[table_index(va)];
        if !entry.is_present() {
            return Err(MemError::NotMapped { addr: va }.into());
        }
        entry.clear();
        crate::arch::tlb_flush_entry(va);
        Ok(())
    }

    /// Translate a virtual address to its physical counterpart.
    pub fn translate(&self, va: u32) -> Option<u32> {
        let entry = self.entry_for(va)?;
        entry.addr().map(|base| base | (va & (PAGE_SIZE as u32 - 1)))
    }

    /// Flags of the page covering `va`, if mapped.
    pub fn page_flags(&self, va: u32) -> Option<PageFlags> {
        let entry = self.entry_for(va)?;
        if entry.is_present() {
            Some(entry.flags())
        } else {
            None
        }
    }

    /// Set or clear the write permission of an existing mapping, flushing
    /// the TLB entry.
    pub fn protect_page(&mut self, va: u32, writable: bool) -> KernelResult<()> {
        let table = self
            .table_for(va, false)?
            .ok_or(MemError::NotMapped { addr: va })?;
        let entry = &mut table[table_index(va)];
        if !entry.is_present() {
            return Err(MemError::NotMapped { addr: va }.into());
        }
        let mut flags = entry.flags();
        flags.set(PageFlags::WRITABLE, writable);
        entry.set_flags(flags);
        crate::arch::tlb_flush_entry(va);
        Ok(())
    }

    /// Map `bytes` of contiguous memory starting at page-aligned bases.
    pub fn map_region(
        &mut self,
        va_base: u32,
        pa_base: u32,
        bytes: u32,
        writable: bool,
        user: bool,
    ) -> KernelResult<()> {
        let pages = super::page_align_up(bytes) / PAGE_SIZE as u32;
        for i in 0..pages {
            self.map_page(
                va_base + i * PAGE_SIZE as u32,
                pa_base + i * PAGE_SIZE as u32,
                writable,
                user,
            )?;
        }
        Ok(())
    }

    /// Unmap `bytes` starting at `va_base`. Missing pages are skipped.
    pub fn unmap_region(&mut self, va_base: u32, bytes: u32) -> KernelResult<()> {
        let pages = super::page_align_up(bytes) / PAGE_SIZE as u32;
        for i in 0..pages {
            let va = va_base + i * PAGE_SIZE as u32;
            match self.unmap_page(va) {
                Ok(()) | Err(crate::error::KernelError::Mem(MemError::NotMapped { .. })) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    /// Visit every present user-range page entry. The callback may mutate
    /// the entry (fork uses this to clear write bits).
    pub fn for_each_user_entry(&mut self, mut f: impl FnMut(u32, &mut PageTableEntry)) {
        let directory = self.directory_mut();
        for dir_idx in 0..KERNEL_DIRECTORY_START {
            let Some(table_phys) = directory[dir_idx].addr() else {
                continue;
            };
            // SAFETY: present user directory entries always point at table
            // frames owned by this address space.
            let table = unsafe { &mut *(phys_to_virt(table_phys) as *mut PageTable) };
            for pte_idx in 0..PAGE_TABLE_ENTRIES {
                let entry = &mut table[pte_idx];
                if entry.is_present() {
                    let va = ((dir_idx as u32) << 22) | ((pte_idx as u32) << 12);
                    f(va, entry);
                }
            }
        }
    }

    /// Number of present user-range mappings.
    pub fn user_page_count(&mut self) -> usize {
        let mut count = 0;
        self.for_each_user_entry(|_, _| count += 1);
        count
    }

    /// Load this space's directory into the paging unit.
    pub fn switch_to(&self) {
        ACTIVE_DIRECTORY.store(self.page_directory, core::sync::atomic::Ordering::Release);
        crate::arch::load_page_directory(self.page_directory);
    }

    /// Whether this space's directory is the one currently loaded.
    pub fn is_active(&self) -> bool {
        ACTIVE_DIRECTORY.load(core::sync::atomic::Ordering::Acquire) == self.page_directory
    }

    /// Tear down the user half: free every user page-table frame and then
    /// the directory frame itself. Data frames must already have been
    /// released through the frame refcounts by the process teardown.
    pub fn destroy(&mut self) {
        if self.page_directory == 0 {
            return;
        }
        let mut allocator = FRAME_ALLOCATOR.lock();
        {
            let directory = self.directory_mut();
            for dir_idx in 0..KERNEL_DIRECTORY_START {
                if let Some(table_phys) = directory[dir_idx].addr() {
                    let _ = allocator.free(table_phys);
                    directory[dir_idx].clear();
                }
            }
        }
        let _ = allocator.free(self.page_directory);
        self.page_directory = 0;
    }

    fn entry_for(&self, va: u32) -> Option<&PageTableEntry> {
        let directory = self.directory_mut();
        let table_phys = directory[directory_index(va)].addr()?;
        // SAFETY: present directory entries point at live table frames.
        let table = unsafe { &*(phys_to_virt(table_phys) as *const PageTable) };
        Some(&table[table_index(va)])
    }

    /// Page table covering `va`, creating it when `create` is set.
    #[allow(clippy::mut_from_ref)]
    fn table_for(&self, va: u32, create: bool) -> KernelResult<Option<&mut PageTable>> {
        let directory = self.directory_mut();
        let dir_entry = &mut directory[directory_index(va)];

        let table_phys = match dir_entry.addr() {
            Some(addr) => addr,
            None if create => {
                let frame = FRAME_ALLOCATOR.lock().allocate_zeroed()?;
                // Directory entries carry the loosest permissions; the PTE
                // decides the effective access.
                dir_entry.set(frame, PageFlags::PRESENT | PageFlags::WRITABLE | PageFlags::USER);
                frame
            }
            None => return Ok(None),
        };

        // SAFETY: table_phys is a table frame owned by this address space.
        Ok(Some(unsafe {
            &mut *(phys_to_virt(table_phys) as *mut PageTable)
        }))
    }
}

/// Release every user data frame of an address space through the frame
/// refcounts, clearing the mappings. Shared (CoW) frames survive until
/// their last owner drops them; exclusively-owned frames return to the
/// free stack. Page-table frames are reclaimed separately by `destroy`.
pub fn release_user_frames(space: &mut AddressSpace) {
    space.for_each_user_entry(|_va, entry| {
        if let Some(pa) = entry.addr() {
            let mut allocator = FRAME_ALLOCATOR.lock();
            if allocator.decref(pa) == 0 {
                let _ = allocator.free(pa);
            }
        }
        entry.clear();
    });
}

/// Build the kernel address space: the kernel window mapped at high
/// addresses, shared tables snapshotted for user-space inheritance.
#[cfg(all(target_arch = "x86", target_os = "none"))]
pub fn init_kernel_space() -> KernelResult<AddressSpace> {
    let dir = FRAME_ALLOCATOR.lock().allocate_zeroed()?;
    let mut space = AddressSpace::from_directory(dir, true);

    // Identity-map the kernel window over [KERNEL_SPACE_START, +window).
    let window_pages = super::KERNEL_WINDOW_BYTES / PAGE_SIZE as u32;
    for i in 0..window_pages {
        let pa = i * PAGE_SIZE as u32;
        space.map_page(super::KERNEL_SPACE_START + pa, pa, true, false)?;
    }

    // Snapshot the kernel directory half for user address spaces.
    let directory = space.directory_mut();
    let mut entries = [0u32; PAGE_TABLE_ENTRIES - KERNEL_DIRECTORY_START];
    for (i, raw) in entries.iter_mut().enumerate() {
        *raw = directory[KERNEL_DIRECTORY_START + i].raw();
    }
    KERNEL_DIRECTORY_ENTRIES.call_once(|| entries);

    Ok(space)
}
