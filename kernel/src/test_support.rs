//! Shared fixtures for host-side tests.
//!
//! Available only on host builds; unit tests and the integration suites in
//! `tests/` both use these to stand in for the hardware the bare-metal
//! kernel gets from boot.

use std::{vec, vec::Vec};

use crate::mm::{MemoryRegion, MemoryRegionKind, PAGE_SIZE};

/// Size of the simulated physical memory arena.
pub const ARENA_BYTES: usize = 8 * 1024 * 1024;

/// Install a zeroed arena as simulated physical memory (the `phys_to_virt`
/// window) and seed the global frame allocator with it, once per process.
///
/// The arena is leaked deliberately so "physical" pointers stay valid for
/// every test in the binary.
pub fn arena_init() {
    use std::sync::Once;
    static ARENA: Once = Once::new();
    ARENA.call_once(|| {
        let layout = std::alloc::Layout::from_size_align(ARENA_BYTES, PAGE_SIZE).unwrap();
        // SAFETY: layout is non-zero and the allocation is never freed.
        let base = unsafe { std::alloc::alloc_zeroed(layout) };
        assert!(!base.is_null(), "arena allocation failed");
        crate::mm::set_phys_offset(base as usize);
        let regions = [MemoryRegion::new(
            0,
            ARENA_BYTES as u64,
            MemoryRegionKind::Usable,
        )];
        crate::mm::FRAME_ALLOCATOR
            .lock()
            .init(&regions, crate::mm::KERNEL_STRUCTURES_BASE);
    });
}

/// Current free-frame count, for leak assertions around CoW tests.
pub fn free_frame_count() -> usize {
    crate::mm::FRAME_ALLOCATOR.lock().free_frames()
}

/// Release all user data frames of a space (refcount-aware), mirroring
/// process teardown for tests that build spaces by hand.
pub fn release_user_pages(space: &mut crate::mm::AddressSpace) {
    crate::mm::address_space::release_user_frames(space);
}

/// Builds minimal ELF32 executables for loader and exec tests.
pub struct ElfBuilder {
    entry: u32,
    segments: Vec<(u32, Vec<u8>, u32, u32)>,
}

impl ElfBuilder {
    pub fn new(entry: u32) -> Self {
        Self {
            entry,
            segments: Vec::new(),
        }
    }

    /// Add a PT_LOAD segment. `extra_mem` extends `p_memsz` past the file
    /// bytes (BSS); `flags` are the PF_* bits.
    pub fn segment(mut self, vaddr: u32, data: Vec<u8>, extra_mem: u32, flags: u32) -> Self {
        self.segments.push((vaddr, data, extra_mem, flags));
        self
    }

    pub fn build(self) -> Vec<u8> {
        const EHSIZE: usize = 52;
        const PHSIZE: usize = 32;
        let phnum = self.segments.len();
        let mut image = vec![0u8; EHSIZE + PHSIZE * phnum];

        // ELF header
        image[0..4].copy_from_slice(&crate::elf::ELF_MAGIC);
        image[4] = crate::elf::ELF_CLASS_32;
        image[5] = crate::elf::ELF_DATA_LSB;
        image[6] = 1; // EV_CURRENT
        image[16..18].copy_from_slice(&crate::elf::ELF_TYPE_EXEC.to_le_bytes());
        image[18..20].copy_from_slice(&crate::elf::ELF_MACHINE_386.to_le_bytes());
        image[20..24].copy_from_slice(&1u32.to_le_bytes());
        image[24..28].copy_from_slice(&self.entry.to_le_bytes());
        image[28..32].copy_from_slice(&(EHSIZE as u32).to_le_bytes()); // e_phoff
        image[40..42].copy_from_slice(&(EHSIZE as u16).to_le_bytes()); // e_ehsize
        image[42..44].copy_from_slice(&(PHSIZE as u16).to_le_bytes()); // e_phentsize
        image[44..46].copy_from_slice(&(phnum as u16).to_le_bytes()); // e_phnum

        // Program headers first, then segment data. Each segment's file
        // offset is padded so offset and vaddr agree modulo the page size.
        let mut ph_entries = Vec::new();
        for (vaddr, data, extra_mem, flags) in &self.segments {
            let cur = image.len() as u32;
            let want = vaddr % PAGE_SIZE as u32;
            let have = cur % PAGE_SIZE as u32;
            let pad = (want + PAGE_SIZE as u32 - have) % PAGE_SIZE as u32;
            image.resize(image.len() + pad as usize, 0);
            let offset = image.len() as u32;
            image.extend_from_slice(data);
            ph_entries.push((
                *vaddr,
                offset,
                data.len() as u32,
                data.len() as u32 + extra_mem,
                *flags,
            ));
        }
        for (i, (vaddr, offset, filesz, memsz, flags)) in ph_entries.iter().enumerate() {
            let base = EHSIZE + i * PHSIZE;
            image[base..base + 4].copy_from_slice(&crate::elf::PT_LOAD.to_le_bytes());
            image[base + 4..base + 8].copy_from_slice(&offset.to_le_bytes());
            image[base + 8..base + 12].copy_from_slice(&vaddr.to_le_bytes());
            image[base + 12..base + 16].copy_from_slice(&vaddr.to_le_bytes());
            image[base + 16..base + 20].copy_from_slice(&filesz.to_le_bytes());
            image[base + 20..base + 24].copy_from_slice(&memsz.to_le_bytes());
            image[base + 24..base + 28].copy_from_slice(&flags.to_le_bytes());
            image[base + 28..base + 32].copy_from_slice(&(PAGE_SIZE as u32).to_le_bytes());
        }
        image
    }
}
