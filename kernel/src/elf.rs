//! ELF32 loader.
//!
//! Validates an ELF32 executable for i386 and projects its PT_LOAD
//! segments into a fresh address space: frames are allocated per page,
//! `p_filesz` bytes are copied from the image, the tail up to `p_memsz` is
//! zero, and page permissions derive from the segment flags.

use alloc::vec::Vec;

use crate::error::{KernelError, KernelResult};
use crate::mm::{self, AddressSpace, FRAME_ALLOCATOR, PAGE_SIZE};

pub const ELF_MAGIC: [u8; 4] = [0x7F, b'E', b'L', b'F'];
pub const ELF_CLASS_32: u8 = 1;
pub const ELF_DATA_LSB: u8 = 1;
pub const ELF_TYPE_EXEC: u16 = 2;
pub const ELF_MACHINE_386: u16 = 3;

pub const PT_LOAD: u32 = 1;

pub const PF_X: u32 = 0x1;
pub const PF_W: u32 = 0x2;
pub const PF_R: u32 = 0x4;

/// Default user stack size (64 KiB), top-aligned at the user/kernel split.
pub const USER_STACK_BYTES: u32 = 64 * 1024;

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct Elf32Header {
    pub e_ident: [u8; 16],
    pub e_type: u16,
    pub e_machine: u16,
    pub e_version: u32,
    pub e_entry: u32,
    pub e_phoff: u32,
    pub e_shoff: u32,
    pub e_flags: u32,
    pub e_ehsize: u16,
    pub e_phentsize: u16,
    pub e_phnum: u16,
    pub e_shentsize: u16,
    pub e_shnum: u16,
    pub e_shstrndx: u16,
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct Elf32ProgramHeader {
    pub p_type: u32,
    pub p_offset: u32,
    pub p_vaddr: u32,
    pub p_paddr: u32,
    pub p_filesz: u32,
    pub p_memsz: u32,
    pub p_flags: u32,
    pub p_align: u32,
}

/// Result of a successful load.
#[derive(Debug, Clone, Copy)]
pub struct LoadedImage {
    pub entry_point: u32,
    pub load_base: u32,
    pub memory_size: u32,
}

fn invalid(reason: &'static str) -> KernelError {
    KernelError::InvalidExecutable { reason }
}

/// Validate the fixed header: ELF32, little-endian, executable, i386,
/// non-zero entry, program headers inside the file.
pub fn validate_header(data: &[u8]) -> KernelResult<Elf32Header> {
    if data.len() < core::mem::size_of::<Elf32Header>() {
        return Err(invalid("file shorter than ELF header"));
    }
    // SAFETY: length checked; read_unaligned tolerates any alignment of
    // the backing buffer.
    let header =
        unsafe { core::ptr::read_unaligned(data.as_ptr() as *const Elf32Header) };

    if header.e_ident[..4] != ELF_MAGIC {
        return Err(invalid("bad magic"));
    }
    if header.e_ident[4] != ELF_CLASS_32 {
        return Err(invalid("not ELF32"));
    }
    if header.e_ident[5] != ELF_DATA_LSB {
        return Err(invalid("not little-endian"));
    }
    if header.e_type != ELF_TYPE_EXEC {
        return Err(invalid("not an executable"));
    }
    if header.e_machine != ELF_MACHINE_386 {
        return Err(invalid("not i386"));
    }
    if header.e_entry == 0 {
        return Err(invalid("entry point is zero"));
    }
    if header.e_phnum == 0 {
        return Err(invalid("no program headers"));
    }
    let ph_end = header.e_phoff as usize
        + header.e_phentsize as usize * header.e_phnum as usize;
    if header.e_phentsize as usize != core::mem::size_of::<Elf32ProgramHeader>()
        || ph_end > data.len()
    {
        return Err(invalid("program headers out of bounds"));
    }
    Ok(header)
}

/// Collect the program header table.
pub fn program_headers(data: &[u8], header: &Elf32Header) -> KernelResult<Vec<Elf32ProgramHeader>> {
    let mut headers = Vec::with_capacity(header.e_phnum as usize);
    for i in 0..header.e_phnum as usize {
        let off = header.e_phoff as usize + i * header.e_phentsize as usize;
        // SAFETY: validate_header bounded the table.
        let ph = unsafe {
            core::ptr::read_unaligned(data[off..].as_ptr() as *const Elf32ProgramHeader)
        };
        headers.push(ph);
    }
    Ok(headers)
}

fn check_segment(data: &[u8], ph: &Elf32ProgramHeader) -> KernelResult<()> {
    if ph.p_filesz > ph.p_memsz {
        return Err(invalid("file size exceeds memory size"));
    }
    if ph.p_flags & (PF_R | PF_W | PF_X) == 0 {
        return Err(invalid("segment with no access flags"));
    }
    let file_end = ph
        .p_offset
        .checked_add(ph.p_filesz)
        .ok_or(invalid("segment offset overflow"))?;
    if file_end as usize > data.len() {
        return Err(invalid("segment data out of bounds"));
    }
    // Offsets and addresses must agree modulo the page size.
    if ph.p_offset % PAGE_SIZE as u32 != ph.p_vaddr % PAGE_SIZE as u32 {
        return Err(invalid("segment misaligned"));
    }
    let mem_end = ph
        .p_vaddr
        .checked_add(ph.p_memsz)
        .ok_or(invalid("segment address overflow"))?;
    if mem_end > mm::USER_SPACE_END {
        return Err(invalid("segment outside user space"));
    }
    Ok(())
}

/// Load every PT_LOAD segment of `data` into `space`.
pub fn load(data: &[u8], space: &mut AddressSpace) -> KernelResult<LoadedImage> {
    let header = validate_header(data)?;
    let headers = program_headers(data, &header)?;

    let mut load_base = u32::MAX;
    let mut load_end = 0u32;
    let mut loaded_any = false;

    for ph in headers.iter().filter(|ph| ph.p_type == PT_LOAD) {
        if ph.p_memsz == 0 {
            continue;
        }
        check_segment(data, ph)?;
        loaded_any = true;

        let writable = ph.p_flags & PF_W != 0;
        let first_page = mm::page_align_down(ph.p_vaddr);
        let last_page = mm::page_align_up(ph.p_vaddr + ph.p_memsz);
        load_base = load_base.min(first_page);
        load_end = load_end.max(last_page);

        let mut page = first_page;
        while page < last_page {
            let frame = match space.translate(page) {
                // Segments may share a page (ro text next to rw data);
                // reuse the frame and widen the permission.
                Some(pa) => {
                    if writable {
                        space.protect_page(page, true)?;
                    }
                    mm::page_align_down(pa)
                }
                None => {
                    let frame = FRAME_ALLOCATOR.lock().allocate_zeroed()?;
                    space.map_page(page, frame, writable, true)?;
                    frame
                }
            };

            // Overlap of this page with the segment's file bytes.
            let seg_file_start = ph.p_vaddr;
            let seg_file_end = ph.p_vaddr + ph.p_filesz;
            let copy_start = page.max(seg_file_start);
            let copy_end = (page + PAGE_SIZE as u32).min(seg_file_end);
            if copy_start < copy_end {
                let len = (copy_end - copy_start) as usize;
                let file_off = (ph.p_offset + (copy_start - seg_file_start)) as usize;
                let page_off = (copy_start - page) as usize;
                // SAFETY: the frame is window-reachable and the ranges were
                // bounds-checked against both the file and the page.
                unsafe {
                    core::ptr::copy_nonoverlapping(
                        data[file_off..].as_ptr(),
                        mm::phys_to_virt(frame).add(page_off),
                        len,
                    );
                }
            }
            page += PAGE_SIZE as u32;
        }
    }

    if !loaded_any {
        return Err(invalid("no loadable segments"));
    }

    Ok(LoadedImage {
        entry_point: header.e_entry,
        load_base,
        memory_size: load_end - load_base,
    })
}

/// Map the user stack region below [`mm::USER_STACK_TOP`]. Returns the
/// stack top (the initial ESP is set a few words below by the caller).
pub fn setup_user_stack(space: &mut AddressSpace) -> KernelResult<u32> {
    let top = mm::USER_STACK_TOP;
    let base = top - USER_STACK_BYTES;
    let mut page = base;
    while page < top {
        let frame = FRAME_ALLOCATOR.lock().allocate_zeroed()?;
        space.map_page(page, frame, true, true)?;
        page += PAGE_SIZE as u32;
    }
    Ok(top)
}
