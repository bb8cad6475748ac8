//! Validation and copying of user-supplied pointers.
//!
//! Syscall arguments that point into user space are untrusted: every access
//! walks the caller's page tables first and copies through the kernel
//! window, so a bad pointer surfaces as an error code instead of a kernel
//! fault.

#[cfg(feature = "alloc")]
extern crate alloc;

#[cfg(feature = "alloc")]
use alloc::{string::String, vec::Vec};

use super::{AddressSpace, PAGE_SIZE, USER_SPACE_END};
use crate::error::{KernelResult, MemError};

/// Longest path or argument string accepted from user space.
pub const USER_STR_MAX: usize = 256;

/// Check that `[va, va + len)` lies in user space and every page is mapped
/// (and writable, when `write` is set).
pub fn validate_range(space: &AddressSpace, va: u32, len: u32, write: bool) -> KernelResult<()> {
    if len == 0 {
        return Ok(());
    }
    let end = va
        .checked_add(len)
        .ok_or(MemError::BadUserPointer { addr: va })?;
    if va == 0 || end > USER_SPACE_END {
        return Err(MemError::BadUserPointer { addr: va }.into());
    }

    let mut page = super::page_align_down(va);
    while page < end {
        match space.page_flags(page) {
            Some(flags) if !write || flags.contains(super::PageFlags::WRITABLE) => {}
            _ => return Err(MemError::BadUserPointer { addr: page }.into()),
        }
        match page.checked_add(PAGE_SIZE as u32) {
            Some(next) => page = next,
            None => break,
        }
    }
    Ok(())
}

/// Copy `buf.len()` bytes from user memory into a kernel buffer.
pub fn copy_from_user(space: &AddressSpace, va: u32, buf: &mut [u8]) -> KernelResult<()> {
    validate_range(space, va, buf.len() as u32, false)?;
    let mut copied = 0usize;
    while copied < buf.len() {
        let cur = va + copied as u32;
        let pa = space
            .translate(cur)
            .ok_or(MemError::BadUserPointer { addr: cur })?;
        let in_page = PAGE_SIZE - (cur as usize & (PAGE_SIZE - 1));
        let chunk = in_page.min(buf.len() - copied);
        // SAFETY: translate succeeded, so the physical page is live and
        // reachable through the kernel window for `chunk <= in_page` bytes.
        unsafe {
            core::ptr::copy_nonoverlapping(
                super::phys_to_virt(pa),
                buf[copied..].as_mut_ptr(),
                chunk,
            );
        }
        copied += chunk;
    }
    Ok(())
}

/// Copy a kernel buffer out to user memory.
pub fn copy_to_user(space: &AddressSpace, va: u32, bytes: &[u8]) -> KernelResult<()> {
    validate_range(space, va, bytes.len() as u32, true)?;
    let mut copied = 0usize;
    while copied < bytes.len() {
        let cur = va + copied as u32;
        let pa = space
            .translate(cur)
            .ok_or(MemError::BadUserPointer { addr: cur })?;
        let in_page = PAGE_SIZE - (cur as usize & (PAGE_SIZE - 1));
        let chunk = in_page.min(bytes.len() - copied);
        // SAFETY: validate_range confirmed the page is mapped writable.
        unsafe {
            core::ptr::copy_nonoverlapping(bytes[copied..].as_ptr(), super::phys_to_virt(pa), chunk);
        }
        copied += chunk;
    }
    Ok(())
}

/// Read a NUL-terminated string from user memory, capped at
/// [`USER_STR_MAX`] bytes including the terminator.
#[cfg(feature = "alloc")]
pub fn str_from_user(space: &AddressSpace, va: u32) -> KernelResult<String> {
    if va == 0 {
        return Err(MemError::BadUserPointer { addr: 0 }.into());
    }
    let mut bytes = Vec::new();
    for i in 0..USER_STR_MAX as u32 {
        let mut byte = [0u8; 1];
        copy_from_user(space, va + i, &mut byte)?;
        if byte[0] == 0 {
            return String::from_utf8(bytes)
                .map_err(|_| MemError::BadUserPointer { addr: va }.into());
        }
        bytes.push(byte[0]);
    }
    Err(MemError::BadUserPointer { addr: va }.into())
}
