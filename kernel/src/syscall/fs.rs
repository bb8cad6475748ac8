//! Filesystem system calls.

use alloc::{format, string::String};

use super::{caller, caller_space, SUCCESS};
use crate::error::SyscallError;
use crate::fs::{self, FileType, OpenFlags};
use crate::mm::user_validation;

/// On-wire directory entry for READDIR: a fixed layout the user library
/// shares.
#[repr(C)]
pub struct AbiDirEntry {
    pub name: [u8; 256],
    pub inode: u32,
    pub file_type: u8,
}

pub const ABI_FILE_REGULAR: u8 = 0;
pub const ABI_FILE_DIRECTORY: u8 = 1;

fn read_path(ptr: u32) -> Result<String, SyscallError> {
    let (_p, space) = caller_space()?;
    user_validation::str_from_user(space, ptr).map_err(|_| SyscallError::InvalidParameter)
}

/// Resolve a possibly-relative path against the caller's cwd.
fn absolute(path: &str) -> Result<String, SyscallError> {
    if path.starts_with('/') {
        return Ok(String::from(path));
    }
    let p = caller()?;
    let cwd = p.cwd();
    if cwd.ends_with('/') {
        Ok(format!("{cwd}{path}"))
    } else {
        Ok(format!("{cwd}/{path}"))
    }
}

/// OPEN(path, flags): returns a descriptor.
pub fn sys_open(path_ptr: u32, raw_flags: u32) -> i32 {
    let path = match read_path(path_ptr) {
        Ok(p) => p,
        Err(e) => return e.as_i32(),
    };
    let path = match absolute(&path) {
        Ok(p) => p,
        Err(e) => return e.as_i32(),
    };
    let flags = OpenFlags::from_raw(raw_flags);
    let node = match fs::open(&path, flags) {
        Ok(node) => node,
        Err(e) => return SyscallError::from(e).as_i32(),
    };
    let p = match caller() {
        Ok(p) => p,
        Err(e) => return e.as_i32(),
    };
    match p.file_table.open(node, flags) {
        Ok(fd) => fd,
        Err(e) => SyscallError::from(e).as_i32(),
    }
}

/// CLOSE(fd).
pub fn sys_close(fd: i32) -> i32 {
    let p = match caller() {
        Ok(p) => p,
        Err(e) => return e.as_i32(),
    };
    match p.file_table.close(fd) {
        Ok(()) => SUCCESS,
        Err(_) => SyscallError::InvalidParameter.as_i32(),
    }
}

/// READ_FILE(fd, buf, n): stream read at the descriptor position.
pub fn sys_read_file(fd: i32, buf: u32, n: u32) -> i32 {
    if buf == 0 || n == 0 {
        return SyscallError::InvalidParameter.as_i32();
    }
    let (p, space) = match caller_space() {
        Ok(v) => v,
        Err(e) => return e.as_i32(),
    };
    let file = match p.file_table.get_mut(fd) {
        Ok(f) => f,
        Err(_) => return SyscallError::InvalidParameter.as_i32(),
    };
    if !file.flags.read {
        return SyscallError::PermissionDenied.as_i32();
    }

    let mut kernel_buf = alloc::vec![0u8; n as usize];
    let read = match file.node.read_at(file.position, &mut kernel_buf) {
        Ok(read) => read,
        Err(e) => return SyscallError::from(e).as_i32(),
    };
    if read > 0 {
        if user_validation::copy_to_user(space, buf, &kernel_buf[..read as usize]).is_err() {
            return SyscallError::InvalidParameter.as_i32();
        }
        file.position += read;
    }
    read as i32
}

/// WRITE_FILE(fd, buf, n): stream write at the descriptor position.
pub fn sys_write_file(fd: i32, buf: u32, n: u32) -> i32 {
    if buf == 0 || n == 0 {
        return SyscallError::InvalidParameter.as_i32();
    }
    let (p, space) = match caller_space() {
        Ok(v) => v,
        Err(e) => return e.as_i32(),
    };
    let file = match p.file_table.get_mut(fd) {
        Ok(f) => f,
        Err(_) => return SyscallError::InvalidParameter.as_i32(),
    };
    if !file.flags.write {
        return SyscallError::PermissionDenied.as_i32();
    }

    let mut kernel_buf = alloc::vec![0u8; n as usize];
    if user_validation::copy_from_user(space, buf, &mut kernel_buf).is_err() {
        return SyscallError::InvalidParameter.as_i32();
    }
    let position = if file.flags.append {
        file.node.size()
    } else {
        file.position
    };
    let written = match file.node.write_at(position, &kernel_buf) {
        Ok(w) => w,
        Err(e) => return SyscallError::from(e).as_i32(),
    };
    file.position = position + written;
    written as i32
}

/// READDIR(path, index, entryPtr): read the index-th entry of a directory.
pub fn sys_readdir(path_ptr: u32, index: u32, entry_ptr: u32) -> i32 {
    if entry_ptr == 0 {
        return SyscallError::InvalidParameter.as_i32();
    }
    let path = match read_path(path_ptr).and_then(|p| absolute(&p)) {
        Ok(p) => p,
        Err(e) => return e.as_i32(),
    };
    let entry = match fs::readdir(&path, index) {
        Ok(entry) => entry,
        Err(e) => return SyscallError::from(e).as_i32(),
    };

    // Zero-initialized so the padding bytes copied to user space are
    // defined.
    // SAFETY: AbiDirEntry is repr(C) plain old data; all-zero is valid.
    let mut abi: AbiDirEntry = unsafe { core::mem::zeroed() };
    abi.inode = entry.inode;
    abi.file_type = match entry.file_type {
        FileType::Regular => ABI_FILE_REGULAR,
        FileType::Directory => ABI_FILE_DIRECTORY,
    };
    let name = entry.name.as_bytes();
    let len = name.len().min(255);
    abi.name[..len].copy_from_slice(&name[..len]);

    let (_p, space) = match caller_space() {
        Ok(v) => v,
        Err(e) => return e.as_i32(),
    };
    // SAFETY: AbiDirEntry is repr(C) plain bytes.
    let bytes = unsafe {
        core::slice::from_raw_parts(
            &abi as *const AbiDirEntry as *const u8,
            core::mem::size_of::<AbiDirEntry>(),
        )
    };
    match user_validation::copy_to_user(space, entry_ptr, bytes) {
        Ok(()) => SUCCESS,
        Err(_) => SyscallError::InvalidParameter.as_i32(),
    }
}

/// MKDIR(path).
pub fn sys_mkdir(path_ptr: u32) -> i32 {
    let path = match read_path(path_ptr).and_then(|p| absolute(&p)) {
        Ok(p) => p,
        Err(e) => return e.as_i32(),
    };
    match fs::mkdir(&path) {
        Ok(()) => SUCCESS,
        Err(e) => SyscallError::from(e).as_i32(),
    }
}

/// RMDIR(path).
pub fn sys_rmdir(path_ptr: u32) -> i32 {
    let path = match read_path(path_ptr).and_then(|p| absolute(&p)) {
        Ok(p) => p,
        Err(e) => return e.as_i32(),
    };
    match fs::rmdir(&path) {
        Ok(()) => SUCCESS,
        Err(e) => SyscallError::from(e).as_i32(),
    }
}

/// CHDIR(path): absolute paths only; the target must be a directory.
pub fn sys_chdir(path_ptr: u32) -> i32 {
    let path = match read_path(path_ptr) {
        Ok(p) => p,
        Err(e) => return e.as_i32(),
    };
    if !path.starts_with('/') {
        return SyscallError::InvalidParameter.as_i32();
    }
    match fs::stat(&path) {
        Ok(stat) if stat.file_type == FileType::Directory => {}
        Ok(_) => return SyscallError::NotDirectory.as_i32(),
        Err(_) => return SyscallError::FileNotFound.as_i32(),
    }
    let p = match caller() {
        Ok(p) => p,
        Err(e) => return e.as_i32(),
    };
    p.set_cwd(&path);
    SUCCESS
}

/// GETCWD(buf, size): copy the working directory out, NUL-terminated.
pub fn sys_getcwd(buf: u32, size: u32) -> i32 {
    if buf == 0 || size == 0 {
        return SyscallError::InvalidParameter.as_i32();
    }
    let (p, space) = match caller_space() {
        Ok(v) => v,
        Err(e) => return e.as_i32(),
    };
    let cwd = p.cwd();
    let len = cwd.len().min(size as usize - 1);
    let mut out = alloc::vec::Vec::with_capacity(len + 1);
    out.extend_from_slice(&cwd.as_bytes()[..len]);
    out.push(0);
    match user_validation::copy_to_user(space, buf, &out) {
        Ok(()) => SUCCESS,
        Err(_) => SyscallError::InvalidParameter.as_i32(),
    }
}

/// GETCWD_PTR: the address of the caller's cwd buffer.
pub fn sys_getcwd_ptr() -> i32 {
    match caller() {
        Ok(p) => p.cwd.as_ptr() as usize as i32,
        Err(e) => e.as_i32(),
    }
}
