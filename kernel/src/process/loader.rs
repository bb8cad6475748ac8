//! Exec: load an ELF from the filesystem into a fresh process.

use alloc::vec;

use crate::elf;
use crate::error::{FsError, KernelError, KernelResult};
use crate::fs::{self, FileType};
use crate::mm::{address_space::release_user_frames, AddressSpace};
use crate::process::table;

/// Cap on the ELF image buffer (64 KiB).
pub const EXEC_IMAGE_MAX: u32 = 64 * 1024;

/// Load the executable at `path` (absolute), build a new user process, and
/// return its pid. The caller keeps running; it can WAIT on the child.
/// `arg` is handed to the child through its spawn-argument buffer.
pub fn exec(path: &str, arg: Option<&str>) -> KernelResult<u32> {
    let node = fs::resolve(path).map_err(KernelError::Fs)?;
    if node.file_type() != FileType::Regular {
        return Err(FsError::IsDirectory.into());
    }
    let size = node.size();
    if size == 0 {
        return Err(FsError::InvalidParameter.into());
    }
    if size > EXEC_IMAGE_MAX {
        return Err(FsError::NoSpace.into());
    }

    let mut image = vec![0u8; size as usize];
    let read = node.read_at(0, &mut image).map_err(KernelError::Fs)?;
    if read != size {
        return Err(FsError::IoError.into());
    }

    let mut space = AddressSpace::new_user()?;
    let loaded = match elf::load(&image, &mut space) {
        Ok(loaded) => loaded,
        Err(e) => {
            release_user_frames(&mut space);
            space.destroy();
            return Err(e);
        }
    };
    let stack_top = match elf::setup_user_stack(&mut space) {
        Ok(top) => top,
        Err(e) => {
            release_user_frames(&mut space);
            space.destroy();
            return Err(e);
        }
    };

    let name = path.rsplit('/').next().unwrap_or("elf");
    // Initial ESP a few words below the top, as the stack setup leaves it.
    let pid = super::lifecycle::create_process_from_elf(
        space,
        loaded.entry_point,
        stack_top - 16,
        name,
        crate::process::DEFAULT_PRIORITY,
    )?;

    // Inherit the caller's working directory and pass the spawn argument;
    // record the parent link. The caller is resumed first (no yield here).
    if let Some((_, child)) = table::process_by_pid(pid) {
        if let Some(parent) = super::current_process_mut() {
            child.parent_pid = parent.pid;
            child.cwd = parent.cwd;
        }
        match arg {
            Some(arg) => child.set_spawn_arg(arg),
            None => child.set_spawn_arg(""),
        }
    }

    log::info!("exec {path} -> pid {pid}");
    Ok(pid)
}
