//! VFS and cluster-chain filesystem behavior through the public surface.

mod common;

use common::{lock_kernel, mount_fresh_fs, reset_kernel};
use ember_kernel::error::FsError;
use ember_kernel::fs::{self, FileType, OpenFlags};

fn rw_create() -> OpenFlags {
    OpenFlags::from_raw(OpenFlags::RAW_READ_WRITE | OpenFlags::RAW_CREATE)
}

/// Write-then-read round trip through open/write/close/open/read
/// (scenario: "Hello, VFS World!" at /tmp/x).
#[test]
fn file_round_trip() {
    let _g = lock_kernel();
    reset_kernel();
    mount_fresh_fs();

    fs::mkdir("/tmp").unwrap();
    let payload = b"Hello, VFS World!";

    {
        let node = fs::open("/tmp/x", rw_create()).unwrap();
        assert_eq!(node.write_at(0, payload).unwrap() as usize, payload.len());
    }

    let node = fs::open("/tmp/x", OpenFlags::read_only()).unwrap();
    let mut buf = [0u8; 17];
    assert_eq!(node.read_at(0, &mut buf).unwrap() as usize, payload.len());
    assert_eq!(&buf, payload);
    assert_eq!(node.size() as usize, payload.len());
}

/// MKDIR on an existing path and RMDIR on a missing one return the
/// dedicated codes.
#[test]
fn mkdir_rmdir_error_codes() {
    let _g = lock_kernel();
    reset_kernel();
    mount_fresh_fs();

    fs::mkdir("/work").unwrap();
    assert_eq!(fs::mkdir("/work"), Err(FsError::Exists));
    assert_eq!(fs::rmdir("/missing"), Err(FsError::NotFound));

    // RMDIR on a regular file is NotDirectory.
    fs::open("/plain", rw_create()).unwrap();
    assert_eq!(fs::rmdir("/plain"), Err(FsError::NotDirectory));

    fs::rmdir("/work").unwrap();
    assert_eq!(fs::stat("/work").err(), Some(FsError::NotFound));
}

/// Nested directories resolve, including `.` and `..` components, and
/// stop at the first missing element.
#[test]
fn nested_path_resolution() {
    let _g = lock_kernel();
    reset_kernel();
    mount_fresh_fs();

    fs::mkdir("/a").unwrap();
    fs::mkdir("/a/b").unwrap();
    let node = fs::open("/a/b/file.txt", rw_create()).unwrap();
    node.write_at(0, b"deep").unwrap();

    assert_eq!(fs::stat("/a/b/file.txt").unwrap().size, 4);
    assert_eq!(fs::stat("/a/./b/../b/file.txt").unwrap().size, 4);
    assert_eq!(
        fs::stat("/a/missing/file.txt").err(),
        Some(FsError::NotFound)
    );
    // A file used as a directory component is refused.
    assert_eq!(
        fs::stat("/a/b/file.txt/deeper").err(),
        Some(FsError::NotDirectory)
    );
    // Relative paths are invalid at the VFS boundary.
    assert_eq!(fs::stat("a/b").err(), Some(FsError::InvalidParameter));
}

/// Readdir walks entries by index; mkdir seeds dot entries; rmdir refuses
/// a directory still holding real entries.
#[test]
fn readdir_and_rmdir_emptiness() {
    let _g = lock_kernel();
    reset_kernel();
    mount_fresh_fs();

    fs::mkdir("/dir").unwrap();
    fs::open("/dir/one.txt", rw_create()).unwrap();
    fs::open("/dir/two.txt", rw_create()).unwrap();

    let mut names = Vec::new();
    let mut index = 0;
    while let Ok(entry) = fs::readdir("/dir", index) {
        names.push((entry.name.clone(), entry.file_type));
        index += 1;
    }
    assert_eq!(
        names,
        vec![
            (".".to_string(), FileType::Directory),
            ("..".to_string(), FileType::Directory),
            ("ONE.TXT".to_string(), FileType::Regular),
            ("TWO.TXT".to_string(), FileType::Regular),
        ]
    );

    assert!(fs::rmdir("/dir").is_err());
    let dir = fs::resolve("/dir").unwrap();
    dir.remove("one.txt").unwrap();
    dir.remove("two.txt").unwrap();
    fs::rmdir("/dir").unwrap();
}

/// Overwrites in place, growth past the end, truncation on open, and
/// append-style sizing.
#[test]
fn write_semantics() {
    let _g = lock_kernel();
    reset_kernel();
    mount_fresh_fs();

    let node = fs::open("/f.bin", rw_create()).unwrap();
    node.write_at(0, &[0x55; 800]).unwrap();
    assert_eq!(node.size(), 800);

    // Overwrite inside the file does not change the size.
    node.write_at(100, &[0x66; 50]).unwrap();
    assert_eq!(node.size(), 800);
    let mut probe = [0u8; 2];
    node.read_at(99, &mut probe).unwrap();
    assert_eq!(probe, [0x55, 0x66]);

    // Writing past the end extends the chain.
    node.write_at(790, &[0x77; 600]).unwrap();
    assert_eq!(node.size(), 1390);

    // Reopening with TRUNCATE drops the content.
    let node = fs::open(
        "/f.bin",
        OpenFlags::from_raw(OpenFlags::RAW_READ_WRITE | OpenFlags::RAW_TRUNCATE),
    )
    .unwrap();
    assert_eq!(node.size(), 0);
    let mut buf = [0u8; 4];
    assert_eq!(node.read_at(0, &mut buf).unwrap(), 0);
}

/// Opening a directory for writing is refused; reads on it are refused
/// with IsDirectory.
#[test]
fn directory_nodes_refuse_file_io() {
    let _g = lock_kernel();
    reset_kernel();
    mount_fresh_fs();

    fs::mkdir("/d").unwrap();
    assert_eq!(
        fs::open("/d", OpenFlags::from_raw(OpenFlags::RAW_READ_WRITE)).err(),
        Some(FsError::IsDirectory)
    );

    let node = fs::resolve("/d").unwrap();
    let mut buf = [0u8; 8];
    assert_eq!(node.read_at(0, &mut buf).err(), Some(FsError::IsDirectory));
    assert_eq!(node.write_at(0, &buf).err(), Some(FsError::IsDirectory));

    // And readdir on a regular file is NotDirectory.
    fs::open("/reg", rw_create()).unwrap();
    assert_eq!(fs::readdir("/reg", 0).err(), Some(FsError::NotDirectory));
}

/// Without a mounted root every operation reports an I/O error instead of
/// panicking.
#[test]
fn unmounted_vfs_fails_closed() {
    let _g = lock_kernel();
    reset_kernel();

    assert_eq!(fs::stat("/x").err(), Some(FsError::IoError));
    assert_eq!(fs::mkdir("/x").err(), Some(FsError::IoError));
    assert_eq!(
        fs::open("/x", OpenFlags::read_only()).err(),
        Some(FsError::IoError)
    );
    assert_eq!(fs::sync().err(), Some(FsError::IoError));
}

/// Sync completes and a second mount attempt is rejected while one is
/// active.
#[test]
fn mount_lifecycle() {
    let _g = lock_kernel();
    reset_kernel();
    mount_fresh_fs();

    fs::open("/persist", rw_create())
        .unwrap()
        .write_at(0, b"bytes")
        .unwrap();
    fs::sync().unwrap();

    let disk = Box::new(ember_kernel::fs::blockdev::RamDisk::new("other", 256));
    let second = ember_kernel::fs::fat::FatFileSystem::format(disk, 1).unwrap();
    assert_eq!(
        ember_kernel::fs::mount_root(std::sync::Arc::new(second)).err(),
        Some(FsError::Exists)
    );

    fs::unmount_root().unwrap();
    assert_eq!(fs::stat("/persist").err(), Some(FsError::IoError));
}
