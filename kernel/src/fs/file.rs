//! Per-process file descriptor table.

use alloc::{sync::Arc, vec::Vec};

use super::VfsNode;
use crate::error::FsError;

/// Descriptor slots per process.
pub const MAX_OPEN_FILES: usize = 256;

/// Decoded open flags.
///
/// The raw encoding matches the syscall ABI: low two bits select the access
/// mode (0 read-only, 1 write-only, 2 read-write); 0x40 CREATE, 0x200
/// TRUNCATE, 0x400 APPEND.
#[derive(Debug, Clone, Copy, Default)]
pub struct OpenFlags {
    pub read: bool,
    pub write: bool,
    pub create: bool,
    pub truncate: bool,
    pub append: bool,
}

impl OpenFlags {
    pub const RAW_WRITE_ONLY: u32 = 0x01;
    pub const RAW_READ_WRITE: u32 = 0x02;
    pub const RAW_CREATE: u32 = 0x40;
    pub const RAW_TRUNCATE: u32 = 0x200;
    pub const RAW_APPEND: u32 = 0x400;

    /// Decode the ABI representation.
    pub fn from_raw(raw: u32) -> Self {
        let mode = raw & 0x03;
        Self {
            read: mode != Self::RAW_WRITE_ONLY,
            write: mode == Self::RAW_WRITE_ONLY || mode == Self::RAW_READ_WRITE,
            create: raw & Self::RAW_CREATE != 0,
            truncate: raw & Self::RAW_TRUNCATE != 0,
            append: raw & Self::RAW_APPEND != 0,
        }
    }

    pub fn read_only() -> Self {
        Self::from_raw(0)
    }

    pub fn read_write() -> Self {
        Self::from_raw(Self::RAW_READ_WRITE)
    }
}

/// One open descriptor: a shared vnode plus this descriptor's own state.
pub struct OpenFile {
    pub node: Arc<dyn VfsNode>,
    pub flags: OpenFlags,
    pub position: u32,
}

impl OpenFile {
    /// Move the stream position. Positions past EOF are legal; the next
    /// write extends the file, the next read returns nothing.
    pub fn seek(&mut self, position: u32) {
        self.position = position;
    }
}

/// Per-process descriptor table. Grows on demand up to
/// [`MAX_OPEN_FILES`]; the lowest free index is always reused first.
pub struct FileTable {
    entries: Vec<Option<OpenFile>>,
}

impl FileTable {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Install a node, returning the new descriptor.
    pub fn open(&mut self, node: Arc<dyn VfsNode>, flags: OpenFlags) -> Result<i32, FsError> {
        let file = OpenFile {
            node,
            flags,
            position: 0,
        };
        for (fd, entry) in self.entries.iter_mut().enumerate() {
            if entry.is_none() {
                *entry = Some(file);
                return Ok(fd as i32);
            }
        }
        if self.entries.len() >= MAX_OPEN_FILES {
            return Err(FsError::TooManyFiles);
        }
        self.entries.push(Some(file));
        Ok((self.entries.len() - 1) as i32)
    }

    pub fn get_mut(&mut self, fd: i32) -> Result<&mut OpenFile, FsError> {
        if fd < 0 {
            return Err(FsError::InvalidParameter);
        }
        self.entries
            .get_mut(fd as usize)
            .and_then(|e| e.as_mut())
            .ok_or(FsError::InvalidParameter)
    }

    pub fn close(&mut self, fd: i32) -> Result<(), FsError> {
        if fd < 0 {
            return Err(FsError::InvalidParameter);
        }
        match self.entries.get_mut(fd as usize) {
            Some(entry @ Some(_)) => {
                *entry = None;
                Ok(())
            }
            _ => Err(FsError::InvalidParameter),
        }
    }

    /// Number of open descriptors.
    pub fn open_count(&self) -> usize {
        self.entries.iter().filter(|e| e.is_some()).count()
    }

    /// Duplicate the table for fork: the vnode is shared, the position and
    /// flags are copied per descriptor so neither side advances the other.
    pub fn clone_for_fork(&self) -> Self {
        Self {
            entries: self
                .entries
                .iter()
                .map(|entry| {
                    entry.as_ref().map(|f| OpenFile {
                        node: Arc::clone(&f.node),
                        flags: f.flags,
                        position: f.position,
                    })
                })
                .collect(),
        }
    }
}

impl Default for FileTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::{DirEntry, FileStat, FileType};

    /// Minimal in-memory node for table tests.
    struct NullNode;

    impl VfsNode for NullNode {
        fn file_type(&self) -> FileType {
            FileType::Regular
        }
        fn size(&self) -> u32 {
            0
        }
        fn read_at(&self, _offset: u32, _buf: &mut [u8]) -> Result<u32, FsError> {
            Ok(0)
        }
        fn write_at(&self, _offset: u32, data: &[u8]) -> Result<u32, FsError> {
            Ok(data.len() as u32)
        }
        fn stat(&self) -> Result<FileStat, FsError> {
            Ok(FileStat {
                size: 0,
                file_type: FileType::Regular,
            })
        }
        fn read_dir(&self, _index: u32) -> Result<DirEntry, FsError> {
            Err(FsError::NotDirectory)
        }
        fn lookup(&self, _name: &str) -> Result<Arc<dyn VfsNode>, FsError> {
            Err(FsError::NotDirectory)
        }
        fn create(&self, _name: &str, _t: FileType) -> Result<Arc<dyn VfsNode>, FsError> {
            Err(FsError::NotDirectory)
        }
        fn remove(&self, _name: &str) -> Result<(), FsError> {
            Err(FsError::NotDirectory)
        }
        fn truncate(&self) -> Result<(), FsError> {
            Ok(())
        }
    }

    #[test]
    fn flags_decode_access_modes() {
        let ro = OpenFlags::from_raw(0);
        assert!(ro.read && !ro.write);
        let wo = OpenFlags::from_raw(OpenFlags::RAW_WRITE_ONLY);
        assert!(!wo.read && wo.write);
        let rw = OpenFlags::from_raw(OpenFlags::RAW_READ_WRITE | OpenFlags::RAW_CREATE);
        assert!(rw.read && rw.write && rw.create);
    }

    #[test]
    fn descriptors_reuse_lowest_free_slot() {
        let mut table = FileTable::new();
        let a = table.open(Arc::new(NullNode), OpenFlags::read_only()).unwrap();
        let b = table.open(Arc::new(NullNode), OpenFlags::read_only()).unwrap();
        let c = table.open(Arc::new(NullNode), OpenFlags::read_only()).unwrap();
        assert_eq!((a, b, c), (0, 1, 2));

        table.close(b).unwrap();
        let again = table
            .open(Arc::new(NullNode), OpenFlags::read_only())
            .unwrap();
        assert_eq!(again, 1);
    }

    #[test]
    fn close_rejects_bad_descriptors() {
        let mut table = FileTable::new();
        assert!(table.close(-1).is_err());
        assert!(table.close(0).is_err());
        let fd = table.open(Arc::new(NullNode), OpenFlags::read_only()).unwrap();
        table.close(fd).unwrap();
        assert!(table.close(fd).is_err());
    }

    #[test]
    fn seek_moves_the_stream_position() {
        let mut table = FileTable::new();
        let fd = table
            .open(Arc::new(NullNode), OpenFlags::read_write())
            .unwrap();
        let file = table.get_mut(fd).unwrap();
        assert_eq!(file.position, 0);
        file.seek(512);
        assert_eq!(file.position, 512);
        file.seek(0);
        assert_eq!(file.position, 0);
    }

    #[test]
    fn fork_clone_copies_positions() {
        let mut table = FileTable::new();
        let fd = table
            .open(Arc::new(NullNode), OpenFlags::read_write())
            .unwrap();
        table.get_mut(fd).unwrap().position = 40;

        let mut child = table.clone_for_fork();
        child.get_mut(fd).unwrap().position = 99;
        // The parent's offset is untouched by the child's movement.
        assert_eq!(table.get_mut(fd).unwrap().position, 40);
        assert_eq!(child.open_count(), 1);
    }
}
