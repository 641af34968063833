// File System Service: reference-counted inodes and open files, plus the
// program registry exec resolves paths against
use alloc::collections::BTreeMap;
use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicU32, Ordering};
use spin::Mutex;
use x86_64::VirtAddr;

use crate::error::{KResult, KernelError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InodeKind {
    Directory,
    File,
    Device,
}

#[derive(Debug)]
pub struct Inode {
    pub inum: u32,
    pub path: String,
    pub kind: InodeKind,
}

/// A counted reference to an in-memory inode
pub type InodeRef = Arc<Inode>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilePermissions {
    ReadOnly,
    WriteOnly,
    ReadWrite,
}

#[derive(Debug)]
pub struct File {
    pub inode: InodeRef,
    pub permissions: FilePermissions,
}

/// A counted reference to an open file
pub type FileRef = Arc<File>;

/// New reference to the same inode
pub fn idup(ip: &InodeRef) -> InodeRef {
    Arc::clone(ip)
}

/// New reference to the same open file
pub fn filedup(f: &FileRef) -> FileRef {
    Arc::clone(f)
}

/// Duplicate every open slot of a file table
pub fn dup_table<const N: usize>(ofile: &[Option<FileRef>; N]) -> [Option<FileRef>; N] {
    core::array::from_fn(|fd| ofile[fd].as_ref().map(filedup))
}

/// Close every open slot, returning how many were open
pub fn close_all(ofile: &mut [Option<FileRef>]) -> usize {
    ofile.iter_mut().filter_map(Option::take).count()
}

/// An executable image as stored on disk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Program {
    pub entry: VirtAddr,
    pub text: Vec<u8>,
}

impl Program {
    pub fn new(entry: u64, text: &[u8]) -> Self {
        Self {
            entry: VirtAddr::new(entry),
            text: Vec::from(text),
        }
    }
}

pub struct Vfs {
    root: InodeRef,
    console: FileRef,
    programs: Mutex<BTreeMap<String, (InodeRef, Program)>>,
    next_inum: AtomicU32,
}

impl Vfs {
    pub fn new() -> Self {
        let root = Arc::new(Inode {
            inum: 1,
            path: String::from("/"),
            kind: InodeKind::Directory,
        });
        let console = Arc::new(File {
            inode: Arc::new(Inode {
                inum: 2,
                path: String::from("/console"),
                kind: InodeKind::Device,
            }),
            permissions: FilePermissions::ReadWrite,
        });

        Self {
            root,
            console,
            programs: Mutex::new(BTreeMap::new()),
            next_inum: AtomicU32::new(3),
        }
    }

    pub fn root(&self) -> InodeRef {
        idup(&self.root)
    }

    /// A new reference to the console file
    pub fn console(&self) -> FileRef {
        filedup(&self.console)
    }

    /// Install an executable at an absolute path, replacing any previous one
    pub fn install(&self, path: &str, program: Program) -> KResult<()> {
        if !path.starts_with('/') || path.len() < 2 || path.ends_with('/') {
            return Err(KernelError::InvalidArgument);
        }

        let inode = Arc::new(Inode {
            inum: self.next_inum.fetch_add(1, Ordering::Relaxed),
            path: String::from(path),
            kind: InodeKind::File,
        });
        self.programs
            .lock()
            .insert(String::from(path), (inode, program));
        Ok(())
    }

    pub fn remove(&self, path: &str) -> KResult<()> {
        self.programs
            .lock()
            .remove(path)
            .map(|_| ())
            .ok_or(KernelError::NotFound)
    }

    /// Resolve a path to its program; relative paths resolve from `/`
    pub fn lookup(&self, path: &str) -> KResult<Program> {
        let programs = self.programs.lock();
        let found = if path.starts_with('/') {
            programs.get(path)
        } else {
            let mut absolute = String::from("/");
            absolute.push_str(path);
            programs.get(absolute.as_str())
        };
        found
            .map(|(_, program)| program.clone())
            .ok_or(KernelError::NotFound)
    }
}

impl Default for Vfs {
    fn default() -> Self {
        Self::new()
    }
}

/// Last component of a path, as used for process names
pub fn basename(path: &str) -> &str {
    path.rsplit('/').find(|s| !s.is_empty()).unwrap_or(path)
}
