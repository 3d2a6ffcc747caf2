//! Provisioning backend
//!
//! The handful of OS effects provisioning needs, behind one trait so the
//! pipeline can run against the real filesystem or entirely in memory.

use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// OS capabilities used while provisioning
pub trait ProvisioningBackend {
    fn remove_file(&self, path: &Path) -> io::Result<()>;
    fn create_fifo(&self, path: &Path, mode: u32) -> io::Result<()>;
    fn set_owner(&self, path: &Path, uid: u32, gid: u32) -> io::Result<()>;
    /// Create `path` and any missing parents; an existing directory is fine
    fn make_dir_all(&self, path: &Path) -> io::Result<()>;
    /// Create or truncate `path` with `contents`
    fn write_file(&self, path: &Path, contents: &[u8], mode: u32) -> io::Result<()>;
}

/// The real thing: libc `mkfifo`, `chown` and std::fs
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemBackend;

#[cfg(unix)]
impl ProvisioningBackend for SystemBackend {
    fn remove_file(&self, path: &Path) -> io::Result<()> {
        fs::remove_file(path)
    }

    fn create_fifo(&self, path: &Path, mode: u32) -> io::Result<()> {
        use std::ffi::CString;
        use std::os::unix::ffi::OsStrExt;

        let c_path = CString::new(path.as_os_str().as_bytes())
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;

        // SAFETY: c_path is a valid NUL-terminated string for the duration of the call
        let rc = unsafe { libc::mkfifo(c_path.as_ptr(), mode as libc::mode_t) };
        if rc != 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    fn set_owner(&self, path: &Path, uid: u32, gid: u32) -> io::Result<()> {
        std::os::unix::fs::chown(path, Some(uid), Some(gid))
    }

    fn make_dir_all(&self, path: &Path) -> io::Result<()> {
        fs::create_dir_all(path)
    }

    fn write_file(&self, path: &Path, contents: &[u8], mode: u32) -> io::Result<()> {
        use std::io::Write;
        use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};

        let mut file = fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(mode)
            .open(path)?;
        file.write_all(contents)?;
        // mode() only applies to newly created files
        fs::set_permissions(path, fs::Permissions::from_mode(mode))
    }
}

#[cfg(not(unix))]
impl ProvisioningBackend for SystemBackend {
    fn remove_file(&self, path: &Path) -> io::Result<()> {
        fs::remove_file(path)
    }

    fn create_fifo(&self, _path: &Path, _mode: u32) -> io::Result<()> {
        Err(io::Error::new(io::ErrorKind::Unsupported, "named pipes need a unix host"))
    }

    fn set_owner(&self, _path: &Path, _uid: u32, _gid: u32) -> io::Result<()> {
        Err(io::Error::new(io::ErrorKind::Unsupported, "chown needs a unix host"))
    }

    fn make_dir_all(&self, path: &Path) -> io::Result<()> {
        fs::create_dir_all(path)
    }

    fn write_file(&self, path: &Path, contents: &[u8], _mode: u32) -> io::Result<()> {
        fs::write(path, contents)
    }
}

/// A node in the in-memory tree
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MemoryNode {
    Fifo { mode: u32, owner: Option<(u32, u32)> },
    File { contents: Vec<u8>, mode: u32 },
}

/// Which operation an injected failure hits
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum FailOn {
    CreateFifo,
    SetOwner,
    MakeDir,
    WriteFile,
}

/// In-memory backend for tests and dry runs
///
/// Directories are tracked as a set, files and fifos as nodes keyed by path.
/// Failures can be injected per path and operation.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    nodes: RefCell<BTreeMap<PathBuf, MemoryNode>>,
    dirs: RefCell<BTreeSet<PathBuf>>,
    failures: RefCell<BTreeSet<(FailOn, PathBuf)>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `op` on `path` fail with a permission error
    pub fn fail(&self, op: FailOn, path: impl Into<PathBuf>) {
        self.failures.borrow_mut().insert((op, path.into()));
    }

    /// Seed an existing regular file, e.g. a stale fifo left as a file
    pub fn insert_file(&self, path: impl Into<PathBuf>, contents: &[u8]) {
        self.nodes.borrow_mut().insert(
            path.into(),
            MemoryNode::File {
                contents: contents.to_vec(),
                mode: 0o644,
            },
        );
    }

    pub fn node(&self, path: &Path) -> Option<MemoryNode> {
        self.nodes.borrow().get(path).cloned()
    }

    pub fn is_fifo(&self, path: &Path) -> bool {
        matches!(self.node(path), Some(MemoryNode::Fifo { .. }))
    }

    pub fn owner(&self, path: &Path) -> Option<(u32, u32)> {
        match self.node(path) {
            Some(MemoryNode::Fifo { owner, .. }) => owner,
            _ => None,
        }
    }

    pub fn has_dir(&self, path: &Path) -> bool {
        self.dirs.borrow().contains(path)
    }

    /// Contents of a regular file as UTF-8
    pub fn read_to_string(&self, path: &Path) -> Option<String> {
        match self.node(path) {
            Some(MemoryNode::File { contents, .. }) => String::from_utf8(contents).ok(),
            _ => None,
        }
    }

    /// Paths of all fifos, sorted
    pub fn fifos(&self) -> Vec<PathBuf> {
        self.nodes
            .borrow()
            .iter()
            .filter(|(_, node)| matches!(node, MemoryNode::Fifo { .. }))
            .map(|(path, _)| path.clone())
            .collect()
    }

    /// Paths of all regular files, sorted
    pub fn files(&self) -> Vec<PathBuf> {
        self.nodes
            .borrow()
            .iter()
            .filter(|(_, node)| matches!(node, MemoryNode::File { .. }))
            .map(|(path, _)| path.clone())
            .collect()
    }

    fn check(&self, op: FailOn, path: &Path) -> io::Result<()> {
        if self.failures.borrow().contains(&(op, path.to_path_buf())) {
            return Err(io::Error::new(
                io::ErrorKind::PermissionDenied,
                format!("injected {:?} failure", op),
            ));
        }
        Ok(())
    }
}

impl ProvisioningBackend for MemoryBackend {
    fn remove_file(&self, path: &Path) -> io::Result<()> {
        match self.nodes.borrow_mut().remove(path) {
            Some(_) => Ok(()),
            None => Err(io::Error::from(io::ErrorKind::NotFound)),
        }
    }

    fn create_fifo(&self, path: &Path, mode: u32) -> io::Result<()> {
        self.check(FailOn::CreateFifo, path)?;
        let mut nodes = self.nodes.borrow_mut();
        if nodes.contains_key(path) || self.dirs.borrow().contains(path) {
            return Err(io::Error::from(io::ErrorKind::AlreadyExists));
        }
        nodes.insert(path.to_path_buf(), MemoryNode::Fifo { mode, owner: None });
        Ok(())
    }

    fn set_owner(&self, path: &Path, uid: u32, gid: u32) -> io::Result<()> {
        self.check(FailOn::SetOwner, path)?;
        match self.nodes.borrow_mut().get_mut(path) {
            Some(MemoryNode::Fifo { owner, .. }) => {
                *owner = Some((uid, gid));
                Ok(())
            }
            Some(MemoryNode::File { .. }) => Ok(()),
            None => Err(io::Error::from(io::ErrorKind::NotFound)),
        }
    }

    fn make_dir_all(&self, path: &Path) -> io::Result<()> {
        self.check(FailOn::MakeDir, path)?;
        if self.nodes.borrow().contains_key(path) {
            return Err(io::Error::from(io::ErrorKind::AlreadyExists));
        }
        let mut dirs = self.dirs.borrow_mut();
        for ancestor in path.ancestors() {
            if ancestor.as_os_str().is_empty() {
                continue;
            }
            dirs.insert(ancestor.to_path_buf());
        }
        Ok(())
    }

    fn write_file(&self, path: &Path, contents: &[u8], mode: u32) -> io::Result<()> {
        self.check(FailOn::WriteFile, path)?;
        if self.dirs.borrow().contains(path) {
            return Err(io::Error::new(io::ErrorKind::Other, "is a directory"));
        }
        self.nodes.borrow_mut().insert(
            path.to_path_buf(),
            MemoryNode::File {
                contents: contents.to_vec(),
                mode,
            },
        );
        Ok(())
    }
}
