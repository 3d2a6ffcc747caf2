//! Fifo and log directory provisioning
//!
//! Fifos are always recreated: a stale pipe from a previous container run may
//! still have a dead reader attached. Every failure here is fatal, since a
//! half-provisioned account could route traffic to the wrong bridge.

use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::allocator::Allocation;
use crate::backend::ProvisioningBackend;
use crate::error::{ProvisionError, Result};

/// Permission bits requested for new fifos (before umask), as `mkfifo(1)` does
pub const FIFO_MODE: u32 = 0o666;

pub struct PipeProvisioner<'a> {
    backend: &'a dyn ProvisioningBackend,
    uid: u32,
    gid: u32,
    log_root: PathBuf,
}

impl<'a> PipeProvisioner<'a> {
    pub fn new(backend: &'a dyn ProvisioningBackend, uid: u32, gid: u32, log_root: PathBuf) -> Self {
        Self {
            backend,
            uid,
            gid,
            log_root,
        }
    }

    pub fn log_dir(&self, program_name: &str) -> PathBuf {
        self.log_root.join(program_name)
    }

    /// Recreate the fifo for `allocation`, hand it to the configured owner and
    /// make sure the program's log directory exists.
    pub fn provision(&self, allocation: &Allocation, program_name: &str) -> Result<PathBuf> {
        let fifo = allocation.fifo_path.as_path();

        self.remove_stale(fifo);

        self.backend
            .create_fifo(fifo, FIFO_MODE)
            .map_err(|source| ProvisionError::CreateFifo {
                identity: allocation.identity.clone(),
                path: fifo.to_path_buf(),
                source,
            })?;

        self.backend
            .set_owner(fifo, self.uid, self.gid)
            .map_err(|source| ProvisionError::SetOwner {
                path: fifo.to_path_buf(),
                uid: self.uid,
                gid: self.gid,
                source,
            })?;

        let log_dir = self.log_dir(program_name);
        self.backend
            .make_dir_all(&log_dir)
            .map_err(|source| ProvisionError::CreateLogDir {
                path: log_dir.clone(),
                source,
            })?;

        debug!(
            fifo = %fifo.display(),
            log_dir = %log_dir.display(),
            uid = self.uid,
            gid = self.gid,
            "Provisioned fifo"
        );
        Ok(log_dir)
    }

    // Best effort; if the path is still occupied, fifo creation reports it
    fn remove_stale(&self, fifo: &Path) {
        match self.backend.remove_file(fifo) {
            Ok(()) => debug!(fifo = %fifo.display(), "Removed existing fifo"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!(fifo = %fifo.display(), error = %e, "Couldn't remove existing fifo"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::allocator::Allocator;
    use crate::backend::{FailOn, MemoryBackend, MemoryNode};

    fn allocation() -> Allocation {
        Allocator::new(6000, "/tmp/sigsocket").peek("+15551234567").unwrap()
    }

    #[test]
    fn test_provision_creates_owned_fifo_and_log_dir() {
        let backend = MemoryBackend::new();
        let provisioner = PipeProvisioner::new(&backend, 1000, 1000, PathBuf::from("/var/log"));

        let log_dir = provisioner
            .provision(&allocation(), "signal-cli-json-rpc-0")
            .unwrap();

        let fifo = Path::new("/tmp/sigsocket0");
        assert_eq!(
            backend.node(fifo),
            Some(MemoryNode::Fifo {
                mode: FIFO_MODE,
                owner: Some((1000, 1000))
            })
        );
        assert_eq!(log_dir, PathBuf::from("/var/log/signal-cli-json-rpc-0"));
        assert!(backend.has_dir(&log_dir));
    }

    #[test]
    fn test_provision_replaces_existing_file() {
        let backend = MemoryBackend::new();
        backend.insert_file("/tmp/sigsocket0", b"leftover");
        let provisioner = PipeProvisioner::new(&backend, 1, 2, PathBuf::from("/var/log"));

        provisioner.provision(&allocation(), "p-0").unwrap();

        assert!(backend.is_fifo(Path::new("/tmp/sigsocket0")));
        assert_eq!(backend.owner(Path::new("/tmp/sigsocket0")), Some((1, 2)));
    }

    #[test]
    fn test_fifo_failure_is_fatal() {
        let backend = MemoryBackend::new();
        backend.fail(FailOn::CreateFifo, "/tmp/sigsocket0");
        let provisioner = PipeProvisioner::new(&backend, 1000, 1000, PathBuf::from("/var/log"));

        let err = provisioner.provision(&allocation(), "p-0").unwrap_err();
        match err {
            ProvisionError::CreateFifo { identity, path, .. } => {
                assert_eq!(identity, "+15551234567");
                assert_eq!(path, PathBuf::from("/tmp/sigsocket0"));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(!backend.has_dir(Path::new("/var/log/p-0")));
    }

    #[test]
    fn test_owner_failure_is_fatal() {
        let backend = MemoryBackend::new();
        backend.fail(FailOn::SetOwner, "/tmp/sigsocket0");
        let provisioner = PipeProvisioner::new(&backend, 1000, 1000, PathBuf::from("/var/log"));

        let err = provisioner.provision(&allocation(), "p-0").unwrap_err();
        assert!(matches!(err, ProvisionError::SetOwner { uid: 1000, gid: 1000, .. }));
        assert!(err.to_string().contains("/tmp/sigsocket0"));
    }

    #[test]
    fn test_log_dir_failure_is_fatal() {
        let backend = MemoryBackend::new();
        backend.fail(FailOn::MakeDir, "/var/log/p-0");
        let provisioner = PipeProvisioner::new(&backend, 1000, 1000, PathBuf::from("/var/log"));

        let err = provisioner.provision(&allocation(), "p-0").unwrap_err();
        assert!(matches!(err, ProvisionError::CreateLogDir { .. }));
        assert!(err.to_string().contains("/var/log/p-0"));
    }
}
