//! Port and fifo allocation
//!
//! Every accepted identity gets an ordinal in processing order. Port and
//! fifo path are both derived from it:
//!
//!   tcp_port  = base_port + ordinal
//!   fifo_path = fifo_prefix + ordinal     (e.g. /tmp/sigsocket0)
//!
//! The allocator holds no I/O. Callers `peek` the next allocation, do the
//! provisioning work, and `commit` once it all succeeded.

use std::path::PathBuf;

use crate::error::{ProvisionError, Result};

/// Resources assigned to one identity
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Allocation {
    pub identity: String,
    pub ordinal: u32,
    pub tcp_port: u16,
    pub fifo_path: PathBuf,
}

impl Allocation {
    /// Supervisord program name, `<prefix>-<ordinal>`
    pub fn program_name(&self, prefix: &str) -> String {
        format!("{}-{}", prefix, self.ordinal)
    }
}

#[derive(Debug, Clone)]
pub struct Allocator {
    base_port: u16,
    fifo_prefix: String,
    next: u32,
}

impl Allocator {
    pub fn new(base_port: u16, fifo_prefix: impl Into<String>) -> Self {
        Self {
            base_port,
            fifo_prefix: fifo_prefix.into(),
            next: 0,
        }
    }

    /// The allocation the next commit would make, without reserving it
    pub fn peek(&self, identity: &str) -> Result<Allocation> {
        let port = u32::from(self.base_port) + self.next;
        let tcp_port = u16::try_from(port).map_err(|_| ProvisionError::AllocatorExhausted {
            identity: identity.to_string(),
            base_port: self.base_port,
            ordinal: self.next,
        })?;

        Ok(Allocation {
            identity: identity.to_string(),
            ordinal: self.next,
            tcp_port,
            fifo_path: PathBuf::from(format!("{}{}", self.fifo_prefix, self.next)),
        })
    }

    /// Reserve `allocation`. It must be the one `peek` just returned.
    pub fn commit(&mut self, allocation: &Allocation) {
        debug_assert_eq!(allocation.ordinal, self.next, "commit out of order");
        self.next += 1;
    }

    /// Number of committed allocations
    pub fn allocated(&self) -> u32 {
        self.next
    }
}
