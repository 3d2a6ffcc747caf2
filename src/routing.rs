//! Routing table (`jsonrpc2.yml`)
//!
//! The REST layer reads this file to find the TCP port that reaches a given
//! account's bridge. Layout:
//!
//! ```yaml
//! config:
//!   "+15551234567":
//!     tcp_port: 6000
//!     fifo_pathname: /tmp/sigsocket0
//! ```
//!
//! Entries are kept in a BTreeMap so the serialized file is identical for
//! identical inputs.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::error::{ProvisionError, Result};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutingEntry {
    pub tcp_port: u16,
    pub fifo_pathname: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutingTable {
    #[serde(rename = "config", default)]
    entries: BTreeMap<String, RoutingEntry>,
}

impl RoutingTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `identity`; a repeated identity replaces the earlier entry
    pub fn add_entry(&mut self, identity: impl Into<String>, tcp_port: u16, fifo_path: &Path) {
        self.entries.insert(
            identity.into(),
            RoutingEntry {
                tcp_port,
                fifo_pathname: fifo_path.to_string_lossy().into_owned(),
            },
        );
    }

    pub fn get(&self, identity: &str) -> Option<&RoutingEntry> {
        self.entries.get(identity)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &RoutingEntry)> {
        self.entries.iter()
    }

    pub fn to_yaml(&self) -> std::result::Result<String, serde_yaml::Error> {
        serde_yaml::to_string(self)
    }

    pub fn from_yaml(yaml: &str) -> std::result::Result<Self, serde_yaml::Error> {
        if yaml.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(yaml)
    }

    /// Overwrite `path` with the whole table.
    ///
    /// Written to a sibling file first and renamed into place, so a reader
    /// never sees a half-written table.
    pub fn persist(&self, path: &Path) -> Result<()> {
        let fail = |reason: String| ProvisionError::PersistRoutingTable {
            path: path.to_path_buf(),
            reason,
        };

        let yaml = self.to_yaml().map_err(|e| fail(e.to_string()))?;
        let staged = staging_path(path);
        fs::write(&staged, yaml).map_err(|e| fail(e.to_string()))?;
        if let Err(e) = fs::rename(&staged, path) {
            fs::remove_file(&staged).ok();
            return Err(fail(e.to_string()));
        }

        info!(path = %path.display(), entries = self.len(), "Persisted routing table");
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let fail = |reason: String| ProvisionError::ReadRoutingTable {
            path: path.to_path_buf(),
            reason,
        };
        let yaml = fs::read_to_string(path).map_err(|e| fail(e.to_string()))?;
        Self::from_yaml(&yaml).map_err(|e| fail(e.to_string()))
    }
}

fn staging_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}
