//! Fatal provisioning errors
//!
//! Anything in here aborts the whole run. Per-entry classification problems
//! are not errors; they are reported through `identity::Classification`.

use std::path::PathBuf;

pub type Result<T> = std::result::Result<T, ProvisionError>;

#[derive(Debug, thiserror::Error)]
pub enum ProvisionError {
    #[error("Invalid settings: {0}")]
    InvalidSettings(String),

    #[error(
        "Couldn't read contents of {path:?}: {source}. Is your phone number properly registered? \
         Registering a number only works in normal/native mode, not in json-rpc mode"
    )]
    ListDataDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("No TCP port left for {identity}: base port {base_port} + ordinal {ordinal} exceeds 65535")]
    AllocatorExhausted {
        identity: String,
        base_port: u16,
        ordinal: u32,
    },

    #[error("Couldn't create fifo {path:?} for {identity}: {source}")]
    CreateFifo {
        identity: String,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Couldn't change ownership of fifo {path:?} to {uid}:{gid}: {source}")]
    SetOwner {
        path: PathBuf,
        uid: u32,
        gid: u32,
        #[source]
        source: std::io::Error,
    },

    #[error("Couldn't create log folder {path:?}: {source}")]
    CreateLogDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Refusing to write supervisor config for {program}: {reason}")]
    InvalidUnit { program: String, reason: String },

    #[error("Couldn't write supervisor config {path:?}: {source}")]
    WriteUnit {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Couldn't persist routing table {path:?}: {reason}")]
    PersistRoutingTable { path: PathBuf, reason: String },

    #[error("Couldn't read routing table {path:?}: {reason}")]
    ReadRoutingTable { path: PathBuf, reason: String },
}
