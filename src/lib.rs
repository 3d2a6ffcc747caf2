//! bridge-provisioner: supervisord wiring for signal-cli in JSON-RPC mode
//!
//! At container startup every registered number or linked account under the
//! signal-cli data directory gets its own bridge process:
//!
//! ```text
//!   nc -l -p <port> <fifo | signal-cli -u <account> jsonRpc >fifo
//! ```
//!
//! This crate discovers the accounts, hands each one a TCP port and a FIFO,
//! writes one supervisord program file per account and finally persists the
//! routing table (`jsonrpc2.yml`) that the REST layer uses to dispatch
//! requests to the right port.
//!
//! ## Modules
//!
//! - **identity**: classifies data-directory entries into accounts
//! - **allocator**: port/FIFO assignment by ordinal
//! - **backend**: the OS effects (mkfifo, chown, mkdir, write), real and in-memory
//! - **provision**: FIFO and log directory setup per account
//! - **supervisor**: renders and writes supervisord program definitions
//! - **routing**: the identity -> (port, fifo) table
//! - **pipeline**: the one-shot run tying it all together

pub mod allocator;
pub mod backend;
pub mod config;
pub mod error;
pub mod identity;
pub mod pipeline;
pub mod provision;
pub mod routing;
pub mod supervisor;

pub use allocator::{Allocation, Allocator};
pub use backend::{MemoryBackend, ProvisioningBackend, SystemBackend};
pub use config::{Args, Settings};
pub use error::{ProvisionError, Result};
pub use pipeline::{run, RunSummary};
pub use routing::{RoutingEntry, RoutingTable};
