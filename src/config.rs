//! Configuration for the provisioner
//!
//! CLI arguments and environment variables are parsed with clap into
//! [`Args`], then turned into the plain [`Settings`] the library works with.
//! The environment variable names match the ones the signal-cli REST API
//! container already exports.

use clap::Parser;
use std::path::{Path, PathBuf};

use crate::error::{ProvisionError, Result};

pub const DEFAULT_CONFIG_DIR: &str = "/home/.local/share/signal-cli/";
pub const DEFAULT_BASE_PORT: u16 = 6000;
pub const DEFAULT_FIFO_PREFIX: &str = "/tmp/sigsocket";
pub const DEFAULT_SUPERVISOR_CONF_DIR: &str = "/etc/supervisor/conf.d";
pub const DEFAULT_LOG_ROOT: &str = "/var/log";
pub const DEFAULT_PROGRAM_PREFIX: &str = "signal-cli-json-rpc";
pub const DEFAULT_CLI_BIN: &str = "signal-cli";
pub const DEFAULT_RUN_USER: &str = "signal-api";
pub const DEFAULT_JAVA_HOME: &str = "/opt/java/openjdk";
pub const DEFAULT_OWNER_ID: u32 = 1000;

/// Name of the routing table written into the config directory
pub const ROUTING_TABLE_FILE: &str = "jsonrpc2.yml";

/// Provision signal-cli JSON-RPC bridge processes for supervisord
#[derive(Parser, Debug, Clone)]
#[command(name = "bridge-provisioner")]
#[command(about = "Provision one supervisord JSON-RPC bridge per signal-cli account")]
pub struct Args {
    /// signal-cli configuration directory (contains `data/`)
    #[arg(long, env = "SIGNAL_CLI_CONFIG_DIR")]
    pub config_dir: Option<String>,

    /// Owner uid for the generated fifos
    #[arg(long, env = "SIGNAL_CLI_UID", default_value_t = DEFAULT_OWNER_ID)]
    pub uid: u32,

    /// Owner gid for the generated fifos
    #[arg(long, env = "SIGNAL_CLI_GID", default_value_t = DEFAULT_OWNER_ID)]
    pub gid: u32,

    /// TCP port handed to the first account; later accounts count up from here
    #[arg(long, env = "JSONRPC_BASE_PORT", default_value_t = DEFAULT_BASE_PORT)]
    pub base_port: u16,

    /// Fifo path prefix, the account ordinal is appended
    #[arg(long, env = "JSONRPC_FIFO_PREFIX", default_value = DEFAULT_FIFO_PREFIX)]
    pub fifo_prefix: String,

    /// Directory supervisord reads program definitions from
    #[arg(long, env = "SUPERVISOR_CONF_DIR", default_value = DEFAULT_SUPERVISOR_CONF_DIR)]
    pub supervisor_conf_dir: PathBuf,

    /// Parent of the per-program log directories
    #[arg(long, env = "JSONRPC_LOG_ROOT", default_value = DEFAULT_LOG_ROOT)]
    pub log_root: PathBuf,

    /// Supervisord program name prefix
    #[arg(long, default_value = DEFAULT_PROGRAM_PREFIX)]
    pub program_prefix: String,

    /// signal-cli executable invoked by the bridge
    #[arg(long, default_value = DEFAULT_CLI_BIN)]
    pub cli_bin: String,

    /// User supervisord runs the bridge as
    #[arg(long, default_value = DEFAULT_RUN_USER)]
    pub run_user: String,

    /// JAVA_HOME exported to the bridge process
    #[arg(long, env = "JAVA_HOME", default_value = DEFAULT_JAVA_HOME)]
    pub java_home: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Classify and allocate only, touch nothing on disk
    #[arg(long)]
    pub dry_run: bool,
}

impl Args {
    pub fn into_settings(self) -> Settings {
        let config_dir = self
            .config_dir
            .filter(|dir| !dir.is_empty())
            .unwrap_or_else(|| DEFAULT_CONFIG_DIR.to_string());

        Settings {
            config_dir: normalize_dir(&config_dir),
            uid: self.uid,
            gid: self.gid,
            base_port: self.base_port,
            fifo_prefix: self.fifo_prefix,
            supervisor_conf_dir: self.supervisor_conf_dir,
            log_root: self.log_root,
            program_prefix: self.program_prefix,
            cli_bin: self.cli_bin,
            run_user: self.run_user,
            java_home: self.java_home,
            dry_run: self.dry_run,
        }
    }
}

/// Resolved settings for one provisioning run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    /// Always ends with `/`; it is rendered verbatim into `--config`
    pub config_dir: String,
    pub uid: u32,
    pub gid: u32,
    pub base_port: u16,
    pub fifo_prefix: String,
    pub supervisor_conf_dir: PathBuf,
    pub log_root: PathBuf,
    pub program_prefix: String,
    pub cli_bin: String,
    pub run_user: String,
    pub java_home: String,
    pub dry_run: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self::new(DEFAULT_CONFIG_DIR)
    }
}

impl Settings {
    /// Defaults everywhere except the signal-cli config directory
    pub fn new(config_dir: impl AsRef<str>) -> Self {
        Self {
            config_dir: normalize_dir(config_dir.as_ref()),
            uid: DEFAULT_OWNER_ID,
            gid: DEFAULT_OWNER_ID,
            base_port: DEFAULT_BASE_PORT,
            fifo_prefix: DEFAULT_FIFO_PREFIX.to_string(),
            supervisor_conf_dir: PathBuf::from(DEFAULT_SUPERVISOR_CONF_DIR),
            log_root: PathBuf::from(DEFAULT_LOG_ROOT),
            program_prefix: DEFAULT_PROGRAM_PREFIX.to_string(),
            cli_bin: DEFAULT_CLI_BIN.to_string(),
            run_user: DEFAULT_RUN_USER.to_string(),
            java_home: DEFAULT_JAVA_HOME.to_string(),
            dry_run: false,
        }
    }

    /// Directory holding one entry per registered number or linked account
    pub fn data_dir(&self) -> PathBuf {
        PathBuf::from(format!("{}data", self.config_dir))
    }

    pub fn routing_table_path(&self) -> PathBuf {
        Path::new(&self.config_dir).join(ROUTING_TABLE_FILE)
    }

    pub fn validate(&self) -> Result<()> {
        if self.base_port == 0 {
            return Err(ProvisionError::InvalidSettings(
                "base port must be non-zero".to_string(),
            ));
        }
        if self.fifo_prefix.is_empty() {
            return Err(ProvisionError::InvalidSettings(
                "fifo prefix must not be empty".to_string(),
            ));
        }
        if self.program_prefix.is_empty() || self.program_prefix.contains(['/', ' ', ':']) {
            return Err(ProvisionError::InvalidSettings(format!(
                "program prefix {:?} is not a valid supervisord program name",
                self.program_prefix
            )));
        }
        if self.cli_bin.is_empty() {
            return Err(ProvisionError::InvalidSettings(
                "cli binary must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

fn normalize_dir(dir: &str) -> String {
    if dir.ends_with('/') {
        dir.to_string()
    } else {
        format!("{}/", dir)
    }
}
