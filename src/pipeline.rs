//! One-shot provisioning run
//!
//! Discover accounts, then for each one in order: allocate, provision the
//! fifo and log directory, write the supervisord program, record the route.
//! The routing table is persisted once, after every account went through.
//! The first fatal error stops the run before anything is persisted.

use std::path::PathBuf;
use tracing::info;

use crate::allocator::{Allocation, Allocator};
use crate::backend::ProvisioningBackend;
use crate::config::Settings;
use crate::error::Result;
use crate::identity::{self, SkippedEntry};
use crate::provision::PipeProvisioner;
use crate::routing::RoutingTable;
use crate::supervisor::{self, UnitSpec};

/// What a run produced
#[derive(Debug, Clone)]
pub struct RunSummary {
    /// In ordinal order
    pub allocations: Vec<Allocation>,
    pub skipped: Vec<SkippedEntry>,
    pub unit_files: Vec<PathBuf>,
    pub routing_table: RoutingTable,
    /// Where the table was written; `None` on a dry run
    pub routing_table_path: Option<PathBuf>,
}

pub fn run(settings: &Settings, backend: &dyn ProvisioningBackend) -> Result<RunSummary> {
    settings.validate()?;

    let data_dir = settings.data_dir();
    info!(data_dir = %data_dir.display(), "Scanning signal-cli data directory");
    let discovery = identity::discover(&data_dir)?;

    let mut allocator = Allocator::new(settings.base_port, settings.fifo_prefix.clone());
    let provisioner = PipeProvisioner::new(
        backend,
        settings.uid,
        settings.gid,
        settings.log_root.clone(),
    );
    let mut routing_table = RoutingTable::new();
    let mut allocations = Vec::with_capacity(discovery.accepted.len());
    let mut unit_files = Vec::with_capacity(discovery.accepted.len());

    for identity in &discovery.accepted {
        let allocation = allocator.peek(&identity.value)?;
        let program_name = allocation.program_name(&settings.program_prefix);

        let log_dir = provisioner.provision(&allocation, &program_name)?;

        let unit = UnitSpec {
            program_name,
            identity: allocation.identity.clone(),
            tcp_port: allocation.tcp_port,
            fifo_path: allocation.fifo_path.clone(),
            config_dir: settings.config_dir.clone(),
            log_dir,
            cli_bin: settings.cli_bin.clone(),
            run_user: settings.run_user.clone(),
            java_home: settings.java_home.clone(),
        };
        let unit_file = supervisor::emit(backend, &settings.supervisor_conf_dir, &unit)?;

        routing_table.add_entry(
            allocation.identity.clone(),
            allocation.tcp_port,
            &allocation.fifo_path,
        );
        allocator.commit(&allocation);

        info!(
            identity = %allocation.identity,
            source = ?identity.source,
            file = %identity.file_name,
            ordinal = allocation.ordinal,
            tcp_port = allocation.tcp_port,
            fifo = %allocation.fifo_path.display(),
            program = %unit.program_name,
            "Found account and added it to the routing table"
        );

        allocations.push(allocation);
        unit_files.push(unit_file);
    }

    let routing_table_path = if settings.dry_run {
        info!(
            accounts = allocations.len(),
            "Dry run, routing table not written"
        );
        None
    } else {
        let path = settings.routing_table_path();
        routing_table.persist(&path)?;
        Some(path)
    };

    info!(
        provisioned = allocator.allocated(),
        skipped = discovery.skipped.len(),
        "Provisioning complete"
    );

    Ok(RunSummary {
        allocations,
        skipped: discovery.skipped,
        unit_files,
        routing_table,
        routing_table_path,
    })
}
