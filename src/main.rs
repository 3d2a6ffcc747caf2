//! bridge-provisioner: run once at container start, before supervisord
//!
//! Returns the first fatal error, which makes the process exit non-zero;
//! supervisord must then not be started with a half-written configuration.

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use bridge_provisioner::{pipeline, Args, MemoryBackend, ProvisioningBackend, SystemBackend};

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let log_level = args.log_level.clone();
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("bridge_provisioner={},info", log_level).into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let settings = args.into_settings();

    info!("Config dir: {}", settings.config_dir);
    info!("Base port: {}", settings.base_port);
    info!("Fifo prefix: {}", settings.fifo_prefix);
    info!("Fifo owner: {}:{}", settings.uid, settings.gid);
    info!("Supervisor conf dir: {}", settings.supervisor_conf_dir.display());
    if settings.dry_run {
        info!("Mode: DRY RUN (nothing is written)");
    }

    let memory = MemoryBackend::new();
    let backend: &dyn ProvisioningBackend = if settings.dry_run { &memory } else { &SystemBackend };

    let summary = match pipeline::run(&settings, backend) {
        Ok(summary) => summary,
        Err(e) => {
            error!("{}", e);
            return Err(e.into());
        }
    };

    for (identity, entry) in summary.routing_table.iter() {
        info!(
            "  {} -> port {}, fifo {}",
            identity, entry.tcp_port, entry.fifo_pathname
        );
    }
    if summary.routing_table.is_empty() {
        info!("No accounts found, no bridges provisioned");
    }
    Ok(())
}
