//! clusterd daemon
//!
//! # Usage
//!
//! ```bash
//! # First node of a new cluster
//! clusterd --role bootstrap --state-dir /var/lib/clusterd --deployment-type local
//!
//! # Additional node
//! CLUSTERD_ROLE=join CLUSTERD_PEERS=10.0.0.1,10.0.0.3 clusterd
//! ```
//!
//! See `clusterd --help` for every flag and its environment variable.

use clap::Parser;
use clusterd::settings::DaemonSettings;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let settings = DaemonSettings::parse();

    let mut filter = tracing_subscriber::EnvFilter::from_default_env()
        .add_directive(settings.log_directive().parse()?);
    if settings.verbose {
        filter = filter.add_directive("info".parse()?);
    }
    tracing_subscriber::fmt().with_env_filter(filter).init();

    tracing::info!(
        "Starting clusterd\n  Role: {:?}\n  Bind: {}\n  State: {}\n  Peers: {}",
        settings.role,
        settings.bind,
        settings.state_dir.display(),
        settings.peers.len()
    );

    clusterd::daemon::run(settings).await?;
    Ok(())
}
