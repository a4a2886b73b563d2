//! Daemon command line and environment settings.
//!
//! Every flag has an environment fallback so the daemon can run under a
//! service manager without arguments:
//!
//! ```bash
//! CLUSTERD_STATE_DIR=/var/lib/clusterd CLUSTERD_ROLE=join \
//!   CLUSTERD_PEERS=10.0.0.2,10.0.0.3 clusterd
//! ```

use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, ValueEnum};

use crate::api::TrustedPeers;
use crate::storage::StorageError;
use crate::sync::SyncSettings;

/// File name of the record store inside the state directory.
pub const DATABASE_FILE: &str = "cluster.redb";
/// File name of the control socket inside the state directory.
pub const SOCKET_FILE: &str = "control.socket";

/// How this node entered the cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum NodeRole {
    /// First member; records cluster-wide settings.
    Bootstrap,
    /// New member; mirrors the existing gates immediately.
    Join,
    /// Restart of an existing member.
    #[default]
    Start,
}

#[derive(Debug, Clone, Parser)]
#[command(name = "clusterd")]
#[command(about = "Cluster control-plane daemon: remote state, locks and feature gates")]
#[command(version)]
pub struct DaemonSettings {
    /// Directory holding the record store and control socket
    #[arg(long, env = "CLUSTERD_STATE_DIR", default_value = "./clusterd_data")]
    pub state_dir: PathBuf,

    /// Member name (defaults to the host name)
    #[arg(long, env = "CLUSTERD_NAME")]
    pub name: Option<String>,

    /// TCP address for the REST API
    #[arg(long, env = "CLUSTERD_BIND_ADDR", default_value = "0.0.0.0:7000")]
    pub bind: SocketAddr,

    /// Control socket path (defaults to <state-dir>/control.socket)
    #[arg(long, env = "CLUSTERD_SOCKET")]
    pub socket: Option<PathBuf>,

    /// Addresses of the other cluster members
    #[arg(long = "peer", env = "CLUSTERD_PEERS", value_delimiter = ',')]
    pub peers: Vec<IpAddr>,

    #[arg(long, value_enum, env = "CLUSTERD_ROLE", default_value_t = NodeRole::Start)]
    pub role: NodeRole,

    /// Deployment type to record when bootstrapping (e.g. "maas")
    #[arg(long, env = "CLUSTERD_DEPLOYMENT_TYPE")]
    pub deployment_type: Option<String>,

    /// Seconds between feature gate sync cycles
    #[arg(long, env = "CLUSTERD_SYNC_INTERVAL_SECS", default_value_t = 5)]
    pub sync_interval_secs: u64,

    /// Minimum milliseconds between applied sync cycles
    #[arg(long, env = "CLUSTERD_SYNC_DEBOUNCE_MS", default_value_t = 2000)]
    pub sync_debounce_ms: u64,

    /// Seconds before a local config call is abandoned
    #[arg(long, env = "CLUSTERD_MIRROR_TIMEOUT_SECS", default_value_t = 30)]
    pub mirror_timeout_secs: u64,

    /// Local configuration command
    #[arg(long, env = "CLUSTERD_MIRROR_COMMAND", default_value = "snapctl")]
    pub mirror_command: String,

    /// Debug logging
    #[arg(long, short = 'd')]
    pub debug: bool,

    /// Info logging for dependencies too
    #[arg(long, short = 'v')]
    pub verbose: bool,
}

impl DaemonSettings {
    pub fn database_path(&self) -> PathBuf {
        self.state_dir.join(DATABASE_FILE)
    }

    pub fn socket_path(&self) -> PathBuf {
        self.socket
            .clone()
            .unwrap_or_else(|| self.state_dir.join(SOCKET_FILE))
    }

    pub fn member_name(&self) -> String {
        self.name.clone().unwrap_or_else(|| {
            gethostname::gethostname()
                .to_string_lossy()
                .into_owned()
        })
    }

    pub fn sync_settings(&self) -> SyncSettings {
        SyncSettings {
            interval: Duration::from_secs(self.sync_interval_secs.max(1)),
            debounce: Duration::from_millis(self.sync_debounce_ms),
            mirror_timeout: Duration::from_secs(self.mirror_timeout_secs.max(1)),
        }
    }

    pub fn trusted_peers(&self) -> TrustedPeers {
        self.peers.iter().copied().collect()
    }

    /// Tracing filter directive for this crate.
    pub fn log_directive(&self) -> &'static str {
        if self.debug {
            "clusterd=debug"
        } else {
            "clusterd=info"
        }
    }

    /// Create the state directory if missing.
    pub fn ensure_state_dir(&self) -> Result<(), StorageError> {
        std::fs::create_dir_all(&self.state_dir)?;
        Ok(())
    }
}
