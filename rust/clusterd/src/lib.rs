//! clusterd: control-plane daemon for a small cluster of nodes.
//!
//! Every node runs one daemon. The daemons share a replicated record store
//! and expose two services on top of it:
//!
//! 1. **Remote state & locks** ([`remote_state`]): an HTTP state backend for
//!    the declarative-infrastructure client, with advisory per-name locks.
//!
//! 2. **Feature gates** ([`gates`], [`sync`]): cluster-wide boolean toggles,
//!    mirrored into each node's local configuration by a background
//!    synchronizer.
//!
//! # Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────────┐
//! │  clusterd                                                      │
//! │                                                                │
//! │  api (axum) ──┬──► RemoteState ──┐                             │
//! │               ├──► GateRegistry ─┼──► RedbStore (schema'd)     │
//! │               └──► ClusterConfig ┘          ▲                  │
//! │                                             │                  │
//! │  FeatureGateSyncer ── StoreClusterView ─────┘                  │
//! │        │                                                       │
//! │        └──► ConfigMirror (snapctl set / unset)                 │
//! └────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use clusterd::gates::GateRegistry;
//! use clusterd::storage::{apply_schema, RedbStore};
//!
//! let store = RedbStore::open("/var/lib/clusterd/cluster.redb").unwrap();
//! apply_schema(&store).unwrap();
//!
//! let gates = GateRegistry::new(store);
//! gates.create("feature.multi-region", true).unwrap();
//! assert!(gates.get("feature.multi-region").unwrap().enabled);
//! ```
//!
//! # Modules
//!
//! - [`storage`]: record store adapter and schema updates (redb)
//! - [`remote_state`]: state documents and locks
//! - [`gates`]: feature gate registry
//! - [`cluster_config`]: cluster-wide key/value settings
//! - [`sync`]: gate synchronizer and local config mirror
//! - [`api`]: REST front end
//! - [`daemon`]: startup roles, listeners and shutdown

pub mod api;
pub mod cluster_config;
pub mod daemon;
pub mod error;
pub mod gates;
pub mod remote_state;
pub mod settings;
pub mod storage;
pub mod sync;

pub mod prelude {
    pub use crate::api::{router, Access, ApiState, TrustedPeers};
    pub use crate::cluster_config::ClusterConfig;
    pub use crate::daemon::{Daemon, DaemonError, Listeners};
    pub use crate::error::{ClusterError, Result};
    pub use crate::gates::{FeatureGate, GateRegistry};
    pub use crate::remote_state::{LockEntry, LockRequest, RemoteState, StateEntry};
    pub use crate::settings::{DaemonSettings, NodeRole};
    pub use crate::storage::{apply_schema, RedbStore};
    pub use crate::sync::{
        ConfigMirror, FeatureGateSyncer, MirrorError, SyncOutcome, SyncReport, SyncSettings,
    };
}
