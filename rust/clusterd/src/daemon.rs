//! Daemon lifecycle: open the store, apply schema updates, run the role's
//! startup step, then serve the API and the gate synchronizer until a
//! shutdown signal arrives.

use std::future::{Future, IntoFuture};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use axum::Extension;
use thiserror::Error;
use tokio::net::{TcpListener, UnixListener};
use tokio::sync::watch;

use crate::api::{self, Access, ApiState};
use crate::cluster_config::{ClusterConfig, DEPLOYMENT_TYPE_KEY};
use crate::error::ClusterError;
use crate::gates::GateRegistry;
use crate::settings::{DaemonSettings, NodeRole};
use crate::storage::{apply_schema, RedbStore, StorageError};
use crate::sync::{
    ConfigMirror, FeatureGateSyncer, SnapctlMirror, StoreClusterView, SyncOutcome,
};

#[derive(Debug, Error)]
pub enum DaemonError {
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Cluster(#[from] ClusterError),

    #[error("failed to bind {target}: {source}")]
    Bind {
        target: String,
        #[source]
        source: std::io::Error,
    },

    #[error("server error: {0}")]
    Serve(#[source] std::io::Error),
}

pub type Result<T> = std::result::Result<T, DaemonError>;

/// The TCP and control socket listeners, bound before serving.
pub struct Listeners {
    tcp: TcpListener,
    unix: UnixListener,
    socket_path: PathBuf,
}

impl Listeners {
    pub async fn bind(bind: SocketAddr, socket_path: &Path) -> Result<Self> {
        let tcp = TcpListener::bind(bind)
            .await
            .map_err(|source| DaemonError::Bind {
                target: bind.to_string(),
                source,
            })?;

        // A socket left behind by an unclean exit blocks the bind.
        if socket_path.exists() {
            tracing::warn!("Removing stale control socket {}", socket_path.display());
            if let Err(e) = std::fs::remove_file(socket_path) {
                tracing::warn!(
                    "Failed to remove stale control socket {}: {}",
                    socket_path.display(),
                    e
                );
            }
        }
        let unix = UnixListener::bind(socket_path).map_err(|source| DaemonError::Bind {
            target: socket_path.display().to_string(),
            source,
        })?;

        Ok(Self {
            tcp,
            unix,
            socket_path: socket_path.to_path_buf(),
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.tcp.local_addr()
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }
}

pub struct Daemon {
    settings: DaemonSettings,
    store: RedbStore,
    syncer: Arc<FeatureGateSyncer>,
}

impl Daemon {
    /// Open the store under the state directory with the snap mirror.
    pub fn open(settings: DaemonSettings) -> Result<Self> {
        settings.ensure_state_dir()?;
        let store = RedbStore::open(settings.database_path())?;
        let mirror = Arc::new(SnapctlMirror::new(settings.mirror_command.clone()));
        Self::with_mirror(settings, store, mirror)
    }

    /// Build a daemon over an open store, applying schema updates.
    pub fn with_mirror(
        settings: DaemonSettings,
        store: RedbStore,
        mirror: Arc<dyn ConfigMirror>,
    ) -> Result<Self> {
        let version = apply_schema(&store)?;
        tracing::info!("Record store ready at schema version {}", version);

        let view = StoreClusterView::new(
            GateRegistry::new(store.clone()),
            ClusterConfig::new(store.clone()),
        );
        let syncer = Arc::new(FeatureGateSyncer::new(
            Arc::new(view),
            mirror,
            settings.sync_settings(),
        ));

        Ok(Self {
            settings,
            store,
            syncer,
        })
    }

    pub fn store(&self) -> &RedbStore {
        &self.store
    }

    pub fn syncer(&self) -> Arc<FeatureGateSyncer> {
        Arc::clone(&self.syncer)
    }

    /// Role-specific startup step, run once before serving.
    pub async fn initialize(&self) -> Result<()> {
        let name = self.settings.member_name();
        tracing::info!("Starting member {} as {:?}", name, self.settings.role);

        match self.settings.role {
            NodeRole::Bootstrap => {
                if let Some(deployment_type) = self.settings.deployment_type.clone() {
                    let config = ClusterConfig::new(self.store.clone());
                    api::blocking(move || config.set(DEPLOYMENT_TYPE_KEY, &deployment_type))
                        .await?;
                }
            }
            NodeRole::Join => {
                // Pick up the cluster's gates now rather than on the first tick.
                match self.syncer.force_sync().await {
                    Ok(SyncOutcome::Applied(report)) => tracing::info!(
                        "Initial feature gate sync: {} set, {} failed",
                        report.set.len(),
                        report.failed.len()
                    ),
                    Ok(outcome) => tracing::info!("Initial feature gate sync: {:?}", outcome),
                    Err(e) => tracing::warn!("Initial feature gate sync failed: {}", e),
                }
            }
            NodeRole::Start => {}
        }
        Ok(())
    }

    /// Serve until `shutdown` resolves, then stop the synchronizer and both
    /// listeners and remove the control socket.
    pub async fn serve<F>(self, listeners: Listeners, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        tokio::spawn(async move {
            shutdown.await;
            let _ = shutdown_tx.send(true);
        });

        let sync_task = tokio::spawn(Arc::clone(&self.syncer).run(shutdown_rx.clone()));

        let app = api::router(ApiState::new(self.store.clone()), self.settings.trusted_peers());
        let Listeners {
            tcp,
            unix,
            socket_path,
        } = listeners;

        if let Ok(addr) = tcp.local_addr() {
            tracing::info!("REST API listening on {}", addr);
        }
        tracing::info!("Control socket listening on {}", socket_path.display());

        let tcp_server = axum::serve(
            tcp,
            app.clone()
                .into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(stopped(shutdown_rx.clone()))
        .into_future();
        let unix_server = axum::serve(unix, app.layer(Extension(Access::Socket)))
            .with_graceful_shutdown(stopped(shutdown_rx))
            .into_future();

        let (tcp_result, unix_result) = tokio::join!(tcp_server, unix_server);

        if let Err(e) = sync_task.await {
            tracing::error!("Feature gate sync task failed: {}", e);
        }
        if let Err(e) = std::fs::remove_file(&socket_path) {
            tracing::debug!("Control socket not removed: {}", e);
        }

        tcp_result.map_err(DaemonError::Serve)?;
        unix_result.map_err(DaemonError::Serve)?;
        tracing::info!("Daemon stopped");
        Ok(())
    }
}

async fn stopped(mut rx: watch::Receiver<bool>) {
    let _ = rx.wait_for(|stop| *stop).await;
}

/// Resolves on Ctrl-C or SIGTERM.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    tracing::info!("Shutdown signal received");
}

/// Open, initialize and serve with the process signal handlers.
pub async fn run(settings: DaemonSettings) -> Result<()> {
    settings.ensure_state_dir()?;
    let listeners = Listeners::bind(settings.bind, &settings.socket_path()).await?;
    let daemon = Daemon::open(settings)?;
    daemon.initialize().await?;
    daemon.serve(listeners, shutdown_signal()).await
}
