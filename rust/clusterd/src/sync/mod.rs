//! Cross-node feature gate synchronizer.
//!
//! One long-lived task per node reconciles the gate registry with the local
//! configuration mirror:
//!
//! ```text
//! tick / force ──► debounce? ──► deployment.type == maas? ──► list gates
//!                     │                  │                        │
//!                  Debounced          Unmanaged            diff vs last known
//!                                                                 │
//!                                                 empty ──► Unchanged
//!                                                 else  ──► set / unset each key
//! ```
//!
//! The mirror's own hook pushes every local write back into the registry.
//! The debounce window keeps the synchronizer from reacting to the echo of
//! its own writes.

pub mod mirror;

use std::borrow::Cow;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{watch, Mutex};
use tokio::time::{Instant, MissedTickBehavior};

use crate::cluster_config::{ClusterConfig, DEPLOYMENT_TYPE_KEY, DEPLOYMENT_TYPE_MAAS};
use crate::error::{ClusterError, Result};
use crate::gates::{FeatureGate, GateRegistry};

pub use mirror::{mirror_key, mirror_value, ConfigMirror, MirrorError, SnapctlMirror};

/// Read-only view of the cluster the synchronizer reconciles from.
///
/// Calls may block on the store and are run off the async executor.
pub trait ClusterView: Send + Sync {
    fn list_gates(&self) -> Result<Vec<FeatureGate>>;

    fn config_value(&self, key: &str) -> Result<String>;
}

/// View over the replicated store.
#[derive(Clone)]
pub struct StoreClusterView {
    gates: GateRegistry,
    config: ClusterConfig,
}

impl StoreClusterView {
    pub fn new(gates: GateRegistry, config: ClusterConfig) -> Self {
        Self { gates, config }
    }
}

impl ClusterView for StoreClusterView {
    fn list_gates(&self) -> Result<Vec<FeatureGate>> {
        self.gates.list()
    }

    fn config_value(&self, key: &str) -> Result<String> {
        self.config.get(key)
    }
}

/// View of a node with no store attached: no gates, no configuration.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullClusterView;

impl ClusterView for NullClusterView {
    fn list_gates(&self) -> Result<Vec<FeatureGate>> {
        Ok(Vec::new())
    }

    fn config_value(&self, key: &str) -> Result<String> {
        Err(ClusterError::not_found("config key", key))
    }
}

/// Synchronizer timing.
#[derive(Debug, Clone)]
pub struct SyncSettings {
    /// Period of the background loop.
    pub interval: Duration,
    /// Minimum time after an applied cycle before a non-forced one may apply.
    pub debounce: Duration,
    /// Upper bound on a single mirror call.
    pub mirror_timeout: Duration,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
            debounce: Duration::from_secs(2),
            mirror_timeout: Duration::from_secs(30),
        }
    }
}

/// Process-local cache. Not a source of truth.
#[derive(Debug, Default)]
struct SyncerState {
    last_known_gates: HashMap<String, bool>,
    last_sync_time: Option<Instant>,
}

/// Mirror calls made by one applied cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    /// Mirror keys written.
    pub set: Vec<String>,
    /// Mirror keys removed.
    pub unset: Vec<String>,
    /// Mirror keys whose call failed or timed out.
    pub failed: Vec<String>,
}

/// Result of one reconciliation attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    /// Inside the debounce window; nothing read.
    Debounced,
    /// The node manages its own local configuration.
    Unmanaged,
    /// Registry matches the last known snapshot.
    Unchanged,
    Applied(SyncReport),
}

/// Registry rows keyed by the mirror key they are written under.
///
/// `multi-region` and `feature.multi-region` land on the same mirror key;
/// when both exist the prefixed row wins, whatever the listing order.
fn mirror_snapshot(gates: Vec<FeatureGate>) -> HashMap<String, bool> {
    let mut snapshot = HashMap::with_capacity(gates.len());
    for gate in gates {
        match mirror_key(&gate.gate_key) {
            Cow::Borrowed(key) => {
                snapshot.insert(key.to_string(), gate.enabled);
            }
            Cow::Owned(key) => {
                snapshot.entry(key).or_insert(gate.enabled);
            }
        }
    }
    snapshot
}

/// Gate keys to push to the mirror in one cycle.
#[derive(Debug, Default)]
struct GateDiff {
    set: Vec<(String, bool)>,
    unset: Vec<String>,
}

impl GateDiff {
    fn between(previous: &HashMap<String, bool>, current: &HashMap<String, bool>) -> Self {
        let mut diff = GateDiff::default();
        for (key, enabled) in current {
            if previous.get(key) != Some(enabled) {
                diff.set.push((key.clone(), *enabled));
            }
        }
        for key in previous.keys() {
            if !current.contains_key(key) {
                diff.unset.push(key.clone());
            }
        }
        diff.set.sort();
        diff.unset.sort();
        diff
    }

    fn is_empty(&self) -> bool {
        self.set.is_empty() && self.unset.is_empty()
    }
}

/// Keeps the local mirror eventually consistent with the gate registry.
pub struct FeatureGateSyncer {
    view: Arc<dyn ClusterView>,
    mirror: Arc<dyn ConfigMirror>,
    settings: SyncSettings,
    // Held for the whole read-diff-apply-update sequence.
    state: Mutex<SyncerState>,
}

impl FeatureGateSyncer {
    pub fn new(
        view: Arc<dyn ClusterView>,
        mirror: Arc<dyn ConfigMirror>,
        settings: SyncSettings,
    ) -> Self {
        Self {
            view,
            mirror,
            settings,
            state: Mutex::new(SyncerState::default()),
        }
    }

    /// Run one cycle, honoring the debounce window.
    pub async fn sync_once(&self) -> Result<SyncOutcome> {
        let mut state = self.state.lock().await;
        self.reconcile(&mut state).await
    }

    /// Reset the debounce clock and run one cycle.
    pub async fn force_sync(&self) -> Result<SyncOutcome> {
        let mut state = self.state.lock().await;
        state.last_sync_time = None;
        self.reconcile(&mut state).await
    }

    /// Gate states as of the last applied cycle, keyed by mirror key.
    pub async fn last_known_gates(&self) -> HashMap<String, bool> {
        self.state.lock().await.last_known_gates.clone()
    }

    /// Background loop; returns once `shutdown` flips or its sender is dropped.
    ///
    /// A cycle in progress always completes before shutdown is observed.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(self.settings.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tracing::info!(
            "Feature gate sync started (interval {:?}, debounce {:?})",
            self.settings.interval,
            self.settings.debounce
        );

        loop {
            tokio::select! {
                _ = interval.tick() => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                    continue;
                }
            }

            match self.sync_once().await {
                Ok(SyncOutcome::Applied(report)) => {
                    tracing::info!(
                        "Feature gate sync applied: {} set, {} unset, {} failed",
                        report.set.len(),
                        report.unset.len(),
                        report.failed.len()
                    );
                }
                Ok(outcome) => tracing::debug!("Feature gate sync skipped: {:?}", outcome),
                Err(e) => tracing::error!("Feature gate sync failed: {}", e),
            }
        }

        tracing::info!("Feature gate sync stopped");
    }

    async fn reconcile(&self, state: &mut SyncerState) -> Result<SyncOutcome> {
        if let Some(last) = state.last_sync_time {
            if last.elapsed() < self.settings.debounce {
                return Ok(SyncOutcome::Debounced);
            }
        }

        if self.is_unmanaged().await {
            return Ok(SyncOutcome::Unmanaged);
        }

        let view = Arc::clone(&self.view);
        let gates = tokio::task::spawn_blocking(move || view.list_gates())
            .await
            .map_err(|e| ClusterError::Internal(format!("gate listing task failed: {}", e)))??;
        let current = mirror_snapshot(gates);

        let diff = GateDiff::between(&state.last_known_gates, &current);
        if diff.is_empty() {
            return Ok(SyncOutcome::Unchanged);
        }

        let mut report = SyncReport::default();
        let mut next_known = current;

        // All sets, then all unsets. A key never appears in both.
        for (key, enabled) in diff.set {
            let value = mirror_value(enabled);
            let result = self.bounded(self.mirror.set(&key, value)).await;
            match result {
                Ok(()) => {
                    tracing::info!("Mirrored feature gate {}={}", key, value);
                    report.set.push(key);
                }
                Err(e) => {
                    tracing::error!("Failed to set {} in local config: {}", key, e);
                    // Keep the old view of the key so the next cycle retries it.
                    match state.last_known_gates.get(&key) {
                        Some(previous) => next_known.insert(key.clone(), *previous),
                        None => next_known.remove(&key),
                    };
                    report.failed.push(key);
                }
            }
        }

        for key in diff.unset {
            let result = self.bounded(self.mirror.unset(&key)).await;
            match result {
                Ok(()) => {
                    tracing::info!("Removed feature gate {} from local config", key);
                    report.unset.push(key);
                }
                Err(e) => {
                    tracing::error!("Failed to unset {} in local config: {}", key, e);
                    if let Some(previous) = state.last_known_gates.get(&key) {
                        next_known.insert(key.clone(), *previous);
                    }
                    report.failed.push(key);
                }
            }
        }

        state.last_known_gates = next_known;
        state.last_sync_time = Some(Instant::now());
        Ok(SyncOutcome::Applied(report))
    }

    /// A failed `deployment.type` read means default mode.
    async fn is_unmanaged(&self) -> bool {
        let view = Arc::clone(&self.view);
        let mode = tokio::task::spawn_blocking(move || view.config_value(DEPLOYMENT_TYPE_KEY)).await;
        match mode {
            Ok(Ok(value)) => value == DEPLOYMENT_TYPE_MAAS,
            Ok(Err(e)) => {
                tracing::debug!("No deployment type recorded ({}), syncing", e);
                false
            }
            Err(e) => {
                tracing::warn!("Deployment type lookup task failed: {}", e);
                false
            }
        }
    }

    async fn bounded<F>(&self, call: F) -> std::result::Result<(), MirrorError>
    where
        F: std::future::Future<Output = std::result::Result<(), MirrorError>>,
    {
        let limit = self.settings.mirror_timeout;
        match tokio::time::timeout(limit, call).await {
            Ok(result) => result,
            Err(_) => Err(MirrorError::Timeout(limit)),
        }
    }
}
