//! Synchronizer tests against a real record store.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use clusterd::cluster_config::{DEPLOYMENT_TYPE_KEY, DEPLOYMENT_TYPE_MAAS};
use clusterd::prelude::*;
use clusterd::sync::StoreClusterView;

#[derive(Default)]
struct RecordingMirror {
    calls: Mutex<Vec<String>>,
}

impl RecordingMirror {
    fn take(&self) -> Vec<String> {
        std::mem::take(&mut *self.calls.lock().unwrap())
    }
}

#[async_trait]
impl ConfigMirror for RecordingMirror {
    async fn set(&self, key: &str, value: &str) -> std::result::Result<(), MirrorError> {
        self.calls.lock().unwrap().push(format!("set {}={}", key, value));
        Ok(())
    }

    async fn unset(&self, key: &str) -> std::result::Result<(), MirrorError> {
        self.calls.lock().unwrap().push(format!("unset {}", key));
        Ok(())
    }
}

struct Fixture {
    gates: GateRegistry,
    config: ClusterConfig,
    mirror: Arc<RecordingMirror>,
    syncer: FeatureGateSyncer,
}

fn fixture() -> Fixture {
    let store = RedbStore::open_temporary().unwrap();
    apply_schema(&store).unwrap();
    let gates = GateRegistry::new(store.clone());
    let config = ClusterConfig::new(store);
    let mirror = Arc::new(RecordingMirror::default());
    let syncer = FeatureGateSyncer::new(
        Arc::new(StoreClusterView::new(gates.clone(), config.clone())),
        mirror.clone(),
        SyncSettings::default(),
    );
    Fixture {
        gates,
        config,
        mirror,
        syncer,
    }
}

#[tokio::test]
async fn test_multi_region_add_and_remove() {
    let f = fixture();

    f.gates.create("feature.multi-region", true).unwrap();
    f.syncer.force_sync().await.unwrap();
    assert_eq!(f.mirror.take(), vec!["set feature.multi-region=true"]);

    f.gates.delete("feature.multi-region").unwrap();
    f.syncer.force_sync().await.unwrap();
    assert_eq!(f.mirror.take(), vec!["unset feature.multi-region"]);
}

#[tokio::test]
async fn test_deleting_bare_alias_keeps_prefixed_gate() {
    let f = fixture();

    f.gates.create("feature.multi-region", true).unwrap();
    f.gates.create("multi-region", true).unwrap();
    f.syncer.force_sync().await.unwrap();
    assert_eq!(f.mirror.take(), vec!["set feature.multi-region=true"]);

    f.gates.delete("multi-region").unwrap();
    for _ in 0..2 {
        assert_eq!(f.syncer.force_sync().await.unwrap(), SyncOutcome::Unchanged);
    }
    assert!(f.mirror.take().is_empty());
    assert_eq!(
        f.syncer.last_known_gates().await.get("feature.multi-region"),
        Some(&true)
    );
}

#[tokio::test]
async fn test_update_is_mirrored() {
    let f = fixture();

    f.gates.create("feature.storage.ceph", false).unwrap();
    f.gates.create("feature.storage.purestorage", true).unwrap();
    f.syncer.force_sync().await.unwrap();
    assert_eq!(
        f.mirror.take(),
        vec![
            "set feature.storage.ceph=false",
            "set feature.storage.purestorage=true",
        ]
    );

    f.gates.update("feature.storage.ceph", true).unwrap();
    f.syncer.force_sync().await.unwrap();
    assert_eq!(f.mirror.take(), vec!["set feature.storage.ceph=true"]);

    assert_eq!(f.syncer.force_sync().await.unwrap(), SyncOutcome::Unchanged);
    assert!(f.mirror.take().is_empty());
}

#[tokio::test]
async fn test_maas_deployment_is_left_alone() {
    let f = fixture();

    f.config
        .set(DEPLOYMENT_TYPE_KEY, DEPLOYMENT_TYPE_MAAS)
        .unwrap();
    f.gates.create("feature.multi-region", true).unwrap();

    assert_eq!(f.syncer.force_sync().await.unwrap(), SyncOutcome::Unmanaged);
    assert!(f.mirror.take().is_empty());

    // Clearing the marker restores reconciliation
    f.config.delete(DEPLOYMENT_TYPE_KEY).unwrap();
    f.syncer.force_sync().await.unwrap();
    assert_eq!(f.mirror.take(), vec!["set feature.multi-region=true"]);
}

#[tokio::test]
async fn test_regular_cycle_is_debounced_after_write() {
    let f = fixture();

    f.gates.create("feature.a", true).unwrap();
    assert!(matches!(
        f.syncer.sync_once().await.unwrap(),
        SyncOutcome::Applied(_)
    ));

    // The echo of our own write arriving right away is ignored
    f.gates.update("feature.a", false).unwrap();
    assert_eq!(f.syncer.sync_once().await.unwrap(), SyncOutcome::Debounced);
    assert_eq!(f.mirror.take(), vec!["set feature.a=true"]);
}

#[tokio::test]
async fn test_forced_cycles_do_not_interleave() {
    let f = fixture();
    for i in 0..8 {
        f.gates.create(&format!("feature.g{}", i), i % 2 == 0).unwrap();
    }
    let syncer = Arc::new(f.syncer);

    let tasks: Vec<_> = (0..4)
        .map(|_| {
            let syncer = syncer.clone();
            tokio::spawn(async move { syncer.force_sync().await.unwrap() })
        })
        .collect();
    let mut applied = 0;
    for task in tasks {
        if matches!(task.await.unwrap(), SyncOutcome::Applied(_)) {
            applied += 1;
        }
    }

    // Exactly one cycle saw a diff; every gate was written once
    assert_eq!(applied, 1);
    assert_eq!(f.mirror.take().len(), 8);
    assert_eq!(syncer.last_known_gates().await.len(), 8);
}
