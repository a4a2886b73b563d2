//! Feature gate registry.
//!
//! Named boolean toggles shared across the cluster. Keys are conventionally
//! namespaced (`feature.<name>` or `feature.<category>.<name>`); an unset
//! gate is an absent row, never a third value.

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::storage::schema::TABLE_FEATURE_GATES;
use crate::storage::{Record, RedbStore};

/// One feature gate, also the wire representation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureGate {
    #[serde(rename = "gate-key")]
    pub gate_key: String,
    pub enabled: bool,
}

impl FeatureGate {
    pub fn new(gate_key: impl Into<String>, enabled: bool) -> Self {
        Self {
            gate_key: gate_key.into(),
            enabled,
        }
    }
}

impl Record for FeatureGate {
    const TABLE: &'static str = TABLE_FEATURE_GATES;
    const KIND: &'static str = "feature gate";

    fn key(&self) -> &str {
        &self.gate_key
    }
}

/// CRUD over feature gates.
#[derive(Clone)]
pub struct GateRegistry {
    store: RedbStore,
}

impl GateRegistry {
    pub fn new(store: RedbStore) -> Self {
        Self { store }
    }

    /// Every gate; order is not significant.
    pub fn list(&self) -> Result<Vec<FeatureGate>> {
        self.store.with_read_transaction(|tx| tx.list())
    }

    pub fn get(&self, gate_key: &str) -> Result<FeatureGate> {
        self.store.with_read_transaction(|tx| tx.get(gate_key))
    }

    /// Record a new gate; `AlreadyExists` if the key is taken.
    pub fn create(&self, gate_key: &str, enabled: bool) -> Result<()> {
        self.store
            .with_transaction(|tx| tx.create(&FeatureGate::new(gate_key, enabled)))?;
        tracing::info!("Created feature gate {}={}", gate_key, enabled);
        Ok(())
    }

    /// Change an existing gate; `NotFound` if it was never created.
    pub fn update(&self, gate_key: &str, enabled: bool) -> Result<()> {
        self.store.with_transaction(|tx| {
            // Re-read first so a missing gate is rejected rather than created.
            let mut gate: FeatureGate = tx.get(gate_key)?;
            gate.enabled = enabled;
            tx.update(&gate)
        })?;
        tracing::info!("Updated feature gate {}={}", gate_key, enabled);
        Ok(())
    }

    pub fn delete(&self, gate_key: &str) -> Result<()> {
        self.store
            .with_transaction(|tx| tx.delete::<FeatureGate>(gate_key))?;
        tracing::info!("Deleted feature gate {}", gate_key);
        Ok(())
    }
}
