//! Cluster-wide key/value configuration.
//!
//! Holds settings recorded once for the whole deployment, such as
//! `deployment.type`, which the gate synchronizer consults every cycle.

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::storage::schema::TABLE_CONFIG;
use crate::storage::{Record, RedbStore};

/// Key recording how the cluster was deployed.
pub const DEPLOYMENT_TYPE_KEY: &str = "deployment.type";

/// `deployment.type` value for nodes that manage their own local
/// configuration.
pub const DEPLOYMENT_TYPE_MAAS: &str = "maas";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigEntry {
    pub key: String,
    pub value: String,
}

impl Record for ConfigEntry {
    const TABLE: &'static str = TABLE_CONFIG;
    const KIND: &'static str = "config key";

    fn key(&self) -> &str {
        &self.key
    }
}

#[derive(Clone)]
pub struct ClusterConfig {
    store: RedbStore,
}

impl ClusterConfig {
    pub fn new(store: RedbStore) -> Self {
        Self { store }
    }

    /// Value for `key`; `NotFound` if unset.
    pub fn get(&self, key: &str) -> Result<String> {
        let entry: ConfigEntry = self.store.with_read_transaction(|tx| tx.get(key))?;
        Ok(entry.value)
    }

    /// Set `key`, creating or replacing it.
    pub fn set(&self, key: &str, value: &str) -> Result<()> {
        self.store.with_transaction(|tx| {
            tx.upsert(&ConfigEntry {
                key: key.to_string(),
                value: value.to_string(),
            })
        })?;
        tracing::info!("Set cluster config {}", key);
        Ok(())
    }

    pub fn delete(&self, key: &str) -> Result<()> {
        self.store
            .with_transaction(|tx| tx.delete::<ConfigEntry>(key))?;
        tracing::info!("Deleted cluster config {}", key);
        Ok(())
    }
}
