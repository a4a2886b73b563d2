#![allow(clippy::result_large_err)]
//! Append-only schema updates.
//!
//! Each entry in [`SCHEMA_UPDATES`] bumps the schema version by one. Updates
//! are applied once, in order, at daemon startup; the current version lives
//! in the `schema` table. Never reorder or edit an existing entry, only
//! append new ones.

use redb::{ReadableTable, TableDefinition, WriteTransaction};

use super::redb_store::{RedbStore, Result};

/// Cluster-wide key/value configuration.
pub const TABLE_CONFIG: &str = "config";
/// Remote state documents, keyed by state name.
pub const TABLE_TERRAFORM_STATE: &str = "terraform_state";
/// Remote state locks, keyed by state name.
pub const TABLE_TERRAFORM_LOCK: &str = "terraform_lock";
/// Feature gates, keyed by gate key.
pub const TABLE_FEATURE_GATES: &str = "feature_gates";

const SCHEMA_TABLE: TableDefinition<&str, u64> = TableDefinition::new("schema");
const KEY_VERSION: &str = "version";

/// One additive schema step.
pub struct SchemaUpdate {
    /// Name used in logs.
    pub name: &'static str,
    apply: fn(&WriteTransaction) -> Result<()>,
}

/// Every schema update, in application order.
pub const SCHEMA_UPDATES: &[SchemaUpdate] = &[
    SchemaUpdate {
        name: "config",
        apply: create_config_table,
    },
    SchemaUpdate {
        name: "terraform_state",
        apply: create_terraform_state_table,
    },
    SchemaUpdate {
        name: "terraform_lock",
        apply: create_terraform_lock_table,
    },
    SchemaUpdate {
        name: "feature_gates",
        apply: create_feature_gates_table,
    },
];

fn create_table(txn: &WriteTransaction, name: &'static str) -> Result<()> {
    // Opening a table in a write transaction creates it.
    txn.open_table(TableDefinition::<&str, &[u8]>::new(name))?;
    Ok(())
}

fn create_config_table(txn: &WriteTransaction) -> Result<()> {
    create_table(txn, TABLE_CONFIG)
}

fn create_terraform_state_table(txn: &WriteTransaction) -> Result<()> {
    create_table(txn, TABLE_TERRAFORM_STATE)
}

fn create_terraform_lock_table(txn: &WriteTransaction) -> Result<()> {
    create_table(txn, TABLE_TERRAFORM_LOCK)
}

fn create_feature_gates_table(txn: &WriteTransaction) -> Result<()> {
    create_table(txn, TABLE_FEATURE_GATES)
}

/// Current schema version (0 for a fresh database).
pub fn schema_version(store: &RedbStore) -> Result<u64> {
    let read_txn = store.raw().begin_read()?;
    match read_txn.open_table(SCHEMA_TABLE) {
        Ok(table) => Ok(table.get(KEY_VERSION)?.map(|v| v.value()).unwrap_or(0)),
        Err(redb::TableError::TableDoesNotExist(_)) => Ok(0),
        Err(e) => Err(e.into()),
    }
}

/// Apply every pending schema update in one transaction.
///
/// Returns the resulting schema version.
pub fn apply_schema(store: &RedbStore) -> Result<u64> {
    let write_txn = store.raw().begin_write()?;
    let current = {
        let table = write_txn.open_table(SCHEMA_TABLE)?;
        let stored = table.get(KEY_VERSION)?.map(|v| v.value());
        stored.unwrap_or(0)
    };

    let target = SCHEMA_UPDATES.len() as u64;
    if current >= target {
        tracing::debug!("Schema is current (version {})", current);
        return Ok(current);
    }

    for (index, update) in SCHEMA_UPDATES.iter().enumerate().skip(current as usize) {
        tracing::info!("Applying schema update {} ({})", index + 1, update.name);
        (update.apply)(&write_txn)?;
    }

    {
        let mut table = write_txn.open_table(SCHEMA_TABLE)?;
        table.insert(KEY_VERSION, target)?;
    }
    write_txn.commit()?;

    tracing::info!("Schema updated from version {} to {}", current, target);
    Ok(target)
}
