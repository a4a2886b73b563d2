#![allow(clippy::result_large_err)]
//! Transactional record store on top of redb.
//!
//! Every higher layer (remote state, gate registry, cluster config) talks to
//! the database through [`RedbStore::with_transaction`]. One call is one redb
//! write transaction: committed when the closure returns `Ok`, aborted when it
//! returns `Err`. redb admits a single writer at a time, so a
//! read-modify-write sequence inside one closure is never interleaved with
//! another caller's sequence. Pure reads use
//! [`RedbStore::with_read_transaction`], which works on a snapshot and does
//! not take the writer lock.
//!
//! # Example
//!
//! ```rust,ignore
//! use clusterd::storage::RedbStore;
//! use clusterd::gates::FeatureGate;
//!
//! let store = RedbStore::open("/var/lib/clusterd/cluster.redb")?;
//! store.with_transaction(|tx| {
//!     tx.create(&FeatureGate::new("feature.multi-region", true))
//! })?;
//! ```

use serde::{de::DeserializeOwned, Serialize};
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;

use redb::{Database, ReadTransaction, ReadableTable, TableDefinition, TableError, WriteTransaction};

use crate::error::ClusterError;

/// Errors raised by the storage engine itself.
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("redb database error: {0}")]
    Database(#[from] redb::DatabaseError),

    #[error("redb table error: {0}")]
    Table(#[from] redb::TableError),

    #[error("redb transaction error: {0}")]
    Transaction(#[from] redb::TransactionError),

    #[error("redb commit error: {0}")]
    Commit(#[from] redb::CommitError),

    #[error("redb storage error: {0}")]
    Storage(#[from] redb::StorageError),

    #[error("serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, StorageError>;

/// A row type persisted in its own table, keyed by a unique string.
pub trait Record: Serialize + DeserializeOwned {
    /// Table holding rows of this type. Created by a schema update.
    const TABLE: &'static str;
    /// Human-readable entity name used in `NotFound` / `AlreadyExists`.
    const KIND: &'static str;

    /// Unique key of this row.
    fn key(&self) -> &str;
}

fn table_def(name: &'static str) -> TableDefinition<'static, &'static str, &'static [u8]> {
    TableDefinition::new(name)
}

/// Handle to the cluster database.
///
/// Cheap to clone; all clones share the same underlying redb handle.
#[derive(Clone)]
pub struct RedbStore {
    db: Arc<Database>,
    /// Keeps the backing directory of a temporary store alive.
    _tempdir: Option<Arc<tempfile::TempDir>>,
}

impl RedbStore {
    /// Open or create a database file at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let db = Database::create(path)?;
        Ok(Self {
            db: Arc::new(db),
            _tempdir: None,
        })
    }

    /// Open a throwaway database (for testing).
    ///
    /// The backing directory is removed when the last clone is dropped.
    pub fn open_temporary() -> Result<Self> {
        let dir = tempfile::tempdir()?;
        let db = Database::create(dir.path().join("cluster.redb"))?;
        Ok(Self {
            db: Arc::new(db),
            _tempdir: Some(Arc::new(dir)),
        })
    }

    /// Run `f` inside one write transaction.
    ///
    /// Commits when `f` returns `Ok`, aborts when it returns `Err`; callers
    /// never observe a partially applied sequence.
    pub fn with_transaction<T, F>(&self, f: F) -> crate::error::Result<T>
    where
        F: FnOnce(&Tx<'_>) -> crate::error::Result<T>,
    {
        let txn = self.db.begin_write().map_err(StorageError::from)?;
        let result = f(&Tx { txn: &txn });
        match result {
            Ok(value) => {
                txn.commit().map_err(StorageError::from)?;
                Ok(value)
            }
            Err(e) => {
                if let Err(abort_err) = txn.abort() {
                    tracing::warn!("Failed to abort transaction after error ({}): {}", e, abort_err);
                }
                Err(e)
            }
        }
    }

    /// Run `f` against a read-only snapshot.
    ///
    /// Readers never take the writer lock and never commit; a concurrent
    /// [`with_transaction`](Self::with_transaction) is invisible until it
    /// commits.
    pub fn with_read_transaction<T, F>(&self, f: F) -> crate::error::Result<T>
    where
        F: FnOnce(&ReadTx<'_>) -> crate::error::Result<T>,
    {
        let txn = self.db.begin_read().map_err(StorageError::from)?;
        f(&ReadTx { txn: &txn })
    }

    /// Get the raw redb Database handle (schema updates, diagnostics).
    pub fn raw(&self) -> &Database {
        &self.db
    }
}

/// A live transaction handed to [`RedbStore::with_transaction`] closures.
pub struct Tx<'a> {
    txn: &'a WriteTransaction,
}

impl Tx<'_> {
    fn get_raw(&self, table: &'static str, key: &str) -> Result<Option<Vec<u8>>> {
        let table = self.txn.open_table(table_def(table))?;
        let value = table.get(key)?.map(|v| v.value().to_vec());
        Ok(value)
    }

    fn insert_raw(&self, table: &'static str, key: &str, value: &[u8]) -> Result<bool> {
        let mut table = self.txn.open_table(table_def(table))?;
        let existed = table.insert(key, value)?.is_some();
        Ok(existed)
    }

    fn remove_raw(&self, table: &'static str, key: &str) -> Result<bool> {
        let mut table = self.txn.open_table(table_def(table))?;
        let existed = table.remove(key)?.is_some();
        Ok(existed)
    }

    fn list_raw(&self, table: &'static str) -> Result<Vec<Vec<u8>>> {
        let table = self.txn.open_table(table_def(table))?;
        let mut values = Vec::new();
        for entry in table.iter()? {
            let (_, v) = entry?;
            values.push(v.value().to_vec());
        }
        Ok(values)
    }

    /// Look up a row, returning `None` when absent.
    pub fn find<R: Record>(&self, key: &str) -> crate::error::Result<Option<R>> {
        decode_row(self.get_raw(R::TABLE, key)?)
    }

    /// Look up a row; `NotFound` when absent.
    pub fn get<R: Record>(&self, key: &str) -> crate::error::Result<R> {
        self.find(key)?
            .ok_or_else(|| ClusterError::not_found(R::KIND, key))
    }

    /// All rows of a table, in key order.
    pub fn list<R: Record>(&self) -> crate::error::Result<Vec<R>> {
        decode_rows(self.list_raw(R::TABLE)?)
    }

    /// Insert a new row; `AlreadyExists` when the key is taken.
    pub fn create<R: Record>(&self, record: &R) -> crate::error::Result<()> {
        if self.get_raw(R::TABLE, record.key())?.is_some() {
            return Err(ClusterError::already_exists(R::KIND, record.key()));
        }
        let bytes = bincode::serialize(record)?;
        self.insert_raw(R::TABLE, record.key(), &bytes)?;
        Ok(())
    }

    /// Overwrite an existing row; `NotFound` when absent.
    pub fn update<R: Record>(&self, record: &R) -> crate::error::Result<()> {
        if self.get_raw(R::TABLE, record.key())?.is_none() {
            return Err(ClusterError::not_found(R::KIND, record.key()));
        }
        let bytes = bincode::serialize(record)?;
        self.insert_raw(R::TABLE, record.key(), &bytes)?;
        Ok(())
    }

    /// Insert or overwrite a row. Returns true if a row was replaced.
    pub fn upsert<R: Record>(&self, record: &R) -> crate::error::Result<bool> {
        let bytes = bincode::serialize(record)?;
        Ok(self.insert_raw(R::TABLE, record.key(), &bytes)?)
    }

    /// Remove a row; `NotFound` when absent.
    pub fn delete<R: Record>(&self, key: &str) -> crate::error::Result<()> {
        if !self.remove_raw(R::TABLE, key)? {
            return Err(ClusterError::not_found(R::KIND, key));
        }
        Ok(())
    }
}

/// A read-only snapshot handed to [`RedbStore::with_read_transaction`].
///
/// A table no schema update has created yet reads as empty.
pub struct ReadTx<'a> {
    txn: &'a ReadTransaction,
}

impl ReadTx<'_> {
    fn get_raw(&self, table: &'static str, key: &str) -> Result<Option<Vec<u8>>> {
        let table = match self.txn.open_table(table_def(table)) {
            Ok(table) => table,
            Err(TableError::TableDoesNotExist(_)) => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let value = table.get(key)?.map(|v| v.value().to_vec());
        Ok(value)
    }

    fn list_raw(&self, table: &'static str) -> Result<Vec<Vec<u8>>> {
        let table = match self.txn.open_table(table_def(table)) {
            Ok(table) => table,
            Err(TableError::TableDoesNotExist(_)) => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let mut values = Vec::new();
        for entry in table.iter()? {
            let (_, v) = entry?;
            values.push(v.value().to_vec());
        }
        Ok(values)
    }

    pub fn find<R: Record>(&self, key: &str) -> crate::error::Result<Option<R>> {
        decode_row(self.get_raw(R::TABLE, key)?)
    }

    pub fn get<R: Record>(&self, key: &str) -> crate::error::Result<R> {
        self.find(key)?
            .ok_or_else(|| ClusterError::not_found(R::KIND, key))
    }

    pub fn list<R: Record>(&self) -> crate::error::Result<Vec<R>> {
        decode_rows(self.list_raw(R::TABLE)?)
    }
}

fn decode_row<R: Record>(bytes: Option<Vec<u8>>) -> crate::error::Result<Option<R>> {
    match bytes {
        Some(bytes) => Ok(Some(bincode::deserialize(&bytes)?)),
        None => Ok(None),
    }
}

fn decode_rows<R: Record>(rows: Vec<Vec<u8>>) -> crate::error::Result<Vec<R>> {
    rows.iter()
        .map(|bytes| bincode::deserialize(bytes).map_err(ClusterError::from))
        .collect()
}
