//! Remote state and lock service for the declarative-infrastructure client.
//!
//! The client keeps its plan state here instead of in a local file and
//! serializes concurrent applies with an advisory lock per state name.
//!
//! # Lock Semantics
//!
//! - A [`LockEntry`] exists only while a name is locked; absence means unlocked.
//! - Acquiring an already-locked name fails with `AlreadyLocked`, even for the
//!   token that holds it.
//! - Writing state requires the holder's token whenever a lock exists.
//! - Releasing an unlocked name succeeds, so retried unlocks are harmless.
//! - Deleting state is not lock-checked.
//!
//! State names and lock names share a key space but live in separate tables;
//! the cross-referencing rules are enforced here, not by the store.

use serde::{Deserialize, Serialize};

use crate::error::{ClusterError, Result};
use crate::storage::schema::{TABLE_TERRAFORM_LOCK, TABLE_TERRAFORM_STATE};
use crate::storage::{Record, RedbStore};

/// A stored state document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateEntry {
    /// Client-chosen state name.
    pub name: String,
    /// Opaque document, stored byte-for-byte.
    pub payload: Vec<u8>,
}

impl Record for StateEntry {
    const TABLE: &'static str = TABLE_TERRAFORM_STATE;
    const KIND: &'static str = "state";

    fn key(&self) -> &str {
        &self.name
    }
}

/// The lock currently held on a state name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LockEntry {
    /// State name this lock guards.
    pub name: String,
    /// Opaque token chosen by the client.
    pub lock_id: String,
    /// The client's lock document, stored verbatim.
    pub holder_info: String,
}

impl Record for LockEntry {
    const TABLE: &'static str = TABLE_TERRAFORM_LOCK;
    const KIND: &'static str = "lock";

    fn key(&self) -> &str {
        &self.name
    }
}

impl LockEntry {
    /// The holder document as JSON, as returned on the wire.
    ///
    /// Failing here is an internal error, distinct from whatever conflict
    /// the document was meant to describe.
    pub fn document(&self) -> Result<serde_json::Value> {
        serde_json::from_str(&self.holder_info).map_err(|e| {
            ClusterError::Internal(format!(
                "lock document for {:?} cannot be serialized: {}",
                self.name, e
            ))
        })
    }
}

/// A parsed lock or unlock request body.
#[derive(Debug, Clone, PartialEq)]
pub struct LockRequest {
    /// Token from the document's `ID` field.
    pub lock_id: String,
    /// Raw request body.
    pub holder_info: String,
}

#[derive(Deserialize)]
struct LockDocument {
    #[serde(rename = "ID")]
    id: String,
}

impl LockRequest {
    /// Parse a lock document; it must be a JSON object with a string `ID`.
    pub fn parse(body: &[u8]) -> Result<Self> {
        let holder_info = std::str::from_utf8(body)
            .map_err(|e| ClusterError::InvalidInput(format!("lock body is not UTF-8: {}", e)))?;
        let doc: LockDocument = serde_json::from_str(holder_info)
            .map_err(|e| ClusterError::InvalidInput(format!("malformed lock body: {}", e)))?;
        Ok(Self {
            lock_id: doc.id,
            holder_info: holder_info.to_string(),
        })
    }
}

/// State & lock protocol operations over the record store.
#[derive(Clone)]
pub struct RemoteState {
    store: RedbStore,
}

impl RemoteState {
    pub fn new(store: RedbStore) -> Self {
        Self { store }
    }

    /// Names of every stored state.
    pub fn list_states(&self) -> Result<Vec<String>> {
        let states = self.store.with_read_transaction(|tx| tx.list::<StateEntry>())?;
        Ok(states.into_iter().map(|s| s.name).collect())
    }

    /// Stored state for `name`; `NotFound` if absent.
    pub fn get_state(&self, name: &str) -> Result<StateEntry> {
        self.store.with_read_transaction(|tx| tx.get(name))
    }

    /// Write state for `name`, guarded by the lock token.
    ///
    /// Rejected with `LockConflict` when a lock exists and `lock_id` does not
    /// match it. Otherwise the entry is created or overwritten, even with an
    /// identical or empty payload.
    pub fn put_state(&self, name: &str, lock_id: &str, payload: Vec<u8>) -> Result<()> {
        self.store.with_transaction(|tx| {
            if let Some(lock) = tx.find::<LockEntry>(name)? {
                if lock.lock_id != lock_id {
                    return Err(ClusterError::LockConflict(lock));
                }
            }
            let replaced = tx.upsert(&StateEntry {
                name: name.to_string(),
                payload,
            })?;
            tracing::debug!(
                "{} state {:?}",
                if replaced { "Updated" } else { "Created" },
                name
            );
            Ok(())
        })
    }

    /// Remove state for `name`; `NotFound` if absent. Not lock-checked.
    pub fn delete_state(&self, name: &str) -> Result<()> {
        self.store.with_transaction(|tx| tx.delete::<StateEntry>(name))?;
        tracing::info!("Deleted state {:?}", name);
        Ok(())
    }

    /// Every lock currently held.
    pub fn list_locks(&self) -> Result<Vec<LockEntry>> {
        self.store.with_read_transaction(|tx| tx.list())
    }

    /// Lock held on `name`; `NotFound` when unlocked.
    pub fn get_lock(&self, name: &str) -> Result<LockEntry> {
        self.store.with_read_transaction(|tx| tx.get(name))
    }

    /// Lock `name` for the requester.
    ///
    /// Fails with `AlreadyLocked` carrying the existing lock if `name` is
    /// locked by anyone, including the same token.
    pub fn acquire_lock(&self, name: &str, request: LockRequest) -> Result<LockEntry> {
        let entry = self.store.with_transaction(|tx| {
            if let Some(existing) = tx.find::<LockEntry>(name)? {
                return Err(ClusterError::AlreadyLocked(existing));
            }
            let entry = LockEntry {
                name: name.to_string(),
                lock_id: request.lock_id,
                holder_info: request.holder_info,
            };
            tx.create(&entry)?;
            Ok(entry)
        })?;
        tracing::info!("Locked state {:?} (id={})", name, entry.lock_id);
        Ok(entry)
    }

    /// Release the lock on `name`.
    ///
    /// No lock is success. A lock held under another token is `LockConflict`
    /// carrying that lock.
    pub fn release_lock(&self, name: &str, lock_id: &str) -> Result<()> {
        let released = self.store.with_transaction(|tx| {
            match tx.find::<LockEntry>(name)? {
                None => Ok(false),
                Some(lock) if lock.lock_id != lock_id => Err(ClusterError::LockConflict(lock)),
                Some(_) => {
                    tx.delete::<LockEntry>(name)?;
                    Ok(true)
                }
            }
        })?;
        if released {
            tracing::info!("Unlocked state {:?} (id={})", name, lock_id);
        } else {
            tracing::debug!("Unlock of {:?} found no lock", name);
        }
        Ok(())
    }
}
