//! Storage module: the record store adapter shared by every component.
//!
//! # Storage Layout
//!
//! ```text
//! redb database (<state-dir>/cluster.redb)
//! ├── schema/            # "version" -> number of applied schema updates
//! ├── config/            # key -> ConfigEntry
//! ├── terraform_state/   # state name -> StateEntry
//! ├── terraform_lock/    # state name -> LockEntry (exists only while locked)
//! └── feature_gates/     # gate key -> FeatureGate
//! ```
//!
//! Rows are bincode-encoded [`Record`] values. Writes go through
//! [`RedbStore::with_transaction`]; plain lookups and listings go through
//! [`RedbStore::with_read_transaction`].

mod redb_store;
pub mod schema;

pub use redb_store::{ReadTx, Record, RedbStore, Result, StorageError, Tx};
pub use schema::apply_schema;
