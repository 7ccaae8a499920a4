use std::path::Path;

use alloy_primitives::B256;
use redb::{ReadableTable, TableDefinition};
use thiserror::Error;
use tracing::debug;

use crate::snapshot::{BlockSnapshot, Emission};

const SNAPSHOT_KEY_PREFIX: &[u8] = b"istanbul-block-snapshot";
const EMISSION_KEY_PREFIX: &[u8] = b"istanbul-emission";

const KV_TABLE: TableDefinition<'static, &'static [u8], Vec<u8>> =
    TableDefinition::new("istanbul_snapshots");

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] redb::DatabaseError),

    #[error("Storage error: {0}")]
    Storage(#[from] redb::StorageError),

    #[error("Table error: {0}")]
    Table(#[from] redb::TableError),

    #[error("Commit error: {0}")]
    Commit(#[from] redb::CommitError),

    #[error("Transaction error: {0}")]
    Transaction(#[from] redb::TransactionError),

    #[error("Failed to serialize/deserialize JSON: {0}")]
    Serialization(#[from] serde_json::Error),
}

fn snapshot_key(number: u64) -> Vec<u8> {
    let mut key = SNAPSHOT_KEY_PREFIX.to_vec();
    key.extend_from_slice(&number.to_be_bytes());
    key
}

fn emission_key(hash: &B256) -> Vec<u8> {
    let mut key = EMISSION_KEY_PREFIX.to_vec();
    key.extend_from_slice(hash.as_slice());
    key
}

/// Key–value store for per-height consensus snapshots, JSON blobs in a
/// single redb table keyed by prefixed byte strings. Only the event
/// loop writes here.
pub struct SnapshotStore {
    db: redb::Database,
}

impl SnapshotStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        Ok(Self {
            db: redb::Database::create(path)?,
        })
    }

    fn put(&self, key: &[u8], blob: Vec<u8>) -> Result<(), StoreError> {
        let tx = self.db.begin_write()?;
        {
            let mut table = tx.open_table(KV_TABLE)?;
            table.insert(key, blob)?;
        }
        tx.commit()?;
        Ok(())
    }

    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        let tx = self.db.begin_read()?;
        let table = match tx.open_table(KV_TABLE) {
            Ok(table) => table,
            Err(redb::TableError::TableDoesNotExist(_)) => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        Ok(table.get(key)?.map(|guard| guard.value()))
    }

    /// Persists the snapshot under
    /// `"istanbul-block-snapshot" || big-endian height`.
    pub fn store_block_snapshot(&self, snapshot: &BlockSnapshot) -> Result<(), StoreError> {
        let blob = serde_json::to_vec(snapshot)?;
        debug!(number = snapshot.number, bytes = blob.len(), "storing block snapshot");
        self.put(&snapshot_key(snapshot.number), blob)
    }

    /// Loads the snapshot for a height. Malformed priority-transactor
    /// entries are dropped on the way out rather than failing the load.
    pub fn load_block_snapshot(&self, number: u64) -> Result<Option<BlockSnapshot>, StoreError> {
        let Some(blob) = self.get(&snapshot_key(number))? else {
            return Ok(None);
        };
        let mut snapshot: BlockSnapshot = serde_json::from_slice(&blob)?;
        snapshot.priority_transactors.sanitize();
        Ok(Some(snapshot))
    }

    /// Persists the emission checkpoint under
    /// `"istanbul-emission" || block hash`.
    pub fn store_emission(&self, emission: &Emission) -> Result<(), StoreError> {
        let blob = serde_json::to_vec(emission)?;
        debug!(number = emission.number, hash = %emission.hash, "storing emission");
        self.put(&emission_key(&emission.hash), blob)
    }

    pub fn load_emission(&self, hash: &B256) -> Result<Option<Emission>, StoreError> {
        let Some(blob) = self.get(&emission_key(hash))? else {
            return Ok(None);
        };
        Ok(Some(serde_json::from_slice(&blob)?))
    }
}
