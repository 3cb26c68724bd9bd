//! Status store: a durable `"<db>/<coll>" -> last-run result` mapping, backed
//! by a single local RocksDB database. The store owns its file for the
//! lifetime of the process; no other process is expected to touch it
//! concurrently (see the crate-level non-goals).

use crate::coll::Coll;
use chrono::{DateTime, Utc};
use std::path::Path;

#[derive(Debug, thiserror::Error)]
pub enum StatusError {
    #[error("rocksdb error: {0}")]
    Rocks(#[from] rocksdb::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("no status recorded for {0}")]
    NotFound(String),
}

/// The outcome of the most recent backup attempt for one collection.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct BackupResult {
    #[serde(rename = "Success")]
    pub success: bool,
    #[serde(rename = "Timestamp")]
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "Collection")]
    pub collection: Coll,
}

impl BackupResult {
    /// The value a lookup miss is treated as by the health evaluator: never
    /// backed up.
    pub fn never_run(collection: Coll) -> Self {
        Self {
            success: false,
            timestamp: DateTime::<Utc>::UNIX_EPOCH,
            collection,
        }
    }
}

pub trait StatusStore: Send + Sync {
    fn save(&self, result: &BackupResult) -> Result<(), StatusError>;
    fn get(&self, coll: &Coll) -> Result<BackupResult, StatusError>;
}

/// A [`StatusStore`] backed by a RocksDB database at a configured path. All
/// records live under a single logical bucket (RocksDB's default column
/// family), keyed by [`Coll::canonical_key`].
pub struct RocksStatusStore {
    db: rocksdb::DB,
}

impl RocksStatusStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StatusError> {
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                rocksdb::Error::new(format!("creating status store directory: {e}"))
            })?;
        }
        let db = rocksdb::DB::open_default(path)?;
        Ok(Self { db })
    }
}

impl StatusStore for RocksStatusStore {
    fn save(&self, result: &BackupResult) -> Result<(), StatusError> {
        let key = result.collection.canonical_key();
        let value = serde_json::to_vec(result)?;
        // A single `put` is atomic with respect to concurrent readers:
        // RocksDB never exposes a torn write.
        self.db.put(key, value)?;
        Ok(())
    }

    fn get(&self, coll: &Coll) -> Result<BackupResult, StatusError> {
        let key = coll.canonical_key();
        match self.db.get_pinned(&key)? {
            Some(bytes) => Ok(serde_json::from_slice(&bytes)?),
            None => Err(StatusError::NotFound(key)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn save_then_get_round_trips() {
        let dir = tempdir::TempDir::new("status-store").unwrap();
        let store = RocksStatusStore::open(dir.path().join("state.db")).unwrap();

        let coll = Coll::new("db1", "c1");
        let result = BackupResult {
            success: true,
            timestamp: DateTime::<Utc>::UNIX_EPOCH,
            collection: coll.clone(),
        };
        store.save(&result).unwrap();

        let got = store.get(&coll).unwrap();
        assert_eq!(got, result);
    }

    #[test]
    fn missing_key_is_not_found() {
        let dir = tempdir::TempDir::new("status-store").unwrap();
        let store = RocksStatusStore::open(dir.path().join("state.db")).unwrap();

        let err = store.get(&Coll::new("db1", "missing")).unwrap_err();
        assert!(matches!(err, StatusError::NotFound(_)));
    }

    #[test]
    fn last_write_wins_for_a_collection() {
        let dir = tempdir::TempDir::new("status-store").unwrap();
        let store = RocksStatusStore::open(dir.path().join("state.db")).unwrap();
        let coll = Coll::new("db1", "c1");

        store
            .save(&BackupResult {
                success: false,
                timestamp: DateTime::<Utc>::UNIX_EPOCH,
                collection: coll.clone(),
            })
            .unwrap();
        store
            .save(&BackupResult {
                success: true,
                timestamp: DateTime::<Utc>::UNIX_EPOCH + chrono::Duration::seconds(1),
                collection: coll.clone(),
            })
            .unwrap();

        let got = store.get(&coll).unwrap();
        assert!(got.success);
    }
}
