use crate::core::block::Block;
use sled::Db;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("database error: {0}")]
    Database(#[from] sled::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("block not found at height {0}")]
    BlockNotFound(u64),
}

/// Durable per-height block persistence. Each height is a separate key so
/// reads and tail slices are random-access rather than full-chain scans.
pub struct BlockStore {
    db: Db,
}

impl BlockStore {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
        let db = sled::open(path)?;
        tracing::info!("block store opened");
        Ok(Self { db })
    }

    fn key(height: u64) -> [u8; 8] {
        height.to_be_bytes()
    }

    /// Idempotent overwrite. Flushes before returning so the chain manager
    /// never acknowledges a height it hasn't durably persisted.
    pub fn put(&self, height: u64, block: &Block) -> Result<(), StorageError> {
        let value = serde_json::to_vec(block)?;
        self.db.insert(Self::key(height), value)?;
        self.db.flush()?;
        tracing::debug!(height, "block persisted");
        Ok(())
    }

    pub fn get(&self, height: u64) -> Result<Block, StorageError> {
        let value = self
            .db
            .get(Self::key(height))?
            .ok_or(StorageError::BlockNotFound(height))?;
        Ok(serde_json::from_slice(&value)?)
    }

    pub fn contains(&self, height: u64) -> Result<bool, StorageError> {
        Ok(self.db.contains_key(Self::key(height))?)
    }

    /// Last `k` blocks below `height` (exclusive), oldest first.
    pub fn slice_tail(&self, height: u64, k: u64) -> Result<Vec<Block>, StorageError> {
        let start = height.saturating_sub(k);
        let mut out = Vec::with_capacity((height - start) as usize);
        for h in start..height {
            out.push(self.get(h)?);
        }
        Ok(out)
    }

    /// Highest height with a persisted block, or `None` if the store is
    /// empty.
    pub fn highest(&self) -> Result<Option<u64>, StorageError> {
        match self.db.last()? {
            Some((key, _)) => {
                let bytes: [u8; 8] = key.as_ref().try_into().map_err(|_| {
                    StorageError::Database(sled::Error::Unsupported("malformed height key".into()))
                })?;
                Ok(Some(u64::from_be_bytes(bytes)))
            }
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Transaction;

    fn sample_block(prev_hash: &str) -> Block {
        Block {
            timestamp: 1_700_000_000_000,
            transactions: Vec::<Transaction>::new(),
            prev_hash: prev_hash.to_string(),
            nonce: 0,
            signature: String::new(),
            proposer: "proposer".to_string(),
            hash: "deadbeef".to_string(),
            diff: "f".repeat(64),
        }
    }

    #[test]
    fn put_then_get_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = BlockStore::open(dir.path()).unwrap();
        let block = sample_block(&"0".repeat(64));
        store.put(0, &block).unwrap();
        assert_eq!(store.get(0).unwrap(), block);
    }

    #[test]
    fn get_missing_height_errors() {
        let dir = tempfile::tempdir().unwrap();
        let store = BlockStore::open(dir.path()).unwrap();
        assert!(matches!(store.get(5), Err(StorageError::BlockNotFound(5))));
    }

    #[test]
    fn slice_tail_returns_last_k_blocks() {
        let dir = tempfile::tempdir().unwrap();
        let store = BlockStore::open(dir.path()).unwrap();
        for h in 0..5u64 {
            store.put(h, &sample_block(&h.to_string())).unwrap();
        }
        let tail = store.slice_tail(5, 3).unwrap();
        assert_eq!(tail.len(), 3);
        assert_eq!(tail[0].prev_hash, "2");
        assert_eq!(tail[2].prev_hash, "4");
    }

    #[test]
    fn highest_tracks_max_persisted_height() {
        let dir = tempfile::tempdir().unwrap();
        let store = BlockStore::open(dir.path()).unwrap();
        assert_eq!(store.highest().unwrap(), None);
        store.put(0, &sample_block("0")).unwrap();
        store.put(3, &sample_block("3")).unwrap();
        assert_eq!(store.highest().unwrap(), Some(3));
    }
}
