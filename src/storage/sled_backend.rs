use std::path::Path;

use crate::model::Bet;

use super::{BetStore, SledMode, StorageError};

const BET_PREFIX: &[u8] = b"v1:b:";

pub struct SledBetStore {
    db: sled::Db,
}

impl SledBetStore {
    pub fn open(
        data_path: &Path,
        cache_capacity: Option<u64>,
        mode: Option<SledMode>,
    ) -> Result<Self, StorageError> {
        let config = sled::Config::new().path(data_path);
        Self::open_with(config, cache_capacity, mode)
    }

    /// Throwaway database removed when the store is dropped.
    pub fn open_temporary() -> Result<Self, StorageError> {
        Self::open_with(sled::Config::new().temporary(true), None, None)
    }

    fn open_with(
        mut config: sled::Config,
        cache_capacity: Option<u64>,
        mode: Option<SledMode>,
    ) -> Result<Self, StorageError> {
        if let Some(cache_capacity) = cache_capacity {
            config = config.cache_capacity(cache_capacity);
        }
        if let Some(mode) = mode {
            config = config.mode(mode.into());
        }

        let db = config.open()?;
        Ok(Self { db })
    }
}

// Big-endian ids keep prefix scans in append order.
fn bet_key(id: u64) -> Vec<u8> {
    let mut key = Vec::with_capacity(BET_PREFIX.len() + 8);
    key.extend_from_slice(BET_PREFIX);
    key.extend_from_slice(&id.to_be_bytes());
    key
}

impl BetStore for SledBetStore {
    fn append(&self, bets: &[Bet]) -> Result<(), StorageError> {
        if bets.is_empty() {
            return Ok(());
        }

        let mut batch = sled::Batch::default();
        for bet in bets {
            let value = serde_json::to_vec(bet).map_err(StorageError::SerializeBet)?;
            batch.insert(bet_key(self.db.generate_id()?), value);
        }

        self.db.apply_batch(batch)?;
        self.db.flush()?;
        Ok(())
    }

    fn load_all(&self) -> Result<Vec<Bet>, StorageError> {
        let mut bets = Vec::new();
        for entry in self.db.scan_prefix(BET_PREFIX) {
            let (_, value) = entry?;
            let bet: Bet =
                serde_json::from_slice(value.as_ref()).map_err(StorageError::DeserializeBet)?;
            bets.push(bet);
        }
        Ok(bets)
    }

    fn clear(&self) -> Result<usize, StorageError> {
        let mut batch = sled::Batch::default();
        let mut removed = 0;
        for entry in self.db.scan_prefix(BET_PREFIX) {
            let (key, _) = entry?;
            batch.remove(key);
            removed += 1;
        }

        self.db.apply_batch(batch)?;
        self.db.flush()?;
        Ok(removed)
    }

    fn flush(&self) -> Result<(), StorageError> {
        self.db.flush().map(|_| ()).map_err(StorageError::Sled)
    }
}
