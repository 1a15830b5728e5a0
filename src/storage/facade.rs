use std::fs;
use std::path::PathBuf;

use serde_json::json;

use crate::config::AppConfig;
use crate::logging::{LogLevel, Logger};
use crate::model::Bet;

use super::{expand_home_path, BetStore, SledBetStore, SledMode, StorageEngine, StorageError};

/// The storage gateway: append-only bet persistence plus the win predicate.
pub struct StorageFacade {
    engine: StorageEngine,
    data_path: Option<PathBuf>,
    winning_number: u32,
    backend: Box<dyn BetStore>,
}

impl StorageFacade {
    pub fn initialize(app_config: &AppConfig, logger: &Logger) -> Result<Self, StorageError> {
        let storage = &app_config.storage;
        let engine: StorageEngine = storage.engine.parse()?;
        let mode = storage
            .sled
            .mode
            .as_deref()
            .map(str::parse::<SledMode>)
            .transpose()?;

        let (backend, data_path) = if storage.temporary {
            (SledBetStore::open_temporary()?, None)
        } else {
            let data_path = expand_home_path(&storage.path)?;
            fs::create_dir_all(&data_path).map_err(|source| StorageError::CreateDataDir {
                path: data_path.clone(),
                source,
            })?;
            let backend = SledBetStore::open(&data_path, storage.sled.cache_capacity, mode)?;
            (backend, Some(data_path))
        };

        let facade = Self {
            engine,
            data_path,
            winning_number: app_config.lottery.winning_number,
            backend: Box::new(backend),
        };

        let cleared = if storage.reset_on_start {
            facade.backend.clear()?
        } else {
            0
        };

        logger.log(
            LogLevel::Info,
            Some("storage::init"),
            "Storage facade initialized",
            Some(json!({
                "engine": engine.as_str(),
                "configured_path": storage.path,
                "resolved_path": facade.data_path.as_ref().map(|path| path.display().to_string()),
                "temporary": storage.temporary,
                "reset_on_start": storage.reset_on_start,
                "cleared_bets": cleared,
                "winning_number": facade.winning_number,
                "sled": {
                    "cache_capacity": storage.sled.cache_capacity,
                    "mode": storage.sled.mode
                }
            })),
        );

        Ok(facade)
    }

    #[cfg(test)]
    pub fn with_backend(backend: Box<dyn BetStore>, winning_number: u32) -> Self {
        Self {
            engine: StorageEngine::Sled,
            data_path: None,
            winning_number,
            backend,
        }
    }

    pub fn engine(&self) -> StorageEngine {
        self.engine
    }

    pub fn data_path(&self) -> Option<&PathBuf> {
        self.data_path.as_ref()
    }

    pub fn winning_number(&self) -> u32 {
        self.winning_number
    }

    pub fn append(&self, bets: &[Bet]) -> Result<(), StorageError> {
        self.backend.append(bets)
    }

    pub fn load_all(&self) -> Result<Vec<Bet>, StorageError> {
        self.backend.load_all()
    }

    pub fn is_winner(&self, bet: &Bet) -> bool {
        bet.number() == self.winning_number
    }

    pub fn flush(&self) -> Result<(), StorageError> {
        self.backend.flush()
    }
}
