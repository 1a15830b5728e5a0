mod backend;
mod engine;
mod error;
mod facade;
mod path;
mod sled_backend;

use std::sync::{Arc, Mutex, MutexGuard};

pub use backend::BetStore;
pub use engine::{SledMode, StorageEngine};
pub use error::StorageError;
pub use facade::StorageFacade;
use path::expand_home_path;
pub use sled_backend::SledBetStore;

/// The single storage-wide lock. Every writer appends under it and the
/// lottery pass reads under it.
#[derive(Clone)]
pub struct SharedStorage {
    inner: Arc<Mutex<StorageFacade>>,
}

impl SharedStorage {
    pub fn new(facade: StorageFacade) -> Self {
        Self {
            inner: Arc::new(Mutex::new(facade)),
        }
    }

    pub fn lock(&self) -> Result<MutexGuard<'_, StorageFacade>, StorageError> {
        self.inner.lock().map_err(|_| StorageError::LockPoisoned)
    }
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use crate::config::AppConfig;
    use crate::logging::{LogLevel, Logger, LoggerConfig};
    use crate::model::Bet;
    use crate::storage::{StorageEngine, StorageFacade};

    use super::{expand_home_path, BetStore, SledBetStore};

    fn quiet_logger() -> Logger {
        Logger::new(LoggerConfig {
            min_level: LogLevel::Error,
            human_friendly: false,
        })
    }

    fn unique_temp_path(label: &str) -> String {
        let path = std::env::temp_dir().join(format!(
            "betgate-storage-test-{label}-{}-{}",
            std::process::id(),
            chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default()
        ));
        path.to_string_lossy().to_string()
    }

    fn bet(agency_id: u32, document: u32, number: u32) -> Bet {
        Bet::new(
            agency_id,
            "Maria",
            "Gomez",
            document,
            NaiveDate::from_ymd_opt(1987, 11, 2).expect("valid date"),
            number,
        )
        .expect("valid bet")
    }

    #[test]
    fn expands_tilde_and_home_prefixes() {
        let home = std::env::var("HOME").expect("HOME should be available in tests");
        assert_eq!(
            expand_home_path("~/.betgate/data").expect("expansion should work"),
            std::path::Path::new(&home).join(".betgate/data")
        );
        assert_eq!(
            expand_home_path("$HOME/.betgate/data").expect("expansion should work"),
            std::path::Path::new(&home).join(".betgate/data")
        );
        assert_eq!(
            expand_home_path("/var/lib/betgate").expect("expansion should work"),
            std::path::PathBuf::from("/var/lib/betgate")
        );
    }

    #[test]
    fn load_all_returns_bets_in_append_order() {
        let store = SledBetStore::open_temporary().expect("temporary store should open");
        store
            .append(&[bet(1, 10, 100), bet(1, 11, 101)])
            .expect("first append should work");
        store.append(&[bet(2, 20, 200)]).expect("second append should work");
        store.append(&[]).expect("empty append is a no-op");

        let loaded = store.load_all().expect("load should work");
        let documents: Vec<u32> = loaded.iter().map(Bet::document).collect();
        assert_eq!(documents, vec![10, 11, 20]);
        assert_eq!(loaded[2], bet(2, 20, 200));
    }

    #[test]
    fn clear_removes_every_bet() {
        let store = SledBetStore::open_temporary().expect("temporary store should open");
        store
            .append(&[bet(1, 1, 1), bet(1, 2, 2)])
            .expect("append should work");

        assert_eq!(store.clear().expect("clear should work"), 2);
        assert!(store.load_all().expect("load should work").is_empty());
    }

    #[test]
    fn win_predicate_is_pure() {
        let facade = StorageFacade::with_backend(
            Box::new(SledBetStore::open_temporary().expect("store should open")),
            7574,
        );
        let winner = bet(1, 1, 7574);
        let loser = bet(1, 2, 7575);

        for _ in 0..3 {
            assert!(facade.is_winner(&winner));
            assert!(!facade.is_winner(&loser));
        }
    }

    #[test]
    fn facade_on_disk_creates_data_dir_and_stores_bets() {
        let path = unique_temp_path("on-disk");
        let mut app_config = AppConfig::default();
        app_config.storage.path = path.clone();

        let facade = StorageFacade::initialize(&app_config, &quiet_logger())
            .expect("storage init should work");
        assert_eq!(facade.engine(), StorageEngine::Sled);
        assert!(std::path::Path::new(&path).is_dir());
        assert!(facade.load_all().expect("load should work").is_empty());

        facade.append(&[bet(3, 30, 300)]).expect("append should work");
        facade.flush().expect("flush should work");
        assert_eq!(facade.load_all().expect("load should work"), vec![bet(3, 30, 300)]);

        drop(facade);
        let _ = std::fs::remove_dir_all(path);
    }

    #[test]
    fn rejects_unknown_engine_and_mode() {
        let mut app_config = AppConfig::default();
        app_config.storage.temporary = true;
        app_config.storage.engine = "rocksdb".to_owned();
        assert!(StorageFacade::initialize(&app_config, &quiet_logger()).is_err());

        app_config.storage.engine = "sled".to_owned();
        app_config.storage.sled.mode = Some("turbo".to_owned());
        assert!(StorageFacade::initialize(&app_config, &quiet_logger()).is_err());
    }
}
