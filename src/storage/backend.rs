use crate::model::Bet;

use super::StorageError;

/// Durable bet persistence. Implementations do not serialize concurrent
/// writers themselves; callers hold the storage lock around `append`.
pub trait BetStore: Send + Sync {
    fn append(&self, bets: &[Bet]) -> Result<(), StorageError>;
    fn load_all(&self) -> Result<Vec<Bet>, StorageError>;
    fn clear(&self) -> Result<usize, StorageError>;
    fn flush(&self) -> Result<(), StorageError>;
}
