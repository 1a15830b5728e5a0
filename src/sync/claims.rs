use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

/// Agency id to owning connection for the current round. Claims are never
/// released: one connection per agency per round.
#[derive(Debug, Default)]
pub struct AgencyClaims {
    owners: Mutex<HashMap<u32, u64>>,
}

impl AgencyClaims {
    pub fn new() -> Self {
        Self::default()
    }

    /// `Err` carries the connection that already owns `agency_id`.
    pub fn claim(&self, agency_id: u32, connection_id: u64) -> Result<(), u64> {
        let mut owners = self.owners.lock().unwrap_or_else(PoisonError::into_inner);
        match owners.entry(agency_id) {
            Entry::Occupied(entry) if *entry.get() != connection_id => Err(*entry.get()),
            Entry::Occupied(_) => Ok(()),
            Entry::Vacant(entry) => {
                entry.insert(connection_id);
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;

    use super::AgencyClaims;

    #[test]
    fn first_connection_keeps_the_agency() {
        let claims = AgencyClaims::new();

        assert_eq!(claims.claim(1, 10), Ok(()));
        assert_eq!(claims.claim(1, 10), Ok(()));
        assert_eq!(claims.claim(1, 11), Err(10));
        assert_eq!(claims.claim(2, 11), Ok(()));
    }

    #[test]
    fn concurrent_claims_have_a_single_winner() {
        let claims = Arc::new(AgencyClaims::new());
        let handles: Vec<_> = (1..=8_u64)
            .map(|connection_id| {
                let claims = Arc::clone(&claims);
                thread::spawn(move || claims.claim(3, connection_id).is_ok())
            })
            .collect();

        let granted = handles
            .into_iter()
            .map(|handle| handle.join().expect("claimer should not panic"))
            .filter(|granted| *granted)
            .count();
        assert_eq!(granted, 1);
    }
}
