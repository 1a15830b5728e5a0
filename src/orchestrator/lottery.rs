use std::collections::BTreeMap;

use serde_json::json;

use crate::logging::{ActionResult, Logger};
use crate::storage::{SharedStorage, StorageError};
use crate::sync::WinnerSet;

const LOG_CONTEXT: &str = "orchestrator::lottery";

/// Winner documents per agency, in storage order. Every agency in
/// `1..=expected_agencies` has an entry, empty when it has no winners.
pub type WinnersByAgency = BTreeMap<u32, WinnerSet>;

pub fn run_lottery(
    storage: &SharedStorage,
    expected_agencies: u32,
    logger: &Logger,
) -> Result<WinnersByAgency, StorageError> {
    let mut winners: WinnersByAgency = (1..=expected_agencies)
        .map(|agency_id| (agency_id, WinnerSet::new()))
        .collect();

    let storage = storage.lock()?;
    for bet in storage.load_all()? {
        if !storage.is_winner(&bet) {
            continue;
        }

        let Some(agency_winners) = winners.get_mut(&bet.agency_id()) else {
            logger.warn(
                Some(LOG_CONTEXT),
                &format!(
                    "winning bet of document {} belongs to unexpected agency {}; skipped",
                    bet.document(),
                    bet.agency_id()
                ),
            );
            continue;
        };

        logger.action(
            LOG_CONTEXT,
            "winning_bet",
            ActionResult::Success,
            Some(json!({
                "agency": bet.agency_id(),
                "document": bet.document(),
                "number": bet.number(),
            })),
        );
        agency_winners.push(bet.document());
    }

    Ok(winners)
}
