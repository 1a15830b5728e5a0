use std::fmt;
use std::io;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use serde_json::json;

use crate::logging::{ActionResult, Logger};
use crate::model::{Batch, Bet};
use crate::server::AgencyConnection;
use crate::shutdown::StopSignal;
use crate::storage::{SharedStorage, StorageError};
use crate::sync::{
    AgencyClaims, CompletionRecord, CompletionSender, Outcome, ReadyBarrier, ResultReceiver,
};
use crate::wire::codec::{self, CodecError};

const LOG_CONTEXT: &str = "handler::agency";

#[derive(Debug)]
pub enum HandlerError {
    Protocol(CodecError),
    Connection(CodecError),
    Storage(StorageError),
    AgencyOutOfRange { agency_id: u32, expected: u32 },
    AgencyChanged { bound: u32, received: u32 },
    AgencyTaken { agency_id: u32, owner: u64 },
}

impl HandlerError {
    fn kind(&self) -> &'static str {
        match self {
            Self::Protocol(_)
            | Self::AgencyOutOfRange { .. }
            | Self::AgencyChanged { .. }
            | Self::AgencyTaken { .. } => "protocol",
            Self::Connection(_) => "connection",
            Self::Storage(_) => "storage",
        }
    }
}

impl From<CodecError> for HandlerError {
    fn from(value: CodecError) -> Self {
        if value.is_connection_error() {
            Self::Connection(value)
        } else {
            Self::Protocol(value)
        }
    }
}

impl From<StorageError> for HandlerError {
    fn from(value: StorageError) -> Self {
        Self::Storage(value)
    }
}

impl fmt::Display for HandlerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Protocol(source) | Self::Connection(source) => write!(f, "{source}"),
            Self::Storage(source) => write!(f, "{source}"),
            Self::AgencyOutOfRange {
                agency_id,
                expected,
            } => write!(
                f,
                "protocol error: agency {agency_id} outside configured range 1..={expected}"
            ),
            Self::AgencyChanged { bound, received } => write!(
                f,
                "protocol error: connection bound to agency {bound} sent a batch for agency {received}"
            ),
            Self::AgencyTaken { agency_id, owner } => write!(
                f,
                "protocol error: agency {agency_id} is already served by connection {owner}"
            ),
        }
    }
}

impl std::error::Error for HandlerError {}

/// Everything a handler shares with the orchestrator.
#[derive(Clone)]
pub struct HandlerContext {
    pub storage: SharedStorage,
    pub barrier: Arc<ReadyBarrier>,
    pub claims: Arc<AgencyClaims>,
    pub completions: CompletionSender,
    pub stop: StopSignal,
    pub expected_agencies: u32,
    pub logger: Logger,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HandlerSummary {
    pub connection_id: u64,
    pub agency_id: Option<u32>,
    pub outcome: Outcome,
    pub bets_stored: usize,
    pub winners_sent: Option<usize>,
}

enum Terminal {
    Finished,
    Failed { error: HandlerError, attempted: usize },
    Stopped,
}

/// Emits the completion record and barrier signal exactly once. If the
/// handler unwinds before reporting, the drop reports `Failure` so the
/// barrier still trips.
struct Reporter {
    connection_id: u64,
    agency_id: Option<u32>,
    completions: CompletionSender,
    barrier: Arc<ReadyBarrier>,
    reported: bool,
}

impl Reporter {
    fn report(&mut self, outcome: Outcome) {
        if self.reported {
            return;
        }
        self.reported = true;
        self.completions.report(CompletionRecord {
            connection_id: self.connection_id,
            agency_id: self.agency_id,
            outcome,
        });
        self.barrier.signal_ready();
    }
}

impl Drop for Reporter {
    fn drop(&mut self) {
        self.report(Outcome::Failure);
    }
}

pub struct AgencyHandler {
    connection: AgencyConnection,
    results: Option<ResultReceiver>,
    storage: SharedStorage,
    claims: Arc<AgencyClaims>,
    stop: StopSignal,
    expected_agencies: u32,
    logger: Logger,
    reporter: Reporter,
    last_stored: Option<Bet>,
    bets_stored: usize,
}

impl AgencyHandler {
    pub fn new(connection: AgencyConnection, results: ResultReceiver, context: HandlerContext) -> Self {
        let reporter = Reporter {
            connection_id: connection.id(),
            agency_id: None,
            completions: context.completions,
            barrier: context.barrier,
            reported: false,
        };

        Self {
            connection,
            results: Some(results),
            storage: context.storage,
            claims: context.claims,
            stop: context.stop,
            expected_agencies: context.expected_agencies,
            logger: context.logger,
            reporter,
            last_stored: None,
            bets_stored: 0,
        }
    }

    /// Runs the handler on its own named thread. The handler is built
    /// before spawning, so even a failed spawn reports to the barrier.
    pub fn spawn(self) -> io::Result<JoinHandle<HandlerSummary>> {
        thread::Builder::new()
            .name(format!("agency-conn-{}", self.connection.id()))
            .spawn(move || self.run())
    }

    pub fn run(mut self) -> HandlerSummary {
        let terminal = self.receive_batches();

        let (outcome, winners_sent) = match terminal {
            Terminal::Finished => {
                self.reporter.report(Outcome::Success);
                (Outcome::Success, self.send_winners())
            }
            Terminal::Failed { error, attempted } => {
                self.logger.action(
                    LOG_CONTEXT,
                    "bets_stored",
                    ActionResult::Fail,
                    Some(json!({
                        "connection_id": self.connection.id(),
                        "agency": self.reporter.agency_id,
                        "count": attempted,
                        "error_kind": error.kind(),
                        "error": error.to_string(),
                    })),
                );
                self.send_zero_ack();
                self.reporter.report(Outcome::Failure);
                (Outcome::Failure, None)
            }
            Terminal::Stopped => {
                self.logger.action(
                    LOG_CONTEXT,
                    "agency_stopped",
                    ActionResult::Success,
                    Some(json!({
                        "connection_id": self.connection.id(),
                        "agency": self.reporter.agency_id,
                        "bets_stored": self.bets_stored,
                    })),
                );
                self.send_zero_ack();
                self.reporter.report(Outcome::Stopped);
                (Outcome::Stopped, None)
            }
        };

        HandlerSummary {
            connection_id: self.connection.id(),
            agency_id: self.reporter.agency_id,
            outcome,
            bets_stored: self.bets_stored,
            winners_sent,
        }
    }

    fn receive_batches(&mut self) -> Terminal {
        loop {
            if self.stop.is_raised() {
                return Terminal::Stopped;
            }

            let frame = match self.connection.read_frame() {
                Ok(frame) => frame,
                // Shutdown closes the read half under a blocked read.
                Err(error) if error.is_connection_error() && self.stop.is_raised() => {
                    return Terminal::Stopped;
                }
                Err(error) => {
                    return Terminal::Failed {
                        error: error.into(),
                        attempted: 0,
                    }
                }
            };

            let batch = match codec::decode_batch(&frame) {
                Ok(batch) => batch,
                Err(error) => {
                    return Terminal::Failed {
                        error: error.into(),
                        attempted: codec::peek_record_count(&frame).unwrap_or(0) as usize,
                    }
                }
            };
            let attempted = batch.len();

            if let Err(error) = self.store_and_ack(&batch) {
                return Terminal::Failed { error, attempted };
            }
            if batch.is_final {
                return Terminal::Finished;
            }
        }
    }

    fn store_and_ack(&mut self, batch: &Batch) -> Result<(), HandlerError> {
        self.bind_agency(batch.agency_id)?;

        if !batch.is_empty() {
            let storage = self.storage.lock()?;
            storage.append(&batch.bets)?;
        }
        self.bets_stored += batch.len();
        if let Some(last) = batch.last_bet() {
            self.last_stored = Some(last.clone());
        }

        self.logger.action(
            LOG_CONTEXT,
            "bets_stored",
            ActionResult::Success,
            Some(json!({
                "agency": batch.agency_id,
                "count": batch.len(),
                "final": batch.is_final,
            })),
        );

        let ack = codec::encode_ack(self.last_stored.as_ref());
        self.connection.send(&ack)?;
        Ok(())
    }

    fn bind_agency(&mut self, agency_id: u32) -> Result<(), HandlerError> {
        if agency_id == 0 || agency_id > self.expected_agencies {
            return Err(HandlerError::AgencyOutOfRange {
                agency_id,
                expected: self.expected_agencies,
            });
        }

        match self.reporter.agency_id {
            Some(bound) if bound != agency_id => Err(HandlerError::AgencyChanged {
                bound,
                received: agency_id,
            }),
            Some(_) => Ok(()),
            None => {
                self.claims
                    .claim(agency_id, self.connection.id())
                    .map_err(|owner| HandlerError::AgencyTaken { agency_id, owner })?;
                self.reporter.agency_id = Some(agency_id);
                Ok(())
            }
        }
    }

    fn send_zero_ack(&mut self) {
        if let Err(error) = self.connection.send(&codec::encode_ack(None)) {
            self.logger.debug(
                Some(LOG_CONTEXT),
                &format!(
                    "zero ack not delivered to connection {}: {error}",
                    self.connection.id()
                ),
            );
        }
    }

    fn send_winners(&mut self) -> Option<usize> {
        let Some(winners) = self.results.take().and_then(ResultReceiver::wait) else {
            self.logger.warn(
                Some(LOG_CONTEXT),
                &format!(
                    "agency {:?} on connection {} closed without results (server stopping)",
                    self.reporter.agency_id,
                    self.connection.id()
                ),
            );
            return None;
        };

        let sent = codec::encode_winners(&winners)
            .and_then(|message| self.connection.send(&message));
        match sent {
            Ok(()) => {
                self.logger.action(
                    LOG_CONTEXT,
                    "winners_sent",
                    ActionResult::Success,
                    Some(json!({
                        "agency": self.reporter.agency_id,
                        "count": winners.len(),
                    })),
                );
                Some(winners.len())
            }
            Err(error) => {
                self.logger.action(
                    LOG_CONTEXT,
                    "winners_sent",
                    ActionResult::Fail,
                    Some(json!({
                        "agency": self.reporter.agency_id,
                        "count": winners.len(),
                        "error": error.to_string(),
                    })),
                );
                None
            }
        }
    }
}
