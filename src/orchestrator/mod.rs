mod lottery;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use serde_json::json;

pub use lottery::{run_lottery, WinnersByAgency};

use crate::config::AppConfig;
use crate::handler::{AgencyHandler, HandlerContext, HandlerSummary};
use crate::logging::{ActionResult, Logger};
use crate::server::{ConnectionRegistry, TcpServer};
use crate::shutdown::StopSignal;
use crate::storage::{SharedStorage, StorageError};
use crate::sync::{
    completion_channel, AgencyClaims, BarrierWait, CompletionReceiver, CompletionRecord, Outcome,
    ReadyBarrier, ResultRouter,
};
use crate::utils::timing::measure_execution;

const LOG_CONTEXT: &str = "orchestrator";
const COMPLETION_DRAIN_PATIENCE: Duration = Duration::from_secs(1);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct OrchestratorSettings {
    pub expected_agencies: u32,
    pub accept_poll_interval: Duration,
}

impl From<&AppConfig> for OrchestratorSettings {
    fn from(value: &AppConfig) -> Self {
        Self {
            expected_agencies: value.server.expected_agencies,
            accept_poll_interval: Duration::from_millis(value.server.accept_poll_interval_ms),
        }
    }
}

/// Stops a running orchestrator from any thread: raises the stop flag and
/// closes the read half of every agency socket so blocked reads return.
#[derive(Clone)]
pub struct ShutdownHandle {
    stop: StopSignal,
    registry: Arc<ConnectionRegistry>,
}

impl ShutdownHandle {
    pub fn shutdown(&self) {
        self.stop.raise();
        self.registry.shutdown_reads();
    }
}

#[derive(Debug, Default)]
pub struct LotteryReport {
    pub agencies_connected: u32,
    pub lottery_executed: bool,
    pub lottery_error: Option<StorageError>,
    pub completions: Vec<CompletionRecord>,
    pub winners: WinnersByAgency,
    pub delivered: BTreeMap<u64, u32>,
    pub handlers: Vec<HandlerSummary>,
}

impl LotteryReport {
    pub fn outcome_count(&self, outcome: Outcome) -> usize {
        self.completions
            .iter()
            .filter(|record| record.outcome == outcome)
            .count()
    }
}

pub struct Orchestrator {
    server: TcpServer,
    storage: SharedStorage,
    stop: StopSignal,
    logger: Logger,
    settings: OrchestratorSettings,
}

impl Orchestrator {
    pub fn new(
        server: TcpServer,
        storage: SharedStorage,
        stop: StopSignal,
        logger: Logger,
        settings: OrchestratorSettings,
    ) -> Self {
        Self {
            server,
            storage,
            stop,
            logger,
            settings,
        }
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            stop: self.stop.clone(),
            registry: self.server.registry(),
        }
    }

    /// Accepts the expected agencies, waits for every handler to report,
    /// runs the lottery once and routes each agency its winners. Returns
    /// after every handler thread has been joined.
    pub fn run(self) -> LotteryReport {
        let shutdown = self.shutdown_handle();
        let Self {
            server,
            storage,
            stop,
            logger,
            settings,
        } = self;
        let expected = settings.expected_agencies;

        let barrier = Arc::new(ReadyBarrier::new(expected));
        let (completion_sender, completions) = completion_channel();
        let router = ResultRouter::new();
        let context = HandlerContext {
            storage: storage.clone(),
            barrier: Arc::clone(&barrier),
            claims: Arc::new(AgencyClaims::new()),
            completions: completion_sender,
            stop: stop.clone(),
            expected_agencies: expected,
            logger: logger.clone(),
        };

        let (handles, connected) =
            accept_agencies(&server, &router, context, &stop, &logger, &settings);
        // Dropping the server closes the listening socket.
        drop(server);

        let mut report = LotteryReport {
            agencies_connected: connected,
            ..LotteryReport::default()
        };

        let all_connected = connected == expected;
        let barrier_ready = all_connected
            && barrier.wait_all_or(settings.accept_poll_interval, || stop.is_raised())
                == BarrierWait::Ready;

        if barrier_ready && !stop.is_raised() {
            logger.action(LOG_CONTEXT, "lottery", ActionResult::InProgress, None);
            match measure_execution("lottery", Some(LOG_CONTEXT), &logger, || {
                run_lottery(&storage, expected, &logger)
            }) {
                Ok(winners) => {
                    report.lottery_executed = true;
                    report.winners = winners;
                    logger.action(LOG_CONTEXT, "lottery", ActionResult::Success, None);
                }
                Err(error) => {
                    logger.action(
                        LOG_CONTEXT,
                        "lottery",
                        ActionResult::Fail,
                        Some(json!({ "error": error.to_string() })),
                    );
                    report.lottery_error = Some(error);
                }
            }
        } else {
            logger.action(
                LOG_CONTEXT,
                "stop_server",
                ActionResult::InProgress,
                Some(json!({
                    "agencies_connected": connected,
                    "agencies_expected": expected,
                    "agencies_ready": barrier.ready_count(),
                })),
            );
            shutdown.shutdown();
            barrier.wait_until(connected);
        }

        report.completions = completions_of(&completions, connected, &logger);
        if report.lottery_executed {
            report.delivered = deliver_results(&router, &report.completions, &report.winners, &logger);
        }
        let abandoned = router.close_all();
        if abandoned > 0 {
            logger.warn(
                Some(LOG_CONTEXT),
                &format!("{abandoned} agencies released without results"),
            );
        }

        report.handlers = join_handlers(handles, &logger);
        logger.action(
            LOG_CONTEXT,
            "stop_server",
            ActionResult::Success,
            Some(json!({
                "lottery_executed": report.lottery_executed,
                "success": report.outcome_count(Outcome::Success),
                "failure": report.outcome_count(Outcome::Failure),
                "stopped": report.outcome_count(Outcome::Stopped),
                "delivered": report.delivered.len(),
            })),
        );
        report
    }
}

fn accept_agencies(
    server: &TcpServer,
    router: &ResultRouter,
    context: HandlerContext,
    stop: &StopSignal,
    logger: &Logger,
    settings: &OrchestratorSettings,
) -> (Vec<JoinHandle<HandlerSummary>>, u32) {
    let mut handles = Vec::with_capacity(settings.expected_agencies as usize);
    let mut accepted = 0_u32;
    logger.action(
        LOG_CONTEXT,
        "accept_connections",
        ActionResult::InProgress,
        Some(json!({ "expected": settings.expected_agencies })),
    );

    // Connections whose handler failed to spawn still count: they reported
    // to the barrier on drop.
    while !stop.is_raised() && accepted < settings.expected_agencies {
        let connection = match server.try_accept() {
            Ok(Some(connection)) => connection,
            Ok(None) => {
                thread::sleep(settings.accept_poll_interval);
                continue;
            }
            Err(error) => {
                logger.action(
                    LOG_CONTEXT,
                    "accept_connections",
                    ActionResult::Fail,
                    Some(json!({ "error": error.to_string() })),
                );
                thread::sleep(settings.accept_poll_interval);
                continue;
            }
        };

        accepted += 1;
        let connection_id = connection.id();
        logger.action(
            LOG_CONTEXT,
            "accept_connections",
            ActionResult::Success,
            Some(json!({
                "connection_id": connection_id,
                "ip": connection.peer_addr().ip().to_string(),
            })),
        );

        let results = router.register(connection_id);
        match AgencyHandler::new(connection, results, context.clone()).spawn() {
            Ok(handle) => handles.push(handle),
            Err(error) => {
                // The unspawned handler already reported a failure on drop.
                router.discard(connection_id);
                logger.error(
                    Some(LOG_CONTEXT),
                    &format!("failed to spawn handler for connection {connection_id}: {error}"),
                );
            }
        }
    }

    (handles, accepted)
}

fn completions_of(
    completions: &CompletionReceiver,
    count: u32,
    logger: &Logger,
) -> Vec<CompletionRecord> {
    let records = completions.drain(count as usize, COMPLETION_DRAIN_PATIENCE);
    if records.len() < count as usize {
        logger.warn(
            Some(LOG_CONTEXT),
            &format!(
                "expected {count} completion records, received {}",
                records.len()
            ),
        );
    }
    records
}

/// Routes each successful agency its winners, at most once per agency: the
/// first success record wins and any later one for the same agency is
/// released empty-handed. Returns agency per connection that got a result.
fn deliver_results(
    router: &ResultRouter,
    completions: &[CompletionRecord],
    winners: &WinnersByAgency,
    logger: &Logger,
) -> BTreeMap<u64, u32> {
    let mut delivered = BTreeMap::new();

    for record in completions {
        let (Outcome::Success, Some(agency_id)) = (record.outcome, record.agency_id) else {
            router.discard(record.connection_id);
            continue;
        };

        if delivered.values().any(|delivered_agency| *delivered_agency == agency_id) {
            router.discard(record.connection_id);
            logger.action(
                LOG_CONTEXT,
                "winners_routed",
                ActionResult::Fail,
                Some(json!({
                    "agency": agency_id,
                    "connection_id": record.connection_id,
                    "error": "agency already received its winners on another connection",
                })),
            );
            continue;
        }

        let agency_winners = winners.get(&agency_id).cloned().unwrap_or_default();
        match router.deliver(record.connection_id, agency_winners) {
            Ok(()) => {
                delivered.insert(record.connection_id, agency_id);
            }
            Err(error) => logger.warn(
                Some(LOG_CONTEXT),
                &format!("winners for agency {agency_id} not delivered: {error}"),
            ),
        }
    }

    delivered
}

fn join_handlers(handles: Vec<JoinHandle<HandlerSummary>>, logger: &Logger) -> Vec<HandlerSummary> {
    let mut summaries = Vec::with_capacity(handles.len());
    for handle in handles {
        let name = handle.thread().name().unwrap_or("agency-conn").to_owned();
        match handle.join() {
            Ok(summary) => summaries.push(summary),
            Err(_) => logger.error(
                Some(LOG_CONTEXT),
                &format!("handler thread '{name}' panicked"),
            ),
        }
    }
    summaries
}
