mod config;
mod handler;
mod logging;
mod model;
mod orchestrator;
mod server;
mod shutdown;
mod storage;
mod sync;
mod utils;
mod wire;

use std::process;

use serde_json::json;

use config::AppConfig;
use logging::{LogLevel, Logger, LoggerConfig};
use orchestrator::{LotteryReport, Orchestrator, OrchestratorSettings};
use server::TcpServer;
use shutdown::{ShutdownHooks, StopSignal};
use storage::{SharedStorage, StorageFacade};
use sync::Outcome;
use utils::runtime::ensure_posix_or_exit;
use utils::startup_banner::print_startup_banner;
use utils::timing::measure_execution;

fn main() {
    ensure_posix_or_exit();
    print_startup_banner();

    let app_config = load_config_or_exit();
    let log_level =
        LogLevel::from_config_value(&app_config.logging.level).unwrap_or_else(|| {
            eprintln!(
                "invalid logging.level '{}'. Allowed values: error, warn, info, debug, verbose",
                app_config.logging.level
            );
            process::exit(2);
        });

    let logger = Logger::new(LoggerConfig {
        min_level: log_level,
        human_friendly: app_config.logging.human_friendly,
    });

    let storage = measure_execution("storage.initialize", Some("main::storage"), &logger, || {
        StorageFacade::initialize(&app_config, &logger)
    })
    .unwrap_or_else(|error| {
        eprintln!("storage initialization error: {error}");
        process::exit(2);
    });
    logger.log(
        LogLevel::Info,
        Some("main::storage"),
        "Bet storage ready",
        Some(json!({
            "engine": storage.engine().as_str(),
            "path": storage.data_path().map(|path| path.display().to_string()),
            "winning_number": storage.winning_number(),
        })),
    );
    let storage = SharedStorage::new(storage);

    let server = TcpServer::from_app_config(&app_config).unwrap_or_else(|error| {
        eprintln!("server startup error: {error}");
        process::exit(2);
    });
    let bound_addr = server.local_addr().unwrap_or_else(|error| {
        eprintln!("server startup error: failed to read local address: {error}");
        process::exit(2);
    });
    logger.log(
        LogLevel::Info,
        Some("main::server"),
        &format!(
            "{} v{} listening for agencies",
            env!("CARGO_PKG_NAME"),
            env!("CARGO_PKG_VERSION")
        ),
        Some(json!({
            "bind_address": bound_addr.to_string(),
            "listen_backlog": server.listen_backlog(),
            "expected_agencies": app_config.server.expected_agencies,
        })),
    );

    let shutdown_hooks = ShutdownHooks::install(StopSignal::new()).unwrap_or_else(|error| {
        eprintln!("failed to install shutdown hooks: {error}");
        process::exit(2);
    });
    logger.info(
        Some("main::shutdown"),
        "Shutdown hooks installed for SIGINT/SIGTERM",
    );

    let orchestrator = Orchestrator::new(
        server,
        storage.clone(),
        shutdown_hooks.signal().clone(),
        logger.clone(),
        OrchestratorSettings::from(&app_config),
    );
    let report = orchestrator.run();

    if shutdown_hooks.is_triggered() {
        logger.info(
            Some("main::shutdown"),
            "Stopped by signal; agency sockets and listener released",
        );
    }
    flush_storage(&logger, &storage);
    log_report(&logger, &report);
}

fn flush_storage(logger: &Logger, storage: &SharedStorage) {
    match storage.lock().and_then(|facade| facade.flush()) {
        Ok(()) => logger.debug(Some("main::storage"), "Bet storage flushed"),
        Err(error) => logger.error(
            Some("main::storage"),
            &format!("failed to flush bet storage on exit: {error}"),
        ),
    }
}

fn load_config_or_exit() -> AppConfig {
    match AppConfig::load_with_discovery(std::env::args().skip(1)) {
        Ok(config) => config,
        Err(error) => {
            eprintln!("configuration error: {error}");
            process::exit(2);
        }
    }
}

fn log_report(logger: &Logger, report: &LotteryReport) {
    let winners: serde_json::Map<String, serde_json::Value> = report
        .winners
        .iter()
        .map(|(agency_id, documents)| (agency_id.to_string(), json!(documents.len())))
        .collect();
    let handlers: Vec<_> = report
        .handlers
        .iter()
        .map(|summary| {
            json!({
                "connection_id": summary.connection_id,
                "agency": summary.agency_id,
                "outcome": summary.outcome.as_str(),
                "bets_stored": summary.bets_stored,
                "winners_sent": summary.winners_sent,
            })
        })
        .collect();

    let level = if report.lottery_error.is_some() {
        LogLevel::Error
    } else {
        LogLevel::Info
    };
    logger.log(
        level,
        Some("main::orchestrator"),
        "Lottery round finished",
        Some(json!({
            "agencies_connected": report.agencies_connected,
            "lottery_executed": report.lottery_executed,
            "lottery_error": report.lottery_error.as_ref().map(ToString::to_string),
            "success": report.outcome_count(Outcome::Success),
            "failure": report.outcome_count(Outcome::Failure),
            "stopped": report.outcome_count(Outcome::Stopped),
            "winners_per_agency": winners,
            "handlers": handlers,
        })),
    );
}
