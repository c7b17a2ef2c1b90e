//! Flight Oracles Server
//!
//! Bootstraps the oracle pool, listens for OracleRequest events from the
//! ledger and answers them on behalf of every authorized oracle.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{broadcast, mpsc};
use tokio::time::sleep;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use flight_oracles::app_state::AppState;
use flight_oracles::config::OracleConfig;
use flight_oracles::models::oracle::{DispatchReport, OracleRequestEvent};
use flight_oracles::services::ledger::{
    LedgerClient, RpcEventPoller, RpcLedgerClient, SimulatedLedger,
};

const LISTENER_SUPERVISOR_MAX_BACKOFF_SECONDS: u64 = 30;
const EVENT_CHANNEL_CAPACITY: usize = 256;
const REPORT_CHANNEL_CAPACITY: usize = 64;
const SIMULATED_AIRLINE: &str = "0xf17f52151ebef6c7334fad080c5704d77216b732";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = OracleConfig::from_env()?;
    info!(
        oracles = config.oracle_count,
        max_index = config.max_index,
        min_responses = config.min_responses,
        strategy = %config.strategy,
        "Starting flight oracle node"
    );

    let registry = AppState::registry_for(&config);

    // The first listener's receiver exists before any event source starts.
    let (ledger, events, first_subscriber): (
        Arc<dyn LedgerClient>,
        broadcast::Sender<OracleRequestEvent>,
        broadcast::Receiver<OracleRequestEvent>,
    ) = match config.ledger_rpc_url.clone() {
        Some(rpc_url) => {
            let client = RpcLedgerClient::new(rpc_url);
            let pool = registry
                .bootstrap_from_ledger(&client, config.seed, config.oracle_count)
                .await;
            warn_if_incomplete(pool.len(), config.oracle_count);

            let (events, first_subscriber) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
            let poller = RpcEventPoller::new(client.clone(), config.event_poll_interval);
            tokio::spawn(poller.start(events.clone()));
            (Arc::new(client) as Arc<dyn LedgerClient>, events, first_subscriber)
        }
        None => {
            info!("No LEDGER_RPC_URL set; running against the simulated ledger");
            let pool = registry.bootstrap(config.seed, config.oracle_count).await;
            warn_if_incomplete(pool.len(), config.oracle_count);

            let ledger = Arc::new(SimulatedLedger::new(
                registry.clone(),
                config.min_responses as usize,
                config.max_index,
                config.seed,
            ));
            let events = ledger.event_sender();
            let first_subscriber = events.subscribe();
            tokio::spawn(drive_simulated_flights(
                ledger.clone(),
                config.simulated_flights.clone(),
                config.flight_request_interval,
            ));
            (ledger as Arc<dyn LedgerClient>, events, first_subscriber)
        }
    };

    let state = AppState::new(config, registry, ledger);

    let (reports_tx, reports_rx) = mpsc::channel(REPORT_CHANNEL_CAPACITY);
    tokio::spawn(log_reports(reports_rx));

    // Start and supervise the OracleRequest listener.
    tokio::spawn(async move {
        let mut restart_count: u32 = 0;
        let mut first_subscriber = Some(first_subscriber);
        loop {
            let subscriber = first_subscriber.take().unwrap_or_else(|| events.subscribe());
            let listener = state.listener().with_reports(reports_tx.clone());
            let handle = tokio::spawn(listener.run(subscriber));

            match handle.await {
                Ok(()) => {
                    info!("listener exited cleanly; stopping supervisor");
                    break;
                }
                Err(join_error) => {
                    if join_error.is_panic() {
                        error!("listener panicked; restarting");
                    } else {
                        error!(error = %join_error, "listener task failed; restarting");
                    }
                }
            }

            restart_count = restart_count.saturating_add(1);
            let backoff_seconds = (2u64.saturating_pow(restart_count.min(5)))
                .min(LISTENER_SUPERVISOR_MAX_BACKOFF_SECONDS);
            warn!(restart_count, backoff_seconds, "listener restart backoff");
            sleep(Duration::from_secs(backoff_seconds)).await;
        }
    });

    tokio::signal::ctrl_c().await?;
    info!("Shutting down flight oracle node");
    Ok(())
}

fn warn_if_incomplete(registered: usize, requested: u32) {
    if registered < requested as usize {
        warn!(registered, requested, "Unable to register all initial oracles");
    }
}

/// Raise a status request for every configured flight on each tick.
async fn drive_simulated_flights(ledger: Arc<SimulatedLedger>, flights: Vec<String>, interval: Duration) {
    if flights.is_empty() {
        info!("No simulated flights configured");
        return;
    }

    loop {
        sleep(interval).await;
        let timestamp = Utc::now().timestamp();
        for flight in &flights {
            ledger.fetch_flight_status(SIMULATED_AIRLINE, flight.as_str(), timestamp);
        }
    }
}

async fn log_reports(mut reports: mpsc::Receiver<DispatchReport>) {
    while let Some(report) = reports.recv().await {
        let finalized = report.finalized().map(|code| code.to_string());
        info!(
            flight = %report.request.flight,
            request_index = report.request.request_index,
            matched = report.matched.len(),
            accepted = report.accepted(),
            finalized = finalized.as_deref().unwrap_or("open"),
            "Request dispatched"
        );
    }
}
