//! Event listener for OracleRequest events
//!
//! Requests are taken one at a time: validated, matched against a registry
//! snapshot, then handed to the dispatcher in a task of their own so a slow
//! ledger never holds up the next event.

use std::sync::Arc;

use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};
use validator::Validate;

use crate::models::oracle::{DispatchReport, OracleRequestEvent, StatusRequest};
use crate::services::oracle_registry::OracleRegistry;
use crate::services::request_matcher::RequestMatcher;
use crate::services::submission_dispatcher::SubmissionDispatcher;

pub struct OracleEventListener {
    registry: Arc<OracleRegistry>,
    dispatcher: SubmissionDispatcher,
    reports: Option<mpsc::Sender<DispatchReport>>,
}

impl OracleEventListener {
    pub fn new(registry: Arc<OracleRegistry>, dispatcher: SubmissionDispatcher) -> Self {
        Self {
            registry,
            dispatcher,
            reports: None,
        }
    }

    /// Send a report for every processed request to `reports`.
    pub fn with_reports(mut self, reports: mpsc::Sender<DispatchReport>) -> Self {
        self.reports = Some(reports);
        self
    }

    /// Listen until the event channel closes, then wait for in-flight dispatches.
    pub async fn run(self, mut events: broadcast::Receiver<OracleRequestEvent>) {
        info!("Starting OracleRequest listener");
        let mut in_flight = JoinSet::new();

        loop {
            tokio::select! {
                received = events.recv() => match received {
                    Ok(event) => {
                        if let Some(request) = accept(event) {
                            let matched = RequestMatcher::matching(&self.registry, &request).await;
                            let dispatcher = self.dispatcher.clone();
                            let reports = self.reports.clone();
                            in_flight.spawn(async move {
                                let outcomes = dispatcher.dispatch(&matched, &request).await;
                                publish(reports, DispatchReport { request, matched, outcomes }).await;
                            });
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Listener lagged behind; OracleRequest events dropped");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
                Some(joined) = in_flight.join_next(), if !in_flight.is_empty() => {
                    if let Err(join_error) = joined {
                        error!(error = %join_error, "dispatch task failed");
                    }
                }
            }
        }

        while let Some(joined) = in_flight.join_next().await {
            if let Err(join_error) = joined {
                error!(error = %join_error, "dispatch task failed");
            }
        }
        info!("OracleRequest listener stopped");
    }

    /// Process one request inline: match, dispatch, report.
    pub async fn handle(&self, request: StatusRequest) -> DispatchReport {
        let matched = RequestMatcher::matching(&self.registry, &request).await;
        let outcomes = self.dispatcher.dispatch(&matched, &request).await;
        let report = DispatchReport {
            request,
            matched,
            outcomes,
        };
        publish(self.reports.clone(), report.clone()).await;
        report
    }
}

fn accept(event: OracleRequestEvent) -> Option<StatusRequest> {
    if let Err(err) = event.validate() {
        warn!(error = %err, "Ignoring invalid OracleRequest event");
        return None;
    }

    debug!(
        request_index = event.index,
        flight = %event.flight,
        timestamp = event.timestamp,
        "OracleRequest received"
    );
    Some(StatusRequest::from(event))
}

async fn publish(reports: Option<mpsc::Sender<DispatchReport>>, report: DispatchReport) {
    if report.matched.is_empty() {
        debug!(
            request_index = report.request.request_index,
            flight = %report.request.flight,
            "No oracle holds this index"
        );
    }

    if let Some(reports) = reports {
        if reports.send(report).await.is_err() {
            debug!("report receiver dropped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::oracle::{IndexSet, OracleIdentity, StatusCode};
    use crate::services::index_assignment::IndexAssigner;
    use crate::services::ledger::SimulatedLedger;
    use crate::services::response_generator::FixedTableStrategy;
    use std::time::Duration;

    async fn setup() -> (Arc<OracleRegistry>, Arc<SimulatedLedger>, OracleEventListener) {
        let registry = Arc::new(OracleRegistry::new(IndexAssigner::new(0, 10)));
        registry
            .register_with(OracleIdentity::new("0x1"), IndexSet::new([1, 2, 3]))
            .await
            .unwrap();
        registry
            .register_with(OracleIdentity::new("0x2"), IndexSet::new([3, 4, 5]))
            .await
            .unwrap();

        let ledger = Arc::new(SimulatedLedger::new(registry.clone(), 2, 10, 1));
        let dispatcher = SubmissionDispatcher::new(
            ledger.clone(),
            Arc::new(FixedTableStrategy::new(StatusCode::OnTime)),
            Duration::from_secs(5),
        );
        let listener = OracleEventListener::new(registry.clone(), dispatcher);
        (registry, ledger, listener)
    }

    fn request(index: u8) -> StatusRequest {
        StatusRequest {
            request_index: index,
            airline: "0xairline".to_string(),
            flight: "ND1309".to_string(),
            timestamp: 1_700_000_000,
        }
    }

    #[tokio::test]
    async fn events_flow_through_to_reports() {
        let (_registry, ledger, listener) = setup().await;
        let (tx, mut rx) = mpsc::channel(8);
        let events = ledger.subscribe();
        let run = tokio::spawn(listener.with_reports(tx).run(events));

        ledger.raise(&request(3));
        let report = rx.recv().await.unwrap();

        assert_eq!(report.matched.len(), 2);
        assert_eq!(report.accepted(), 2);
        assert_eq!(report.finalized(), Some(StatusCode::OnTime));

        // the dispatcher keeps the ledger, and so the channel, alive
        run.abort();
    }

    #[tokio::test]
    async fn invalid_and_unmatched_events_do_not_stop_the_listener() {
        let (_registry, ledger, listener) = setup().await;
        let (tx, mut rx) = mpsc::channel(8);
        let sender = ledger.event_sender();
        let run = tokio::spawn(listener.with_reports(tx).run(ledger.subscribe()));

        sender
            .send(OracleRequestEvent {
                index: 1,
                airline: "0xairline".to_string(),
                flight: String::new(),
                timestamp: 0,
            })
            .unwrap();
        ledger.raise(&request(9));
        ledger.raise(&request(1));

        let unmatched = rx.recv().await.unwrap();
        let matched = rx.recv().await.unwrap();
        let (unmatched, matched) = if unmatched.matched.is_empty() {
            (unmatched, matched)
        } else {
            (matched, unmatched)
        };
        assert!(unmatched.outcomes.is_empty());
        assert_eq!(matched.matched.len(), 1);
        assert_eq!(matched.accepted(), 1);
        assert_eq!(matched.finalized(), None);

        run.abort();
    }

    #[tokio::test]
    async fn duplicate_events_are_harmless() {
        let (_registry, ledger, listener) = setup().await;
        ledger.raise(&request(3));

        let first = listener.handle(request(3)).await;
        let second = listener.handle(request(3)).await;

        assert_eq!(first.finalized(), Some(StatusCode::OnTime));
        assert_eq!(second.finalized(), Some(StatusCode::OnTime));
        assert_eq!(ledger.flight_status(&request(3).key()), Some(StatusCode::OnTime));
    }
}
