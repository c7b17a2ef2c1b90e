//! In-process stand-in for the flight-surety contract

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::sync::broadcast;
use tracing::{debug, info};
use uuid::Uuid;

use super::LedgerClient;
use crate::error::{RegistryError, SubmissionError};
use crate::models::oracle::{
    IndexSet, OracleIdentity, OracleRequestEvent, RequestKey, StatusCode, StatusProposal, StatusRequest, SubmissionAck,
};
use crate::services::consensus_tally::{ConsensusTally, TallyState, TallyUpdate};
use crate::services::oracle_registry::OracleRegistry;

const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Raises OracleRequest events and tallies the responses, checking each
/// submitting oracle against the shared registry.
pub struct SimulatedLedger {
    registry: Arc<OracleRegistry>,
    tally: ConsensusTally,
    max_index: u8,
    rng: Mutex<StdRng>,
    events: broadcast::Sender<OracleRequestEvent>,
}

impl SimulatedLedger {
    pub fn new(registry: Arc<OracleRegistry>, min_responses: usize, max_index: u8, seed: u64) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            registry,
            tally: ConsensusTally::new(min_responses),
            max_index: max_index.max(1),
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
            events,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<OracleRequestEvent> {
        self.events.subscribe()
    }

    pub fn event_sender(&self) -> broadcast::Sender<OracleRequestEvent> {
        self.events.clone()
    }

    /// Ask the oracles for a flight's status under a randomly drawn index.
    pub fn fetch_flight_status(
        &self,
        airline: impl Into<String>,
        flight: impl Into<String>,
        timestamp: i64,
    ) -> StatusRequest {
        let request_index = {
            let mut rng = self.rng.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            rng.gen_range(0..self.max_index)
        };
        let request = StatusRequest {
            request_index,
            airline: airline.into(),
            flight: flight.into(),
            timestamp,
        };
        self.raise(&request);
        request
    }

    /// Open the request on the tally and emit its event. Raising the same
    /// request again re-emits the event without resetting its tally.
    pub fn raise(&self, request: &StatusRequest) {
        self.tally.open(request.key());
        info!(
            request_index = request.request_index,
            flight = %request.flight,
            timestamp = request.timestamp,
            "OracleRequest raised"
        );
        if self.events.send(OracleRequestEvent::from(request)).is_err() {
            debug!(flight = %request.flight, "no subscribers for OracleRequest");
        }
    }

    pub fn flight_status(&self, key: &RequestKey) -> Option<StatusCode> {
        self.tally.finalized(key)
    }

    pub fn request_state(&self, key: &RequestKey) -> Option<TallyState> {
        self.tally.state(key)
    }
}

#[async_trait]
impl LedgerClient for SimulatedLedger {
    async fn register_oracle(&self, identity: &OracleIdentity) -> Result<IndexSet, RegistryError> {
        self.registry.register(identity.clone()).await
    }

    async fn oracle_indexes(&self, identity: &OracleIdentity) -> Result<IndexSet, RegistryError> {
        self.registry
            .lookup(identity)
            .await
            .ok_or_else(|| RegistryError::NotRegistered(identity.clone()))
    }

    async fn submit_oracle_response(
        &self,
        proposal: &StatusProposal,
    ) -> Result<SubmissionAck, SubmissionError> {
        let index = proposal.request.request_index;
        let indexes = self
            .registry
            .lookup(&proposal.oracle)
            .await
            .ok_or_else(|| SubmissionError::Rejected(format!("oracle {} is not registered", proposal.oracle)))?;

        if !indexes.contains(index) {
            return Err(SubmissionError::NotAuthorized {
                oracle: proposal.oracle.clone(),
                index,
            });
        }

        let finalized = match self.tally.contribute(proposal)? {
            TallyUpdate::Duplicate => self.tally.finalized(&proposal.request.key()),
            update => update.finalized_code(),
        };

        Ok(SubmissionAck {
            tx_hash: format!("sim_{}", Uuid::new_v4().simple()),
            finalized,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::oracle::{IndexSet, OracleIdentity};
    use crate::services::index_assignment::IndexAssigner;

    async fn ledger_with(oracles: &[(&str, [u8; 3])]) -> SimulatedLedger {
        let registry = Arc::new(OracleRegistry::new(IndexAssigner::new(0, 10)));
        for (name, indexes) in oracles {
            registry
                .register_with(OracleIdentity::new(*name), IndexSet::new(*indexes))
                .await
                .unwrap();
        }
        SimulatedLedger::new(registry, 2, 10, 11)
    }

    fn request(index: u8) -> StatusRequest {
        StatusRequest {
            request_index: index,
            airline: "0xairline".to_string(),
            flight: "ND1309".to_string(),
            timestamp: 1_700_000_000,
        }
    }

    fn proposal(oracle: &str, index: u8, code: StatusCode) -> StatusProposal {
        StatusProposal {
            oracle: OracleIdentity::new(oracle),
            request: request(index),
            status_code: code,
        }
    }

    #[tokio::test]
    async fn fetch_flight_status_emits_event_in_range() {
        let ledger = ledger_with(&[]).await;
        let mut events = ledger.subscribe();

        let request = ledger.fetch_flight_status("0xairline", "ND1309", 1_700_000_000);
        let event = events.recv().await.unwrap();

        assert!(request.request_index < 10);
        assert_eq!(StatusRequest::from(event), request);
        assert!(matches!(
            ledger.request_state(&request.key()),
            Some(TallyState::Open { .. })
        ));
    }

    #[tokio::test]
    async fn rejects_oracle_without_the_index() {
        let ledger = ledger_with(&[("0xa", [1, 2, 3])]).await;
        ledger.raise(&request(5));

        let err = ledger
            .submit_oracle_response(&proposal("0xa", 5, StatusCode::OnTime))
            .await
            .unwrap_err();
        assert!(matches!(err, SubmissionError::NotAuthorized { index: 5, .. }));
    }

    #[tokio::test]
    async fn rejects_unregistered_oracle() {
        let ledger = ledger_with(&[]).await;
        ledger.raise(&request(5));

        let err = ledger
            .submit_oracle_response(&proposal("0xghost", 5, StatusCode::OnTime))
            .await
            .unwrap_err();
        assert!(err.is_rejection());
    }

    #[tokio::test]
    async fn response_for_unopened_request_is_stale() {
        let ledger = ledger_with(&[("0xa", [5, 5, 5])]).await;
        let err = ledger
            .submit_oracle_response(&proposal("0xa", 5, StatusCode::OnTime))
            .await
            .unwrap_err();
        assert_eq!(err, SubmissionError::StaleOrFinalizedRequest);
    }

    #[tokio::test]
    async fn acks_report_finalization() {
        let ledger = ledger_with(&[("0xa", [5, 1, 2]), ("0xb", [3, 5, 4]), ("0xc", [5, 0, 0])]).await;
        ledger.raise(&request(5));

        let first = ledger
            .submit_oracle_response(&proposal("0xa", 5, StatusCode::LateWeather))
            .await
            .unwrap();
        assert_eq!(first.finalized, None);
        assert!(first.tx_hash.starts_with("sim_"));

        let second = ledger
            .submit_oracle_response(&proposal("0xb", 5, StatusCode::LateWeather))
            .await
            .unwrap();
        assert_eq!(second.finalized, Some(StatusCode::LateWeather));

        let late = ledger
            .submit_oracle_response(&proposal("0xc", 5, StatusCode::OnTime))
            .await
            .unwrap();
        assert_eq!(late.finalized, Some(StatusCode::LateWeather));

        let repeat = ledger
            .submit_oracle_response(&proposal("0xa", 5, StatusCode::OnTime))
            .await
            .unwrap();
        assert_eq!(repeat.finalized, Some(StatusCode::LateWeather));
        assert_eq!(
            ledger.flight_status(&request(5).key()),
            Some(StatusCode::LateWeather)
        );
    }
}
