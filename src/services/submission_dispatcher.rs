//! Concurrent fan-out of oracle proposals to the ledger

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::task::JoinSet;
use tokio::time::timeout;
use tracing::{error, info, warn};

use crate::error::SubmissionError;
use crate::models::oracle::{
    OracleIdentity, OutcomeKind, StatusProposal, StatusRequest, SubmissionOutcome,
};
use crate::services::ledger::LedgerClient;
use crate::services::response_generator::ResponseStrategy;

/// Submits one proposal per matched oracle, each in its own task.
///
/// A slow, failing, or panicking submission only affects its own outcome.
/// Nothing is retried here.
#[derive(Clone)]
pub struct SubmissionDispatcher {
    ledger: Arc<dyn LedgerClient>,
    strategy: Arc<dyn ResponseStrategy>,
    submission_timeout: Duration,
}

impl SubmissionDispatcher {
    pub fn new(
        ledger: Arc<dyn LedgerClient>,
        strategy: Arc<dyn ResponseStrategy>,
        submission_timeout: Duration,
    ) -> Self {
        Self {
            ledger,
            strategy,
            submission_timeout,
        }
    }

    /// Returns exactly one outcome per matched oracle, in completion order.
    pub async fn dispatch(
        &self,
        matched: &BTreeSet<OracleIdentity>,
        request: &StatusRequest,
    ) -> Vec<SubmissionOutcome> {
        let mut tasks = JoinSet::new();

        for oracle in matched {
            let ledger = self.ledger.clone();
            let strategy = self.strategy.clone();
            let oracle = oracle.clone();
            let request = request.clone();
            let wait = self.submission_timeout;

            tasks.spawn(async move { submit_one(ledger, strategy, oracle, request, wait).await });
        }

        let mut outcomes = Vec::with_capacity(matched.len());
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(outcome) => outcomes.push(outcome),
                Err(join_error) => {
                    error!(error = %join_error, flight = %request.flight, "submission task failed");
                }
            }
        }

        // a task that died never produced an outcome; report it for its oracle
        let reported: BTreeSet<OracleIdentity> =
            outcomes.iter().map(|outcome| outcome.oracle.clone()).collect();
        for oracle in matched.difference(&reported) {
            outcomes.push(SubmissionOutcome {
                oracle: oracle.clone(),
                status_code: None,
                kind: OutcomeKind::Errored {
                    reason: "submission task aborted".to_string(),
                },
            });
        }

        outcomes
    }
}

async fn submit_one(
    ledger: Arc<dyn LedgerClient>,
    strategy: Arc<dyn ResponseStrategy>,
    oracle: OracleIdentity,
    request: StatusRequest,
    wait: Duration,
) -> SubmissionOutcome {
    let status_code = strategy.propose(&oracle, &request, Utc::now());
    let proposal = StatusProposal {
        oracle,
        request,
        status_code,
    };

    let result = match timeout(wait, ledger.submit_oracle_response(&proposal)).await {
        Ok(result) => result,
        Err(_) => Err(SubmissionError::Timeout(wait)),
    };

    let kind = match result {
        Ok(ack) => {
            info!(
                oracle = %proposal.oracle,
                flight = %proposal.request.flight,
                status_code = %status_code,
                tx_hash = %ack.tx_hash,
                "Oracle responded"
            );
            OutcomeKind::Accepted {
                tx_hash: ack.tx_hash,
                finalized: ack.finalized,
            }
        }
        Err(err) if err.is_rejection() => {
            warn!(
                oracle = %proposal.oracle,
                flight = %proposal.request.flight,
                status_code = %status_code,
                error = %err,
                "Oracle response rejected"
            );
            OutcomeKind::Rejected {
                reason: err.to_string(),
            }
        }
        Err(err) => {
            warn!(
                oracle = %proposal.oracle,
                flight = %proposal.request.flight,
                error = %err,
                "Oracle response not delivered"
            );
            OutcomeKind::Errored {
                reason: err.to_string(),
            }
        }
    };

    SubmissionOutcome {
        oracle: proposal.oracle,
        status_code: Some(status_code),
        kind,
    }
}
