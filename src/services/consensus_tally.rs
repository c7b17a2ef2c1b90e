//! Quorum tally of oracle proposals per request
//!
//! Mirrors what the flight-surety contract does with oracle responses: group
//! proposals by status code, finalize the first code to reach `min_responses`,
//! and keep accepting late proposals without letting them change the verdict.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Mutex;

use tracing::{debug, info};

use crate::error::SubmissionError;
use crate::models::oracle::{OracleIdentity, RequestKey, StatusCode, StatusProposal};

/// Lifecycle of a request on the tally: OPEN until a code reaches quorum.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TallyState {
    Open { counts: BTreeMap<StatusCode, usize> },
    Finalized(StatusCode),
}

/// Effect of a single accepted contribution
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TallyUpdate {
    /// Counted; `count` proposals now agree on this code.
    Pending { count: usize },
    /// This contribution brought its code to quorum.
    Finalized { code: StatusCode },
    /// Recorded for bookkeeping only; the request was already finalized.
    AlreadyFinalized { code: StatusCode },
    /// This oracle already answered this request.
    Duplicate,
}

impl TallyUpdate {
    pub fn finalized_code(&self) -> Option<StatusCode> {
        match self {
            Self::Finalized { code } | Self::AlreadyFinalized { code } => Some(*code),
            _ => None,
        }
    }
}

#[derive(Debug, Default)]
struct ConsensusRecord {
    responses: HashMap<StatusCode, Vec<OracleIdentity>>,
    responders: HashSet<OracleIdentity>,
    finalized: Option<StatusCode>,
}

pub struct ConsensusTally {
    min_responses: usize,
    records: Mutex<HashMap<RequestKey, ConsensusRecord>>,
}

impl ConsensusTally {
    pub fn new(min_responses: usize) -> Self {
        Self {
            min_responses: min_responses.max(1),
            records: Mutex::new(HashMap::new()),
        }
    }

    pub fn min_responses(&self) -> usize {
        self.min_responses
    }

    /// Open a record for `key`. Returns false if one already exists, which is
    /// left untouched.
    pub fn open(&self, key: RequestKey) -> bool {
        let mut records = self.lock();
        if records.contains_key(&key) {
            return false;
        }
        debug!(request = %key, "Consensus record opened");
        records.insert(key, ConsensusRecord::default());
        true
    }

    /// Count one proposal. The whole increment-and-compare happens under the
    /// lock, so two racing contributions can never both finalize.
    pub fn contribute(&self, proposal: &StatusProposal) -> Result<TallyUpdate, SubmissionError> {
        let key = proposal.request.key();
        let mut records = self.lock();
        let record = records
            .get_mut(&key)
            .ok_or(SubmissionError::StaleOrFinalizedRequest)?;

        if !record.responders.insert(proposal.oracle.clone()) {
            return Ok(TallyUpdate::Duplicate);
        }

        let voters = record.responses.entry(proposal.status_code).or_default();
        voters.push(proposal.oracle.clone());
        let count = voters.len();

        if let Some(code) = record.finalized {
            return Ok(TallyUpdate::AlreadyFinalized { code });
        }

        if count >= self.min_responses {
            record.finalized = Some(proposal.status_code);
            info!(
                request = %key,
                status_code = %proposal.status_code,
                responses = count,
                "Flight status finalized"
            );
            return Ok(TallyUpdate::Finalized {
                code: proposal.status_code,
            });
        }

        Ok(TallyUpdate::Pending { count })
    }

    pub fn state(&self, key: &RequestKey) -> Option<TallyState> {
        let records = self.lock();
        let record = records.get(key)?;
        Some(match record.finalized {
            Some(code) => TallyState::Finalized(code),
            None => TallyState::Open {
                counts: record
                    .responses
                    .iter()
                    .map(|(code, voters)| (*code, voters.len()))
                    .collect(),
            },
        })
    }

    pub fn finalized(&self, key: &RequestKey) -> Option<StatusCode> {
        self.lock().get(key).and_then(|record| record.finalized)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<RequestKey, ConsensusRecord>> {
        // a poisoned map is still consistent: every mutation is a single insert or push
        self.records
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
