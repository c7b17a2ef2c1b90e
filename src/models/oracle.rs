use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use validator::Validate;

use crate::error::StatusCodeError;

/// Number of index slots every oracle holds.
pub const INDEX_SLOTS: usize = 3;

/// Opaque account handle of a single oracle.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OracleIdentity(String);

impl OracleIdentity {
    pub fn new(handle: impl Into<String>) -> Self {
        Self(handle.into())
    }

    /// Derive an address-shaped identity for the `ordinal`-th oracle of a pool.
    pub fn derive(pool_seed: u64, ordinal: u32) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(pool_seed.to_be_bytes());
        hasher.update(ordinal.to_be_bytes());
        let digest = hasher.finalize();
        Self(format!("0x{}", hex::encode(&digest[..20])))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OracleIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The three index labels assigned to an oracle at registration.
///
/// Slots are not deduplicated, so an oracle may hold the same index twice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IndexSet([u8; INDEX_SLOTS]);

impl IndexSet {
    pub fn new(indexes: [u8; INDEX_SLOTS]) -> Self {
        Self(indexes)
    }

    pub fn contains(&self, index: u8) -> bool {
        self.0.contains(&index)
    }

    pub fn iter(&self) -> impl Iterator<Item = u8> + '_ {
        self.0.iter().copied()
    }

    pub fn as_array(&self) -> [u8; INDEX_SLOTS] {
        self.0
    }
}

impl fmt::Display for IndexSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c] = self.0;
        write!(f, "{a}, {b}, {c}")
    }
}

/// Flight status codes understood by the flight-surety contract
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
#[repr(u8)]
pub enum StatusCode {
    Unknown = 0,
    OnTime = 10,
    LateAirline = 20,
    LateWeather = 30,
    LateTechnical = 40,
    LateOther = 50,
}

impl StatusCode {
    pub const ALL: [StatusCode; 6] = [
        StatusCode::Unknown,
        StatusCode::OnTime,
        StatusCode::LateAirline,
        StatusCode::LateWeather,
        StatusCode::LateTechnical,
        StatusCode::LateOther,
    ];

    pub fn code(self) -> u8 {
        self as u8
    }
}

impl From<StatusCode> for u8 {
    fn from(status: StatusCode) -> Self {
        status.code()
    }
}

impl TryFrom<u8> for StatusCode {
    type Error = StatusCodeError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        StatusCode::ALL
            .into_iter()
            .find(|status| status.code() == value)
            .ok_or(StatusCodeError(value))
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StatusCode::Unknown => "UNKNOWN",
            StatusCode::OnTime => "ON_TIME",
            StatusCode::LateAirline => "LATE_AIRLINE",
            StatusCode::LateWeather => "LATE_WEATHER",
            StatusCode::LateTechnical => "LATE_TECHNICAL",
            StatusCode::LateOther => "LATE_OTHER",
        };
        write!(f, "{}({})", name, self.code())
    }
}

/// OracleRequest event as raised by the ledger
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
pub struct OracleRequestEvent {
    pub index: u8,
    #[validate(length(min = 1))]
    pub airline: String,
    #[validate(length(min = 1))]
    pub flight: String,
    pub timestamp: i64,
}

/// A flight-status request the node may answer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StatusRequest {
    pub request_index: u8,
    pub airline: String,
    pub flight: String,
    pub timestamp: i64,
}

impl StatusRequest {
    pub fn key(&self) -> RequestKey {
        RequestKey {
            request_index: self.request_index,
            airline: self.airline.clone(),
            flight: self.flight.clone(),
            timestamp: self.timestamp,
        }
    }
}

impl From<OracleRequestEvent> for StatusRequest {
    fn from(event: OracleRequestEvent) -> Self {
        Self {
            request_index: event.index,
            airline: event.airline,
            flight: event.flight,
            timestamp: event.timestamp,
        }
    }
}

impl From<&StatusRequest> for OracleRequestEvent {
    fn from(request: &StatusRequest) -> Self {
        Self {
            index: request.request_index,
            airline: request.airline.clone(),
            flight: request.flight.clone(),
            timestamp: request.timestamp,
        }
    }
}

/// Identifies one consensus record on the ledger: (index, airline, flight, timestamp).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RequestKey {
    pub request_index: u8,
    pub airline: String,
    pub flight: String,
    pub timestamp: i64,
}

impl fmt::Display for RequestKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}:{}",
            self.request_index, self.airline, self.flight, self.timestamp
        )
    }
}

/// One oracle's answer to one request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusProposal {
    pub oracle: OracleIdentity,
    pub request: StatusRequest,
    pub status_code: StatusCode,
}

/// Ledger acknowledgment of an accepted submission
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmissionAck {
    pub tx_hash: String,
    /// Set when the request is finalized, whether by this submission or an earlier one.
    pub finalized: Option<StatusCode>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum OutcomeKind {
    Accepted {
        tx_hash: String,
        finalized: Option<StatusCode>,
    },
    Rejected {
        reason: String,
    },
    Errored {
        reason: String,
    },
}

/// Terminal result of a single oracle's submission
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmissionOutcome {
    pub oracle: OracleIdentity,
    pub status_code: Option<StatusCode>,
    #[serde(flatten)]
    pub kind: OutcomeKind,
}

impl SubmissionOutcome {
    pub fn is_accepted(&self) -> bool {
        matches!(self.kind, OutcomeKind::Accepted { .. })
    }
}

/// Everything the node did for one incoming request event
#[derive(Debug, Clone, Serialize)]
pub struct DispatchReport {
    pub request: StatusRequest,
    pub matched: BTreeSet<OracleIdentity>,
    pub outcomes: Vec<SubmissionOutcome>,
}

impl DispatchReport {
    pub fn accepted(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_accepted()).count()
    }

    /// Finalized code observed by any accepted submission
    pub fn finalized(&self) -> Option<StatusCode> {
        self.outcomes.iter().find_map(|outcome| match &outcome.kind {
            OutcomeKind::Accepted { finalized, .. } => *finalized,
            _ => None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_code_roundtrips_through_numeric_code() {
        for status in StatusCode::ALL {
            assert_eq!(StatusCode::try_from(status.code()), Ok(status));
        }
        assert_eq!(StatusCode::try_from(15), Err(StatusCodeError(15)));
    }

    #[test]
    fn status_code_serializes_as_number() {
        let json = serde_json::to_string(&StatusCode::LateAirline).unwrap();
        assert_eq!(json, "20");
        assert!(serde_json::from_str::<StatusCode>("25").is_err());
    }

    #[test]
    fn derived_identity_is_stable_and_address_shaped() {
        let a = OracleIdentity::derive(42, 0);
        assert_eq!(a, OracleIdentity::derive(42, 0));
        assert_ne!(a, OracleIdentity::derive(42, 1));
        assert_ne!(a, OracleIdentity::derive(43, 0));
        assert!(a.as_str().starts_with("0x"));
        assert_eq!(a.as_str().len(), 42);
    }

    #[test]
    fn index_set_membership_checks_every_slot() {
        let set = IndexSet::new([1, 4, 7]);
        assert!(set.contains(1));
        assert!(set.contains(4));
        assert!(set.contains(7));
        assert!(!set.contains(2));
        assert_eq!(set.to_string(), "1, 4, 7");
    }

    #[test]
    fn request_event_validation_rejects_empty_flight() {
        let event = OracleRequestEvent {
            index: 3,
            airline: "0xabc".to_string(),
            flight: String::new(),
            timestamp: 1_700_000_000,
        };
        assert!(event.validate().is_err());
    }

    #[test]
    fn outcome_serializes_with_tag() {
        let outcome = SubmissionOutcome {
            oracle: OracleIdentity::new("0x01"),
            status_code: Some(StatusCode::OnTime),
            kind: OutcomeKind::Rejected {
                reason: "stale".to_string(),
            },
        };
        let value = serde_json::to_value(&outcome).unwrap();
        assert_eq!(value["outcome"], "rejected");
        assert_eq!(value["status_code"], 10);
        assert_eq!(value["reason"], "stale");
    }
}
