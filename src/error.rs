//! Error taxonomy for the oracle node
//!
//! None of these are fatal to the process: registry and submission errors are
//! reported per oracle and per request, and the caller decides what to do next.

use std::time::Duration;

use crate::models::oracle::OracleIdentity;

/// Registry errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("oracle {0} is already registered")]
    AlreadyRegistered(OracleIdentity),

    #[error("oracle {0} is not registered")]
    NotRegistered(OracleIdentity),

    #[error("registration rejected: {0}")]
    Rejected(String),

    #[error("ledger transport error: {0}")]
    Transport(String),
}

/// Errors returned by a ledger collaborator for a single submission
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SubmissionError {
    #[error("submission rejected: {0}")]
    Rejected(String),

    #[error("oracle {oracle} is not authorized for index {index}")]
    NotAuthorized { oracle: OracleIdentity, index: u8 },

    #[error("stale request: flight or timestamp do not match an open oracle request")]
    StaleOrFinalizedRequest,

    #[error("no acknowledgment within {0:?}")]
    Timeout(Duration),

    #[error("ledger transport error: {0}")]
    Transport(String),
}

impl SubmissionError {
    /// Refusals are the ledger saying no; everything else is a failure to get an answer.
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            Self::Rejected(_) | Self::NotAuthorized { .. } | Self::StaleOrFinalizedRequest
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown flight status code: {0}")]
pub struct StatusCodeError(pub u8);

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value {value:?} for {key}")]
    Invalid { key: &'static str, value: String },

    #[error("configuration rejected: {0}")]
    Validation(#[from] validator::ValidationErrors),
}
