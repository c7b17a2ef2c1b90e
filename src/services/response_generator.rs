//! Status-code proposal strategies
//!
//! These simulate oracle answers for a non-adversarial test pool. None of them
//! attest to real flight data.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use sha2::{Digest, Sha256};

use crate::models::oracle::{OracleIdentity, StatusCode, StatusRequest};

/// Produces one oracle's status code for a request.
///
/// Implementations must be pure in `(oracle, request, now)`: the dispatcher
/// calls them from concurrent tasks with no coordination.
pub trait ResponseStrategy: Send + Sync {
    fn propose(&self, oracle: &OracleIdentity, request: &StatusRequest, now: DateTime<Utc>)
        -> StatusCode;
}

/// Picks from a status table with an RNG seeded per (oracle, request).
#[derive(Debug, Clone)]
pub struct RandomStrategy {
    seed: u64,
    codes: Vec<StatusCode>,
}

impl RandomStrategy {
    pub fn new(seed: u64, codes: Vec<StatusCode>) -> Self {
        let codes = if codes.is_empty() {
            StatusCode::ALL.to_vec()
        } else {
            codes
        };
        Self { seed, codes }
    }

    fn rng_for(&self, oracle: &OracleIdentity, request: &StatusRequest) -> StdRng {
        let mut hasher = Sha256::new();
        hasher.update(self.seed.to_be_bytes());
        hasher.update(oracle.as_str().as_bytes());
        hasher.update(request.key().to_string().as_bytes());
        let digest = hasher.finalize();
        let mut seed = [0u8; 32];
        seed.copy_from_slice(&digest);
        StdRng::from_seed(seed)
    }
}

impl ResponseStrategy for RandomStrategy {
    fn propose(
        &self,
        oracle: &OracleIdentity,
        request: &StatusRequest,
        _now: DateTime<Utc>,
    ) -> StatusCode {
        let mut rng = self.rng_for(oracle, request);
        self.codes[rng.gen_range(0..self.codes.len())]
    }
}

/// Flights scheduled in the past are reported late by the airline.
#[derive(Debug, Clone, Copy, Default)]
pub struct TimeBasedStrategy;

impl ResponseStrategy for TimeBasedStrategy {
    fn propose(
        &self,
        _oracle: &OracleIdentity,
        request: &StatusRequest,
        now: DateTime<Utc>,
    ) -> StatusCode {
        match DateTime::<Utc>::from_timestamp(request.timestamp, 0) {
            Some(scheduled) if scheduled < now => StatusCode::LateAirline,
            _ => StatusCode::Unknown,
        }
    }
}

/// Per-oracle fixed answers, with a fallback for everyone else.
#[derive(Debug, Clone)]
pub struct FixedTableStrategy {
    table: HashMap<OracleIdentity, StatusCode>,
    default: StatusCode,
}

impl FixedTableStrategy {
    pub fn new(default: StatusCode) -> Self {
        Self {
            table: HashMap::new(),
            default,
        }
    }

    pub fn with_entry(mut self, oracle: OracleIdentity, code: StatusCode) -> Self {
        self.table.insert(oracle, code);
        self
    }
}

impl ResponseStrategy for FixedTableStrategy {
    fn propose(
        &self,
        oracle: &OracleIdentity,
        _request: &StatusRequest,
        _now: DateTime<Utc>,
    ) -> StatusCode {
        self.table.get(oracle).copied().unwrap_or(self.default)
    }
}

/// Strategy selector read from configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StrategyKind {
    Random,
    TimeBased,
    Fixed,
}

impl FromStr for StrategyKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "random" => Ok(Self::Random),
            "time" | "time-based" | "time_based" => Ok(Self::TimeBased),
            "fixed" | "table" => Ok(Self::Fixed),
            other => Err(format!("unknown response strategy: {other}")),
        }
    }
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Random => "random",
            Self::TimeBased => "time",
            Self::Fixed => "fixed",
        };
        f.write_str(name)
    }
}
