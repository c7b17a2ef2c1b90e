use std::env;
use std::str::FromStr;
use std::time::Duration;

use validator::{Validate, ValidationError};

use crate::error::ConfigError;
use crate::models::oracle::StatusCode;
use crate::services::response_generator::StrategyKind;

/// Startup configuration for the oracle pool. Treated as fixed once loaded.
#[derive(Clone, Debug, Validate)]
#[validate(schema(function = "validate_quorum"))]
pub struct OracleConfig {
    /// Number of oracles bootstrapped into the pool.
    #[validate(range(min = 1, max = 10000))]
    pub oracle_count: u32,
    /// Indexes are drawn from `[0, max_index)`.
    #[validate(range(min = 1))]
    pub max_index: u8,
    /// Agreeing proposals needed to finalize a request.
    #[validate(range(min = 1))]
    pub min_responses: u32,
    pub seed: u64,
    /// JSON-RPC endpoint of the ledger. Unset runs against the in-process ledger.
    pub ledger_rpc_url: Option<String>,
    pub submission_timeout: Duration,
    pub strategy: StrategyKind,
    #[validate(length(min = 1))]
    pub status_codes: Vec<StatusCode>,
    pub fixed_status_code: StatusCode,
    pub simulated_flights: Vec<String>,
    pub flight_request_interval: Duration,
    pub event_poll_interval: Duration,
}

impl Default for OracleConfig {
    fn default() -> Self {
        Self {
            oracle_count: 20,
            max_index: 10,
            min_responses: 3,
            seed: 42,
            ledger_rpc_url: None,
            submission_timeout: Duration::from_millis(5000),
            strategy: StrategyKind::TimeBased,
            status_codes: StatusCode::ALL.to_vec(),
            fixed_status_code: StatusCode::LateAirline,
            simulated_flights: vec!["ND1309".to_string(), "AV0412".to_string()],
            flight_request_interval: Duration::from_secs(15),
            event_poll_interval: Duration::from_secs(5),
        }
    }
}

impl OracleConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build from any key lookup, falling back to defaults for absent keys.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let config = Self {
            oracle_count: parse_or(&get, "ORACLE_COUNT", defaults.oracle_count)?,
            max_index: parse_or(&get, "MAX_INDEX", defaults.max_index)?,
            min_responses: parse_or(&get, "MIN_RESPONSES", defaults.min_responses)?,
            seed: parse_or(&get, "ORACLE_SEED", defaults.seed)?,
            ledger_rpc_url: get("LEDGER_RPC_URL"),
            submission_timeout: Duration::from_millis(parse_or(
                &get,
                "SUBMISSION_TIMEOUT_MS",
                defaults.submission_timeout.as_millis() as u64,
            )?),
            strategy: parse_or(&get, "RESPONSE_STRATEGY", defaults.strategy)?,
            status_codes: match get("RESPONSE_STATUS_CODES") {
                Some(raw) => parse_status_codes("RESPONSE_STATUS_CODES", &raw)?,
                None => defaults.status_codes,
            },
            fixed_status_code: match get("FIXED_STATUS_CODE") {
                Some(raw) => parse_status_code("FIXED_STATUS_CODE", &raw)?,
                None => defaults.fixed_status_code,
            },
            simulated_flights: get("SIMULATED_FLIGHTS")
                .map(|raw| split_list(&raw).map(ToString::to_string).collect())
                .unwrap_or(defaults.simulated_flights),
            flight_request_interval: Duration::from_secs(parse_or(
                &get,
                "FLIGHT_REQUEST_INTERVAL_SECONDS",
                defaults.flight_request_interval.as_secs(),
            )?),
            event_poll_interval: Duration::from_secs(parse_or(
                &get,
                "EVENT_POLL_INTERVAL_SECONDS",
                defaults.event_poll_interval.as_secs(),
            )?),
        };

        config.validate()?;
        Ok(config)
    }
}

fn validate_quorum(config: &OracleConfig) -> Result<(), ValidationError> {
    if config.min_responses > config.oracle_count {
        return Err(ValidationError::new("min_responses_exceeds_oracle_count"));
    }
    Ok(())
}

fn parse_or<T, G>(get: &G, key: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        Some(value) => value
            .parse()
            .map_err(|_| ConfigError::Invalid { key, value }),
        None => Ok(default),
    }
}

fn split_list(raw: &str) -> impl Iterator<Item = &str> {
    raw.split(',').map(str::trim).filter(|item| !item.is_empty())
}

fn parse_status_code(key: &'static str, raw: &str) -> Result<StatusCode, ConfigError> {
    raw.parse::<u8>()
        .ok()
        .and_then(|code| StatusCode::try_from(code).ok())
        .ok_or_else(|| ConfigError::Invalid {
            key,
            value: raw.to_string(),
        })
}

fn parse_status_codes(key: &'static str, raw: &str) -> Result<Vec<StatusCode>, ConfigError> {
    split_list(raw)
        .map(|item| parse_status_code(key, item))
        .collect()
}
