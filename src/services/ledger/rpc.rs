//! JSON-RPC ledger client and OracleRequest event poller

use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use tokio::sync::broadcast;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};
use validator::Validate;

use super::LedgerClient;
use crate::error::{RegistryError, SubmissionError};
use crate::models::oracle::{
    IndexSet, OracleIdentity, OracleRequestEvent, StatusCode, StatusProposal, SubmissionAck,
    INDEX_SLOTS,
};

const RPC_CLIENT_ID: &str = "flight-oracles";
const ORACLE_REQUEST_EVENT: &str = "OracleRequest";
const EVENTS_PAGE_LIMIT: u64 = 200;
// ledgers covered by a single poll cycle
const LEDGER_WINDOW: u64 = 200;

#[derive(Clone)]
pub struct RpcLedgerClient {
    rpc_url: String,
    http: Client,
}

impl RpcLedgerClient {
    pub fn new(rpc_url: impl Into<String>) -> Self {
        Self {
            rpc_url: rpc_url.into(),
            http: Client::new(),
        }
    }

    async fn rpc_call(&self, method: &str, params: Value) -> Result<Value, reqwest::Error> {
        self.http
            .post(&self.rpc_url)
            .json(&json!({
                "jsonrpc": "2.0",
                "id": RPC_CLIENT_ID,
                "method": method,
                "params": params,
            }))
            .send()
            .await?
            .error_for_status()?
            .json::<Value>()
            .await
    }

    async fn latest_ledger(&self) -> Result<u64> {
        let response = self
            .rpc_call("getLatestLedger", json!({}))
            .await
            .map_err(|err| anyhow!("getLatestLedger failed: {err}"))?;

        response
            .pointer("/result/sequence")
            .and_then(|v| v.as_u64())
            .ok_or_else(|| anyhow!("missing latest ledger sequence in RPC response"))
    }

    /// Every OracleRequest event in `[start_ledger, end_ledger]`, following
    /// the RPC's paging cursor until a short page comes back.
    async fn oracle_request_events(
        &self,
        start_ledger: u64,
        end_ledger: u64,
        page_limit: u64,
    ) -> Result<Vec<Value>> {
        let mut collected = Vec::new();
        let mut page_cursor: Option<String> = None;

        loop {
            let params = events_page_params(start_ledger, end_ledger, page_limit, page_cursor.as_deref());
            let response = self
                .rpc_call("getEvents", params)
                .await
                .map_err(|err| anyhow!("getEvents failed: {err}"))?;

            if let Some(rpc_error) = response.get("error") {
                return Err(anyhow!("RPC error: {rpc_error}"));
            }

            let page = response
                .pointer("/result/events")
                .and_then(|v| v.as_array().cloned())
                .unwrap_or_default();
            let next_cursor = next_page_cursor(&response, &page);
            let full_page = page.len() as u64 >= page_limit;
            collected.extend(page);

            match next_cursor {
                Some(next) if full_page && page_cursor.as_deref() != Some(next.as_str()) => {
                    page_cursor = Some(next);
                }
                _ => break,
            }
        }

        Ok(collected)
    }
}

#[async_trait]
impl LedgerClient for RpcLedgerClient {
    async fn register_oracle(&self, identity: &OracleIdentity) -> Result<IndexSet, RegistryError> {
        let response = self
            .rpc_call("registerOracle", json!({ "from": identity }))
            .await
            .map_err(|err| RegistryError::Transport(err.to_string()))?;
        parse_registration_response(identity, &response)?;

        self.oracle_indexes(identity).await
    }

    async fn oracle_indexes(&self, identity: &OracleIdentity) -> Result<IndexSet, RegistryError> {
        let response = self
            .rpc_call("getMyIndexes", json!({ "from": identity }))
            .await
            .map_err(|err| RegistryError::Transport(err.to_string()))?;

        parse_indexes_response(identity, &response)
    }

    async fn submit_oracle_response(
        &self,
        proposal: &StatusProposal,
    ) -> Result<SubmissionAck, SubmissionError> {
        let response = self
            .rpc_call("submitOracleResponse", submission_params(proposal))
            .await
            .map_err(|err| SubmissionError::Transport(err.to_string()))?;

        parse_submission_response(&response)
    }
}

fn rpc_error_message(response: &Value) -> Option<String> {
    response.get("error").map(|rpc_error| {
        rpc_error
            .pointer("/message")
            .and_then(|v| v.as_str())
            .unwrap_or("unspecified ledger error")
            .to_string()
    })
}

fn parse_registration_response(identity: &OracleIdentity, response: &Value) -> Result<(), RegistryError> {
    if let Some(message) = rpc_error_message(response) {
        if message.to_ascii_lowercase().contains("already registered") {
            return Err(RegistryError::AlreadyRegistered(identity.clone()));
        }
        return Err(RegistryError::Rejected(message));
    }

    response
        .get("result")
        .map(|_| ())
        .ok_or_else(|| RegistryError::Transport("missing result in RPC response".to_string()))
}

fn parse_indexes_response(identity: &OracleIdentity, response: &Value) -> Result<IndexSet, RegistryError> {
    if let Some(message) = rpc_error_message(response) {
        if message.to_ascii_lowercase().contains("not registered") {
            return Err(RegistryError::NotRegistered(identity.clone()));
        }
        return Err(RegistryError::Rejected(message));
    }

    let values = response
        .pointer("/result/indexes")
        .or_else(|| response.pointer("/result"))
        .and_then(|v| v.as_array())
        .ok_or_else(|| RegistryError::Transport("missing indexes in RPC response".to_string()))?;

    if values.len() != INDEX_SLOTS {
        return Err(RegistryError::Transport(format!(
            "expected {INDEX_SLOTS} indexes, got {}",
            values.len()
        )));
    }

    let mut indexes = [0u8; INDEX_SLOTS];
    for (slot, value) in indexes.iter_mut().zip(values) {
        *slot = as_u64(value)
            .and_then(|index| u8::try_from(index).ok())
            .ok_or_else(|| RegistryError::Transport(format!("invalid index {value}")))?;
    }
    Ok(IndexSet::new(indexes))
}

fn submission_params(proposal: &StatusProposal) -> Value {
    json!({
        "from": proposal.oracle,
        "index": proposal.request.request_index,
        "airline": proposal.request.airline,
        "flight": proposal.request.flight,
        "timestamp": proposal.request.timestamp,
        "statusCode": proposal.status_code,
    })
}

fn parse_submission_response(response: &Value) -> Result<SubmissionAck, SubmissionError> {
    if let Some(message) = rpc_error_message(response) {
        if message.to_ascii_lowercase().contains("do not match oracle request") {
            return Err(SubmissionError::StaleOrFinalizedRequest);
        }
        return Err(SubmissionError::Rejected(message));
    }

    let result = response
        .get("result")
        .ok_or_else(|| SubmissionError::Transport("missing result in RPC response".to_string()))?;

    let tx_hash = result
        .pointer("/txHash")
        .or_else(|| result.pointer("/transactionHash"))
        .and_then(|v| v.as_str())
        .ok_or_else(|| SubmissionError::Transport("missing transaction hash".to_string()))?
        .to_string();

    let finalized = result
        .pointer("/finalizedStatus")
        .and_then(|v| v.as_u64())
        .and_then(|code| u8::try_from(code).ok())
        .and_then(|code| StatusCode::try_from(code).ok());

    Ok(SubmissionAck { tx_hash, finalized })
}

// the RPC refuses startLedger alongside a paging cursor
fn events_page_params(start_ledger: u64, end_ledger: u64, limit: u64, cursor: Option<&str>) -> Value {
    match cursor {
        None => json!({
            "startLedger": start_ledger,
            "endLedger": end_ledger,
            "event": ORACLE_REQUEST_EVENT,
            "pagination": { "limit": limit },
        }),
        Some(cursor) => json!({
            "endLedger": end_ledger,
            "event": ORACLE_REQUEST_EVENT,
            "pagination": { "cursor": cursor, "limit": limit },
        }),
    }
}

fn next_page_cursor(response: &Value, page: &[Value]) -> Option<String> {
    response
        .pointer("/result/cursor")
        .and_then(|v| v.as_str())
        .or_else(|| {
            page.last().and_then(|last| {
                last.pointer("/pagingToken")
                    .or_else(|| last.pointer("/id"))
                    .and_then(|v| v.as_str())
            })
        })
        .map(str::to_string)
}

/// Polls the ledger for OracleRequest events and forwards them to subscribers.
///
/// The ledger cursor only moves once every event in the polled window has
/// reached a subscriber; a window that could not be delivered is fetched
/// again on the next cycle.
pub struct RpcEventPoller {
    client: RpcLedgerClient,
    poll_interval: Duration,
    page_limit: u64,
    cursor: u64,
}

impl RpcEventPoller {
    pub fn new(client: RpcLedgerClient, poll_interval: Duration) -> Self {
        Self {
            client,
            poll_interval,
            page_limit: EVENTS_PAGE_LIMIT,
            cursor: 0,
        }
    }

    pub fn with_page_limit(mut self, page_limit: u64) -> Self {
        self.page_limit = page_limit.max(1);
        self
    }

    /// Last ledger whose events were delivered.
    pub fn cursor(&self) -> u64 {
        self.cursor
    }

    pub async fn start(mut self, events: broadcast::Sender<OracleRequestEvent>) {
        info!(rpc_url = %self.client.rpc_url, "OracleRequest poller started");

        loop {
            match self.poll_once(&events).await {
                Ok(0) => {}
                Ok(forwarded) => debug!(forwarded, cursor = self.cursor, "poll cycle complete"),
                Err(err) => error!(error = %err, cursor = self.cursor, "OracleRequest poll cycle failed"),
            }

            sleep(self.poll_interval).await;
        }
    }

    pub async fn poll_once(&mut self, events: &broadcast::Sender<OracleRequestEvent>) -> Result<usize> {
        if events.receiver_count() == 0 {
            debug!(cursor = self.cursor, "No OracleRequest subscribers; holding cursor");
            return Ok(0);
        }

        let latest_ledger = self.client.latest_ledger().await?;
        let from_ledger = self.cursor.saturating_add(1);
        if from_ledger > latest_ledger {
            return Ok(0);
        }

        let to_ledger = latest_ledger.min(from_ledger.saturating_add(LEDGER_WINDOW));
        let raw_events = self
            .client
            .oracle_request_events(from_ledger, to_ledger, self.page_limit)
            .await?;
        let forwarded = forward_events(&raw_events, events)?;

        self.cursor = to_ledger;
        debug!(from_ledger, to_ledger, forwarded, "OracleRequest window delivered");
        Ok(forwarded)
    }
}

/// Fails as soon as an event finds no subscriber, so the caller keeps its cursor.
fn forward_events(raw_events: &[Value], events: &broadcast::Sender<OracleRequestEvent>) -> Result<usize> {
    let mut forwarded = 0;
    for raw in raw_events {
        match parse_oracle_request(raw) {
            Some(event) => {
                events
                    .send(event)
                    .map_err(|_| anyhow!("OracleRequest subscribers went away after {forwarded} events"))?;
                forwarded += 1;
            }
            None => {
                let ledger = raw.pointer("/ledger").and_then(|v| v.as_u64()).unwrap_or(0);
                warn!(ledger, "Skipping malformed OracleRequest event");
            }
        }
    }
    Ok(forwarded)
}

/// Accepts both `returnValues` and flat event shapes.
fn parse_oracle_request(raw: &Value) -> Option<OracleRequestEvent> {
    let body = raw
        .pointer("/returnValues")
        .or_else(|| raw.pointer("/value"))
        .unwrap_or(raw);

    let event = OracleRequestEvent {
        index: u8::try_from(as_u64(body.get("index")?)?).ok()?,
        airline: body.get("airline")?.as_str()?.to_string(),
        flight: body.get("flight")?.as_str()?.to_string(),
        timestamp: i64::try_from(as_u64(body.get("timestamp")?)?).ok()?,
    };

    event.validate().ok()?;
    Some(event)
}

// event fields arrive as numbers or decimal strings
fn as_u64(value: &Value) -> Option<u64> {
    value
        .as_u64()
        .or_else(|| value.as_str().and_then(|s| s.parse().ok()))
}
