//! Ledger collaborators the oracle node submits to and hears events from

use async_trait::async_trait;

use crate::error::{RegistryError, SubmissionError};
use crate::models::oracle::{IndexSet, OracleIdentity, StatusProposal, SubmissionAck};

pub mod rpc;
pub mod simulated;

pub use rpc::{RpcEventPoller, RpcLedgerClient};
pub use simulated::SimulatedLedger;

/// Outgoing side of the ledger.
#[async_trait]
pub trait LedgerClient: Send + Sync {
    /// Register an oracle; the ledger assigns its indexes.
    async fn register_oracle(&self, identity: &OracleIdentity) -> Result<IndexSet, RegistryError>;

    /// Indexes the ledger holds for an oracle registered earlier.
    async fn oracle_indexes(&self, identity: &OracleIdentity) -> Result<IndexSet, RegistryError>;

    /// One call per (oracle, request).
    async fn submit_oracle_response(
        &self,
        proposal: &StatusProposal,
    ) -> Result<SubmissionAck, SubmissionError>;
}
