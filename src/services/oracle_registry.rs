//! Oracle registry: identity -> assigned indexes

use std::collections::HashMap;

use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::error::RegistryError;
use crate::models::oracle::{IndexSet, OracleIdentity};
use crate::services::index_assignment::IndexAssigner;
use crate::services::ledger::LedgerClient;

/// Holds every registered oracle and its index set.
///
/// Writers take the lock exclusively for a single insert, so readers never
/// observe a partially written entry. `all` hands out an owned snapshot.
pub struct OracleRegistry {
    assigner: IndexAssigner,
    oracles: RwLock<HashMap<OracleIdentity, IndexSet>>,
}

impl OracleRegistry {
    pub fn new(assigner: IndexAssigner) -> Self {
        Self {
            assigner,
            oracles: RwLock::new(HashMap::new()),
        }
    }

    /// Register an oracle, assigning it a fresh index set.
    pub async fn register(&self, identity: OracleIdentity) -> Result<IndexSet, RegistryError> {
        let indexes = self.assigner.assign(&identity);
        self.register_with(identity, indexes).await
    }

    /// Register an oracle whose indexes were assigned elsewhere.
    pub async fn register_with(
        &self,
        identity: OracleIdentity,
        indexes: IndexSet,
    ) -> Result<IndexSet, RegistryError> {
        let mut oracles = self.oracles.write().await;
        if oracles.contains_key(&identity) {
            return Err(RegistryError::AlreadyRegistered(identity));
        }
        oracles.insert(identity, indexes);
        Ok(indexes)
    }

    pub async fn lookup(&self, identity: &OracleIdentity) -> Option<IndexSet> {
        self.oracles.read().await.get(identity).copied()
    }

    pub async fn all(&self) -> Vec<(OracleIdentity, IndexSet)> {
        self.oracles
            .read()
            .await
            .iter()
            .map(|(identity, indexes)| (identity.clone(), *indexes))
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.oracles.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.oracles.read().await.is_empty()
    }

    /// Register `count` oracles derived from `pool_seed`.
    ///
    /// Identities that are already present are skipped, so bootstrapping twice
    /// leaves the pool as it was.
    pub async fn bootstrap(&self, pool_seed: u64, count: u32) -> Vec<(OracleIdentity, IndexSet)> {
        let mut registered = Vec::with_capacity(count as usize);
        for ordinal in 0..count {
            let identity = OracleIdentity::derive(pool_seed, ordinal);
            match self.register(identity.clone()).await {
                Ok(indexes) => {
                    info!(oracle = %identity, indexes = %indexes, "Oracle registered");
                    registered.push((identity, indexes));
                }
                Err(err) => {
                    warn!(error = %err, "Skipping oracle during bootstrap");
                }
            }
        }
        registered
    }

    /// Register `count` oracles derived from `pool_seed` on the ledger and
    /// record the indexes it hands back.
    ///
    /// Oracles the ledger already knows are read back with `oracle_indexes`,
    /// so a restarted node recovers the pool it registered before.
    pub async fn bootstrap_from_ledger(
        &self,
        ledger: &dyn LedgerClient,
        pool_seed: u64,
        count: u32,
    ) -> Vec<(OracleIdentity, IndexSet)> {
        let mut registered = Vec::with_capacity(count as usize);
        for ordinal in 0..count {
            let identity = OracleIdentity::derive(pool_seed, ordinal);
            let indexes = match ledger.register_oracle(&identity).await {
                Ok(indexes) => indexes,
                Err(RegistryError::AlreadyRegistered(_)) => {
                    match ledger.oracle_indexes(&identity).await {
                        Ok(indexes) => indexes,
                        Err(err) => {
                            warn!(oracle = %identity, error = %err, "Unable to read back oracle indexes");
                            continue;
                        }
                    }
                }
                Err(err) => {
                    warn!(oracle = %identity, error = %err, "Unable to register oracle on the ledger");
                    continue;
                }
            };

            match self.register_with(identity.clone(), indexes).await {
                Ok(indexes) => {
                    info!(oracle = %identity, indexes = %indexes, "Oracle registered");
                    registered.push((identity, indexes));
                }
                Err(err) => warn!(error = %err, "Skipping oracle during bootstrap"),
            }
        }
        registered
    }
}
