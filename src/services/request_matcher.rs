//! Selects the oracles authorized to answer a request

use std::collections::BTreeSet;

use crate::models::oracle::{IndexSet, OracleIdentity, StatusRequest};
use crate::services::oracle_registry::OracleRegistry;

/// Oracles whose index set holds the request's index.
///
/// The result is ordered, so the same snapshot and request always give the
/// same set. An empty set is a valid answer.
pub fn match_oracles(
    request: &StatusRequest,
    snapshot: &[(OracleIdentity, IndexSet)],
) -> BTreeSet<OracleIdentity> {
    snapshot
        .iter()
        .filter(|(_, indexes)| indexes.contains(request.request_index))
        .map(|(identity, _)| identity.clone())
        .collect()
}

pub struct RequestMatcher;

impl RequestMatcher {
    /// Snapshot the registry, then match against it.
    pub async fn matching(
        registry: &OracleRegistry,
        request: &StatusRequest,
    ) -> BTreeSet<OracleIdentity> {
        let snapshot = registry.all().await;
        match_oracles(request, &snapshot)
    }
}
