//! Node state shared by the listener and the bootstrap code

use std::sync::Arc;

use crate::config::OracleConfig;
use crate::event_listener::OracleEventListener;
use crate::services::index_assignment::IndexAssigner;
use crate::services::ledger::LedgerClient;
use crate::services::oracle_registry::OracleRegistry;
use crate::services::response_generator::{
    FixedTableStrategy, RandomStrategy, ResponseStrategy, StrategyKind, TimeBasedStrategy,
};
use crate::services::submission_dispatcher::SubmissionDispatcher;

/// Shared node state
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<OracleConfig>,
    pub registry: Arc<OracleRegistry>,
    pub dispatcher: SubmissionDispatcher,
}

impl AppState {
    pub fn new(
        config: OracleConfig,
        registry: Arc<OracleRegistry>,
        ledger: Arc<dyn LedgerClient>,
    ) -> Self {
        let dispatcher =
            SubmissionDispatcher::new(ledger, build_strategy(&config), config.submission_timeout);
        Self {
            config: Arc::new(config),
            registry,
            dispatcher,
        }
    }

    /// Empty registry sized by the configured index range and seed.
    pub fn registry_for(config: &OracleConfig) -> Arc<OracleRegistry> {
        Arc::new(OracleRegistry::new(IndexAssigner::new(
            config.seed,
            config.max_index,
        )))
    }

    pub fn listener(&self) -> OracleEventListener {
        OracleEventListener::new(self.registry.clone(), self.dispatcher.clone())
    }
}

pub fn build_strategy(config: &OracleConfig) -> Arc<dyn ResponseStrategy> {
    match config.strategy {
        StrategyKind::Random => Arc::new(RandomStrategy::new(config.seed, config.status_codes.clone())),
        StrategyKind::TimeBased => Arc::new(TimeBasedStrategy),
        StrategyKind::Fixed => Arc::new(FixedTableStrategy::new(config.fixed_status_code)),
    }
}
