use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use flight_oracles::app_state::AppState;
use flight_oracles::config::OracleConfig;
use flight_oracles::models::oracle::{IndexSet, OracleIdentity, StatusCode, StatusRequest};
use flight_oracles::services::consensus_tally::TallyState;
use flight_oracles::services::index_assignment::IndexAssigner;
use flight_oracles::services::ledger::SimulatedLedger;
use flight_oracles::services::oracle_registry::OracleRegistry;
use flight_oracles::services::request_matcher::RequestMatcher;
use flight_oracles::services::response_generator::FixedTableStrategy;
use flight_oracles::services::submission_dispatcher::SubmissionDispatcher;
use tokio::sync::mpsc;

fn oracle(n: u8) -> OracleIdentity {
    OracleIdentity::new(format!("0xoracle{n}"))
}

fn request(index: u8) -> StatusRequest {
    StatusRequest {
        request_index: index,
        airline: "0xf17f52151ebef6c7334fad080c5704d77216b732".to_string(),
        flight: "ND1309".to_string(),
        timestamp: 1_700_000_000,
    }
}

/// Five oracles with known indexes, quorum of three; oracle 5 always says ON_TIME.
async fn five_oracle_pool() -> (Arc<OracleRegistry>, Arc<SimulatedLedger>, SubmissionDispatcher) {
    let registry = Arc::new(OracleRegistry::new(IndexAssigner::new(0, 10)));
    let pool = [
        (oracle(1), [1, 4, 7]),
        (oracle(2), [2, 4, 9]),
        (oracle(3), [1, 3, 4]),
        (oracle(4), [0, 5, 6]),
        (oracle(5), [2, 8, 4]),
    ];
    for (identity, indexes) in pool {
        registry
            .register_with(identity, IndexSet::new(indexes))
            .await
            .unwrap();
    }

    let ledger = Arc::new(SimulatedLedger::new(registry.clone(), 3, 10, 0));
    let strategy =
        FixedTableStrategy::new(StatusCode::LateAirline).with_entry(oracle(5), StatusCode::OnTime);
    let dispatcher =
        SubmissionDispatcher::new(ledger.clone(), Arc::new(strategy), Duration::from_secs(5));
    (registry, ledger, dispatcher)
}

#[tokio::test]
async fn majority_finalizes_late_airline() {
    let (registry, ledger, dispatcher) = five_oracle_pool().await;
    let request = request(4);
    ledger.raise(&request);

    let matched = RequestMatcher::matching(&registry, &request).await;
    let expected: BTreeSet<_> = [oracle(1), oracle(2), oracle(3), oracle(5)].into();
    assert_eq!(matched, expected);

    let outcomes = dispatcher.dispatch(&matched, &request).await;
    assert_eq!(outcomes.len(), 4);
    assert!(outcomes.iter().all(|outcome| outcome.is_accepted()));
    assert_eq!(
        ledger.flight_status(&request.key()),
        Some(StatusCode::LateAirline)
    );
}

#[tokio::test]
async fn single_holder_never_reaches_quorum() {
    let (registry, ledger, dispatcher) = five_oracle_pool().await;
    let request = request(9);
    ledger.raise(&request);

    let matched = RequestMatcher::matching(&registry, &request).await;
    assert_eq!(matched, BTreeSet::from([oracle(2)]));

    let outcomes = dispatcher.dispatch(&matched, &request).await;
    assert_eq!(outcomes.len(), 1);
    assert!(outcomes[0].is_accepted());
    assert_eq!(ledger.flight_status(&request.key()), None);
    assert_eq!(
        ledger.request_state(&request.key()),
        Some(TallyState::Open {
            counts: [(StatusCode::LateAirline, 1)].into()
        })
    );
}

#[tokio::test]
async fn index_nobody_holds_is_an_empty_dispatch() {
    let (registry, ledger, dispatcher) = five_oracle_pool().await;
    let request = request(10);
    ledger.raise(&request);

    let matched = RequestMatcher::matching(&registry, &request).await;
    assert!(matched.is_empty());
    assert!(dispatcher.dispatch(&matched, &request).await.is_empty());
}

#[tokio::test]
async fn unmatched_oracle_submitting_anyway_is_rejected() {
    let (_registry, ledger, dispatcher) = five_oracle_pool().await;
    let request = request(4);
    ledger.raise(&request);

    // oracle 4 holds {0, 5, 6}
    let outcomes = dispatcher
        .dispatch(&BTreeSet::from([oracle(4)]), &request)
        .await;
    assert_eq!(outcomes.len(), 1);
    assert!(!outcomes[0].is_accepted());
    assert_eq!(ledger.flight_status(&request.key()), None);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn bootstrapped_pool_answers_every_index_consistently() {
    let config = OracleConfig::from_lookup(|key| match key {
        "ORACLE_COUNT" => Some("20".to_string()),
        "MAX_INDEX" => Some("10".to_string()),
        "MIN_RESPONSES" => Some("3".to_string()),
        "RESPONSE_STRATEGY" => Some("time".to_string()),
        _ => None,
    })
    .unwrap();

    let registry = AppState::registry_for(&config);
    assert_eq!(registry.bootstrap(config.seed, config.oracle_count).await.len(), 20);

    let ledger = Arc::new(SimulatedLedger::new(registry.clone(), 3, config.max_index, 7));
    let state = AppState::new(config, registry.clone(), ledger.clone());

    let (tx, mut rx) = mpsc::channel(16);
    let listener = state.listener().with_reports(tx);
    let run = tokio::spawn(listener.run(ledger.subscribe()));

    for index in 0..10u8 {
        ledger.raise(&request(index));
    }

    for _ in 0..10 {
        let report = rx.recv().await.unwrap();
        let key = report.request.key();
        assert_eq!(report.outcomes.len(), report.matched.len());
        if report.matched.len() >= 3 {
            assert_eq!(ledger.flight_status(&key), Some(StatusCode::LateAirline));
        } else {
            assert_eq!(ledger.flight_status(&key), None);
        }
    }

    run.abort();
}
