//! Cross-crate lifecycle scenarios: a move's happy path and its timeout
//! rollback, reconciliation pausing a match on divergence, a batch
//! reaching its flush threshold, a Merkle proof surviving and failing
//! tamper, and the circuit breaker's open/half-open/close cycle.
//!
//! Each scenario wires the same in-memory doubles the unit tests inside
//! `anchormatch-coordinator`/`anchormatch-batcher`/`anchormatch-governors`
//! use, at the boundary between the crates that make up the full
//! lifecycle, the way the prior-generation settlement crate hosted its
//! own end-to-end test exercising ingress, matchcore, and settlement
//! together.

#![allow(clippy::unwrap_used)]

use std::sync::{Arc, Mutex};

use chrono::Utc;

use anchormatch_batcher::BatchManager;
use anchormatch_coordinator::instance::InstanceRegistry;
use anchormatch_coordinator::MatchCoordinator;
use anchormatch_governors::{BreakerOutcome, BreakerState, CircuitBreaker, Governors, RateLimiter, WalletPool};
use anchormatch_types::config::{BatchConfig, TxConfig};
use anchormatch_types::error::AnchorMatchError;
use anchormatch_types::ids::MatchId;
use anchormatch_types::model::{CreateMatchRequest, MatchPhase, MetricEvent, Move, Player, TxStatus, WalletHandle};
use anchormatch_types::ports::{BlockchainClient, Clock, MetricsSink, SignerProvider, Store};
use anchormatch_types::test_helpers::{
    AlwaysAuthVerifier, FixedClock, InMemoryBlockchainClient, InMemoryStore, InProcessScheduler,
    RecordingMetricsSink, StaticSignerProvider, SteppableClock,
};

fn create_req(match_id: MatchId) -> CreateMatchRequest {
    CreateMatchRequest {
        match_id,
        game_name: "tic-tac-toe".to_string(),
        game_type: 1,
        seed: "42".to_string(),
        high_value: false,
    }
}

fn sample_move(player_id: &str, nonce: u64) -> Move {
    Move {
        player_id: player_id.to_string(),
        move_type: "place".to_string(),
        payload: serde_json::json!({"cell": nonce}),
        nonce,
    }
}

struct Harness {
    coordinator: MatchCoordinator,
    blockchain: Arc<InMemoryBlockchainClient>,
    metrics: Arc<RecordingMetricsSink>,
    instances: Arc<InstanceRegistry>,
}

fn build_harness(tx: TxConfig, max_requests: u32, failure_threshold: u32) -> Harness {
    let clock: Arc<dyn Clock> = Arc::new(FixedClock::new(Utc::now()));
    let store = Arc::new(InMemoryStore::new());
    let blockchain = Arc::new(InMemoryBlockchainClient::new());
    let metrics = Arc::new(RecordingMetricsSink::new());
    let auth = Arc::new(AlwaysAuthVerifier::new("user-1"));
    let scheduler = Arc::new(InProcessScheduler::new());
    let instances = Arc::new(InstanceRegistry::new(
        store.clone(),
        scheduler.clone(),
        clock.clone(),
        auth.clone(),
    ));

    let wallet_pool = WalletPool::new(vec!["wallet-a".to_string()], 1000).unwrap();
    let rate_limiter = RateLimiter::in_process(max_requests, 60, clock.clone());
    let circuit_breaker = CircuitBreaker::new(failure_threshold, 60_000, 1, clock.clone());
    let governors = Governors::new(wallet_pool, rate_limiter, circuit_breaker);
    let signer: Arc<dyn SignerProvider> = Arc::new(StaticSignerProvider::new([9u8; 32], 0));

    let coordinator = MatchCoordinator::new(
        instances.clone(),
        blockchain.clone() as Arc<dyn BlockchainClient>,
        store as Arc<dyn Store>,
        clock,
        metrics.clone() as Arc<dyn MetricsSink>,
        governors,
        None,
        Some(signer),
        tx,
    );

    Harness {
        coordinator,
        blockchain,
        metrics,
        instances,
    }
}

/// Puts a fresh match's off-chain instance into `Playing` with
/// `move_count` moves already applied on both sides, mirroring however
/// many times the blockchain double's own `submit_move` (which flips
/// on-chain phase to `Playing` as a side effect) has been called.
///
/// The double never sees `join_match`, so its internal `player_count`
/// stays zero and `current_player` never advances off zero regardless
/// of how many moves are submitted; `current_player` is left at its
/// off-chain default for the same reason, so the two sides agree on it
/// without either side's player count being a live field `sync`
/// actually compares.
async fn seed_at_move_count(h: &Harness, match_id: MatchId, move_count: u64) {
    h.blockchain.create_match(create_req(match_id)).await.unwrap();
    let instance = h.instances.get_or_create(match_id);
    let mut state = instance.create(create_req(match_id)).await.unwrap();
    state.players = vec![Player::new("pk-a", "human"), Player::new("pk-b", "human")];
    state.player_count = 2;
    state.phase = MatchPhase::Playing;

    let seed_wallet = WalletHandle {
        pubkey: "seed-wallet".to_string(),
        index: 0,
    };
    for i in 0..move_count {
        h.blockchain
            .submit_move(&match_id, &sample_move("pk-a", i), &seed_wallet)
            .await
            .unwrap();
    }
    state.move_count = move_count;
    instance.force_state(state).await;
}

// ---------------------------------------------------------------------------
// Happy-path move: confirm, advance, no alert.
// ---------------------------------------------------------------------------
#[tokio::test]
async fn happy_path_move_confirms_and_advances_with_no_alert() {
    let tx = TxConfig {
        tx_timeout_ms: 30_000,
        sync_interval_moves: 1000,
        checkpoint_interval_moves: 20,
    };
    let h = build_harness(tx, 10, 5);
    let match_id = MatchId::new();
    seed_at_move_count(&h, match_id, 3).await;

    let statuses: Arc<Mutex<Vec<TxStatus>>> = Arc::new(Mutex::new(Vec::new()));
    let recorded = statuses.clone();
    let callback: anchormatch_coordinator::StatusCallback =
        Arc::new(move |_match_id, status| recorded.lock().unwrap().push(status));

    let confirmed = h
        .coordinator
        .submit_move(match_id, sample_move("pk-b", 4), "user-1", "bearer", None, Some(&callback))
        .await
        .unwrap();

    assert_eq!(confirmed.move_count, 4);
    assert!(!confirmed.has_pending());

    let seen = statuses.lock().unwrap().clone();
    assert!(seen.contains(&TxStatus::Confirmed));

    let events = h.metrics.events();
    assert!(events.iter().any(|e| matches!(e, MetricEvent::MoveSubmitted { .. })));
    assert!(events.iter().any(|e| matches!(e, MetricEvent::MoveConfirmed { .. })));
    assert!(!events.iter().any(|e| matches!(e, MetricEvent::BreakerOpened)));
    assert!(!events.iter().any(|e| matches!(e, MetricEvent::ReconciliationConflict { .. })));
}

// ---------------------------------------------------------------------------
// Timeout rollback: the chain never confirms, the protocol rolls back.
// ---------------------------------------------------------------------------
//
// Exercises the same rollback path a real 30-second timeout would, using
// `tx_timeout_ms = 0` so the deadline has already passed before
// `retry_confirm_tx`'s first check — deterministic, no real sleep needed,
// since the double's `never_confirms` flag means the chain would never
// resolve the wait regardless of how long the test let it run.
#[tokio::test]
async fn chain_never_confirming_rolls_back_and_surfaces_timeout() {
    let tx = TxConfig {
        tx_timeout_ms: 0,
        sync_interval_moves: 1000,
        checkpoint_interval_moves: 20,
    };
    let h = build_harness(tx, 10, 5);
    let match_id = MatchId::new();
    seed_at_move_count(&h, match_id, 3).await;
    h.blockchain.set_never_confirms(true);

    let statuses: Arc<Mutex<Vec<TxStatus>>> = Arc::new(Mutex::new(Vec::new()));
    let recorded = statuses.clone();
    let callback: anchormatch_coordinator::StatusCallback =
        Arc::new(move |_match_id, status| recorded.lock().unwrap().push(status));

    let err = h
        .coordinator
        .submit_move(match_id, sample_move("pk-b", 4), "user-1", "bearer", None, Some(&callback))
        .await
        .unwrap_err();
    assert!(
        matches!(err, AnchorMatchError::Transient { .. }),
        "expected a transient confirmation-timeout error, got {err:?}"
    );

    let seen = statuses.lock().unwrap().clone();
    assert!(seen.contains(&TxStatus::Timeout));

    let instance = h.instances.get_or_create(match_id);
    let state = instance.get_state().await.unwrap();
    assert_eq!(state.move_count, 3, "rollback must restore the pre-submission move count");
    assert!(!state.has_pending());

    let events = h.metrics.events();
    assert!(events.iter().any(|e| matches!(e, MetricEvent::MoveTimeout { .. })));
}

// ---------------------------------------------------------------------------
// Reconciliation pauses the match and reports the divergent field.
// ---------------------------------------------------------------------------
#[tokio::test]
async fn reconcile_pauses_on_move_count_divergence_and_alerts() {
    let tx = TxConfig::default();
    let h = build_harness(tx, 10, 5);
    let match_id = MatchId::new();
    // Drive the on-chain side to move_count=8 via 8 real submit_move calls.
    seed_at_move_count(&h, match_id, 8).await;

    // Off-chain believes it's one move behind, everything else agreeing,
    // the exact shape of a single dropped confirmation.
    let instance = h.instances.get_or_create(match_id);
    let mut state = instance.get_state().await.unwrap();
    state.move_count = 7;
    instance.force_state(state).await;

    let err = h.coordinator.reconcile(match_id).await.unwrap_err();
    match err {
        AnchorMatchError::Conflict { fields, .. } => {
            assert_eq!(fields, vec!["move_count".to_string()]);
        }
        other => panic!("expected Conflict, got {other:?}"),
    }

    let state = instance.get_state().await.unwrap();
    assert_eq!(state.phase, MatchPhase::Paused);

    let events = h.metrics.events();
    assert!(events.iter().any(|e| matches!(e, MetricEvent::ReconciliationConflict { .. })));
}

// ---------------------------------------------------------------------------
// Batch flush at threshold: three entries build a three-leaf Merkle tree
// and an uploaded manifest.
// ---------------------------------------------------------------------------
#[tokio::test]
async fn batch_flushes_at_threshold_with_three_leaf_manifest() {
    let store = Arc::new(InMemoryStore::new());
    let chain = Arc::new(InMemoryBlockchainClient::new());
    let clock = Arc::new(SteppableClock::new(Utc::now()));
    let scheduler = Arc::new(InProcessScheduler::new());
    let metrics = Arc::new(RecordingMetricsSink::new());
    let config = BatchConfig {
        batch_size: 3,
        max_batch_size: 10,
        flush_interval_ms: 60_000,
        max_wait_ms: 300_000,
    };
    let manager = BatchManager::new(
        config,
        store.clone() as Arc<dyn Store>,
        chain as Arc<dyn BlockchainClient>,
        scheduler,
        clock as Arc<dyn Clock>,
        None,
        metrics,
    );

    for (m, u) in [("m1", "u1"), ("m2", "u2"), ("m3", "u3")] {
        let hash = anchormatch_canon::hash(m.as_bytes());
        manager.add(MatchId::new(), hash, format!("hot://{u}")).await.unwrap();
    }

    let keys = store.list("manifests/").await.unwrap();
    assert_eq!(keys.len(), 1, "exactly one manifest uploaded at threshold");
    assert!(keys[0].contains("-001.json"));

    let bytes = store.get(&keys[0]).await.unwrap().unwrap();
    let manifest: anchormatch_types::model::BatchManifest = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(manifest.match_count, 3);
    assert_eq!(manifest.merkle_root.len(), 64, "root is a 32-byte hex digest");

    // The pending sequence is cleared: a further flush is a no-op.
    assert!(manager.flush().await.unwrap().is_none());
}

// ---------------------------------------------------------------------------
// Merkle proof: verifies against the tree's root, fails once tampered.
// ---------------------------------------------------------------------------
#[tokio::test]
async fn merkle_proof_verifies_and_rejects_a_flipped_sibling_bit() {
    let hashes: Vec<String> = vec!["aa".repeat(32), "bb".repeat(32), "cc".repeat(32)];
    let tree = anchormatch_canon::MerkleTree::build(&hashes).unwrap();

    let mut proof = tree.generate_proof(MatchId::new(), &hashes[1], 1).unwrap();
    assert!(tree.verify_proof(&proof).unwrap());

    let mut sibling_bytes = hex::decode(&proof.proof[0]).unwrap();
    sibling_bytes[0] ^= 0x80;
    proof.proof[0] = hex::encode(sibling_bytes);
    assert!(!tree.verify_proof(&proof).unwrap());
}

// ---------------------------------------------------------------------------
// Breaker opens after the failure threshold, recovers through half-open,
// and does not re-open on a single failure once closed again.
// ---------------------------------------------------------------------------
#[tokio::test]
async fn breaker_opens_recovers_and_does_not_reopen_on_a_single_later_failure() {
    let clock = Arc::new(SteppableClock::new(Utc::now()));
    let breaker = CircuitBreaker::new(5, 60_000, 2, clock.clone());

    let invocations = Arc::new(std::sync::atomic::AtomicU32::new(0));
    let failing = {
        let invocations = invocations.clone();
        move || {
            let invocations = invocations.clone();
            async move {
                invocations.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                Err::<(), &'static str>("network error")
            }
        }
    };
    let succeeding = || async { Ok::<(), &'static str>(()) };

    for _ in 0..5 {
        let _ = breaker.execute(failing.clone()).await;
    }
    assert_eq!(breaker.state(), BreakerState::Open);
    assert_eq!(invocations.load(std::sync::atomic::Ordering::SeqCst), 5);

    // 6th call: rejected without invoking the op.
    let result = breaker.execute(failing.clone()).await;
    assert!(matches!(result, Err(BreakerOutcome::Open(_))));
    assert_eq!(invocations.load(std::sync::atomic::Ordering::SeqCst), 5, "breaker must not invoke op while open");

    // After the recovery timeout, one call is admitted (half-open).
    clock.advance(chrono::Duration::milliseconds(60_001));
    assert_eq!(breaker.state(), BreakerState::HalfOpen);
    assert!(breaker.execute(succeeding).await.is_ok());
    assert_eq!(breaker.state(), BreakerState::HalfOpen, "needs two successes to close");

    // A second success closes it.
    assert!(breaker.execute(succeeding).await.is_ok());
    assert_eq!(breaker.state(), BreakerState::Closed);

    // A later single failure does not reopen until the threshold is hit again.
    let _ = breaker.execute(failing).await;
    assert_eq!(breaker.state(), BreakerState::Closed);
}
