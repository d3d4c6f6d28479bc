//! End-to-end happy path: one wallet, one coordinator, one full mixing
//! round through the manager's public dispatch surface.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use timed::coinjoin::denomination;
use timed::coinjoin::interfaces::test_doubles::{FakeChainView, FakeNetwork, FakeRegistry, FakeWallet};
use timed::coinjoin::interfaces::{Balance, CoordinatorInfo, TallyItem};
use timed::coinjoin::manager::Manager;
use timed::coinjoin::message::{
    Complete, CoinJoinMessage, FinalTransaction, PoolMessage, PoolState, PoolStatusUpdate, StatusUpdate,
};
use timed::coinjoin::status::AutoDenomResult;
use timed::config::CoinJoinConfig;
use timed::types::{OutPoint, Transaction, UTXO};

#[tokio::test]
async fn full_happy_path_completes_a_mixing_round() {
    let registry = Arc::new(FakeRegistry::new());
    let chain = Arc::new(FakeChainView::new());
    let network = Arc::new(FakeNetwork::new());
    let wallet = Arc::new(FakeWallet::new());

    registry.add(CoordinatorInfo {
        address: "coord1".to_string(),
        outpoint: OutPoint { txid: [9; 32], vout: 0 },
        operator_public_key: [0; 32],
    });

    let unit = denomination::largest().amount();
    let collateral_value = timed::constants::coinjoin::MIN_COLLATERAL + 1_000;
    wallet.set_has_collateral(true);
    wallet.set_balance(Balance { anonymized: 0, non_denom_anonymizable: 0, ..Balance::default() });
    wallet.set_tally_items(vec![TallyItem {
        destination: "addr".to_string(),
        total_amount: unit + collateral_value,
        inputs: vec![
            UTXO {
                outpoint: OutPoint { txid: [1; 32], vout: 0 },
                value: unit,
                script_pubkey: vec![0xAB],
                address: "addr".to_string(),
                rounds: 0,
                confirmations: 6,
            },
            // The accept message's collateral proof spends a UTXO already
            // sized like collateral, distinct from the denomination input.
            UTXO {
                outpoint: OutPoint { txid: [5; 32], vout: 0 },
                value: collateral_value,
                script_pubkey: vec![0xCD],
                address: "addr".to_string(),
                rounds: 0,
                confirmations: 6,
            },
        ],
    }]);

    let config = CoinJoinConfig { enabled: true, amount: unit, ..CoinJoinConfig::default() };
    let manager = Arc::new(Manager::new(registry, chain, network.clone(), config, CancellationToken::new()));
    let mut progress = manager.register_wallet("wallet-a".to_string(), wallet.clone());
    let orchestrator = manager.orchestrator("wallet-a").expect("just registered");

    // Gating checks pass, no usable denominated/collateral creation work is
    // pending, so the orchestrator starts a brand new queue.
    let result = orchestrator.do_automatic_denominating().await;
    assert_eq!(result, AutoDenomResult::StartedNewQueue);

    // `tick()` flushes the pending Accept once the pool's discovery step has
    // connected to "coord1" (triggered synchronously by `add_pending`).
    orchestrator.tick().await;
    let sent_after_accept = network.sent_messages();
    assert!(matches!(sent_after_accept.last(), Some((addr, CoinJoinMessage::Accept(_))) if addr == "coord1"));

    // Coordinator assigns a session id, still in Queue.
    manager
        .dispatch(
            "wallet-a",
            CoinJoinMessage::StatusUpdate(StatusUpdate {
                session_id: 77,
                state: PoolState::Queue,
                status: PoolStatusUpdate::Accepted,
                message_id: PoolMessage::EntriesAdded,
            }),
        )
        .await;

    // Coordinator opens entries.
    manager
        .dispatch(
            "wallet-a",
            CoinJoinMessage::StatusUpdate(StatusUpdate {
                session_id: 77,
                state: PoolState::AcceptingEntries,
                status: PoolStatusUpdate::Accepted,
                message_id: PoolMessage::EntriesAdded,
            }),
        )
        .await;

    // The first (and only) local session id is 1 — submit our entry.
    orchestrator.submit_denominate(1).await.expect("denomination-matched input is available");

    let entry = network
        .sent_messages()
        .into_iter()
        .find_map(|(addr, msg)| match msg {
            CoinJoinMessage::Entry(entry) if addr == "coord1" => Some(entry),
            _ => None,
        })
        .expect("submit_denominate should have sent an Entry");
    assert_eq!(entry.inputs.len(), 1);
    assert_eq!(entry.outputs.len(), 1);

    // Coordinator assembles the final transaction containing exactly our
    // submitted inputs/outputs, nothing more.
    let final_tx = Transaction {
        version: 1,
        inputs: entry.inputs.clone(),
        outputs: entry.outputs.clone(),
        lock_time: 0,
        timestamp: 0,
    };
    let signed = orchestrator
        .dispatch_final_transaction(&FinalTransaction { session_id: 77, tx: final_tx }, wallet.as_ref())
        .await
        .expect("final transaction contains our own entry, signing should succeed");
    assert_eq!(signed.inputs.len(), 1);

    // Coordinator reports success.
    manager
        .dispatch(
            "wallet-a",
            CoinJoinMessage::Complete(Complete { session_id: 77, message_id: PoolMessage::Success }),
        )
        .await;

    assert_eq!(wallet.kept_keys().len(), 1);
    assert!(wallet.locked_outpoints().is_empty());

    progress.drain();
    assert_eq!(progress.snapshot().completed_sessions, 1);
}
