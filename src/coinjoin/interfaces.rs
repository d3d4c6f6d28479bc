//! Collaborator interfaces the core consumes (§6.2).
//!
//! These traits have no core-owned implementation beyond the test doubles
//! below; the host application supplies real implementations backed by its
//! own wallet/storage/network stack. `Scheduler` has no trait here — the
//! manager (component K) drives its tick directly with
//! `tokio::time::interval` + `tokio_util::sync::CancellationToken` (§10.4).

use async_trait::async_trait;

use crate::coinjoin::denomination::Denom;
use crate::error::{CoinJoinError, NetworkError, WalletError};
use crate::types::{Amount, OutPoint, Script, SignedTxIn, Transaction, TxId, UTXO};

/// Result of grouping a wallet's UTXOs by destination address.
#[derive(Clone, Debug, PartialEq)]
pub struct TallyItem {
    pub destination: String,
    pub total_amount: Amount,
    pub inputs: Vec<UTXO>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Balance {
    pub anonymized: Amount,
    pub anonymizable: Amount,
    pub denominated_confirmed: Amount,
    pub denominated_unconfirmed: Amount,
    pub non_denom_anonymizable: Amount,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CoordinatorInfo {
    pub address: String,
    pub outpoint: OutPoint,
    pub operator_public_key: [u8; 32],
}

/// Wallet storage, key derivation, UTXO index, signing and broadcast — all
/// out of core scope (§1), reached only through this trait.
#[async_trait]
pub trait Wallet: Send + Sync {
    async fn is_locked(&self) -> bool;
    async fn balances(&self) -> Balance;

    async fn select_coins_grouped_by_addresses(
        &self,
        skip_denominated: bool,
        skip_unconfirmed: bool,
        skip_frozen: bool,
        max_inputs: usize,
    ) -> Vec<TallyItem>;

    async fn count_inputs_with_amount(&self, amount: Amount) -> usize;
    async fn has_collateral_inputs(&self, require_confirmed: bool) -> bool;

    async fn select_tx_ds_ins_by_denomination(
        &self,
        denom: Denom,
        max_total: usize,
    ) -> Vec<UTXO>;

    async fn select_denominated_amounts(&self, needed: Amount) -> Vec<Amount>;

    async fn lock_coin(&self, outpoint: OutPoint);
    async fn unlock_coin(&self, outpoint: OutPoint);

    async fn sign_transaction(&self, tx: Transaction) -> Result<Transaction, WalletError>;

    /// Signs only the inputs at `indices` within `tx`, used by the session
    /// to sign solely the inputs it contributed to a coordinator-assembled
    /// final transaction (§4.F.1 step 5).
    async fn sign_inputs(&self, tx: &Transaction, indices: &[usize]) -> Result<Vec<SignedTxIn>, WalletError>;

    async fn get_transaction(&self, txid: TxId) -> Option<Transaction>;
    async fn find_key_from_pub_key_hash(&self, hash: &[u8]) -> Option<Script>;

    async fn reserve_key(&self) -> Result<Script, CoinJoinError>;
    async fn keep_key(&self, script: &Script);
    async fn return_key(&self, script: &Script);

    async fn broadcast(&self, tx: Transaction) -> Result<TxId, WalletError>;
}

/// Coordinator ("masternode") list lookup and queue-rate-limit bookkeeping.
#[async_trait]
pub trait CoordinatorRegistry: Send + Sync {
    async fn lookup_by_outpoint(&self, outpoint: &OutPoint) -> Option<CoordinatorInfo>;
    async fn lookup_by_address(&self, address: &str) -> Option<CoordinatorInfo>;
    async fn all(&self) -> Vec<CoordinatorInfo>;

    /// Unix timestamp of the last queue this coordinator advertised, or 0.
    async fn last_dsq(&self, address: &str) -> i64;
    async fn record_dsq(&self, address: &str, time: i64);

    /// Minimum queue count required before `address` is eligible again.
    async fn dsq_threshold(&self, address: &str) -> i64;

    async fn random_not_used(&self, recently_used: &[String]) -> Option<CoordinatorInfo>;
}

/// Header sync state; used to gate automatic mixing and to drive rate-limit
/// counters off block-tip notifications.
#[async_trait]
pub trait ChainView: Send + Sync {
    async fn is_synced(&self) -> bool;
    async fn tip_height(&self) -> u64;
}

/// General P2P networking abstraction (connection establishment, framing and
/// base-message serialization live outside the core).
#[async_trait]
pub trait Network: Send + Sync {
    async fn connect(&self, address: &str) -> Result<(), NetworkError>;
    async fn disconnect(&self, address: &str);
    async fn send(&self, address: &str, message: crate::coinjoin::message::CoinJoinMessage) -> Result<(), NetworkError>;
    async fn connected_peers(&self) -> Vec<String>;
    async fn is_connected(&self, address: &str) -> bool;
}

/// In-memory fakes for scenario tests (§10.5): no real sockets, no real
/// signing, just enough behavior to drive the orchestrator/session/manager
/// through their state machines deterministically.
#[cfg(any(test, feature = "test-support"))]
pub mod test_doubles {
    use super::*;
    use parking_lot::Mutex;
    use std::collections::HashMap;
    use std::sync::Arc;

    #[derive(Default)]
    struct FakeWalletState {
        kept: Vec<Script>,
        returned: Vec<Script>,
        locked: Vec<OutPoint>,
        next_key_id: u64,
        transactions: HashMap<TxId, Transaction>,
        broadcasts: Vec<Transaction>,
        balance: Balance,
        tally_items: Vec<TallyItem>,
        locked_flag: bool,
        has_collateral: bool,
    }

    #[derive(Clone, Default)]
    pub struct FakeWallet {
        state: Arc<Mutex<FakeWalletState>>,
    }

    impl FakeWallet {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn set_balance(&self, balance: Balance) {
            self.state.lock().balance = balance;
        }

        pub fn set_tally_items(&self, items: Vec<TallyItem>) {
            self.state.lock().tally_items = items;
        }

        pub fn set_locked(&self, locked: bool) {
            self.state.lock().locked_flag = locked;
        }

        pub fn set_has_collateral(&self, has_collateral: bool) {
            self.state.lock().has_collateral = has_collateral;
        }

        pub fn insert_transaction(&self, tx: Transaction) {
            self.state.lock().transactions.insert(tx.txid(), tx);
        }

        pub fn kept_keys(&self) -> Vec<Script> {
            self.state.lock().kept.clone()
        }

        pub fn returned_keys(&self) -> Vec<Script> {
            self.state.lock().returned.clone()
        }

        pub fn locked_outpoints(&self) -> Vec<OutPoint> {
            self.state.lock().locked.clone()
        }

        pub fn broadcasts(&self) -> Vec<Transaction> {
            self.state.lock().broadcasts.clone()
        }
    }

    #[async_trait]
    impl Wallet for FakeWallet {
        async fn is_locked(&self) -> bool {
            self.state.lock().locked_flag
        }

        async fn balances(&self) -> Balance {
            self.state.lock().balance
        }

        async fn select_coins_grouped_by_addresses(
            &self,
            _skip_denominated: bool,
            _skip_unconfirmed: bool,
            _skip_frozen: bool,
            _max_inputs: usize,
        ) -> Vec<TallyItem> {
            self.state.lock().tally_items.clone()
        }

        async fn count_inputs_with_amount(&self, amount: Amount) -> usize {
            self.state
                .lock()
                .tally_items
                .iter()
                .flat_map(|t| t.inputs.iter())
                .filter(|u| u.value == amount)
                .count()
        }

        async fn has_collateral_inputs(&self, _require_confirmed: bool) -> bool {
            self.state.lock().has_collateral
        }

        async fn select_tx_ds_ins_by_denomination(&self, denom: Denom, max_total: usize) -> Vec<UTXO> {
            self.state
                .lock()
                .tally_items
                .iter()
                .flat_map(|t| t.inputs.iter())
                .filter(|u| u.value == denom.amount())
                .take(max_total)
                .cloned()
                .collect()
        }

        async fn select_denominated_amounts(&self, needed: Amount) -> Vec<Amount> {
            let mut remaining = needed;
            let mut out = Vec::new();
            for d in crate::coinjoin::denomination::all() {
                while remaining >= d.amount() {
                    out.push(d.amount());
                    remaining -= d.amount();
                }
            }
            out
        }

        async fn lock_coin(&self, outpoint: OutPoint) {
            self.state.lock().locked.push(outpoint);
        }

        async fn unlock_coin(&self, outpoint: OutPoint) {
            self.state.lock().locked.retain(|o| o != &outpoint);
        }

        async fn sign_transaction(&self, tx: Transaction) -> Result<Transaction, WalletError> {
            Ok(tx)
        }

        async fn sign_inputs(&self, tx: &Transaction, indices: &[usize]) -> Result<Vec<SignedTxIn>, WalletError> {
            indices
                .iter()
                .map(|&i| {
                    let input = tx
                        .inputs
                        .get(i)
                        .ok_or_else(|| WalletError::SigningFailed(format!("no input at index {i}")))?;
                    Ok(SignedTxIn {
                        previous_output: input.previous_output.clone(),
                        script_sig: vec![0xCC, i as u8],
                    })
                })
                .collect()
        }

        async fn get_transaction(&self, txid: TxId) -> Option<Transaction> {
            self.state.lock().transactions.get(&txid).cloned()
        }

        async fn find_key_from_pub_key_hash(&self, _hash: &[u8]) -> Option<Script> {
            None
        }

        async fn reserve_key(&self) -> Result<Script, CoinJoinError> {
            let mut state = self.state.lock();
            state.next_key_id += 1;
            Ok(vec![0xAA, state.next_key_id as u8])
        }

        async fn keep_key(&self, script: &Script) {
            self.state.lock().kept.push(script.clone());
        }

        async fn return_key(&self, script: &Script) {
            self.state.lock().returned.push(script.clone());
        }

        async fn broadcast(&self, tx: Transaction) -> Result<TxId, WalletError> {
            let txid = tx.txid();
            let mut state = self.state.lock();
            state.transactions.insert(txid, tx.clone());
            state.broadcasts.push(tx);
            Ok(txid)
        }
    }

    #[derive(Default)]
    struct FakeRegistryState {
        coordinators: Vec<CoordinatorInfo>,
        last_dsq: HashMap<String, i64>,
        thresholds: HashMap<String, i64>,
    }

    #[derive(Clone, Default)]
    pub struct FakeRegistry {
        state: Arc<Mutex<FakeRegistryState>>,
    }

    impl FakeRegistry {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn add(&self, info: CoordinatorInfo) {
            self.state.lock().coordinators.push(info);
        }

        pub fn set_threshold(&self, address: &str, threshold: i64) {
            self.state
                .lock()
                .thresholds
                .insert(address.to_string(), threshold);
        }
    }

    #[async_trait]
    impl CoordinatorRegistry for FakeRegistry {
        async fn lookup_by_outpoint(&self, outpoint: &OutPoint) -> Option<CoordinatorInfo> {
            self.state
                .lock()
                .coordinators
                .iter()
                .find(|c| &c.outpoint == outpoint)
                .cloned()
        }

        async fn lookup_by_address(&self, address: &str) -> Option<CoordinatorInfo> {
            self.state
                .lock()
                .coordinators
                .iter()
                .find(|c| c.address == address)
                .cloned()
        }

        async fn all(&self) -> Vec<CoordinatorInfo> {
            self.state.lock().coordinators.clone()
        }

        async fn last_dsq(&self, address: &str) -> i64 {
            *self.state.lock().last_dsq.get(address).unwrap_or(&0)
        }

        async fn record_dsq(&self, address: &str, time: i64) {
            self.state.lock().last_dsq.insert(address.to_string(), time);
        }

        async fn dsq_threshold(&self, address: &str) -> i64 {
            *self.state.lock().thresholds.get(address).unwrap_or(&0)
        }

        async fn random_not_used(&self, recently_used: &[String]) -> Option<CoordinatorInfo> {
            self.state
                .lock()
                .coordinators
                .iter()
                .find(|c| !recently_used.contains(&c.address))
                .cloned()
        }
    }

    #[derive(Clone)]
    pub struct FakeChainView {
        synced: Arc<Mutex<bool>>,
        height: Arc<Mutex<u64>>,
    }

    impl Default for FakeChainView {
        fn default() -> Self {
            Self {
                synced: Arc::new(Mutex::new(true)),
                height: Arc::new(Mutex::new(0)),
            }
        }
    }

    impl FakeChainView {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn set_synced(&self, synced: bool) {
            *self.synced.lock() = synced;
        }
    }

    #[async_trait]
    impl ChainView for FakeChainView {
        async fn is_synced(&self) -> bool {
            *self.synced.lock()
        }

        async fn tip_height(&self) -> u64 {
            *self.height.lock()
        }
    }

    #[derive(Default)]
    struct FakeNetworkState {
        connected: Vec<String>,
        sent: Vec<(String, crate::coinjoin::message::CoinJoinMessage)>,
    }

    #[derive(Clone, Default)]
    pub struct FakeNetwork {
        state: Arc<Mutex<FakeNetworkState>>,
    }

    impl FakeNetwork {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn sent_messages(&self) -> Vec<(String, crate::coinjoin::message::CoinJoinMessage)> {
            self.state.lock().sent.clone()
        }
    }

    #[async_trait]
    impl Network for FakeNetwork {
        async fn connect(&self, address: &str) -> Result<(), NetworkError> {
            let mut state = self.state.lock();
            if !state.connected.contains(&address.to_string()) {
                state.connected.push(address.to_string());
            }
            Ok(())
        }

        async fn disconnect(&self, address: &str) {
            self.state.lock().connected.retain(|a| a != address);
        }

        async fn send(&self, address: &str, message: crate::coinjoin::message::CoinJoinMessage) -> Result<(), NetworkError> {
            let mut state = self.state.lock();
            if !state.connected.contains(&address.to_string()) {
                return Err(NetworkError::NotConnected(address.to_string()));
            }
            state.sent.push((address.to_string(), message));
            Ok(())
        }

        async fn connected_peers(&self) -> Vec<String> {
            self.state.lock().connected.clone()
        }

        async fn is_connected(&self, address: &str) -> bool {
            self.state.lock().connected.contains(&address.to_string())
        }
    }
}
