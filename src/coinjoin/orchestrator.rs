//! Session orchestrator (component G).
//!
//! One orchestrator per wallet, driving zero or more [`Session`]s bounded by
//! `config.sessions`. `do_automatic_denominating` is the entry point the
//! manager (component K) calls on every tick; it uses a try-lock so a
//! contended orchestrator never blocks the scheduler thread (§5).

use std::sync::Arc;

use rand::seq::SliceRandom;
use rand::Rng;
use tokio::sync::mpsc::UnboundedSender;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::coinjoin::collateral_planner;
use crate::coinjoin::denom_planner;
use crate::coinjoin::denomination::{self, Denom};
use crate::coinjoin::interfaces::{ChainView, CoordinatorRegistry, Network, TallyItem, Wallet};
use crate::coinjoin::message::{Complete, FinalTransaction, StatusUpdate};
use crate::coinjoin::pool::ConnectionPool;
use crate::coinjoin::progress::SessionEvent;
use crate::coinjoin::queue_listener::QueueListener;
use crate::coinjoin::session::{Session, SessionState, SubmittedEntry};
use crate::coinjoin::status::AutoDenomResult;
use crate::config::CoinJoinConfig;
use crate::constants::coinjoin::{COINJOIN_ENTRY_MAX_SIZE, MAX_NEW_QUEUE_TRIES, MIN_COLLATERAL};
use crate::types::{Amount, TxInput, TxOutput};

struct OrchestratorState {
    sessions: Vec<Session>,
    recently_used_coordinators: Vec<String>,
    next_session_id: u64,
    queue_listener: QueueListener,
}

pub struct Orchestrator {
    wallet_id: String,
    wallet: Arc<dyn Wallet>,
    registry: Arc<dyn CoordinatorRegistry>,
    chain: Arc<dyn ChainView>,
    network: Arc<dyn Network>,
    pool: Arc<ConnectionPool>,
    config: CoinJoinConfig,
    state: Mutex<OrchestratorState>,
    progress_tx: UnboundedSender<SessionEvent>,
}

impl Orchestrator {
    pub fn new(
        wallet_id: String,
        wallet: Arc<dyn Wallet>,
        registry: Arc<dyn CoordinatorRegistry>,
        chain: Arc<dyn ChainView>,
        network: Arc<dyn Network>,
        config: CoinJoinConfig,
        progress_tx: UnboundedSender<SessionEvent>,
    ) -> Self {
        let pool = Arc::new(ConnectionPool::new(network.clone(), registry.clone(), config.sessions));
        Self {
            wallet_id,
            wallet,
            registry,
            chain,
            network,
            pool,
            config,
            state: Mutex::new(OrchestratorState {
                sessions: Vec::new(),
                recently_used_coordinators: Vec::new(),
                next_session_id: 1,
                queue_listener: QueueListener::new(),
            }),
            progress_tx,
        }
    }

    pub fn wallet_id(&self) -> &str {
        &self.wallet_id
    }

    pub fn pool(&self) -> &Arc<ConnectionPool> {
        &self.pool
    }

    /// The entry point the manager calls once per tick (§4.G). Never blocks:
    /// if another tick is already running this returns `SessionInProgress`
    /// without touching any state.
    pub async fn do_automatic_denominating(&self) -> AutoDenomResult {
        let mut state = match self.state.try_lock() {
            Ok(guard) => guard,
            Err(_) => return AutoDenomResult::SessionInProgress,
        };

        if !self.config.enabled {
            return AutoDenomResult::Disabled;
        }
        if self.wallet.is_locked().await {
            return AutoDenomResult::WalletLocked;
        }
        if !self.chain.is_synced().await {
            return AutoDenomResult::NotSynced;
        }
        if self.registry.all().await.is_empty() {
            return AutoDenomResult::NoCoordinators;
        }

        let active = state.sessions.iter().any(|s| s.state != SessionState::Idle);
        if active && !self.config.multi_session {
            return AutoDenomResult::SessionInProgress;
        }
        if state.sessions.len() >= self.config.sessions && active {
            return AutoDenomResult::SessionInProgress;
        }

        let balance = self.wallet.balances().await;
        let mut balance_needs_anonymized = balance.anonymized_deficit(self.config.amount);
        if balance_needs_anonymized == 0 {
            return AutoDenomResult::NothingToDo;
        }
        if balance_needs_anonymized < denomination::smallest().amount() {
            balance_needs_anonymized = denomination::smallest().amount();
        }

        if !self.wallet.has_collateral_inputs(false).await {
            if let Some(result) = self.try_create_collateral().await {
                return result;
            }
        }

        let smallest_plus_collateral = denomination::smallest().amount() + MIN_COLLATERAL;
        if balance.non_denom_anonymizable >= smallest_plus_collateral && balance_needs_anonymized > 0 {
            if let Some(result) = self.try_create_denominated(balance_needs_anonymized).await {
                return result;
            }
        }

        self.join_or_start_queue(&mut state).await
    }

    async fn try_create_collateral(&self) -> Option<AutoDenomResult> {
        let non_denominated = self
            .wallet
            .select_coins_grouped_by_addresses(true, true, true, COINJOIN_ENTRY_MAX_SIZE)
            .await;
        for item in &non_denominated {
            if collateral_planner::make_collateral(self.wallet.clone(), item).await.is_ok() {
                return Some(AutoDenomResult::CreatingCollateral);
            }
        }

        let denominated = self
            .wallet
            .select_coins_grouped_by_addresses(false, true, true, COINJOIN_ENTRY_MAX_SIZE)
            .await;
        for item in &denominated {
            if collateral_planner::make_collateral(self.wallet.clone(), item).await.is_ok() {
                return Some(AutoDenomResult::CreatingCollateral);
            }
        }
        None
    }

    async fn try_create_denominated(&self, balance_to_denominate: Amount) -> Option<AutoDenomResult> {
        let tally_items = self
            .wallet
            .select_coins_grouped_by_addresses(true, true, true, COINJOIN_ENTRY_MAX_SIZE)
            .await;

        let mut ordered: Vec<&TallyItem> = tally_items.iter().collect();
        ordered.sort_by(|a, b| b.total_amount.cmp(&a.total_amount));

        for item in ordered {
            let result = denom_planner::create_denominated(
                self.wallet.clone(),
                item,
                balance_to_denominate.min(item.total_amount),
                false,
                self.config.denoms_goal,
                self.config.denoms_hard_cap,
            )
            .await;
            if result.is_ok() {
                return Some(AutoDenomResult::CreatingDenominated);
            }
        }
        None
    }

    async fn join_or_start_queue(&self, state: &mut OrchestratorState) -> AutoDenomResult {
        let tally_items = self
            .wallet
            .select_coins_grouped_by_addresses(false, true, true, COINJOIN_ENTRY_MAX_SIZE)
            .await;
        if tally_items.is_empty() {
            return AutoDenomResult::BalanceTooSmall;
        }

        if let Some(queue) = state.queue_listener.next_untried() {
            if let Some(denom) = denomination_with_matching_inputs(&tally_items, queue.denomination) {
                return self
                    .start_session(state, denom, Some(format!("{:?}", queue.coord_outpoint)), true)
                    .await;
            }
        }

        self.start_new_queue(state, &tally_items).await
    }

    async fn start_new_queue(&self, state: &mut OrchestratorState, tally_items: &[TallyItem]) -> AutoDenomResult {
        let usable_denoms: Vec<Denom> = denomination::all()
            .filter(|d| denomination_with_matching_inputs(tally_items, d.0 as u32).is_some())
            .collect();
        if usable_denoms.is_empty() {
            return AutoDenomResult::NoUsableQueue;
        }

        let mut rng = rand::thread_rng();
        for _ in 0..MAX_NEW_QUEUE_TRIES {
            let Some(coordinator) = self.registry.random_not_used(&state.recently_used_coordinators).await else {
                break;
            };

            let last_dsq = self.registry.last_dsq(&coordinator.address).await;
            let threshold = self.registry.dsq_threshold(&coordinator.address).await;
            if last_dsq != 0 && threshold > 0 {
                continue;
            }

            let denom = pick_session_denom(&usable_denoms, &mut rng);
            return self.start_session(state, denom, Some(coordinator.address), false).await;
        }

        AutoDenomResult::NoUsableQueue
    }

    async fn start_session(
        &self,
        state: &mut OrchestratorState,
        denom: Denom,
        coordinator: Option<String>,
        via_existing_queue: bool,
    ) -> AutoDenomResult {
        let Some(coordinator) = coordinator else {
            return AutoDenomResult::NoUsableQueue;
        };

        // The Accept message's collateral_tx is anti-DoS proof, never
        // broadcast, so it must spend a UTXO already sized like collateral
        // (§4.E's planner is what produces those, run earlier by
        // `try_create_collateral`) rather than carving MIN_COLLATERAL out of
        // whatever UTXO happens to be first — that would burn the remainder
        // of a full-sized denomination with no change output.
        let non_denominated = self
            .wallet
            .select_coins_grouped_by_addresses(true, true, true, COINJOIN_ENTRY_MAX_SIZE)
            .await;
        let denominated = self
            .wallet
            .select_coins_grouped_by_addresses(false, true, true, COINJOIN_ENTRY_MAX_SIZE)
            .await;
        let Some(collateral_utxo) = non_denominated
            .iter()
            .chain(denominated.iter())
            .flat_map(|item| item.inputs.iter())
            .find(|u| denomination::is_collateral_amount(u.value))
            .cloned()
        else {
            return AutoDenomResult::BalanceTooSmall;
        };

        let collateral_tx = crate::types::Transaction {
            version: 1,
            inputs: vec![TxInput {
                previous_output: collateral_utxo.outpoint.clone(),
                script_sig: Vec::new(),
                sequence: 0xFFFF_FFFF,
            }],
            outputs: vec![TxOutput { value: collateral_utxo.value, script_pubkey: collateral_utxo.script_pubkey.clone() }],
            lock_time: 0,
            timestamp: 0,
        };

        self.wallet.lock_coin(collateral_utxo.outpoint.clone()).await;

        if self.pool.add_pending(state.next_session_id, &coordinator).await.is_err() {
            warn!(wallet = %self.wallet_id, coordinator = %coordinator, "coordinator unknown to registry, refusing to start session");
            self.wallet.unlock_coin(collateral_utxo.outpoint.clone()).await;
            return AutoDenomResult::NoCoordinators;
        }

        let mut session = Session::new(state.next_session_id, self.wallet_id.clone(), denom)
            .with_progress_channel(self.progress_tx.clone());
        session.locked_outpoints.push(collateral_utxo.outpoint.clone());
        session.start(coordinator.clone(), collateral_tx);
        info!(wallet = %self.wallet_id, session = session.id, coordinator = %coordinator, via_existing_queue, "mixing session created");

        state.next_session_id += 1;
        state.recently_used_coordinators.push(coordinator);
        if state.recently_used_coordinators.len() > self.config.sessions.max(1) {
            state.recently_used_coordinators.remove(0);
        }

        state.sessions.push(session);

        if via_existing_queue {
            AutoDenomResult::JoinedQueue
        } else {
            AutoDenomResult::StartedNewQueue
        }
    }

    /// Feeds a freshly received, already-verified `Queue` broadcast to this
    /// wallet's queue listener (§4.I / §4.K dispatch).
    pub async fn feed_queue(&self, queue: crate::coinjoin::message::Queue, now: i64) {
        let mut state = self.state.lock().await;
        let registry = self.registry.clone();
        state.queue_listener.on_queue_message(queue, registry.as_ref(), now).await;
    }

    /// Routes a `StatusUpdate` to the session it belongs to. The coordinator's
    /// session-id-assigning update carries the newly assigned (non-zero) id,
    /// which by definition matches no session yet; in that case the target is
    /// the only session that could be waiting on one: the most recently
    /// started `Queue`-state session with local `session_id == 0`.
    pub async fn dispatch_status_update(&self, update: &StatusUpdate, wallet: &dyn Wallet) {
        let mut state = self.state.lock().await;
        let target_index = state
            .sessions
            .iter()
            .position(|s| s.session_id == update.session_id)
            .or_else(|| {
                (update.session_id != 0)
                    .then(|| state.sessions.iter().position(|s| s.state == SessionState::Queue && s.session_id == 0))
                    .flatten()
            });
        if let Some(index) = target_index {
            state.sessions[index].handle_status_update(update, wallet).await;
        }
    }

    pub async fn dispatch_final_transaction(
        &self,
        msg: &FinalTransaction,
        wallet: &dyn Wallet,
    ) -> Option<crate::coinjoin::message::SignedInputs> {
        let mut state = self.state.lock().await;
        let session = state.sessions.iter_mut().find(|s| s.session_id == msg.session_id)?;
        let signed = session.handle_final_transaction(msg, wallet).await;
        let coordinator = session.coordinator.clone();
        if let (Some(signed), Some(coordinator)) = (signed.clone(), coordinator) {
            self.pool
                .send_to(&coordinator, crate::coinjoin::message::CoinJoinMessage::SignedInputs(signed))
                .await;
        }
        signed
    }

    pub async fn dispatch_complete(&self, msg: &Complete, wallet: &dyn Wallet) {
        let mut state = self.state.lock().await;
        if let Some(session) = state.sessions.iter_mut().find(|s| s.session_id == msg.session_id) {
            session.handle_complete(msg, wallet).await;
        }
    }

    /// Flushes any pending request whose target is now connected, and
    /// advances every session's timeout clock (§4.K per-session tick).
    pub async fn tick(&self) {
        let mut state = self.state.lock().await;
        for session in &mut state.sessions {
            if let Some(pending) = session.pending_request.clone() {
                if self.network.is_connected(&pending.address).await {
                    if self.pool.send_to(&pending.address, pending.message.clone()).await {
                        session.pending_request = None;
                    }
                } else if std::time::Instant::now() >= pending.deadline {
                    session.last_message = AutoDenomResult::Error("pending request expired".to_string());
                    session.pending_request = None;
                    session.state = SessionState::Idle;
                }
            }
            session.check_timeout(self.wallet.as_ref()).await;
        }
    }

    /// Builds and submits a single mixing-round entry once a session has
    /// reached `AcceptingEntries` (§4.G "Submit denominate").
    pub async fn submit_denominate(&self, session_id: u64) -> Result<(), crate::error::CoinJoinError> {
        let mut state = self.state.lock().await;
        let Some(session) = state.sessions.iter_mut().find(|s| s.id == session_id) else {
            return Err(crate::error::CoinJoinError::Planning("no such session".to_string()));
        };
        if session.state != SessionState::AcceptingEntries {
            return Ok(());
        }

        let denom = session.denomination;
        let max_rounds = self.config.rounds + self.config.random_rounds;
        let mut best: Vec<crate::types::UTXO> = Vec::new();
        for _ in 0..max_rounds.max(1) {
            let candidates = self.wallet.select_tx_ds_ins_by_denomination(denom, COINJOIN_ENTRY_MAX_SIZE).await;
            if candidates.len() > best.len() {
                best = candidates;
            }
        }
        if best.is_empty() {
            return Err(crate::error::CoinJoinError::Planning(
                "no inputs available at this denomination".to_string(),
            ));
        }

        let mut rng = rand::thread_rng();
        let mut inputs = Vec::new();
        for (i, utxo) in best.into_iter().enumerate() {
            if i > 0 && rng.gen_ratio(1, 5) {
                continue;
            }
            self.wallet.lock_coin(utxo.outpoint.clone()).await;
            session.locked_outpoints.push(utxo.outpoint.clone());
            inputs.push(TxInput {
                previous_output: utxo.outpoint,
                script_sig: Vec::new(),
                sequence: 0xFFFF_FFFF,
            });
        }

        let mut outputs = Vec::new();
        for _ in 0..inputs.len() {
            let script = session.reserved_keys.reserve(self.wallet.as_ref()).await?;
            outputs.push(TxOutput { value: denom.amount(), script_pubkey: script });
        }

        let collateral = session.collateral_tx.clone().ok_or_else(|| {
            crate::error::CoinJoinError::Planning("session has no collateral transaction".to_string())
        })?;

        session.record_entry(SubmittedEntry { inputs: inputs.clone(), outputs: outputs.clone(), collateral: collateral.clone() });

        let coordinator = session.coordinator.clone().ok_or_else(|| {
            crate::error::CoinJoinError::NetworkUnavailable
        })?;
        let entry = crate::coinjoin::message::Entry { inputs, outputs, collateral };
        self.pool
            .send_to(&coordinator, crate::coinjoin::message::CoinJoinMessage::Entry(entry))
            .await;

        Ok(())
    }
}

fn denomination_with_matching_inputs(tally_items: &[TallyItem], denom_id: u32) -> Option<Denom> {
    let denom = denomination::all().find(|d| d.0 as u32 == denom_id)?;
    let has_match = tally_items
        .iter()
        .flat_map(|t| t.inputs.iter())
        .any(|u| u.value == denom.amount());
    has_match.then_some(denom)
}

fn pick_session_denom(usable: &[Denom], rng: &mut impl Rng) -> Denom {
    if usable.len() > 1 && rng.gen_bool(0.5) {
        let rest = &usable[1..];
        *rest.choose(rng).unwrap_or(&usable[0])
    } else {
        usable[0]
    }
}

impl crate::coinjoin::interfaces::Balance {
    fn anonymized_deficit(&self, target: Amount) -> Amount {
        target.saturating_sub(self.anonymized)
    }
}
