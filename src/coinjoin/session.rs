//! Per-session protocol state machine (component F).
//!
//! `Idle -> Queue -> AcceptingEntries -> Signing -> Idle | Error`. Every exit
//! path — success, rejection, timeout or cancellation — must release locked
//! coins and settle reserved keys exactly once (§3 invariants).

use std::time::{Duration, Instant};

use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, info, warn};

use crate::coinjoin::denomination::Denom;
use crate::coinjoin::interfaces::Wallet;
use crate::coinjoin::key_reservation::KeyReservations;
use crate::coinjoin::message::{
    Accept, Complete, CoinJoinMessage, FinalTransaction, PoolMessage, PoolState, PoolStatusUpdate, SignedInputs,
    StatusUpdate,
};
use crate::coinjoin::progress::SessionEvent;
use crate::coinjoin::status::AutoDenomResult;
use crate::constants::coinjoin::{COINJOIN_SIGNING_TIMEOUT, ERROR_RESET_SECS, TIMEOUT_GRACE_SECS};
use crate::types::{OutPoint, Transaction, TxInput, TxOutput};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Queue,
    AcceptingEntries,
    Signing,
    Error,
}

/// A submitted entry: the inputs/outputs this client contributed, plus the
/// collateral attached to it.
#[derive(Clone, Debug)]
pub struct SubmittedEntry {
    pub inputs: Vec<TxInput>,
    pub outputs: Vec<TxOutput>,
    pub collateral: Transaction,
}

/// A send held until the network reports the peer as connected (§9 design
/// note: "Pending request as send when connected").
#[derive(Clone)]
pub struct PendingRequest {
    pub address: String,
    pub message: CoinJoinMessage,
    pub deadline: Instant,
}

pub struct Session {
    pub id: u64,
    pub wallet_id: String,
    pub state: SessionState,
    pub session_id: i32,
    pub denomination: Denom,
    pub coordinator: Option<String>,
    pub collateral_tx: Option<Transaction>,
    pub locked_outpoints: Vec<OutPoint>,
    pub reserved_keys: KeyReservations,
    pub entries: Vec<SubmittedEntry>,
    pub final_tx: Option<Transaction>,
    pub pending_request: Option<PendingRequest>,
    pub last_step_time: Instant,
    pub last_message: AutoDenomResult,
    progress_tx: Option<UnboundedSender<SessionEvent>>,
}

impl Session {
    pub fn new(id: u64, wallet_id: String, denomination: Denom) -> Self {
        Self {
            id,
            wallet_id,
            state: SessionState::Idle,
            session_id: 0,
            denomination,
            coordinator: None,
            collateral_tx: None,
            locked_outpoints: Vec::new(),
            reserved_keys: KeyReservations::new(),
            entries: Vec::new(),
            final_tx: None,
            pending_request: None,
            last_step_time: Instant::now(),
            last_message: AutoDenomResult::NothingToDo,
            progress_tx: None,
        }
    }

    pub fn with_progress_channel(mut self, tx: UnboundedSender<SessionEvent>) -> Self {
        self.progress_tx = Some(tx);
        self
    }

    fn emit(&self, event: SessionEvent) {
        if let Some(tx) = &self.progress_tx {
            let _ = tx.send(event);
        }
    }

    /// Idle -> Queue. Queues an `Accept` to be sent once the coordinator
    /// connection is established (§4.F "Local command start").
    pub fn start(&mut self, coordinator: String, collateral_tx: Transaction) {
        debug_assert_eq!(self.state, SessionState::Idle, "start() called on a non-idle session");

        self.collateral_tx = Some(collateral_tx.clone());
        self.coordinator = Some(coordinator.clone());
        self.state = SessionState::Queue;
        self.session_id = 0;
        self.last_step_time = Instant::now();
        self.pending_request = Some(PendingRequest {
            address: coordinator,
            message: CoinJoinMessage::Accept(Accept {
                denomination: self.denomination.0 as u32,
                collateral_tx,
            }),
            deadline: Instant::now() + Duration::from_secs(COINJOIN_SIGNING_TIMEOUT),
        });
        self.emit(SessionEvent::Started { session_id: self.id });
        info!(session = self.id, denom = self.denomination.0, "session started, entering Queue");
    }

    pub fn record_entry(&mut self, entry: SubmittedEntry) {
        self.entries.push(entry);
    }

    /// Handles a `StatusUpdate` from the coordinator (§4.F).
    pub async fn handle_status_update(&mut self, update: &StatusUpdate, wallet: &dyn Wallet) {
        if update.status == PoolStatusUpdate::Rejected {
            warn!(session = self.id, message = ?update.message_id, "coordinator rejected session");
            self.last_message = AutoDenomResult::Error(format!("{:?}", update.message_id));
            self.transition_to_error(wallet).await;
            return;
        }

        if self.state == SessionState::Queue && update.session_id != 0 && self.session_id == 0 {
            self.session_id = update.session_id;
            self.last_step_time = Instant::now();
            info!(session = self.id, coordinator_session = update.session_id, "session id assigned");
        }

        // Remain in the coordinator-provided state once we're past Queue
        // (§4.F: "typically AcceptingEntries when later signalled").
        if self.state == SessionState::Queue && update.state == PoolState::AcceptingEntries {
            self.state = SessionState::AcceptingEntries;
            self.last_step_time = Instant::now();
            info!(session = self.id, "coordinator opened entries, accepting");
        }
    }

    /// Handles a `FinalTransaction` delivery (§4.F.1 verification and
    /// selective signing). Returns the `SignedInputs` message to send back
    /// to the coordinator on success.
    pub async fn handle_final_transaction(
        &mut self,
        msg: &FinalTransaction,
        wallet: &dyn Wallet,
    ) -> Option<SignedInputs> {
        if msg.session_id != self.session_id {
            return None;
        }

        self.final_tx = Some(msg.tx.clone());

        // Step 1: reconstruct a local mutable copy by connecting inputs that
        // are ours — look up the parent transaction in the wallet to
        // populate the spent output's script and value. Inputs we have no
        // record of are foreign contributions from other participants and
        // are carried through unchanged; we simply can't validate them.
        let mut resolved_inputs: Vec<TxOutput> = Vec::new();
        for input in &msg.tx.inputs {
            if let Some(parent) = wallet.get_transaction(input.previous_output.txid).await {
                if let Some(spent) = parent.outputs.get(input.previous_output.vout as usize) {
                    resolved_inputs.push(spent.clone());
                }
            }
        }

        // Step 2: canonical reordering is logged-only on mismatch, never fatal.
        let canonical = msg.tx.sorted_canonically();
        if canonical.txid() != msg.tx.txid() {
            warn!(session = self.id, "final transaction is not in canonical order, continuing anyway");
        }

        // Step 3: basic validity, covering both our own reconstructed inputs
        // and every output.
        if !resolved_inputs.iter().all(is_valid_output) || !msg.tx.outputs.iter().all(is_valid_output) {
            warn!(session = self.id, "final transaction contains an invalid input or output, refusing to sign");
            self.last_message = AutoDenomResult::Error("invalid input or output in final transaction".to_string());
            self.transition_to_error(wallet).await;
            return None;
        }

        // Step 4: every output/input we contributed must reappear unchanged.
        for entry in &self.entries {
            for output in &entry.outputs {
                let found = msg
                    .tx
                    .outputs
                    .iter()
                    .any(|o| o.value == output.value && o.script_pubkey == output.script_pubkey);
                if !found {
                    warn!(session = self.id, "our output missing from final transaction, refusing to sign");
                    self.last_message = AutoDenomResult::Error("our output missing from final tx".to_string());
                    self.transition_to_error(wallet).await;
                    return None;
                }
            }
            for input in &entry.inputs {
                let found = msg
                    .tx
                    .inputs
                    .iter()
                    .any(|i| i.previous_output == input.previous_output);
                if !found {
                    warn!(session = self.id, "our input missing from final transaction, refusing to sign");
                    self.last_message = AutoDenomResult::Error("our input missing from final tx".to_string());
                    self.transition_to_error(wallet).await;
                    return None;
                }
            }
        }

        // Step 5: sign only our own inputs, by index into the final tx.
        let our_outpoints: Vec<OutPoint> = self
            .entries
            .iter()
            .flat_map(|e| e.inputs.iter().map(|i| i.previous_output.clone()))
            .collect();
        let indices: Vec<usize> = msg
            .tx
            .inputs
            .iter()
            .enumerate()
            .filter(|(_, input)| our_outpoints.contains(&input.previous_output))
            .map(|(i, _)| i)
            .collect();

        match wallet.sign_inputs(&msg.tx, &indices).await {
            Ok(signed) => {
                self.state = SessionState::Signing;
                self.last_step_time = Instant::now();
                info!(session = self.id, signed_inputs = signed.len(), "signed our inputs, entering Signing");
                Some(SignedInputs { inputs: signed })
            }
            Err(e) => {
                warn!(session = self.id, error = %e, "failed to sign our inputs");
                self.last_message = AutoDenomResult::Error(e.to_string());
                self.transition_to_error(wallet).await;
                None
            }
        }
    }

    /// Handles session completion (§4.F `Complete`).
    pub async fn handle_complete(&mut self, msg: &Complete, wallet: &dyn Wallet) {
        if msg.session_id != self.session_id {
            return;
        }

        let success = msg.message_id == PoolMessage::Success;
        if success {
            self.reserved_keys.keep_all(wallet).await;
            info!(session = self.id, "mixing complete");
        } else {
            self.reserved_keys.return_all(wallet).await;
            self.last_message = AutoDenomResult::Error(format!("{:?}", msg.message_id));
            warn!(session = self.id, message = ?msg.message_id, "session completed with failure");
        }

        self.unlock_all(wallet).await;
        self.reset_to_idle();
        self.emit(SessionEvent::Completed { session_id: self.id, success });
    }

    /// Timer tick (§4.F `check_timeout`).
    pub async fn check_timeout(&mut self, wallet: &dyn Wallet) {
        let elapsed = self.last_step_time.elapsed();

        match self.state {
            SessionState::Error if elapsed >= Duration::from_secs(ERROR_RESET_SECS) => {
                self.reset_to_idle();
            }
            SessionState::Signing
                if elapsed >= Duration::from_secs(COINJOIN_SIGNING_TIMEOUT + TIMEOUT_GRACE_SECS) =>
            {
                warn!(session = self.id, "signing timed out");
                self.last_message = AutoDenomResult::Error("session timed out".to_string());
                self.transition_to_error(wallet).await;
            }
            SessionState::Queue | SessionState::AcceptingEntries
                if elapsed
                    >= Duration::from_secs(
                        crate::constants::coinjoin::COINJOIN_QUEUE_TIMEOUT + TIMEOUT_GRACE_SECS,
                    ) =>
            {
                warn!(session = self.id, "queue/accepting-entries timed out");
                self.last_message = AutoDenomResult::Error("session timed out".to_string());
                self.transition_to_error(wallet).await;
            }
            _ => {}
        }
    }

    async fn transition_to_error(&mut self, wallet: &dyn Wallet) {
        self.reserved_keys.return_all(wallet).await;
        self.unlock_all(wallet).await;
        self.state = SessionState::Error;
        self.last_step_time = Instant::now();
        self.emit(SessionEvent::Completed { session_id: self.id, success: false });
    }

    async fn unlock_all(&mut self, wallet: &dyn Wallet) {
        for outpoint in self.locked_outpoints.drain(..) {
            wallet.unlock_coin(outpoint).await;
        }
    }

    fn reset_to_idle(&mut self) {
        debug_assert!(self.locked_outpoints.is_empty(), "resetting to idle with coins still locked");
        debug_assert!(self.reserved_keys.is_empty(), "resetting to idle with keys still reserved");
        self.state = SessionState::Idle;
        self.session_id = 0;
        self.coordinator = None;
        self.collateral_tx = None;
        self.entries.clear();
        self.final_tx = None;
        self.pending_request = None;
        self.last_step_time = Instant::now();
        debug!(session = self.id, "session reset to idle");
    }
}

fn is_valid_output(output: &TxOutput) -> bool {
    output.value > 0 && !output.script_pubkey.is_empty()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coinjoin::interfaces::test_doubles::FakeWallet;

    fn session() -> Session {
        Session::new(1, "wallet-a".to_string(), Denom(0))
    }

    fn collateral_tx() -> Transaction {
        Transaction {
            version: 1,
            inputs: vec![],
            outputs: vec![TxOutput { value: 20_000, script_pubkey: vec![1] }],
            lock_time: 0,
            timestamp: 0,
        }
    }

    #[test]
    fn start_moves_idle_to_queue_and_queues_accept() {
        let mut s = session();
        s.start("coord1".to_string(), collateral_tx());
        assert_eq!(s.state, SessionState::Queue);
        assert_eq!(s.session_id, 0);
        assert!(s.pending_request.is_some());
    }

    #[tokio::test]
    async fn status_rejected_moves_to_error_and_releases_resources() {
        let wallet = FakeWallet::new();
        let mut s = session();
        s.start("coord1".to_string(), collateral_tx());
        s.locked_outpoints.push(OutPoint { txid: [1; 32], vout: 0 });

        let update = StatusUpdate {
            session_id: 0,
            state: crate::coinjoin::message::PoolState::Queue,
            status: PoolStatusUpdate::Rejected,
            message_id: PoolMessage::ErrSession,
        };
        s.handle_status_update(&update, &wallet).await;

        assert_eq!(s.state, SessionState::Error);
        assert!(s.locked_outpoints.is_empty());
        assert_eq!(wallet.locked_outpoints().len(), 0);
    }

    #[tokio::test]
    async fn status_accepted_assigns_session_id_once() {
        let wallet = FakeWallet::new();
        let mut s = session();
        s.start("coord1".to_string(), collateral_tx());

        let update = StatusUpdate {
            session_id: 42,
            state: crate::coinjoin::message::PoolState::AcceptingEntries,
            status: PoolStatusUpdate::Accepted,
            message_id: PoolMessage::EntriesAdded,
        };
        s.handle_status_update(&update, &wallet).await;
        assert_eq!(s.session_id, 42);
    }

    #[tokio::test]
    async fn status_accepted_with_accepting_entries_state_opens_entries() {
        let wallet = FakeWallet::new();
        let mut s = session();
        s.start("coord1".to_string(), collateral_tx());

        let assign_id = StatusUpdate {
            session_id: 5,
            state: crate::coinjoin::message::PoolState::Queue,
            status: PoolStatusUpdate::Accepted,
            message_id: PoolMessage::EntriesAdded,
        };
        s.handle_status_update(&assign_id, &wallet).await;
        assert_eq!(s.state, SessionState::Queue);

        let open_entries = StatusUpdate {
            session_id: 5,
            state: crate::coinjoin::message::PoolState::AcceptingEntries,
            status: PoolStatusUpdate::Accepted,
            message_id: PoolMessage::EntriesAdded,
        };
        s.handle_status_update(&open_entries, &wallet).await;
        assert_eq!(s.state, SessionState::AcceptingEntries);
    }

    #[tokio::test]
    async fn refuses_to_sign_when_final_tx_omits_our_output() {
        let wallet = FakeWallet::new();
        let mut s = session();
        s.start("coord1".to_string(), collateral_tx());
        s.session_id = 7;
        s.record_entry(SubmittedEntry {
            inputs: vec![TxInput {
                previous_output: OutPoint { txid: [2; 32], vout: 0 },
                script_sig: vec![],
                sequence: 0xFFFF_FFFF,
            }],
            outputs: vec![TxOutput { value: 100_010_000, script_pubkey: vec![9, 9] }],
            collateral: collateral_tx(),
        });

        let final_tx = FinalTransaction {
            session_id: 7,
            tx: Transaction {
                version: 1,
                inputs: vec![TxInput {
                    previous_output: OutPoint { txid: [2; 32], vout: 0 },
                    script_sig: vec![],
                    sequence: 0xFFFF_FFFF,
                }],
                // Missing our output entirely.
                outputs: vec![TxOutput { value: 100_010_000, script_pubkey: vec![5, 5] }],
                lock_time: 0,
                timestamp: 0,
            },
        };

        let result = s.handle_final_transaction(&final_tx, &wallet).await;
        assert!(result.is_none());
        assert_eq!(s.state, SessionState::Error);
    }

    #[tokio::test]
    async fn signs_only_our_inputs_when_final_tx_matches() {
        let wallet = FakeWallet::new();
        let mut s = session();
        s.start("coord1".to_string(), collateral_tx());
        s.session_id = 7;
        let our_outpoint = OutPoint { txid: [3; 32], vout: 1 };
        s.record_entry(SubmittedEntry {
            inputs: vec![TxInput {
                previous_output: our_outpoint.clone(),
                script_sig: vec![],
                sequence: 0xFFFF_FFFF,
            }],
            outputs: vec![TxOutput { value: 100_010_000, script_pubkey: vec![9, 9] }],
            collateral: collateral_tx(),
        });

        let other_outpoint = OutPoint { txid: [4; 32], vout: 0 };
        let final_tx = FinalTransaction {
            session_id: 7,
            tx: Transaction {
                version: 1,
                inputs: vec![
                    TxInput { previous_output: our_outpoint, script_sig: vec![], sequence: 0xFFFF_FFFF },
                    TxInput { previous_output: other_outpoint, script_sig: vec![], sequence: 0xFFFF_FFFF },
                ],
                outputs: vec![
                    TxOutput { value: 100_010_000, script_pubkey: vec![9, 9] },
                    TxOutput { value: 100_010_000, script_pubkey: vec![1, 1] },
                ],
                lock_time: 0,
                timestamp: 0,
            },
        };

        let signed = s.handle_final_transaction(&final_tx, &wallet).await.unwrap();
        assert_eq!(signed.inputs.len(), 1);
        assert_eq!(s.state, SessionState::Signing);
    }

    #[tokio::test]
    async fn refuses_to_sign_when_a_resolved_input_spends_an_invalid_output() {
        let wallet = FakeWallet::new();
        // A parent transaction whose relevant output is zero-value — the
        // kind of thing `wallet.get_transaction` can surface that a
        // pure output-only check would never catch.
        let parent = Transaction {
            version: 1,
            inputs: vec![],
            outputs: vec![TxOutput { value: 0, script_pubkey: vec![1] }],
            lock_time: 0,
            timestamp: 0,
        };
        wallet.insert_transaction(parent.clone());
        let bad_outpoint = OutPoint { txid: parent.txid(), vout: 0 };

        let mut s = session();
        s.start("coord1".to_string(), collateral_tx());
        s.session_id = 7;
        s.record_entry(SubmittedEntry {
            inputs: vec![TxInput { previous_output: bad_outpoint.clone(), script_sig: vec![], sequence: 0xFFFF_FFFF }],
            outputs: vec![TxOutput { value: 100_010_000, script_pubkey: vec![9, 9] }],
            collateral: collateral_tx(),
        });

        let final_tx = FinalTransaction {
            session_id: 7,
            tx: Transaction {
                version: 1,
                inputs: vec![TxInput { previous_output: bad_outpoint, script_sig: vec![], sequence: 0xFFFF_FFFF }],
                outputs: vec![TxOutput { value: 100_010_000, script_pubkey: vec![9, 9] }],
                lock_time: 0,
                timestamp: 0,
            },
        };

        let result = s.handle_final_transaction(&final_tx, &wallet).await;
        assert!(result.is_none());
        assert_eq!(s.state, SessionState::Error);
    }

    #[tokio::test]
    async fn queue_timeout_transitions_to_error() {
        let wallet = FakeWallet::new();
        let mut s = session();
        s.start("coord1".to_string(), collateral_tx());
        s.last_step_time = Instant::now()
            - Duration::from_secs(
                crate::constants::coinjoin::COINJOIN_QUEUE_TIMEOUT + TIMEOUT_GRACE_SECS + 1,
            );

        s.check_timeout(&wallet).await;
        assert_eq!(s.state, SessionState::Error);
    }

    #[tokio::test]
    async fn error_state_auto_resets_to_idle_after_grace_period() {
        let wallet = FakeWallet::new();
        let mut s = session();
        s.state = SessionState::Error;
        s.last_step_time = Instant::now() - Duration::from_secs(ERROR_RESET_SECS + 1);

        s.check_timeout(&wallet).await;
        assert_eq!(s.state, SessionState::Idle);
    }
}
