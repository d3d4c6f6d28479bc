//! Manager / scheduler (component K).
//!
//! Process-wide map of wallet id to [`Orchestrator`], ticking maintenance at
//! a fixed cadence and dispatching incoming network messages to the
//! matching orchestrator/session (§4.K).

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use dashmap::DashMap;
use tokio::sync::mpsc::unbounded_channel;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::coinjoin::interfaces::{ChainView, CoordinatorRegistry, Network, Wallet};
use crate::coinjoin::message::{Complete, CoinJoinMessage, FinalTransaction, StatusUpdate};
use crate::coinjoin::orchestrator::Orchestrator;
use crate::coinjoin::progress::{ProgressObserver, SessionEvent};
use crate::config::CoinJoinConfig;
use crate::constants::scheduler::TICK_INTERVAL_SECS;

struct WalletEntry {
    orchestrator: Arc<Orchestrator>,
    wallet: Arc<dyn Wallet>,
}

pub struct Manager {
    wallets: DashMap<String, WalletEntry>,
    registry: Arc<dyn CoordinatorRegistry>,
    chain: Arc<dyn ChainView>,
    network: Arc<dyn Network>,
    config: CoinJoinConfig,
    cancel_token: CancellationToken,
}

impl Manager {
    pub fn new(
        registry: Arc<dyn CoordinatorRegistry>,
        chain: Arc<dyn ChainView>,
        network: Arc<dyn Network>,
        config: CoinJoinConfig,
        cancel_token: CancellationToken,
    ) -> Self {
        Self {
            wallets: DashMap::new(),
            registry,
            chain,
            network,
            config,
            cancel_token,
        }
    }

    /// Registers a wallet for automatic mixing, returning its progress
    /// observer for the caller to poll.
    pub fn register_wallet(&self, wallet_id: String, wallet: Arc<dyn Wallet>) -> ProgressObserver {
        let (tx, rx) = unbounded_channel::<SessionEvent>();
        let orchestrator = Arc::new(Orchestrator::new(
            wallet_id.clone(),
            wallet.clone(),
            self.registry.clone(),
            self.chain.clone(),
            self.network.clone(),
            self.config.clone(),
            tx,
        ));
        self.wallets.insert(wallet_id, WalletEntry { orchestrator, wallet });
        ProgressObserver::new(rx)
    }

    pub fn unregister_wallet(&self, wallet_id: &str) {
        self.wallets.remove(wallet_id);
    }

    pub fn orchestrator(&self, wallet_id: &str) -> Option<Arc<Orchestrator>> {
        self.wallets.get(wallet_id).map(|e| e.orchestrator.clone())
    }

    /// Dispatches one incoming coordinator message to the orchestrator owning
    /// `wallet_id`. Messages addressed to an unregistered wallet are dropped.
    pub async fn dispatch(&self, wallet_id: &str, message: CoinJoinMessage) {
        let Some(entry) = self.wallets.get(wallet_id) else {
            debug!(wallet = %wallet_id, "dropping message for unknown wallet");
            return;
        };
        let orchestrator = entry.orchestrator.clone();
        let wallet = entry.wallet.clone();
        drop(entry);

        match message {
            CoinJoinMessage::StatusUpdate(update) => {
                orchestrator.dispatch_status_update(&update, wallet.as_ref()).await;
            }
            CoinJoinMessage::FinalTransaction(final_tx) => {
                orchestrator.dispatch_final_transaction(&final_tx, wallet.as_ref()).await;
            }
            CoinJoinMessage::Complete(complete) => {
                orchestrator.dispatch_complete(&complete, wallet.as_ref()).await;
            }
            CoinJoinMessage::Queue(queue) => {
                let now = SystemTime::now()
                    .duration_since(UNIX_EPOCH)
                    .unwrap_or_default()
                    .as_secs() as i64;
                orchestrator.feed_queue(queue, now).await;
            }
            other => {
                debug!(wallet = %wallet_id, message = ?other, "message not handled by the manager's dispatch loop");
            }
        }
    }

    /// Starts the 1Hz maintenance loop: each orchestrator's tick and automatic
    /// denominating pass, running until `cancel_token` fires. Queue-listener
    /// housekeeping happens out of band, as incoming `Queue` broadcasts arrive
    /// through [`Manager::dispatch`], not this loop.
    pub async fn run(self: Arc<Self>) {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(TICK_INTERVAL_SECS));
        loop {
            tokio::select! {
                _ = self.cancel_token.cancelled() => {
                    info!("coinjoin manager shutting down");
                    break;
                }
                _ = interval.tick() => {
                    self.tick_once().await;
                }
            }
        }
    }

    async fn tick_once(&self) {
        for entry in self.wallets.iter() {
            entry.orchestrator.tick().await;
            let result = entry.orchestrator.do_automatic_denominating().await;
            debug!(wallet = %entry.key(), result = %result, "maintenance tick");
        }
    }
}
