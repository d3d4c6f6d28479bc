//! Key reservation scratchpad (component B).
//!
//! Every session must end with exactly one of [`KeyReservations::keep_all`]
//! or [`KeyReservations::return_all`]. Leaking reservations manifests as the
//! wallet silently burning addresses, so both are idempotent and safe to
//! call on an already-empty scratchpad.

use crate::coinjoin::interfaces::Wallet;
use crate::types::Script;

#[derive(Debug, Default)]
pub struct KeyReservations {
    reserved: Vec<Script>,
}

impl KeyReservations {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn reserve(&mut self, wallet: &dyn Wallet) -> Result<Script, crate::error::CoinJoinError> {
        let script = wallet.reserve_key().await?;
        self.reserved.push(script.clone());
        Ok(script)
    }

    /// Commits all reserved scripts as used. Clears the scratchpad.
    pub async fn keep_all(&mut self, wallet: &dyn Wallet) {
        for script in self.reserved.drain(..) {
            wallet.keep_key(&script).await;
        }
    }

    /// Releases all reserved scripts back to the wallet's free-key pool.
    pub async fn return_all(&mut self, wallet: &dyn Wallet) {
        for script in self.reserved.drain(..) {
            wallet.return_key(&script).await;
        }
    }

    pub fn len(&self) -> usize {
        self.reserved.len()
    }

    pub fn is_empty(&self) -> bool {
        self.reserved.is_empty()
    }
}
