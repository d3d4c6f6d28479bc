//! Transaction builder (component C).
//!
//! A scratchpad around a fixed input set from one tally item. Tracks a
//! conservative running fee reservation so `amount_left >= 0` holds at every
//! step; `could_add_output` must agree with what `add_output` would do.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::coinjoin::interfaces::Wallet;
use crate::coinjoin::key_reservation::KeyReservations;
use crate::constants::coinjoin::{BASE_FEE, FEE_PER_OUTPUT};
use crate::error::CoinJoinError;
use crate::types::{Amount, TxId, TxInput, TxOutput, Transaction, UTXO};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct OutputHandle(usize);

pub struct TxBuilder {
    wallet: Arc<dyn Wallet>,
    inputs: Vec<UTXO>,
    outputs: Vec<TxOutput>,
    reservations: KeyReservations,
}

impl TxBuilder {
    pub fn new(wallet: Arc<dyn Wallet>, inputs: Vec<UTXO>) -> Self {
        Self {
            wallet,
            inputs,
            outputs: Vec::new(),
            reservations: KeyReservations::new(),
        }
    }

    pub fn input_sum(&self) -> Amount {
        self.inputs.iter().map(|u| u.value).sum()
    }

    pub fn output_sum(&self) -> Amount {
        self.outputs.iter().map(|o| o.value).sum()
    }

    fn estimated_fee(&self, extra_outputs: usize) -> Amount {
        BASE_FEE + FEE_PER_OUTPUT * (self.outputs.len() + extra_outputs) as u64
    }

    pub fn get_amount_left(&self) -> i64 {
        self.input_sum() as i64 - self.output_sum() as i64 - self.estimated_fee(0) as i64
    }

    pub fn could_add_output(&self, amount: Amount) -> bool {
        let fee = self.estimated_fee(1) as i64;
        self.input_sum() as i64 - (self.output_sum() + amount) as i64 - fee >= 0
    }

    pub fn could_add_outputs(&self, amounts: &[Amount]) -> bool {
        let sum: Amount = amounts.iter().sum();
        let fee = self.estimated_fee(amounts.len()) as i64;
        self.input_sum() as i64 - (self.output_sum() + sum) as i64 - fee >= 0
    }

    pub fn count_outputs(&self) -> usize {
        self.outputs.len()
    }

    /// Reserves a fresh output script from the wallet and adds an output of
    /// `amount`. Returns an error without mutating state if `amount` would
    /// push `amount_left` negative.
    pub async fn add_output(&mut self, amount: Amount) -> Result<OutputHandle, CoinJoinError> {
        if !self.could_add_output(amount) {
            return Err(CoinJoinError::Planning(
                "output would leave amount_left negative".to_string(),
            ));
        }
        let script = self.reservations.reserve(self.wallet.as_ref()).await?;
        self.outputs.push(TxOutput {
            value: amount,
            script_pubkey: script,
        });
        Ok(OutputHandle(self.outputs.len() - 1))
    }

    pub fn update_amount(&mut self, handle: OutputHandle, amount: Amount) {
        self.outputs[handle.0].value = amount;
    }

    /// Drops the plan without committing, returning every reserved key.
    pub async fn abort(mut self) {
        self.reservations.return_all(self.wallet.as_ref()).await;
    }

    /// Finalizes the transaction: asks the wallet to sign and broadcast.
    /// Keeps reserved keys on success, returns them on any failure.
    pub async fn commit(mut self) -> Result<TxId, CoinJoinError> {
        if self.outputs.is_empty() {
            self.reservations.return_all(self.wallet.as_ref()).await;
            return Err(CoinJoinError::Planning(
                "refusing to commit a transaction with zero outputs".to_string(),
            ));
        }

        let inputs: Vec<TxInput> = self
            .inputs
            .iter()
            .map(|u| TxInput {
                previous_output: u.outpoint.clone(),
                script_sig: Vec::new(),
                sequence: 0xFFFF_FFFF,
            })
            .collect();

        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs() as i64;

        let tx = Transaction {
            version: 1,
            inputs,
            outputs: self.outputs.clone(),
            lock_time: 0,
            timestamp,
        };

        match self.wallet.sign_transaction(tx).await {
            Ok(signed) => {
                self.reservations.keep_all(self.wallet.as_ref()).await;
                self.wallet
                    .broadcast(signed)
                    .await
                    .map_err(CoinJoinError::from)
            }
            Err(e) => {
                self.reservations.return_all(self.wallet.as_ref()).await;
                Err(CoinJoinError::from(e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coinjoin::interfaces::test_doubles::FakeWallet;
    use crate::types::OutPoint;

    fn utxo(value: Amount) -> UTXO {
        UTXO {
            outpoint: OutPoint { txid: [1; 32], vout: 0 },
            value,
            script_pubkey: vec![],
            address: "addr".to_string(),
            rounds: 0,
            confirmations: 6,
        }
    }

    #[tokio::test]
    async fn could_add_output_matches_add_output_outcome() {
        let wallet = Arc::new(FakeWallet::new());
        let mut builder = TxBuilder::new(wallet, vec![utxo(10_000)]);
        assert!(builder.could_add_output(5_000));
        builder.add_output(5_000).await.unwrap();
        assert!(!builder.could_add_output(5_000));
        assert!(builder.add_output(5_000).await.is_err());
    }

    #[tokio::test]
    async fn committing_with_zero_outputs_is_an_error() {
        let wallet = Arc::new(FakeWallet::new());
        let builder = TxBuilder::new(wallet, vec![utxo(10_000)]);
        assert!(builder.commit().await.is_err());
    }

    #[tokio::test]
    async fn commit_broadcasts_and_keeps_reserved_keys() {
        let wallet = Arc::new(FakeWallet::new());
        let mut builder = TxBuilder::new(wallet.clone(), vec![utxo(10_000)]);
        builder.add_output(1_000).await.unwrap();
        let txid = builder.commit().await.unwrap();
        assert_eq!(wallet.broadcasts().len(), 1);
        assert_eq!(wallet.broadcasts()[0].txid(), txid);
        assert_eq!(wallet.kept_keys().len(), 1);
        assert!(wallet.returned_keys().is_empty());
    }

    #[tokio::test]
    async fn abort_returns_reserved_keys() {
        let wallet = Arc::new(FakeWallet::new());
        let mut builder = TxBuilder::new(wallet.clone(), vec![utxo(10_000)]);
        builder.add_output(1_000).await.unwrap();
        builder.abort().await;
        assert_eq!(wallet.returned_keys().len(), 1);
    }
}
