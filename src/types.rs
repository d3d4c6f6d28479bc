//! Core transaction types shared by the CoinJoin mixing engine.
//!
//! These are the on-wire transaction primitives the engine plans, verifies
//! and signs. Everything else (key derivation, UTXO indexing, address
//! formatting, broadcast) belongs to the host wallet and is reached only
//! through [`crate::coinjoin::interfaces::Wallet`].

#![allow(dead_code)]

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

pub type Hash256 = [u8; 32];
pub type Signature = [u8; 64];
pub type Script = Vec<u8>;
pub type Amount = u64;
pub type TxId = Hash256;

/// 1 coin = 10^8 base units ("duffs"), matching the host chain's unit.
pub const SATOSHIS_PER_TIME: u64 = 100_000_000;

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OutPoint {
    pub txid: Hash256,
    pub vout: u32,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[allow(clippy::upper_case_acronyms)]
pub struct UTXO {
    pub outpoint: OutPoint,
    pub value: u64,
    pub script_pubkey: Script,
    pub address: String,
    /// Number of rounds this coin has already been mixed (0 for fresh coins).
    pub rounds: u32,
    pub confirmations: u32,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct TxInput {
    pub previous_output: OutPoint,
    pub script_sig: Script,
    pub sequence: u32,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct TxOutput {
    pub value: u64,
    pub script_pubkey: Script,
}

/// A signature for one input of a final transaction, pushed back to the
/// coordinator in a `SignedInputs` message (§6.1).
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct SignedTxIn {
    pub previous_output: OutPoint,
    pub script_sig: Script,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Transaction {
    pub version: u32,
    pub inputs: Vec<TxInput>,
    pub outputs: Vec<TxOutput>,
    pub lock_time: u32,
    pub timestamp: i64,
}

impl Transaction {
    pub fn txid(&self) -> Hash256 {
        // Canonical JSON hashing, same scheme used elsewhere in this codebase.
        let json = serde_json::to_string(self).expect("transaction serialization should succeed");
        Sha256::digest(json.as_bytes()).into()
    }

    pub fn input_sum(&self, inputs_value: u64) -> i64 {
        inputs_value as i64 - self.outputs.iter().map(|o| o.value as i64).sum::<i64>()
    }

    /// Sort inputs/outputs into BIP69-equivalent canonical order: inputs by
    /// `(prev_hash, index)`, outputs by `(value, script)`.
    pub fn sorted_canonically(&self) -> Transaction {
        let mut inputs = self.inputs.clone();
        inputs.sort_by(|a, b| {
            a.previous_output
                .txid
                .cmp(&b.previous_output.txid)
                .then(a.previous_output.vout.cmp(&b.previous_output.vout))
        });
        let mut outputs = self.outputs.clone();
        outputs.sort_by(|a, b| {
            a.value
                .cmp(&b.value)
                .then(a.script_pubkey.cmp(&b.script_pubkey))
        });
        Transaction {
            version: self.version,
            inputs,
            outputs,
            lock_time: self.lock_time,
            timestamp: self.timestamp,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_sort_is_order_independent() {
        let out1 = TxOutput { value: 5, script_pubkey: vec![1] };
        let out2 = TxOutput { value: 3, script_pubkey: vec![2] };
        let tx_a = Transaction {
            version: 1,
            inputs: vec![],
            outputs: vec![out1.clone(), out2.clone()],
            lock_time: 0,
            timestamp: 0,
        };
        let tx_b = Transaction {
            version: 1,
            inputs: vec![],
            outputs: vec![out2, out1],
            lock_time: 0,
            timestamp: 0,
        };
        assert_eq!(tx_a.sorted_canonically().txid(), tx_b.sorted_canonically().txid());
    }
}
