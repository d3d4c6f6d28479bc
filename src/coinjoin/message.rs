//! Wire messages exchanged between the client and a coordinator (§6.1).
//!
//! Encoding is delegated to the network layer; these are the payloads the
//! core builds, sends, and interprets. Message tag comments (`dsa`, `dsq`,
//! ...) mirror the original protocol's short command names.

use serde::{Deserialize, Serialize};

use crate::types::{OutPoint, SignedTxIn, Transaction, TxInput, TxOutput};

/// Client → coordinator. Requests a session for `denomination`, offering
/// `collateral_tx` as an anti-DoS deposit. (`dsa`)
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Accept {
    pub denomination: u32,
    pub collateral_tx: Transaction,
}

/// Broadcast by a coordinator advertising an open session. BLS-signed over
/// `(denomination, coord_outpoint, time, ready)`. (`dsq`)
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Queue {
    pub denomination: u32,
    pub coord_outpoint: OutPoint,
    pub time: i64,
    pub ready: bool,
    pub signature: Vec<u8>,
}

/// Coordinator-side session state, mirrored into [`crate::coinjoin::session::SessionState`]
/// at the protocol boundary.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum PoolState {
    Idle,
    Queue,
    AcceptingEntries,
    Signing,
    Error,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum PoolStatusUpdate {
    Rejected,
    Accepted,
}

/// Coordinator status/result codes. `ErrSession` is the generic fallback
/// used whenever the original protocol's specific string isn't otherwise
/// represented (§9: "treat the exact source strings as non-normative").
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum PoolMessage {
    Success,
    EntriesAdded,
    ErrSession,
    ErrTimeout,
    ErrInvalidInput,
    ErrInvalidOutput,
    ErrInvalidCollateral,
    ErrConnectionTimeout,
    ErrQueueFull,
    ErrMissingTx,
}

/// Coordinator → client. (`dssu`)
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct StatusUpdate {
    pub session_id: i32,
    pub state: PoolState,
    pub status: PoolStatusUpdate,
    pub message_id: PoolMessage,
}

/// Client → coordinator: one participant's contribution to the mix. (`dsi`)
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Entry {
    pub inputs: Vec<TxInput>,
    pub outputs: Vec<TxOutput>,
    pub collateral: Transaction,
}

/// Coordinator → client: the assembled transaction awaiting signatures. (`dsf`)
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct FinalTransaction {
    pub session_id: i32,
    pub tx: Transaction,
}

/// Client → coordinator: our signatures for our own inputs. (`dss`)
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct SignedInputs {
    pub inputs: Vec<SignedTxIn>,
}

/// Coordinator → client: session outcome. (`dsc`)
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Complete {
    pub session_id: i32,
    pub message_id: PoolMessage,
}

/// Coordinator → mempool (informational to the client): the final,
/// collateral-bearing transaction the coordinator itself broadcast. (`dstx`)
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct BroadcastTx {
    pub tx: Transaction,
    pub coord_outpoint: OutPoint,
    pub time: i64,
    pub signature: Vec<u8>,
}

/// Envelope for dispatch by the manager (§4.K: "dispatches incoming network
/// messages to the matching orchestrator/session by wallet").
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub enum CoinJoinMessage {
    Accept(Accept),
    Queue(Queue),
    StatusUpdate(StatusUpdate),
    Entry(Entry),
    FinalTransaction(FinalTransaction),
    SignedInputs(SignedInputs),
    Complete(Complete),
    BroadcastTx(BroadcastTx),
}
