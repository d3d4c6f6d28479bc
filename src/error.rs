//! Error taxonomy for the CoinJoin mixing engine.
//!
//! Mirrors the kinds enumerated by the design: configuration/precondition,
//! planning failure, protocol rejection, verification refusal, timeout, and
//! network-unavailable. Invariant violations the core itself controls (a
//! planned collateral output that doesn't actually satisfy
//! `is_collateral_amount`) are programmer error and use `debug_assert!`
//! rather than a variant here.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CoinJoinError {
    #[error("coinjoin is disabled")]
    Disabled,

    #[error("wallet is locked")]
    WalletLocked,

    #[error("blockchain is not synced")]
    NotSynced,

    #[error("no coordinators known")]
    NoCoordinators,

    #[error("balance too small to mix")]
    BalanceTooSmall,

    #[error("planning failed: {0}")]
    Planning(String),

    #[error("coordinator rejected session: {0}")]
    ProtocolRejected(String),

    #[error("refused to sign final transaction: {0}")]
    VerificationRefused(String),

    #[error("session timed out")]
    Timeout,

    #[error("coordinator connection unavailable")]
    NetworkUnavailable,

    #[error("wallet error: {0}")]
    Wallet(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WalletError {
    #[error("wallet is locked")]
    Locked,
    #[error("insufficient funds")]
    InsufficientFunds,
    #[error("no such transaction: {0}")]
    UnknownTransaction(String),
    #[error("signing failed: {0}")]
    SigningFailed(String),
    #[error("broadcast failed: {0}")]
    BroadcastFailed(String),
    #[error("key pool exhausted")]
    KeyPoolExhausted,
}

impl From<WalletError> for CoinJoinError {
    fn from(e: WalletError) -> Self {
        match e {
            WalletError::Locked => CoinJoinError::WalletLocked,
            other => CoinJoinError::Wallet(other.to_string()),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NetworkError {
    #[error("no connection to {0}")]
    NotConnected(String),
    #[error("send failed: {0}")]
    SendFailed(String),
    #[error("unknown coordinator at {0}")]
    UnknownCoordinator(String),
}

impl From<NetworkError> for CoinJoinError {
    fn from(_: NetworkError) -> Self {
        CoinJoinError::NetworkUnavailable
    }
}

/// Ambient application-level errors for configuration loading and the demo
/// binary's own plumbing; kept separate from `CoinJoinError` so the core
/// library never depends on process-level concerns.
#[derive(Error, Debug)]
pub enum AppError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("task join error: {0}")]
    TaskJoin(#[from] tokio::task::JoinError),
}
