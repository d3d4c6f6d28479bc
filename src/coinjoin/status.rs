//! Human-readable orchestrator status (§9 design note on `strAutoDenomResult`).
//!
//! The original protocol concatenates an ad-hoc status string at many call
//! sites. Here it's a closed enum with one formatter; the exact strings are
//! non-normative, only the cases are.

use std::fmt;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AutoDenomResult {
    NothingToDo,
    Disabled,
    WalletLocked,
    NotSynced,
    NoCoordinators,
    BalanceTooSmall,
    CreatingCollateral,
    CreatingDenominated,
    SessionInProgress,
    JoinedQueue,
    StartedNewQueue,
    NoUsableQueue,
    Error(String),
}

impl fmt::Display for AutoDenomResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AutoDenomResult::NothingToDo => write!(f, "Nothing to do"),
            AutoDenomResult::Disabled => write!(f, "CoinJoin is disabled"),
            AutoDenomResult::WalletLocked => write!(f, "Wallet is locked"),
            AutoDenomResult::NotSynced => write!(f, "Blockchain is not synced"),
            AutoDenomResult::NoCoordinators => write!(f, "No coordinators known"),
            AutoDenomResult::BalanceTooSmall => write!(f, "Balance too small to mix"),
            AutoDenomResult::CreatingCollateral => write!(f, "Creating collateral transaction"),
            AutoDenomResult::CreatingDenominated => write!(f, "Creating denominated outputs"),
            AutoDenomResult::SessionInProgress => write!(f, "Mixing in progress"),
            AutoDenomResult::JoinedQueue => write!(f, "Joined an existing queue"),
            AutoDenomResult::StartedNewQueue => write!(f, "Started a new queue"),
            AutoDenomResult::NoUsableQueue => write!(f, "No usable queue or coordinator found"),
            AutoDenomResult::Error(msg) => write!(f, "Error: {msg}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_error_variant_with_message() {
        let result = AutoDenomResult::Error("session rejected".to_string());
        assert_eq!(result.to_string(), "Error: session rejected");
    }
}
