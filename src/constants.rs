//! Global constants for the CoinJoin mixing engine.
//!
//! Centralizes all magic numbers so they have one place to change and one
//! place to cross-check against the protocol description.

/// Denomination and collateral amounts, in base units (1 coin = 10^8).
pub mod coinjoin {
    use crate::types::SATOSHIS_PER_TIME as COIN;

    /// Standard denomination ladder, largest first. Each carries a small
    /// "salt" below the round amount so a denominated output is
    /// distinguishable on-chain from an ordinary round-number payment.
    pub const DENOM_10: u64 = 10 * COIN + COIN / 10_000; // 10.0001
    pub const DENOM_1: u64 = COIN + COIN / 10_000; // 1.0001
    pub const DENOM_0_1: u64 = COIN / 10 + COIN / 1_000_000; // 0.100001
    pub const DENOM_0_01: u64 = COIN / 100 + COIN / 10_000_000; // 0.0100001
    pub const DENOM_0_001: u64 = COIN / 1_000 + COIN / 100_000_000; // 0.001000001

    /// Largest first, matching the order the planner walks them in Phase 2.
    pub const DENOMINATIONS: [u64; 5] = [DENOM_10, DENOM_1, DENOM_0_1, DENOM_0_01, DENOM_0_001];

    /// Base collateral amount; accepted collateral outputs fall in
    /// `[MIN_COLLATERAL, MAX_COLLATERAL]`.
    pub const MIN_COLLATERAL: u64 = COIN / 10_000; // 0.0001
    pub const MAX_COLLATERAL: u64 = MIN_COLLATERAL * 4; // 0.0004

    /// Outputs below this are not worth the fee to spend ("dust").
    pub const DUST_THRESHOLD: u64 = 546;

    /// Max outputs in a single create-denoms transaction (keeps tx well
    /// under typical relay size limits).
    pub const COINJOIN_DENOM_OUTPUTS_THRESHOLD: usize = 500;

    /// Max inputs accepted in a single entry submitted to a coordinator.
    pub const COINJOIN_ENTRY_MAX_SIZE: usize = 9;

    /// Seconds a queue advertisement remains valid.
    pub const COINJOIN_QUEUE_TIMEOUT: u64 = 30;

    /// Seconds allowed in the Signing state before the session resets.
    pub const COINJOIN_SIGNING_TIMEOUT: u64 = 15;

    /// Extra grace period added on top of the protocol timeouts above
    /// before a session is actually reset, absorbing scheduler jitter.
    pub const TIMEOUT_GRACE_SECS: u64 = 10;

    /// How long a session sits in `Error` before auto-resetting to `Idle`.
    pub const ERROR_RESET_SECS: u64 = 10;

    /// Per-outer-iteration cap on outputs added for a single denomination
    /// during Phase 1 round-robin fill.
    pub const MAX_OUTPUTS_PER_DENOM_PER_PASS: usize = 11;

    /// Maximum attempts when hunting for a fresh, not-recently-used
    /// coordinator in `start_new_queue`.
    pub const MAX_NEW_QUEUE_TRIES: usize = 10;

    /// Flat fee reserved by the transaction builder, plus a per-output
    /// increment, both in base units. Deliberately conservative: the
    /// builder must never let `amount_left` go negative.
    pub const BASE_FEE: u64 = 2_000;
    pub const FEE_PER_OUTPUT: u64 = 200;
}

/// Manager / scheduler tick cadence.
pub mod scheduler {
    /// Maintenance tick frequency for the session orchestrator, pool and
    /// queue listener.
    pub const TICK_INTERVAL_SECS: u64 = 1;
}
