//! Denomination-creation planner (component D).
//!
//! Plans the outputs of a single "create-denoms" transaction from one
//! non-denominated tally item, in two phases: round-robin up to the
//! per-denomination goal, then a largest-to-smallest remainder pass.
//!
//! Follows the §9 design note for `addFinal`/`needMoreOutputs`: rather than
//! closures, a plain mutable [`PlanState`] threads through both phases.

use std::sync::Arc;

use tracing::debug;

use crate::coinjoin::denomination::{self, Denom};
use crate::coinjoin::interfaces::{TallyItem, Wallet};
use crate::coinjoin::tx_builder::TxBuilder;
use crate::constants::coinjoin::{
    COINJOIN_DENOM_OUTPUTS_THRESHOLD, MAX_COLLATERAL, MAX_OUTPUTS_PER_DENOM_PER_PASS,
};
use crate::error::CoinJoinError;
use crate::types::{Amount, TxId};

/// Per-denomination output counts, indexed the same way as [`Denom`].
struct PlanState {
    add_final: bool,
    counts: [usize; denomination::COUNT],
    goal: usize,
    hard_cap: usize,
}

pub async fn create_denominated(
    wallet: Arc<dyn Wallet>,
    tally_item: &TallyItem,
    mut balance_to_denominate: Amount,
    also_create_collateral_output: bool,
    denoms_goal: usize,
    denoms_hard_cap: usize,
) -> Result<TxId, CoinJoinError> {
    let mut builder = TxBuilder::new(wallet, tally_item.inputs.clone());
    let mut state = PlanState {
        add_final: true,
        counts: [0; denomination::COUNT],
        goal: denoms_goal,
        hard_cap: denoms_hard_cap,
    };

    let collateral_added = if also_create_collateral_output && builder.could_add_output(MAX_COLLATERAL) {
        builder.add_output(MAX_COLLATERAL).await?;
        true
    } else {
        false
    };

    phase1_round_robin(&mut builder, &mut state, &mut balance_to_denominate).await?;
    phase2_remainder(&mut builder, &mut state, &mut balance_to_denominate).await?;

    if collateral_added && builder.count_outputs() == 1 {
        debug!("create_denominated: only the collateral output was produced, aborting");
        builder.abort().await;
        return Err(CoinJoinError::Planning(
            "no denominated outputs fit alongside the collateral output".to_string(),
        ));
    }

    builder.commit().await
}

async fn phase1_round_robin(
    builder: &mut TxBuilder,
    state: &mut PlanState,
    balance_to_denominate: &mut Amount,
) -> Result<(), CoinJoinError> {
    while builder.could_add_output(denomination::smallest().amount())
        && builder.count_outputs() < COINJOIN_DENOM_OUTPUTS_THRESHOLD
    {
        let mut added_any = false;

        let mut smallest_to_largest: Vec<Denom> = denomination::all().collect();
        smallest_to_largest.reverse();

        for denom in smallest_to_largest {
            let idx = denom.0 as usize;
            let mut added_for_denom = 0usize;

            while added_for_denom < MAX_OUTPUTS_PER_DENOM_PER_PASS
                && state.counts[idx] < state.goal
                && builder.count_outputs() < COINJOIN_DENOM_OUTPUTS_THRESHOLD
            {
                let amount = denom.amount();
                let is_final_smaller = *balance_to_denominate > 0
                    && *balance_to_denominate < amount
                    && state.add_final;
                let need_more = *balance_to_denominate >= amount || is_final_smaller;
                if !need_more {
                    break;
                }
                if !builder.could_add_output(amount) {
                    break;
                }

                builder.add_output(amount).await?;
                state.counts[idx] += 1;
                added_for_denom += 1;
                added_any = true;
                *balance_to_denominate = balance_to_denominate.saturating_sub(amount);

                if is_final_smaller {
                    state.add_final = false;
                }
            }
        }

        if !added_any {
            break;
        }
    }
    Ok(())
}

async fn phase2_remainder(
    builder: &mut TxBuilder,
    state: &mut PlanState,
    balance_to_denominate: &mut Amount,
) -> Result<(), CoinJoinError> {
    while *balance_to_denominate > 0
        && builder.could_add_output(denomination::smallest().amount())
        && builder.count_outputs() < COINJOIN_DENOM_OUTPUTS_THRESHOLD
    {
        let mut added_any = false;

        for denom in denomination::all() {
            let idx = denom.0 as usize;
            let amount = denom.amount();
            let is_largest = denom == denomination::largest();

            let remaining_capacity = COINJOIN_DENOM_OUTPUTS_THRESHOLD - builder.count_outputs();
            let to_create_by_space = remaining_capacity;
            let to_create_by_value = (*balance_to_denominate / amount) as usize + 1;
            let cap_remaining = if is_largest {
                usize::MAX
            } else {
                state.hard_cap.saturating_sub(state.counts[idx])
            };
            let to_create = to_create_by_space.min(to_create_by_value).min(cap_remaining);

            for _ in 0..to_create {
                if builder.count_outputs() >= COINJOIN_DENOM_OUTPUTS_THRESHOLD {
                    break;
                }
                if !is_largest && state.counts[idx] >= state.hard_cap {
                    break;
                }
                if !builder.could_add_output(amount) {
                    break;
                }

                builder.add_output(amount).await?;
                state.counts[idx] += 1;
                *balance_to_denominate = balance_to_denominate.saturating_sub(amount);
                added_any = true;

                if *balance_to_denominate == 0 {
                    break;
                }
            }

            if *balance_to_denominate == 0 {
                break;
            }
        }

        if !added_any {
            break;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coinjoin::interfaces::test_doubles::FakeWallet;
    use crate::types::{OutPoint, SATOSHIS_PER_TIME as COIN, UTXO};

    fn tally_item(amount: Amount) -> TallyItem {
        TallyItem {
            destination: "addr".to_string(),
            total_amount: amount,
            inputs: vec![UTXO {
                outpoint: OutPoint { txid: [7; 32], vout: 0 },
                value: amount,
                script_pubkey: vec![],
                address: "addr".to_string(),
                rounds: 0,
                confirmations: 6,
            }],
        }
    }

    #[tokio::test]
    async fn round_robin_fill_produces_only_standard_denominations() {
        let wallet = Arc::new(FakeWallet::new());
        let item = tally_item(10 * COIN);

        let txid = create_denominated(wallet.clone(), &item, 10 * COIN, false, 11, 20)
            .await
            .unwrap();

        let broadcasts = wallet.broadcasts();
        let tx = broadcasts.iter().find(|t| t.txid() == txid).unwrap();

        assert!(tx.outputs.len() >= 40);
        assert!(tx.outputs.len() <= COINJOIN_DENOM_OUTPUTS_THRESHOLD);

        let mut per_denom_count = std::collections::HashMap::new();
        for out in &tx.outputs {
            assert!(denomination::is_denominated_amount(out.value));
            *per_denom_count.entry(out.value).or_insert(0usize) += 1;
        }
        for (amount, count) in per_denom_count {
            if amount != denomination::largest().amount() {
                assert!(count <= 11, "denom {amount} exceeded the 11-per-pass cap with count {count}");
            }
        }
    }

    #[tokio::test]
    async fn collateral_only_output_aborts_without_commit() {
        let wallet = Arc::new(FakeWallet::new());
        // Not enough balance to place any denom output, but enough for the
        // collateral placeholder alone.
        let item = tally_item(MAX_COLLATERAL + 3_000);

        let result = create_denominated(wallet.clone(), &item, 1, true, 11, 20).await;
        assert!(result.is_err());
        assert!(wallet.broadcasts().is_empty());
    }
}
