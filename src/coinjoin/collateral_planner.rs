//! Collateral planner (component E).
//!
//! Produces small anti-DoS deposit outputs from one tally item, trying
//! three cases in order of preference. The orchestrator (component G) is
//! responsible for the calling policy across multiple tally items
//! (non-denominated first, then denominated — §4.E "Calling policy").

use std::sync::Arc;

use tracing::debug;

use crate::coinjoin::denomination::is_denominated_amount;
use crate::coinjoin::interfaces::{TallyItem, Wallet};
use crate::coinjoin::tx_builder::TxBuilder;
use crate::constants::coinjoin::{DUST_THRESHOLD, MAX_COLLATERAL, MIN_COLLATERAL};
use crate::error::CoinJoinError;
use crate::types::TxId;

/// Tries Case 1 (max + remainder), then Case 2 (equal split), then Case 3
/// (single output), committing whichever first fits `tally_item`'s capacity.
pub async fn make_collateral(
    wallet: Arc<dyn Wallet>,
    tally_item: &TallyItem,
) -> Result<TxId, CoinJoinError> {
    if let Some(result) = try_case1(wallet.clone(), tally_item).await? {
        return Ok(result);
    }
    if let Some(result) = try_case2(wallet.clone(), tally_item).await? {
        return Ok(result);
    }
    if let Some(result) = try_case3(wallet.clone(), tally_item).await? {
        return Ok(result);
    }
    Err(CoinJoinError::Planning(
        "no collateral case fits this tally item's capacity".to_string(),
    ))
}

/// One `max_collateral` output plus one output covering the rest.
async fn try_case1(
    wallet: Arc<dyn Wallet>,
    tally_item: &TallyItem,
) -> Result<Option<TxId>, CoinJoinError> {
    let mut builder = TxBuilder::new(wallet, tally_item.inputs.clone());
    if !builder.could_add_outputs(&[MAX_COLLATERAL, MIN_COLLATERAL]) {
        return Ok(None);
    }

    builder.add_output(MAX_COLLATERAL).await?;
    let handle = builder.add_output(MIN_COLLATERAL).await?;

    let mut remainder = builder.get_amount_left() as u64 + MIN_COLLATERAL;
    if is_denominated_amount(remainder) {
        remainder -= 1;
    }
    builder.update_amount(handle, remainder);

    if builder.get_amount_left() as u64 >= DUST_THRESHOLD {
        debug!("collateral case 1: amount_left is not dust, rejecting plan");
        builder.abort().await;
        return Ok(None);
    }

    Ok(Some(builder.commit().await?))
}

/// Two equal-valued collateral outputs.
async fn try_case2(
    wallet: Arc<dyn Wallet>,
    tally_item: &TallyItem,
) -> Result<Option<TxId>, CoinJoinError> {
    let mut builder = TxBuilder::new(wallet, tally_item.inputs.clone());
    if !builder.could_add_outputs(&[MIN_COLLATERAL, MIN_COLLATERAL]) {
        return Ok(None);
    }

    let handle_a = builder.add_output(MIN_COLLATERAL).await?;
    let handle_b = builder.add_output(MIN_COLLATERAL).await?;

    let total = builder.get_amount_left() as u64 + 2 * MIN_COLLATERAL;
    let half = total / 2;
    builder.update_amount(handle_a, half);
    builder.update_amount(handle_b, half);

    debug_assert!(
        half < MIN_COLLATERAL || half <= MAX_COLLATERAL,
        "case 2 split exceeds max_collateral"
    );
    debug_assert!(
        half >= MIN_COLLATERAL,
        "case 2 split below min_collateral despite capacity check"
    );

    if builder.get_amount_left() as u64 >= DUST_THRESHOLD {
        debug!("collateral case 2: amount_left is not dust, rejecting plan");
        builder.abort().await;
        return Ok(None);
    }

    Ok(Some(builder.commit().await?))
}

/// A single output absorbing the entire remaining amount.
async fn try_case3(
    wallet: Arc<dyn Wallet>,
    tally_item: &TallyItem,
) -> Result<Option<TxId>, CoinJoinError> {
    let mut builder = TxBuilder::new(wallet, tally_item.inputs.clone());
    if !builder.could_add_output(MIN_COLLATERAL) {
        return Ok(None);
    }

    let handle = builder.add_output(MIN_COLLATERAL).await?;
    let final_value = builder.get_amount_left() as u64 + MIN_COLLATERAL;
    builder.update_amount(handle, final_value);

    if builder.get_amount_left() as u64 >= DUST_THRESHOLD {
        debug!("collateral case 3: amount_left is not dust, rejecting plan");
        builder.abort().await;
        return Ok(None);
    }

    Ok(Some(builder.commit().await?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coinjoin::denomination::is_collateral_amount;
    use crate::coinjoin::interfaces::test_doubles::FakeWallet;
    use crate::types::{Amount, OutPoint, UTXO};

    fn tally_item(amount: Amount) -> TallyItem {
        TallyItem {
            destination: "addr".to_string(),
            total_amount: amount,
            inputs: vec![UTXO {
                outpoint: OutPoint { txid: [9; 32], vout: 0 },
                value: amount,
                script_pubkey: vec![],
                address: "addr".to_string(),
                rounds: 0,
                confirmations: 6,
            }],
        }
    }

    #[tokio::test]
    async fn case2_splits_evenly_into_two_collateral_outputs() {
        let wallet = Arc::new(FakeWallet::new());
        // Too small for case 1 (max_collateral + min_collateral + fee), but
        // large enough for an even split of two collateral-sized outputs.
        let item = tally_item(2 * MIN_COLLATERAL + 5_000);

        let txid = make_collateral(wallet.clone(), &item).await.unwrap();
        let broadcasts = wallet.broadcasts();
        let tx = broadcasts.iter().find(|t| t.txid() == txid).unwrap();

        assert_eq!(tx.outputs.len(), 2);
        assert_eq!(tx.outputs[0].value, tx.outputs[1].value);
        assert!(is_collateral_amount(tx.outputs[0].value));
        assert!(is_collateral_amount(tx.outputs[1].value));
    }

    #[tokio::test]
    async fn case3_used_when_only_one_output_fits() {
        let wallet = Arc::new(FakeWallet::new());
        let item = tally_item(MIN_COLLATERAL + 2_500);

        let txid = make_collateral(wallet.clone(), &item).await.unwrap();
        let broadcasts = wallet.broadcasts();
        let tx = broadcasts.iter().find(|t| t.txid() == txid).unwrap();

        assert_eq!(tx.outputs.len(), 1);
        assert!(is_collateral_amount(tx.outputs[0].value));
    }

    #[tokio::test]
    async fn too_small_an_input_fits_no_case() {
        let wallet = Arc::new(FakeWallet::new());
        let item = tally_item(100);

        assert!(make_collateral(wallet, &item).await.is_err());
    }
}
