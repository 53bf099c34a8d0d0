//! Target collateral ratio: how much debt a margin call actually covers.
//!
//! A position carrying a TCR is only partially closed on a margin call:
//! just enough debt is covered, at the prevailing call-pays price, to lift
//! the remaining position back to the target ratio at the feed price. The
//! minimum is found by binary search over the debt amount; amounts are
//! bounded by `MAX_SHARE_SUPPLY` (< 2^50), so every intermediate product
//! fits in `i128`.

use bitmatch_types::constants::{COLLATERAL_RATIO_DENOM, MAX_COLLATERAL_RATIO};
use bitmatch_types::*;

/// The debt a margin call against `call` covers when it pays collateral at
/// `call_pays_price`. The whole debt unless the position has an active TCR
/// under the current rules; never zero for a callable position.
pub fn max_debt_to_cover(
    call: &CallOrder,
    call_pays_price: &Price,
    feed: &PriceFeed,
    rules: &RuleSet,
) -> Result<i64> {
    if !rules.target_cr_enabled {
        return Ok(call.debt);
    }
    let Some(tcr) = call.target_collateral_ratio else {
        return Ok(call.debt);
    };
    let mcr = call.effective_mcr(feed.maintenance_collateral_ratio);
    let tcr = tcr.max(mcr).min(MAX_COLLATERAL_RATIO);

    if covers(call, call_pays_price, feed, tcr, call.debt)? {
        // binary search for the least debt amount that restores the target
        let (mut lo, mut hi) = (1_i64, call.debt);
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            if covers(call, call_pays_price, feed, tcr, mid)? {
                hi = mid;
            } else {
                lo = mid + 1;
            }
        }
        Ok(lo)
    } else {
        // selling at this price can never reach the target; close in full
        Ok(call.debt)
    }
}

/// Does covering `x` debt restore the position to `tcr` at the feed price?
fn covers(call: &CallOrder, call_pays_price: &Price, feed: &PriceFeed, tcr: u16, x: i64) -> Result<bool> {
    let pays = AssetAmount::new(x, call.debt_asset).multiply_round_up(call_pays_price)?;
    if pays.amount >= call.collateral || x >= call.debt {
        // the whole position is consumed; nothing left to be below target
        return Ok(x >= call.debt);
    }
    let remaining_collateral = i128::from(call.collateral - pays.amount);
    let remaining_debt = i128::from(call.debt - x);
    // feed is debt/collateral: one debt unit is worth quote/base collateral
    let feed_debt = i128::from(feed.settlement_price.base.amount);
    let feed_coll = i128::from(feed.settlement_price.quote.amount);
    // target: remaining_collateral / remaining_debt >= (tcr/1000) * (feed_coll/feed_debt)
    Ok(remaining_collateral * feed_debt * i128::from(COLLATERAL_RATIO_DENOM)
        >= remaining_debt * feed_coll * i128::from(tcr))
}
