//! Fee calculation and routing.
//!
//! Two unrelated fee families flow through here:
//! - **Market fees**: a percentage of every fill's receive leg, split
//!   between the network, the seller's referrer, and the asset's fee pool.
//! - **Collateral-denominated fees**: the margin-call fee (the MCFR slice
//!   of a call's payment) and the force-settlement fee, both accrued to
//!   the debt asset's collateral fee pool.

use bitmatch_types::constants::PERCENT_100;
use bitmatch_types::*;

/// How one market fee divides up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeeSplit {
    pub network: i64,
    pub reward: i64,
    pub issuer: i64,
}

/// The market fee charged on `receives`, before splitting. Rounds down and
/// is capped by the asset's `max_market_fee`.
#[must_use]
pub fn calculate_market_fee(
    params: &MarketFeeParams,
    receives: AssetAmount,
    is_maker: bool,
) -> AssetAmount {
    let rate = if is_maker {
        params.market_fee_percent
    } else {
        params.taker_fee_percent.unwrap_or(params.market_fee_percent)
    };
    if rate == 0 || receives.amount <= 0 {
        return AssetAmount::zero(receives.asset_id);
    }
    let fee = i128::from(receives.amount) * i128::from(rate) / i128::from(PERCENT_100);
    let fee = (fee as i64).min(params.max_market_fee).min(receives.amount);
    AssetAmount::new(fee, receives.asset_id)
}

/// Split a fee between network, referrer, and issuer pools. Remainders
/// round toward the issuer.
#[must_use]
pub fn split_market_fee(params: &MarketFeeParams, ctx: &ExecContext, fee: i64) -> FeeSplit {
    let network =
        (i128::from(fee) * i128::from(ctx.network_fee_percent) / i128::from(PERCENT_100)) as i64;
    let reward = (i128::from(fee - network) * i128::from(params.reward_percent)
        / i128::from(PERCENT_100)) as i64;
    FeeSplit {
        network,
        reward,
        issuer: fee - network - reward,
    }
}

/// Charge the market fee for a fill and emit its split. Returns the fee so
/// the caller can report it and credit the seller net of it.
pub fn pay_market_fees(
    sink: &mut EventSink,
    ctx: &ExecContext,
    params: &MarketFeeParams,
    seller: AccountId,
    receives: AssetAmount,
    is_maker: bool,
) -> Result<AssetAmount> {
    let fee = calculate_market_fee(params, receives, is_maker);
    if fee.is_zero() {
        return Ok(fee);
    }
    let split = split_market_fee(params, ctx, fee.amount);
    if split.network > 0 {
        sink.effect(BalanceEffect::Network {
            amount: AssetAmount::new(split.network, receives.asset_id),
        });
    }
    if split.reward > 0 {
        sink.effect(BalanceEffect::ReferralReward {
            seller,
            amount: AssetAmount::new(split.reward, receives.asset_id),
        });
    }
    if split.issuer > 0 {
        sink.effect(BalanceEffect::AccrueMarketFee {
            asset: receives.asset_id,
            amount: split.issuer,
        });
    }
    Ok(fee)
}

/// The fee withheld from a force settler's collateral payout.
#[must_use]
pub fn force_settle_fee(fee_percent: Option<u16>, receives: AssetAmount) -> AssetAmount {
    let Some(rate) = fee_percent else {
        return AssetAmount::zero(receives.asset_id);
    };
    if rate == 0 || receives.amount <= 0 {
        return AssetAmount::zero(receives.asset_id);
    }
    let fee = i128::from(receives.amount) * i128::from(rate) / i128::from(PERCENT_100);
    AssetAmount::new(fee as i64, receives.asset_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    const COLL: AssetId = AssetId(0);

    fn params(percent: u16, cap: i64, reward: u16) -> MarketFeeParams {
        MarketFeeParams {
            market_fee_percent: percent,
            taker_fee_percent: None,
            max_market_fee: cap,
            reward_percent: reward,
        }
    }

    #[test]
    fn fee_rounds_down_and_caps() {
        let p = params(100, 5, 0); // 1%
        let fee = calculate_market_fee(&p, AssetAmount::new(333, COLL), true);
        assert_eq!(fee.amount, 3);
        let fee = calculate_market_fee(&p, AssetAmount::new(100_000, COLL), true);
        assert_eq!(fee.amount, 5, "capped at max_market_fee");
    }

    #[test]
    fn taker_rate_falls_back_to_maker_rate() {
        let mut p = params(100, i64::MAX, 0);
        assert_eq!(
            calculate_market_fee(&p, AssetAmount::new(1000, COLL), false).amount,
            10
        );
        p.taker_fee_percent = Some(200);
        assert_eq!(
            calculate_market_fee(&p, AssetAmount::new(1000, COLL), false).amount,
            20
        );
        assert_eq!(
            calculate_market_fee(&p, AssetAmount::new(1000, COLL), true).amount,
            10
        );
    }

    #[test]
    fn split_conserves_the_fee() {
        let ctx = ExecContext::latest(Utc::now());
        let p = params(100, i64::MAX, 3000);
        let split = split_market_fee(&p, &ctx, 1000);
        // network 20%, reward 30% of the rest
        assert_eq!(split.network, 200);
        assert_eq!(split.reward, 240);
        assert_eq!(split.issuer, 560);
        assert_eq!(split.network + split.reward + split.issuer, 1000);
    }

    #[test]
    fn split_survives_the_maximum_fee() {
        let mut ctx = ExecContext::latest(Utc::now());
        ctx.network_fee_percent = PERCENT_100;
        let p = params(100, i64::MAX, PERCENT_100);
        let split = split_market_fee(&p, &ctx, bitmatch_types::constants::MAX_SHARE_SUPPLY);
        assert_eq!(split.network, bitmatch_types::constants::MAX_SHARE_SUPPLY);
        assert_eq!(split.reward, 0);
        assert_eq!(split.issuer, 0);
    }

    #[test]
    fn pay_market_fees_emits_all_three_effects() {
        let ctx = ExecContext::latest(Utc::now());
        let p = params(100, i64::MAX, 3000);
        let mut sink = EventSink::new();
        let fee = pay_market_fees(
            &mut sink,
            &ctx,
            &p,
            AccountId(1),
            AssetAmount::new(100_000, COLL),
            true,
        )
        .unwrap();
        assert_eq!(fee.amount, 1000);
        assert_eq!(sink.effects.len(), 3);
    }

    #[test]
    fn zero_rate_charges_nothing() {
        let ctx = ExecContext::latest(Utc::now());
        let mut sink = EventSink::new();
        let fee = pay_market_fees(
            &mut sink,
            &ctx,
            &MarketFeeParams::none(),
            AccountId(1),
            AssetAmount::new(100_000, COLL),
            false,
        )
        .unwrap();
        assert!(fee.is_zero());
        assert!(sink.effects.is_empty());
    }

    #[test]
    fn force_settle_fee_rounds_down() {
        let fee = force_settle_fee(Some(50), AssetAmount::new(1210, COLL));
        assert_eq!(fee.amount, 6); // 0.5% of 1210 = 6.05
        assert!(force_settle_fee(None, AssetAmount::new(1210, COLL)).is_zero());
    }
}
