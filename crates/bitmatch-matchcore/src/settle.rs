//! Force-settlement execution.
//!
//! A force settlement redeems debt asset for collateral at the feed price,
//! degraded against the settler by the asset's settlement offset. The
//! debt was escrowed when the settlement was queued; it burns here, when
//! collateral actually changes hands. Collateral comes from, in order of
//! the asset's condition: the global settlement fund, the individual
//! settlement fund, or the least-collateralized margin position.

use bitmatch_types::constants::PERCENT_100;
use bitmatch_types::*;

use crate::engine::Matcher;
use crate::fees::force_settle_fee;
use crate::tcr::max_debt_to_cover;

impl Matcher<'_> {
    /// Execute one matured settlement to completion: drain funds and
    /// positions until its balance is gone or nothing can fill it. A
    /// remainder that nothing can fill is cancelled and refunded.
    pub fn execute_force_settlement(&mut self, id: SettlementId) -> Result<()> {
        loop {
            let Some(settle) = self.market.settlements.get(id) else {
                return Ok(()); // fully consumed or cancelled along the way
            };
            let balance = settle.balance;
            let owner = settle.owner;

            if self.market.bitasset.is_globally_settled() {
                self.market.settlements.remove(id);
                self.settle_from_global_fund(owner, balance)?;
                return Ok(());
            }
            if self.market.bitasset.swan_response == BlackSwanResponse::IndividualSettlementToFund
                && self.market.bitasset.individual_settlement_price().is_some()
            {
                if self.settle_from_individual_fund(id)? > 0 {
                    continue;
                }
                return Ok(()); // cancelled as dust inside
            }
            if !self.market.bitasset.has_feed() {
                self.cancel_settlement(id)?;
                return Ok(());
            }
            let Some(call_id) = self.market.calls.least_collateralized().map(|c| c.id) else {
                self.cancel_settlement(id)?;
                return Ok(());
            };
            if self.match_call_settle(call_id, id, false)? == 0 {
                return Ok(()); // cancelled as dust inside
            }
        }
    }

    /// Match a settlement against one margin position at the offset feed
    /// price. `call_is_taker` marks sweeper-initiated matches, where the
    /// margin call sought out the settlement rather than the reverse.
    /// Returns the debt amount covered; zero means the settlement was
    /// cancelled as dust instead.
    pub(crate) fn match_call_settle(
        &mut self,
        call_id: CallOrderId,
        settlement_id: SettlementId,
        call_is_taker: bool,
    ) -> Result<i64> {
        let settle = self
            .market
            .settlements
            .get(settlement_id)
            .cloned()
            .ok_or(BitmatchError::SettlementNotFound(settlement_id))?;
        let call = self
            .market
            .calls
            .get(call_id)
            .cloned()
            .ok_or(BitmatchError::CallOrderNotFound(call_id))?;
        let feed = *self.market.feed()?;
        let b = &self.market.bitasset;

        let offset = u64::from(b.force_settlement_offset_percent);
        let fee_percent = b.force_settlement_fee_percent;
        let denom = u64::from(PERCENT_100).saturating_sub(offset).max(1);
        let mut match_price = feed.settlement_price.scale(u64::from(PERCENT_100), denom);
        let (num, den) = feed.margin_call_pays_ratio(self.ctx.rules.margin_call_fee_enabled);
        let mut call_pays_price = match_price.scale(num, den);

        // an undercollateralized position pays at most its own ratio
        if call.get_debt().multiply_round_up(&call_pays_price)?.amount > call.collateral {
            call_pays_price = !call.collateralization();
            match_price = call_pays_price.scale(den, num);
        }

        let max_debt = max_debt_to_cover(&call, &call_pays_price, &feed, &self.ctx.rules)?;
        let to_cover = settle.balance.amount.min(max_debt).min(call.debt);
        let covered = AssetAmount::new(to_cover, settle.balance.asset_id);
        let receives = covered.multiply(&match_price)?;
        if receives.is_zero() {
            self.cancel_settlement(settlement_id)?;
            return Ok(0);
        }
        let mut call_pays = covered.multiply_round_up(&call_pays_price)?;
        if call_pays.amount > call.collateral {
            call_pays = call.get_collateral();
        }
        let margin_fee = call_pays.checked_sub(receives)?;

        self.fill_call_order(
            call_id,
            covered,
            call_pays,
            match_price,
            !call_is_taker,
            margin_fee,
        )?;
        self.pay_settler(&settle, covered, receives, fee_percent, match_price, call_is_taker)?;
        Ok(to_cover)
    }

    /// Redeem part of a settlement from the individual settlement fund at
    /// the fund's own ratio. Returns the debt covered, zero when the
    /// settlement was cancelled as dust.
    pub(crate) fn settle_from_individual_fund(&mut self, settlement_id: SettlementId) -> Result<i64> {
        let settle = self
            .market
            .settlements
            .get(settlement_id)
            .cloned()
            .ok_or(BitmatchError::SettlementNotFound(settlement_id))?;
        let b = &self.market.bitasset;
        let Some(fund_price) = b.individual_settlement_price() else {
            return Ok(0);
        };
        let fee_percent = b.force_settlement_fee_percent;
        let asset = b.asset_id;

        let to_cover = settle.balance.amount.min(b.individual_settlement_debt);
        let covered = AssetAmount::new(to_cover, settle.balance.asset_id);
        let receives = covered.multiply(&fund_price)?;
        if receives.is_zero() {
            self.cancel_settlement(settlement_id)?;
            return Ok(0);
        }

        let b = &mut self.market.bitasset;
        b.individual_settlement_debt -= to_cover;
        b.individual_settlement_fund -= receives.amount;
        self.burn_debt(covered)?;
        // a fund emptied of debt donates its collateral remainder as fee
        if self.market.bitasset.individual_settlement_debt == 0
            && self.market.bitasset.individual_settlement_fund > 0
        {
            let residual = AssetAmount::new(
                self.market.bitasset.individual_settlement_fund,
                self.market.collateral_asset(),
            );
            self.market.bitasset.individual_settlement_fund = 0;
            self.sink.effect(BalanceEffect::AccrueCollateralFee {
                asset,
                amount: residual,
            });
        }
        self.sink.notice(Notice::Fill(Fill {
            order: OrderRef::SettlementFund(asset),
            account: self.market.debt_issuer,
            pays: receives,
            receives: covered,
            fee: AssetAmount::zero(receives.asset_id),
            fill_price: fund_price,
            is_maker: true,
        }));
        self.pay_settler(&settle, covered, receives, fee_percent, fund_price, false)?;
        Ok(to_cover)
    }

    /// Redeem against the global settlement fund at the frozen price.
    /// Only meaningful while the asset is globally settled; the caller has
    /// already taken the settlement out of the queue (or never queued it).
    ///
    /// The payout is capped by the fund's remainder. Floor rounding on
    /// earlier redemptions can leave the fund short of the frozen rate for
    /// the final slice of supply; that shortfall lands on the last settler,
    /// whose full debt amount still burns against the capped payout.
    pub fn settle_from_global_fund(
        &mut self,
        owner: AccountId,
        amount: AssetAmount,
    ) -> Result<AssetAmount> {
        let b = &self.market.bitasset;
        let settlement_price = b
            .settlement_price
            .ok_or(BitmatchError::NotGloballySettled(b.asset_id))?;
        let fee_percent = b.force_settlement_fee_percent;
        let asset = b.asset_id;

        let mut receives = amount.multiply(&settlement_price)?;
        if receives.amount > b.settlement_fund {
            receives = AssetAmount::new(b.settlement_fund, receives.asset_id);
        }
        self.market.bitasset.settlement_fund -= receives.amount;
        self.burn_debt(amount)?;

        let fee = force_settle_fee(fee_percent, receives);
        if fee.amount > 0 {
            self.sink.effect(BalanceEffect::AccrueCollateralFee {
                asset,
                amount: fee,
            });
        }
        let net = receives.checked_sub(fee)?;
        self.sink.credit(owner, net);
        self.sink.notice(Notice::Fill(Fill {
            order: OrderRef::SettlementFund(asset),
            account: owner,
            pays: amount,
            receives,
            fee,
            fill_price: settlement_price,
            is_maker: false,
        }));
        Ok(net)
    }

    /// Cancel a queued settlement and refund its escrowed balance.
    pub fn cancel_settlement(&mut self, id: SettlementId) -> Result<()> {
        let settle = self
            .market
            .settlements
            .remove(id)
            .ok_or(BitmatchError::SettlementNotFound(id))?;
        self.sink.credit(settle.owner, settle.balance);
        self.sink.notice(Notice::SettleCancelled {
            settlement: id,
            account: settle.owner,
            refund: settle.balance,
        });
        Ok(())
    }

    /// Pay the settler their collateral, minus the force-settlement fee,
    /// and shrink or retire the queue entry.
    fn pay_settler(
        &mut self,
        settle: &ForceSettlement,
        covered: AssetAmount,
        receives: AssetAmount,
        fee_percent: Option<u16>,
        fill_price: Price,
        is_maker: bool,
    ) -> Result<()> {
        let fee = force_settle_fee(fee_percent, receives);
        if fee.amount > 0 {
            self.sink.effect(BalanceEffect::AccrueCollateralFee {
                asset: self.market.debt_asset(),
                amount: fee,
            });
        }
        let net = receives.checked_sub(fee)?;
        self.sink.credit(settle.owner, net);
        self.sink.notice(Notice::Fill(Fill {
            order: OrderRef::Settlement(settle.id),
            account: settle.owner,
            pays: covered,
            receives,
            fee,
            fill_price,
            is_maker,
        }));

        let remaining = settle.balance.checked_sub(covered)?;
        if remaining.is_zero() {
            self.market.settlements.remove(settle.id);
        } else {
            self.market.settlements.set_balance(settle.id, remaining)?;
        }
        Ok(())
    }
}
