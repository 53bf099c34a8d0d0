//! Black-swan handling: detection, settlement, collateral bids, revival.
//!
//! A black swan exists when the least-collateralized position cannot cover
//! its debt at the best price anyone is obliged to pay for it. What
//! happens next is the asset's configured response: freeze everything at a
//! fixed settlement price, or absorb just the offending position into the
//! individual-settlement accumulators and keep the market alive.

use bitmatch_types::*;
use tracing::{error, info, warn};

use crate::engine::Matcher;

impl Matcher<'_> {
    // =================================================================
    // Detection
    // =================================================================

    /// Check whether the riskiest position is beyond saving and apply the
    /// asset's configured response. Returns true when the asset got
    /// globally settled, which ends all matching for it.
    ///
    /// The reference price only considers limit orders selling debt on the
    /// book alongside the margin-call offer price; a thin book can
    /// therefore mask an underwater position until an order arrives. That
    /// quirk is consensus and must not be "fixed" in isolation.
    pub fn check_for_blackswan(&mut self, allow_black_swan: bool) -> Result<bool> {
        let b = &self.market.bitasset;
        if b.is_prediction_market || b.is_globally_settled() || !b.has_feed() {
            return Ok(false);
        }
        let feed = *self.market.feed()?;
        let Some(least) = self.market.calls.least_collateralized() else {
            return Ok(false);
        };
        let least_id = least.id;
        let least_ratio = !least.collateralization(); // debt per collateral

        let mut highest = if self.ctx.rules.margin_call_fee_enabled {
            feed.margin_call_order_price(true)
        } else {
            feed.max_short_squeeze_price()
        };
        if let Some(limit) = self.market.book.selling_debt.best() {
            highest = highest.max(limit.sell_price);
        }
        if least_ratio < highest {
            return Ok(false);
        }

        let response = self.market.bitasset.swan_response;
        let individual = self.ctx.rules.individual_settlement_enabled
            && matches!(
                response,
                BlackSwanResponse::IndividualSettlementToFund
                    | BlackSwanResponse::IndividualSettlementToOrder
            );
        if individual {
            warn!(asset = %self.market.debt_asset(), call = %least_id, "individual settlement");
            self.individually_settle(least_id)?;
            return Ok(false);
        }
        if response == BlackSwanResponse::NoSettlement {
            // configured as impossible; settle globally as the fail-safe
            error!(asset = %self.market.debt_asset(), "swan on a no-settlement asset");
        }
        if !allow_black_swan {
            return Err(BitmatchError::BlackSwanBlocked(self.market.debt_asset()));
        }
        self.globally_settle(least_ratio)?;
        Ok(true)
    }

    // =================================================================
    // Individual settlement
    // =================================================================

    /// Absorb one underwater position into the individual-settlement
    /// accumulators. The fund takes the debt's worth at MCOP; whatever
    /// collateral is left over is the issuer's fee.
    pub(crate) fn individually_settle(&mut self, call_id: CallOrderId) -> Result<()> {
        let call = self
            .market
            .calls
            .remove(call_id)
            .ok_or(BitmatchError::CallOrderNotFound(call_id))?;
        let feed = *self.market.feed()?;
        let mcop = feed.margin_call_order_price(self.ctx.rules.margin_call_fee_enabled);

        let mut fund_receives = call.get_debt().multiply_round_up(&mcop)?;
        if fund_receives.amount > call.collateral {
            fund_receives = call.get_collateral();
        }
        let fee = call.get_collateral().checked_sub(fund_receives)?;

        let b = &mut self.market.bitasset;
        b.individual_settlement_debt += call.debt;
        b.individual_settlement_fund += fund_receives.amount;
        if fee.amount > 0 {
            self.sink.effect(BalanceEffect::AccrueCollateralFee {
                asset: self.market.debt_asset(),
                amount: fee,
            });
        }
        self.sink.notice(Notice::BlackSwan {
            asset: self.market.debt_asset(),
            global: false,
            settlement_price: !call.collateralization(),
        });
        self.sink.notice(Notice::PositionClosed {
            call: call_id,
            borrower: call.borrower,
            collateral_returned: AssetAmount::zero(call.collateral_asset),
        });

        if self.market.bitasset.swan_response == BlackSwanResponse::IndividualSettlementToOrder {
            self.sync_settled_debt_order()?;
        }
        Ok(())
    }

    // =================================================================
    // Global settlement
    // =================================================================

    /// Freeze the asset: every position pays its debt's worth at
    /// `trigger_price` (capped by its collateral) into the settlement
    /// fund, gets its remainder back, and the asset becomes redeemable at
    /// supply / fund.
    pub fn globally_settle(&mut self, trigger_price: Price) -> Result<()> {
        if self.market.bitasset.is_globally_settled() {
            return Err(BitmatchError::GloballySettled(self.market.debt_asset()));
        }
        let debt_asset = self.market.debt_asset();
        let collateral_asset = self.market.collateral_asset();
        let mut fund: i64 = 0;
        let mut settled_debt: i64 = 0;

        for call in self.market.calls.drain_all() {
            let mut pays = call.get_debt().multiply_round_up(&trigger_price)?;
            if pays.amount > call.collateral {
                pays = call.get_collateral();
            }
            fund += pays.amount;
            settled_debt += call.debt;
            let returned = call.get_collateral().checked_sub(pays)?;
            self.sink.credit(call.borrower, returned);
            self.sink.notice(Notice::Fill(Fill {
                order: OrderRef::Call(call.id),
                account: call.borrower,
                pays,
                receives: call.get_debt(),
                fee: AssetAmount::zero(collateral_asset),
                fill_price: trigger_price,
                is_maker: true,
            }));
        }

        // holders redeem at remaining supply over gathered collateral; the
        // individual-settlement accumulators keep their own ratio
        let redeemable = self.market.current_supply - self.market.bitasset.individual_settlement_debt;
        let settlement_price = if fund > 0 && redeemable > 0 {
            Price::new(
                AssetAmount::new(redeemable, debt_asset),
                AssetAmount::new(fund, collateral_asset),
            )?
        } else {
            trigger_price
        };
        let b = &mut self.market.bitasset;
        b.settlement_fund += fund;
        b.settlement_price = Some(settlement_price);
        info!(asset = %debt_asset, debt = settled_debt, fund, "globally settled");
        self.sink.notice(Notice::BlackSwan {
            asset: debt_asset,
            global: true,
            settlement_price,
        });
        Ok(())
    }

    // =================================================================
    // Collateral bids and revival
    // =================================================================

    /// Revive a globally settled asset. Requires standing bids covering
    /// the whole redeemable supply (none when the fund was fully redeemed);
    /// winning bids become positions collateralized by their own offer
    /// plus a pro-rata share of the settlement fund.
    pub fn revive(&mut self) -> Result<()> {
        let b = &self.market.bitasset;
        if !b.is_globally_settled() {
            return Err(BitmatchError::NotGloballySettled(b.asset_id));
        }
        let debt_asset = b.asset_id;
        let collateral_asset = b.backing_asset;
        let supply_to_cover = self.market.current_supply - b.individual_settlement_debt;

        if supply_to_cover > 0 {
            if self.market.bids.total_debt_covered() < supply_to_cover {
                return Err(BitmatchError::ReviveNotReady(debt_asset));
            }
            let fund = self.market.bitasset.settlement_fund;
            let mut remaining = supply_to_cover;
            while remaining > 0 {
                let Some(bid) = self.market.bids.pop_best() else {
                    return Err(BitmatchError::InternalInvariant(
                        "bids vanished mid-revival".into(),
                    ));
                };
                let take = bid.debt_covered.amount.min(remaining);
                // partial winner puts up a pro-rata slice of its collateral
                let collateral_used = if take == bid.debt_covered.amount {
                    bid.additional_collateral.amount
                } else {
                    ceil_ratio(bid.additional_collateral.amount, take, bid.debt_covered.amount)
                };
                let refund = bid.additional_collateral.amount - collateral_used;
                if refund > 0 {
                    self.sink
                        .credit(bid.bidder, AssetAmount::new(refund, collateral_asset));
                }
                let fund_share = floor_ratio(fund, take, supply_to_cover);
                self.market.bitasset.settlement_fund -= fund_share;

                let id = self.market.alloc_call_id();
                let call = CallOrder {
                    id,
                    borrower: bid.bidder,
                    collateral: collateral_used + fund_share,
                    debt: take,
                    collateral_asset,
                    debt_asset,
                    call_price: Price::max(collateral_asset, debt_asset),
                    target_collateral_ratio: None,
                    maintenance_collateral_ratio: None,
                };
                self.market.calls.insert(call)?;
                self.sink.notice(Notice::BidExecuted {
                    bid: bid.id,
                    bidder: bid.bidder,
                    debt: AssetAmount::new(take, debt_asset),
                    collateral: AssetAmount::new(collateral_used + fund_share, collateral_asset),
                });
                remaining -= take;
            }
        }

        // losing bids go home; a rounding remainder of the fund is fee
        self.refund_all_bids();
        let residual = self.market.bitasset.settlement_fund;
        if residual > 0 {
            self.market.bitasset.settlement_fund = 0;
            self.sink.effect(BalanceEffect::AccrueCollateralFee {
                asset: debt_asset,
                amount: AssetAmount::new(residual, collateral_asset),
            });
        }
        self.market.bitasset.settlement_price = None;
        info!(asset = %debt_asset, "asset revived");
        self.sink.notice(Notice::AssetRevived { asset: debt_asset });
        Ok(())
    }

    /// Refund every standing bid's escrowed collateral.
    pub(crate) fn refund_all_bids(&mut self) {
        while let Some(bid) = self.market.bids.pop_best() {
            self.sink.credit(bid.bidder, bid.additional_collateral);
        }
    }
}

fn floor_ratio(value: i64, num: i64, den: i64) -> i64 {
    (i128::from(value) * i128::from(num) / i128::from(den)) as i64
}

fn ceil_ratio(value: i64, num: i64, den: i64) -> i64 {
    let d = i128::from(den);
    ((i128::from(value) * i128::from(num) + d - 1) / d) as i64
}
