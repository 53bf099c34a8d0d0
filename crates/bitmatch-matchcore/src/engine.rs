//! The matching engine for one market.
//!
//! A [`Matcher`] borrows one market's state, an execution context, and an
//! event sink for the duration of one operation. It mutates books and
//! bitasset state directly; every balance movement goes through the sink
//! as a [`BalanceEffect`] so the settlement plane can apply or discard the
//! whole operation atomically.
//!
//! Matching always happens at the maker's price. Rounding on partial fills
//! is rule-versioned: under `round_up_avoids_dust` the smaller side is
//! filled exactly and the larger side's payment rounds up, with dust
//! remainders culled; before it, the smaller side simply pays its whole
//! remainder.

use bitmatch_types::*;
use tracing::debug;

use crate::book::MarketState;
use crate::fees::pay_market_fees;
use crate::tcr::max_debt_to_cover;

/// Which sides of a match were exhausted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchOutcome {
    NoneFilled,
    TakerFilled,
    MakerFilled,
    BothFilled,
}

impl MatchOutcome {
    #[must_use]
    pub fn from_filled(taker: bool, maker: bool) -> Self {
        match (taker, maker) {
            (false, false) => Self::NoneFilled,
            (true, false) => Self::TakerFilled,
            (false, true) => Self::MakerFilled,
            (true, true) => Self::BothFilled,
        }
    }

    #[must_use]
    pub fn taker_filled(self) -> bool {
        matches!(self, Self::TakerFilled | Self::BothFilled)
    }

    #[must_use]
    pub fn maker_filled(self) -> bool {
        matches!(self, Self::MakerFilled | Self::BothFilled)
    }
}

/// The counterparty chosen for one matching round.
enum Counterparty {
    /// A resting limit order at its price, possibly the settled-debt order.
    Limit(OrderId, Price, bool),
    /// The least-collateralized margin position, offering MCOP.
    Call(CallOrderId, Price),
}

/// One operation's worth of matching over one market.
pub struct Matcher<'a> {
    pub market: &'a mut MarketState,
    pub ctx: &'a ExecContext,
    pub sink: &'a mut EventSink,
}

impl<'a> Matcher<'a> {
    pub fn new(market: &'a mut MarketState, ctx: &'a ExecContext, sink: &'a mut EventSink) -> Self {
        Self { market, ctx, sink }
    }

    // =================================================================
    // Limit order entry
    // =================================================================

    /// Match a new limit order against the book and the margin-call queue,
    /// then book any remainder. Returns whether a remainder was booked.
    ///
    /// The order's backing funds must already be escrowed by the caller;
    /// everything the order earns or gets refunded flows out through the
    /// sink.
    pub fn apply_limit_order(&mut self, order: LimitOrder, fill_or_kill: bool) -> Result<bool> {
        self.validate_new_order(&order)?;
        let sells_debt = order.sold_asset() == self.market.debt_asset();
        let mut taker = order;

        loop {
            if taker.for_sale == 0 {
                break;
            }
            let maker_limit = self
                .market
                .side(taker.received_asset())?
                .best()
                .map(|m| (m.id, m.sell_price, m.is_settled_debt));
            let call = if sells_debt {
                self.margin_call_candidate()
            } else {
                None
            };

            let counter = match (maker_limit, call) {
                (None, None) => break,
                (Some((id, p, sd)), None) => Counterparty::Limit(id, p, sd),
                (None, Some((cid, mcop))) => Counterparty::Call(cid, mcop),
                (Some((id, p, sd)), Some((cid, mcop))) => {
                    // both convert the taker's asset; take the better rate,
                    // resting orders win ties
                    if (!p) <= mcop {
                        Counterparty::Limit(id, p, sd)
                    } else {
                        Counterparty::Call(cid, mcop)
                    }
                }
            };

            match counter {
                Counterparty::Limit(maker_id, maker_price, is_settled_debt) => {
                    if (!maker_price) > taker.sell_price {
                        break; // best offer no longer crosses
                    }
                    let outcome = if is_settled_debt {
                        self.match_limit_settled_debt(&mut taker)?
                    } else {
                        self.match_limit_limit(&mut taker, maker_id, maker_price)?
                    };
                    if outcome.taker_filled() {
                        break;
                    }
                    if outcome == MatchOutcome::NoneFilled {
                        return Err(BitmatchError::MatchingFailed {
                            reason: format!("no progress matching {}", taker.id),
                        });
                    }
                }
                Counterparty::Call(call_id, mcop) => {
                    if mcop > taker.sell_price {
                        break; // margin calls pay less than the taker asks
                    }
                    let feed = *self.market.feed()?;
                    let (num, den) = feed.margin_call_pays_ratio(self.ctx.rules.margin_call_fee_enabled);
                    let call_pays_price = mcop.scale(num, den);
                    if !self.call_can_pay(call_id, &call_pays_price)? {
                        self.absorb_unpayable_call(call_id)?;
                        continue;
                    }
                    let (limit_done, call_done) =
                        self.fill_limit_call(&mut taker, false, call_id, mcop, call_pays_price)?;
                    if limit_done {
                        break;
                    }
                    if !call_done {
                        return Err(BitmatchError::MatchingFailed {
                            reason: format!("no progress margin-calling against {}", taker.id),
                        });
                    }
                }
            }
        }

        if taker.for_sale > 0 {
            if fill_or_kill {
                return Err(BitmatchError::FillOrKillUnfilled(taker.id));
            }
            if self.ctx.rules.dust_cancel && taker.amount_to_receive()?.is_zero() {
                self.cancel_order_instance(&taker, false);
                return Ok(false);
            }
            let id = taker.id;
            self.market.side_mut(taker.sold_asset())?.insert(taker)?;
            debug!(order = %id, "limit order booked");
            return Ok(true);
        }
        Ok(false)
    }

    fn validate_new_order(&self, order: &LimitOrder) -> Result<()> {
        if order.for_sale <= 0 {
            return Err(BitmatchError::InvalidOrder {
                reason: "nothing for sale".into(),
            });
        }
        if order.is_settled_debt {
            return Err(BitmatchError::InvalidOrder {
                reason: "settled-debt orders are kernel-created".into(),
            });
        }
        if order.expiration <= self.ctx.now {
            return Err(BitmatchError::InvalidOrder {
                reason: "order already expired".into(),
            });
        }
        // both legs must belong to this market
        self.market.side(order.sold_asset())?;
        self.market.side(order.received_asset())?;
        if self.market.side(order.sold_asset())?.get(order.id).is_some()
            || self
                .market
                .side(order.received_asset())?
                .get(order.id)
                .is_some()
        {
            return Err(BitmatchError::DuplicateOrder(order.id));
        }
        Ok(())
    }

    /// The margin call currently offering liquidity, with its offer price.
    /// `None` when no position is callable or the market cannot call.
    fn margin_call_candidate(&self) -> Option<(CallOrderId, Price)> {
        let b = &self.market.bitasset;
        if b.is_prediction_market || b.is_globally_settled() {
            return None;
        }
        let feed = b.current_feed.as_ref()?;
        let call = self.market.calls.least_collateralized()?;
        let callable = if self.ctx.rules.call_orders_are_takers {
            let maintenance = b
                .maintenance_collateralization
                .unwrap_or_else(|| feed.maintenance_collateralization());
            call.collateralization() <= maintenance
        } else {
            call.call_price < !feed.settlement_price
        };
        if !callable {
            return None;
        }
        Some((
            call.id,
            feed.margin_call_order_price(self.ctx.rules.margin_call_fee_enabled),
        ))
    }

    /// Whether the position's own collateral covers its whole debt at
    /// `call_pays_price`. Partial covers pay the same per-unit rate, so a
    /// position that passes here can never be asked for more than it holds.
    fn call_can_pay(&self, call_id: CallOrderId, call_pays_price: &Price) -> Result<bool> {
        let call = self
            .market
            .calls
            .get(call_id)
            .ok_or(BitmatchError::CallOrderNotFound(call_id))?;
        Ok(call.get_debt().multiply_round_up(call_pays_price)?.amount <= call.collateral)
    }

    /// Take a position that cannot pay the squeeze price off the call
    /// index: absorb it into the individual-settlement accumulators when
    /// the asset handles bad debt that way, otherwise abort the operation
    /// until a global settlement resolves the asset.
    fn absorb_unpayable_call(&mut self, call_id: CallOrderId) -> Result<()> {
        let individual = self.ctx.rules.individual_settlement_enabled
            && matches!(
                self.market.bitasset.swan_response,
                BlackSwanResponse::IndividualSettlementToFund
                    | BlackSwanResponse::IndividualSettlementToOrder
            );
        if individual {
            self.individually_settle(call_id)?;
            return Ok(());
        }
        Err(BitmatchError::BlackSwanBlocked(self.market.debt_asset()))
    }

    // =================================================================
    // Limit <-> limit
    // =================================================================

    /// Match `taker` against a booked maker at the maker's price.
    pub(crate) fn match_limit_limit(
        &mut self,
        taker: &mut LimitOrder,
        maker_id: OrderId,
        match_price: Price,
    ) -> Result<MatchOutcome> {
        let maker_asset = taker.received_asset();
        let maker = self
            .market
            .side(maker_asset)?
            .get(maker_id)
            .cloned()
            .ok_or(BitmatchError::OrderNotFound(maker_id))?;
        let rules = self.ctx.rules;

        let taker_for_sale = taker.amount_for_sale();
        let maker_for_sale = maker.amount_for_sale();
        let taker_wants = taker_for_sale.multiply(&match_price)?;

        if taker_wants.is_zero() && rules.dust_cancel {
            // the taker cannot buy a single unit even at the match price
            self.cancel_order_instance(taker, false);
            taker.for_sale = 0;
            return Ok(MatchOutcome::TakerFilled);
        }

        let (taker_pays, taker_receives);
        if taker_wants.amount <= maker_for_sale.amount {
            // taker is the smaller side
            taker_receives = taker_wants;
            taker_pays = if rules.round_up_avoids_dust && taker_wants.amount < maker_for_sale.amount
            {
                taker_receives.multiply_round_up(&match_price)?
            } else {
                taker_for_sale
            };
        } else {
            // maker is the smaller side
            taker_receives = maker_for_sale;
            taker_pays = if rules.round_up_avoids_dust {
                maker_for_sale.multiply_round_up(&match_price)?
            } else {
                maker_for_sale.multiply(&match_price)?
            };
        }
        if taker_pays.amount > taker.for_sale {
            return Err(BitmatchError::InternalInvariant(format!(
                "taker {} charged beyond its remainder",
                taker.id
            )));
        }

        let taker_done = self.fill_limit(taker, taker_pays, taker_receives, match_price, false)?;
        let mut maker = self
            .market
            .side_mut(maker_asset)?
            .remove(maker_id)
            .ok_or(BitmatchError::OrderNotFound(maker_id))?;
        let maker_done = self.fill_limit(&mut maker, taker_receives, taker_pays, match_price, true)?;
        if !maker_done {
            self.market.side_mut(maker_asset)?.insert(maker)?;
        }
        Ok(MatchOutcome::from_filled(taker_done, maker_done))
    }

    /// Fill one side of a match: charge the market fee, credit the seller,
    /// consume the deferred fee, and cull a dust remainder. Returns whether
    /// the order is finished. The caller owns book membership.
    fn fill_limit(
        &mut self,
        order: &mut LimitOrder,
        pays: AssetAmount,
        receives: AssetAmount,
        fill_price: Price,
        is_maker: bool,
    ) -> Result<bool> {
        self.consume_deferred_fee(order);
        let params = self.market.fee_params(receives.asset_id)?.clone();
        let fee = pay_market_fees(self.sink, self.ctx, &params, order.seller, receives, is_maker)?;
        let net = receives.checked_sub(fee)?;
        self.sink.credit(order.seller, net);
        self.sink.notice(Notice::Fill(Fill {
            order: OrderRef::Limit(order.id),
            account: order.seller,
            pays,
            receives,
            fee,
            fill_price,
            is_maker,
        }));

        order.for_sale -= pays.amount;
        if order.for_sale < 0 {
            return Err(BitmatchError::InternalInvariant(format!(
                "order {} overdrawn",
                order.id
            )));
        }
        if order.for_sale == 0 {
            self.note_take_profit(order);
            return Ok(true);
        }
        if self.ctx.rules.round_up_avoids_dust && order.amount_to_receive()?.is_zero() {
            // remainder can no longer buy anything at the order's own price
            let refund = order.amount_for_sale();
            self.sink.credit(order.seller, refund);
            self.sink.notice(Notice::Cancel {
                order: order.id,
                account: order.seller,
                refund,
                fee_refund: 0,
            });
            order.for_sale = 0;
            return Ok(true);
        }
        Ok(false)
    }

    fn note_take_profit(&mut self, order: &LimitOrder) {
        if let Some(linked) = order.take_profit_order {
            self.sink.notice(Notice::TakeProfitTriggered {
                order: order.id,
                linked,
            });
        }
    }

    /// The order-creation fee is deferred until the order does something:
    /// the first fill hands it to the network, a cancel refunds it.
    fn consume_deferred_fee(&mut self, order: &mut LimitOrder) {
        if order.deferred_fee > 0 {
            self.sink.effect(BalanceEffect::Network {
                amount: AssetAmount::new(order.deferred_fee, self.ctx.core_asset),
            });
            order.deferred_fee = 0;
        }
        if let Some(paid) = order.deferred_paid_fee.take() {
            if !paid.is_zero() {
                self.sink.effect(BalanceEffect::AccrueMarketFee {
                    asset: paid.asset_id,
                    amount: paid.amount,
                });
            }
        }
    }

    // =================================================================
    // Limit <-> margin call
    // =================================================================

    /// Fill a limit order selling debt against a margin position. The match
    /// price is whoever is maker; the position pays collateral at
    /// `call_pays_price` (the match price degraded by the MCFR slice) and
    /// the difference is the margin-call fee.
    ///
    /// Returns `(limit_finished, position_closed)`.
    pub(crate) fn fill_limit_call(
        &mut self,
        limit: &mut LimitOrder,
        limit_is_maker: bool,
        call_id: CallOrderId,
        match_price: Price,
        call_pays_price: Price,
    ) -> Result<(bool, bool)> {
        let call = self
            .market
            .calls
            .get(call_id)
            .cloned()
            .ok_or(BitmatchError::CallOrderNotFound(call_id))?;
        let feed = *self.market.feed()?;
        let max_debt = max_debt_to_cover(&call, &call_pays_price, &feed, &self.ctx.rules)?;

        let debt_for_sale = limit.amount_for_sale();
        let (call_receives, order_receives, call_pays);
        if max_debt > debt_for_sale.amount {
            // the limit order is the smaller side
            call_receives = debt_for_sale;
            order_receives = debt_for_sale.multiply(&match_price)?;
            if order_receives.is_zero() && self.ctx.rules.dust_cancel {
                self.cancel_order_instance(limit, false);
                limit.for_sale = 0;
                return Ok((true, false));
            }
            call_pays = debt_for_sale.multiply(&call_pays_price)?;
        } else {
            // the position's cover demand is the smaller side
            call_receives = AssetAmount::new(max_debt, debt_for_sale.asset_id);
            order_receives = call_receives.multiply_round_up(&match_price)?;
            call_pays = call_receives.multiply_round_up(&call_pays_price)?;
        }
        let margin_call_fee = call_pays.checked_sub(order_receives)?;

        let call_done = self.fill_call_order(
            call_id,
            call_receives,
            call_pays,
            match_price,
            !limit_is_maker,
            margin_call_fee,
        )?;
        let limit_done =
            self.fill_limit(limit, call_receives, order_receives, match_price, limit_is_maker)?;
        Ok((limit_done, call_done))
    }

    /// Apply one fill to a margin position: burn the covered debt, release
    /// the collateral payment, accrue the margin-call fee, and close the
    /// position when its debt reaches zero.
    pub(crate) fn fill_call_order(
        &mut self,
        call_id: CallOrderId,
        debt_covered: AssetAmount,
        collateral_paid: AssetAmount,
        fill_price: Price,
        is_maker: bool,
        margin_call_fee: AssetAmount,
    ) -> Result<bool> {
        let mcr = self.market.feed()?.maintenance_collateral_ratio;
        let mut call = self
            .market
            .calls
            .remove(call_id)
            .ok_or(BitmatchError::CallOrderNotFound(call_id))?;
        if debt_covered.amount > call.debt || collateral_paid.amount > call.collateral {
            return Err(BitmatchError::InternalInvariant(format!(
                "call {call_id} overfilled"
            )));
        }
        call.debt -= debt_covered.amount;
        call.collateral -= collateral_paid.amount;

        self.burn_debt(debt_covered)?;
        if margin_call_fee.amount > 0 {
            self.sink.effect(BalanceEffect::AccrueCollateralFee {
                asset: debt_covered.asset_id,
                amount: margin_call_fee,
            });
        }
        self.sink.notice(Notice::Fill(Fill {
            order: OrderRef::Call(call_id),
            account: call.borrower,
            pays: collateral_paid,
            receives: debt_covered,
            fee: margin_call_fee,
            fill_price,
            is_maker,
        }));

        if call.debt == 0 {
            let returned = call.get_collateral();
            self.sink.credit(call.borrower, returned);
            self.sink.notice(Notice::PositionClosed {
                call: call_id,
                borrower: call.borrower,
                collateral_returned: returned,
            });
            return Ok(true);
        }
        if call.collateral == 0 {
            return Err(BitmatchError::InternalInvariant(format!(
                "call {call_id} stripped bare with debt outstanding"
            )));
        }
        if !self.ctx.rules.call_orders_are_takers {
            call.update_call_price(call.effective_mcr(mcr));
        }
        self.market.calls.insert(call)?;
        Ok(false)
    }

    // =================================================================
    // Limit <-> settled debt
    // =================================================================

    /// Match a taker selling debt against the synthetic settled-debt order,
    /// which is backed by the individual-settlement accumulators rather
    /// than an account.
    pub(crate) fn match_limit_settled_debt(&mut self, taker: &mut LimitOrder) -> Result<MatchOutcome> {
        let b = &self.market.bitasset;
        let Some(raw_price) = b.individual_settlement_price() else {
            return Err(BitmatchError::InternalInvariant(
                "settled-debt order without accumulators".into(),
            ));
        };
        let (num, den) = match &b.current_feed {
            Some(feed) => feed.margin_call_pays_ratio(self.ctx.rules.margin_call_fee_enabled),
            None => (1, 1),
        };
        // takers trade at the fee-adjusted price; the fund releases at the
        // raw accumulator ratio and the difference accrues as fee
        let match_price = raw_price.scale(den, num);
        let fund_debt = AssetAmount::new(b.individual_settlement_debt, b.asset_id);
        let whole_fund = AssetAmount::new(b.individual_settlement_fund, b.backing_asset);
        let issuer = self.market.debt_issuer;
        let order_ref = self.market.settled_debt_order_id();

        let debt_for_sale = taker.amount_for_sale();
        let (fund_receives, taker_receives, fund_pays);
        if debt_for_sale.amount < fund_debt.amount {
            fund_receives = debt_for_sale;
            taker_receives = debt_for_sale.multiply(&match_price)?;
            if taker_receives.is_zero() && self.ctx.rules.dust_cancel {
                self.cancel_order_instance(taker, false);
                taker.for_sale = 0;
                return Ok(MatchOutcome::TakerFilled);
            }
            fund_pays = debt_for_sale.multiply(&raw_price)?;
        } else {
            fund_receives = fund_debt;
            let wanted = fund_debt.multiply_round_up(&match_price)?;
            taker_receives = if wanted.amount > whole_fund.amount {
                whole_fund
            } else {
                wanted
            };
            fund_pays = whole_fund;
        }
        let fee = fund_pays.checked_sub(taker_receives)?;

        let b = &mut self.market.bitasset;
        b.individual_settlement_debt -= fund_receives.amount;
        b.individual_settlement_fund -= fund_pays.amount;
        self.burn_debt(fund_receives)?;
        if fee.amount > 0 {
            self.sink.effect(BalanceEffect::AccrueCollateralFee {
                asset: fund_receives.asset_id,
                amount: fee,
            });
        }
        self.sink.notice(Notice::Fill(Fill {
            order: OrderRef::Limit(order_ref),
            account: issuer,
            pays: fund_pays,
            receives: fund_receives,
            fee,
            fill_price: match_price,
            is_maker: true,
        }));
        self.sync_settled_debt_order()?;

        let taker_done = self.fill_limit(taker, fund_receives, taker_receives, match_price, false)?;
        let maker_done = self.market.bitasset.individual_settlement_debt == 0;
        Ok(MatchOutcome::from_filled(taker_done, maker_done))
    }

    /// Bring the settled-debt book order in line with the accumulators:
    /// resize and reprice it, create it, or retire it.
    pub(crate) fn sync_settled_debt_order(&mut self) -> Result<()> {
        let id = self.market.settled_debt_order_id();
        let b = &self.market.bitasset;
        match b.individual_settlement_price() {
            None => {
                self.market.book.selling_collateral.remove(id);
                Ok(())
            }
            Some(raw_price) => {
                let (num, den) = match &b.current_feed {
                    Some(feed) => {
                        feed.margin_call_pays_ratio(self.ctx.rules.margin_call_fee_enabled)
                    }
                    None => (1, 1),
                };
                // the order sells the fund's collateral; the fee slice makes
                // its offer slightly worse than the raw ratio
                let sell_price = (!raw_price).scale(num, den);
                let order = LimitOrder {
                    id,
                    seller: self.market.debt_issuer,
                    for_sale: b.individual_settlement_fund,
                    sell_price,
                    expiration: chrono::DateTime::<chrono::Utc>::MAX_UTC,
                    deferred_fee: 0,
                    deferred_paid_fee: None,
                    take_profit_order: None,
                    is_settled_debt: true,
                };
                let side = &mut self.market.book.selling_collateral;
                if side.get(id).is_some() {
                    side.reprice(id, order)
                } else {
                    side.insert(order)
                }
            }
        }
    }

    // =================================================================
    // Cancellation
    // =================================================================

    /// Cancel a booked limit order on behalf of its owner.
    pub fn cancel_limit_order(&mut self, id: OrderId, account: AccountId) -> Result<()> {
        let asset = if self.market.book.selling_debt.get(id).is_some() {
            self.market.debt_asset()
        } else if self.market.book.selling_collateral.get(id).is_some() {
            self.market.collateral_asset()
        } else {
            return Err(BitmatchError::OrderNotFound(id));
        };
        let order = self
            .market
            .side_mut(asset)?
            .remove(id)
            .ok_or(BitmatchError::OrderNotFound(id))?;
        if order.is_settled_debt {
            self.market.side_mut(asset)?.insert(order)?;
            return Err(BitmatchError::InvalidOrder {
                reason: "settled-debt orders cannot be cancelled".into(),
            });
        }
        if order.seller != account {
            self.market.side_mut(asset)?.insert(order)?;
            return Err(BitmatchError::NotOrderOwner { account, order: id });
        }
        self.cancel_order_instance(&order, true);
        Ok(())
    }

    /// Cancel every expired order, refunding without a cancellation fee.
    pub fn cancel_expired_orders(&mut self) -> Result<()> {
        for asset in [self.market.debt_asset(), self.market.collateral_asset()] {
            let expired: Vec<OrderId> = self
                .market
                .side(asset)?
                .expired(self.ctx.now)
                .into_iter()
                .collect();
            for id in expired {
                let Some(order) = self.market.side_mut(asset)?.remove(id) else {
                    continue;
                };
                if order.is_settled_debt {
                    self.market.side_mut(asset)?.insert(order)?;
                    continue;
                }
                self.cancel_order_instance(&order, false);
            }
        }
        Ok(())
    }

    /// Refund an order instance and emit the cancel notice. Charges the
    /// cancellation fee out of the deferred fee when the rules say so.
    pub(crate) fn cancel_order_instance(&mut self, order: &LimitOrder, charge_cancel_fee: bool) {
        let refund = order.amount_for_sale();
        self.sink.credit(order.seller, refund);
        let mut fee_refund = order.deferred_fee;
        if charge_cancel_fee && self.ctx.rules.cancel_fee_to_referral && order.deferred_fee > 0 {
            let fee = self.ctx.cancel_fee.min(order.deferred_fee);
            if fee > 0 {
                self.sink.effect(BalanceEffect::ReferralReward {
                    seller: order.seller,
                    amount: AssetAmount::new(fee, self.ctx.core_asset),
                });
            }
            fee_refund = order.deferred_fee - fee;
        }
        if fee_refund > 0 {
            self.sink
                .credit(order.seller, AssetAmount::new(fee_refund, self.ctx.core_asset));
        }
        if let Some(paid) = order.deferred_paid_fee {
            self.sink.credit(order.seller, paid);
        }
        self.sink.notice(Notice::Cancel {
            order: order.id,
            account: order.seller,
            refund,
            fee_refund,
        });
    }

    // =================================================================
    // Supply plumbing
    // =================================================================

    /// Retire debt-asset units: shrink the market's supply mirror and emit
    /// the burn for the settlement plane.
    pub fn burn_debt(&mut self, amount: AssetAmount) -> Result<()> {
        if amount.is_zero() {
            return Ok(());
        }
        if amount.asset_id != self.market.debt_asset() {
            return Err(BitmatchError::MismatchedAssets {
                a: amount.asset_id,
                b: self.market.debt_asset(),
            });
        }
        if amount.amount > self.market.current_supply {
            return Err(BitmatchError::InternalInvariant(
                "burn exceeds outstanding supply".into(),
            ));
        }
        self.market.current_supply -= amount.amount;
        self.sink.burn(amount);
        Ok(())
    }

    /// Create debt-asset units against a borrower's position.
    pub fn issue_debt(&mut self, account: AccountId, amount: AssetAmount) -> Result<()> {
        if amount.is_zero() {
            return Ok(());
        }
        if amount.asset_id != self.market.debt_asset() {
            return Err(BitmatchError::MismatchedAssets {
                a: amount.asset_id,
                b: self.market.debt_asset(),
            });
        }
        let new_supply = self
            .market
            .current_supply
            .checked_add(amount.amount)
            .ok_or(BitmatchError::AmountOverflow)?;
        if new_supply > bitmatch_types::constants::MAX_SHARE_SUPPLY {
            return Err(BitmatchError::AmountOverflow);
        }
        self.market.current_supply = new_supply;
        self.sink.effect(BalanceEffect::Issue { account, amount });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::book::MarketState;
    use chrono::Utc;

    const DEBT: AssetId = AssetId(10);
    const COLL: AssetId = AssetId(0);

    fn price(debt: i64, coll: i64) -> Price {
        Price::new(AssetAmount::new(debt, DEBT), AssetAmount::new(coll, COLL)).unwrap()
    }

    fn coll_price(coll: i64, debt: i64) -> Price {
        Price::new(AssetAmount::new(coll, COLL), AssetAmount::new(debt, DEBT)).unwrap()
    }

    fn market() -> MarketState {
        MarketState::new(
            BitassetState::new(DEBT, COLL, BlackSwanResponse::GlobalSettlement),
            AccountId(99),
        )
    }

    fn run<R>(
        market: &mut MarketState,
        f: impl FnOnce(&mut Matcher<'_>) -> Result<R>,
    ) -> (Result<R>, EventSink) {
        let ctx = ExecContext::latest(Utc::now());
        let mut sink = EventSink::new();
        let result = {
            let mut m = Matcher::new(market, &ctx, &mut sink);
            f(&mut m)
        };
        (result, sink)
    }

    fn credits_to(sink: &EventSink, account: AccountId, asset: AssetId) -> i64 {
        sink.effects
            .iter()
            .filter_map(|e| match e {
                BalanceEffect::Credit { account: a, amount } if *a == account && amount.asset_id == asset => {
                    Some(amount.amount)
                }
                _ => None,
            })
            .sum()
    }

    #[test]
    fn unmatched_order_rests_on_book() {
        let mut market = market();
        let (res, sink) = run(&mut market, |m| {
            m.apply_limit_order(LimitOrder::dummy(1, AccountId(1), 1000, price(1, 1)), false)
        });
        assert!(res.unwrap());
        assert!(sink.effects.is_empty());
        assert_eq!(market.book.selling_debt.len(), 1);
    }

    #[test]
    fn full_fill_at_maker_price() {
        let mut market = market();
        // maker sells 1000 coll at 1 coll / 1 debt
        let (res, _) = run(&mut market, |m| {
            m.apply_limit_order(
                LimitOrder::dummy(1, AccountId(1), 1000, coll_price(1, 1)),
                false,
            )
        });
        assert!(res.unwrap());
        // taker sells 1000 debt, willing to accept less than the maker gives
        let (res, sink) = run(&mut market, |m| {
            m.apply_limit_order(
                LimitOrder::dummy(2, AccountId(2), 1000, price(10, 9)),
                false,
            )
        });
        assert!(!res.unwrap(), "fully filled, nothing booked");
        assert_eq!(credits_to(&sink, AccountId(2), COLL), 1000);
        assert_eq!(credits_to(&sink, AccountId(1), DEBT), 1000);
        assert_eq!(sink.fills().count(), 2);
        assert_eq!(market.book.order_count(), 0);
    }

    #[test]
    fn partial_fill_leaves_maker_resized() {
        let mut market = market();
        run(&mut market, |m| {
            m.apply_limit_order(
                LimitOrder::dummy(1, AccountId(1), 1000, coll_price(1, 1)),
                false,
            )
        })
        .0
        .unwrap();
        let (res, _) = run(&mut market, |m| {
            m.apply_limit_order(LimitOrder::dummy(2, AccountId(2), 400, price(1, 1)), false)
        });
        assert!(!res.unwrap());
        let maker = market.book.selling_collateral.get(OrderId(1)).unwrap();
        assert_eq!(maker.for_sale, 600);
    }

    #[test]
    fn rounding_favors_smaller_side_and_culls_dust() {
        let mut market = market();
        // maker sells 100 coll at 3 coll / 1 debt: wants 1 debt per 3 coll
        run(&mut market, |m| {
            m.apply_limit_order(
                LimitOrder::dummy(1, AccountId(1), 100, coll_price(3, 1)),
                false,
            )
        })
        .0
        .unwrap();
        // taker sells 10 debt at 1 debt / 3 coll: receives exactly 30 coll
        let (res, sink) = run(&mut market, |m| {
            m.apply_limit_order(LimitOrder::dummy(2, AccountId(2), 10, price(1, 3)), false)
        });
        assert!(!res.unwrap());
        assert_eq!(credits_to(&sink, AccountId(2), COLL), 30);
        assert_eq!(credits_to(&sink, AccountId(1), DEBT), 10);
        let maker = market.book.selling_collateral.get(OrderId(1)).unwrap();
        assert_eq!(maker.for_sale, 70);
    }

    #[test]
    fn dust_taker_is_cancelled_not_donated() {
        let mut market = market();
        // maker sells coll at 3 debt / 1 coll: one coll costs 3 debt
        run(&mut market, |m| {
            m.apply_limit_order(
                LimitOrder::dummy(1, AccountId(1), 100, coll_price(1, 3)),
                false,
            )
        })
        .0
        .unwrap();
        // taker has 2 debt: cannot buy one coll even at the maker's price
        let (res, sink) = run(&mut market, |m| {
            m.apply_limit_order(LimitOrder::dummy(2, AccountId(2), 2, price(3, 1)), false)
        });
        assert!(!res.unwrap(), "cancelled, not booked");
        assert_eq!(credits_to(&sink, AccountId(2), DEBT), 2, "refunded");
        assert!(sink.fills().count() == 0);
        assert!(matches!(sink.notices.last(), Some(Notice::Cancel { .. })));
    }

    #[test]
    fn fill_or_kill_rejects_partial() {
        let mut market = market();
        run(&mut market, |m| {
            m.apply_limit_order(
                LimitOrder::dummy(1, AccountId(1), 100, coll_price(1, 1)),
                false,
            )
        })
        .0
        .unwrap();
        let (res, _) = run(&mut market, |m| {
            m.apply_limit_order(LimitOrder::dummy(2, AccountId(2), 400, price(1, 1)), true)
        });
        assert!(matches!(res, Err(BitmatchError::FillOrKillUnfilled(_))));
    }

    #[test]
    fn market_fee_withheld_and_split() {
        let mut market = market();
        market.collateral_fees = MarketFeeParams {
            market_fee_percent: 100, // 1%
            taker_fee_percent: None,
            max_market_fee: i64::MAX,
            reward_percent: 0,
        };
        run(&mut market, |m| {
            m.apply_limit_order(
                LimitOrder::dummy(1, AccountId(1), 1000, coll_price(1, 1)),
                false,
            )
        })
        .0
        .unwrap();
        let (_, sink) = run(&mut market, |m| {
            m.apply_limit_order(LimitOrder::dummy(2, AccountId(2), 1000, price(1, 1)), false)
        });
        // taker receives 1000 coll minus 10 fee
        assert_eq!(credits_to(&sink, AccountId(2), COLL), 990);
        let fill = sink.fills().next().unwrap();
        assert_eq!(fill.fee.amount, 10);
    }

    #[test]
    fn cancel_refunds_and_charges_fee_under_current_rules() {
        let mut market = market();
        let mut order = LimitOrder::dummy(1, AccountId(1), 1000, price(1, 1));
        order.deferred_fee = 50;
        run(&mut market, |m| m.apply_limit_order(order, false))
            .0
            .unwrap();
        let (res, sink) = run(&mut market, |m| {
            m.cancel_limit_order(OrderId(1), AccountId(1))
        });
        res.unwrap();
        assert_eq!(credits_to(&sink, AccountId(1), DEBT), 1000);
        // cancel fee 10 goes to the referral program, 40 comes back
        assert_eq!(credits_to(&sink, AccountId(1), AssetId(0)), 40);
        assert!(matches!(
            sink.notices.last(),
            Some(Notice::Cancel { fee_refund: 40, .. })
        ));
        assert_eq!(market.book.order_count(), 0);
    }

    #[test]
    fn cancel_by_non_owner_rejected() {
        let mut market = market();
        run(&mut market, |m| {
            m.apply_limit_order(LimitOrder::dummy(1, AccountId(1), 1000, price(1, 1)), false)
        })
        .0
        .unwrap();
        let (res, _) = run(&mut market, |m| {
            m.cancel_limit_order(OrderId(1), AccountId(2))
        });
        assert!(matches!(res, Err(BitmatchError::NotOrderOwner { .. })));
        assert_eq!(market.book.order_count(), 1, "order survives the attempt");
    }

    #[test]
    fn expired_orders_refund_without_fee() {
        let mut market = market();
        let mut order = LimitOrder::dummy(1, AccountId(1), 1000, price(1, 1));
        order.deferred_fee = 50;
        order.expiration = Utc::now() + chrono::Duration::hours(1);
        run(&mut market, |m| m.apply_limit_order(order, false))
            .0
            .unwrap();

        let ctx = ExecContext::latest(Utc::now() + chrono::Duration::hours(2));
        let mut sink = EventSink::new();
        Matcher::new(&mut market, &ctx, &mut sink)
            .cancel_expired_orders()
            .unwrap();
        assert_eq!(market.book.order_count(), 0);
        assert!(matches!(
            sink.notices.last(),
            Some(Notice::Cancel { fee_refund: 50, .. })
        ));
    }

    #[test]
    fn taker_selling_debt_hits_margin_call_before_worse_limit() {
        let mut market = market();
        market.bitasset.current_feed = Some(PriceFeed::dummy(1, DEBT, 1, COLL));
        market.bitasset.refresh_feed_caches();
        market.current_supply = 1000;
        // callable position: 1600 coll / 1000 debt < MCR 1.75
        market
            .calls
            .insert(CallOrder::dummy(1, AccountId(3), 1600, 1000, COLL, DEBT))
            .unwrap();
        // a resting limit order worse than MCOP (pays less collateral)
        run(&mut market, |m| {
            m.apply_limit_order(
                LimitOrder::dummy(1, AccountId(1), 1000, coll_price(100, 99)),
                false,
            )
        })
        .0
        .unwrap();

        // taker sells 200 debt cheap; the call pays MSSP = 1.1 coll per debt
        let (res, sink) = run(&mut market, |m| {
            m.apply_limit_order(LimitOrder::dummy(2, AccountId(2), 200, price(1, 1)), false)
        });
        assert!(!res.unwrap());
        assert_eq!(credits_to(&sink, AccountId(2), COLL), 220);
        let call = market.calls.get(CallOrderId(1)).unwrap();
        assert_eq!(call.debt, 800);
        assert_eq!(call.collateral, 1600 - 220);
        assert_eq!(market.current_supply, 800, "covered debt is burned");
        // the resting limit was not touched
        assert_eq!(
            market
                .book
                .selling_collateral
                .get(OrderId(1))
                .unwrap()
                .for_sale,
            1000
        );
    }

    #[test]
    fn margin_call_fee_splits_call_payment() {
        let mut market = market();
        let mut feed = PriceFeed::dummy(1, DEBT, 1, COLL);
        feed.margin_call_fee_ratio = Some(50); // 5% of the 10% squeeze premium
        market.bitasset.current_feed = Some(feed);
        market.bitasset.refresh_feed_caches();
        market.current_supply = 1000;
        market
            .calls
            .insert(CallOrder::dummy(1, AccountId(3), 1600, 1000, COLL, DEBT))
            .unwrap();

        // taker accepts MCOP; call pays MSSP and the issuer keeps the slice
        let (res, sink) = run(&mut market, |m| {
            m.apply_limit_order(
                LimitOrder::dummy(2, AccountId(2), 1000, price(21, 20)),
                false,
            )
        });
        assert!(!res.unwrap());
        // MCOP = 1000/1050: taker receives 1050; call pays MSSP 1100
        assert_eq!(credits_to(&sink, AccountId(2), COLL), 1050);
        let accrued: i64 = sink
            .effects
            .iter()
            .filter_map(|e| match e {
                BalanceEffect::AccrueCollateralFee { amount, .. } => Some(amount.amount),
                _ => None,
            })
            .sum();
        assert_eq!(accrued, 50);
        // the position paid 1100 and closed; the rest went home
        assert!(market.calls.get(CallOrderId(1)).is_none());
        assert_eq!(credits_to(&sink, AccountId(3), COLL), 500);
        assert_eq!(market.current_supply, 0);
    }

    fn market_with_feed(response: BlackSwanResponse) -> MarketState {
        let mut market = MarketState::new(BitassetState::new(DEBT, COLL, response), AccountId(99));
        market.bitasset.current_feed = Some(PriceFeed::dummy(1, DEBT, 1, COLL));
        market.bitasset.refresh_feed_caches();
        market
    }

    #[test]
    fn unpayable_call_is_individually_settled_mid_match() {
        let mut market = market_with_feed(BlackSwanResponse::IndividualSettlementToFund);
        market.current_supply = 1000;
        // 0.95x collateralized: cannot pay the 1.1x squeeze price
        market
            .calls
            .insert(CallOrder::dummy(1, AccountId(3), 950, 1000, COLL, DEBT))
            .unwrap();
        let (res, _) = run(&mut market, |m| {
            m.apply_limit_order(LimitOrder::dummy(2, AccountId(2), 1000, price(10, 9)), false)
        });
        assert!(res.unwrap(), "taker rests after the position is absorbed");
        assert!(market.calls.is_empty());
        assert_eq!(market.bitasset.individual_settlement_debt, 1000);
        assert_eq!(market.bitasset.individual_settlement_fund, 950);
        assert_eq!(market.current_supply, 1000, "absorbed debt is not burned");
    }

    #[test]
    fn taker_fills_from_the_settled_debt_order_after_absorption() {
        let mut market = market_with_feed(BlackSwanResponse::IndividualSettlementToOrder);
        market.current_supply = 1000;
        market
            .calls
            .insert(CallOrder::dummy(1, AccountId(3), 950, 1000, COLL, DEBT))
            .unwrap();
        let (res, sink) = run(&mut market, |m| {
            m.apply_limit_order(LimitOrder::dummy(2, AccountId(2), 1000, price(10, 9)), false)
        });
        assert!(!res.unwrap(), "fully filled against the settled debt");
        assert_eq!(credits_to(&sink, AccountId(2), COLL), 950);
        assert_eq!(market.bitasset.individual_settlement_debt, 0);
        assert_eq!(market.current_supply, 0);
    }

    #[test]
    fn unpayable_call_blocks_matching_on_global_settlement_assets() {
        let mut market = market_with_feed(BlackSwanResponse::GlobalSettlement);
        market.current_supply = 1000;
        market
            .calls
            .insert(CallOrder::dummy(1, AccountId(3), 950, 1000, COLL, DEBT))
            .unwrap();
        let (res, _) = run(&mut market, |m| {
            m.apply_limit_order(LimitOrder::dummy(2, AccountId(2), 1000, price(10, 9)), false)
        });
        assert!(matches!(res, Err(BitmatchError::BlackSwanBlocked(_))));
    }

    #[test]
    fn issue_and_burn_track_supply() {
        let mut market = market();
        let (res, sink) = run(&mut market, |m| {
            m.issue_debt(AccountId(1), AssetAmount::new(500, DEBT))?;
            m.burn_debt(AssetAmount::new(200, DEBT))
        });
        res.unwrap();
        assert_eq!(market.current_supply, 300);
        assert_eq!(sink.effects.len(), 2);
        let (res, _) = run(&mut market, |m| m.burn_debt(AssetAmount::new(400, DEBT)));
        assert!(res.is_err(), "cannot burn beyond supply");
    }
}
