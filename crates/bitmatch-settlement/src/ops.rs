//! Inbound operations.
//!
//! One method per operation the transaction layer dispatches. Each runs
//! inside [`Ledger::apply`]: validation, escrow debits, the kernel call,
//! effect application and the supply re-check all commit together or not
//! at all. The methods return the notices the kernel emitted so history
//! and indexing collaborators can observe fills and cancellations.

use bitmatch_matchcore::Matcher;
use bitmatch_types::{
    AccountId, AssetAmount, AssetId, BidId, BitmatchError, CallOrder, CallOrderId,
    CollateralBid, ForceSettlement, LimitOrder, Notice, OrderId, Price, PriceFeed, Result,
    SettlementId,
};
use chrono::{DateTime, Duration, Utc};
use tracing::info;

use crate::ledger::Ledger;

/// What happened to a freshly placed limit order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaceOutcome {
    /// Fully filled during immediate matching; nothing rests on the book.
    Filled,
    /// Partially or not at all filled; the remainder is on the book.
    Booked,
}

impl Ledger {
    // =================================================================
    // Limit orders
    // =================================================================

    /// Place a limit order selling `for_sale` for at least `min_to_receive`.
    ///
    /// The sale amount and the deferred operation fee are escrowed up
    /// front; the kernel then matches the order against the opposing book
    /// and the margin-call queue.
    ///
    /// # Errors
    /// Fails on an unknown pair, insufficient balance, or an unfillable
    /// fill-or-kill order; nothing is retained on failure.
    pub fn place_limit_order(
        &mut self,
        seller: AccountId,
        for_sale: AssetAmount,
        min_to_receive: AssetAmount,
        expiration: DateTime<Utc>,
        fill_or_kill: bool,
    ) -> Result<(OrderId, PlaceOutcome, Vec<Notice>)> {
        let market_key = self.market_for_pair(for_sale.asset_id, min_to_receive.asset_id)?;
        let sell_price = Price::new(for_sale, min_to_receive)?;
        let ((id, outcome), notices) = self.apply(|l, sink| {
            let id = l.alloc_order_id();
            let deferred_fee = l.order_fee;
            l.balances.debit(seller, for_sale)?;
            if deferred_fee > 0 {
                l.balances
                    .debit(seller, AssetAmount::new(deferred_fee, l.core_asset()))?;
            }
            let order = LimitOrder {
                id,
                seller,
                for_sale: for_sale.amount,
                sell_price,
                expiration,
                deferred_fee,
                deferred_paid_fee: None,
                take_profit_order: None,
                is_settled_debt: false,
            };
            let ctx = l.exec_context();
            let market = l
                .markets
                .get_mut(&market_key)
                .ok_or(BitmatchError::AssetNotFound(market_key))?;
            let booked = Matcher::new(market, &ctx, sink).apply_limit_order(order, fill_or_kill)?;
            let outcome = if booked {
                PlaceOutcome::Booked
            } else {
                PlaceOutcome::Filled
            };
            Ok((id, outcome))
        })?;
        Ok((id, outcome, notices))
    }

    /// Cancel a resting limit order, refunding the remaining sale amount
    /// and the unspent deferred fee (minus the cancellation fee where the
    /// active rules charge one).
    ///
    /// # Errors
    /// Fails if the order does not exist or `account` does not own it.
    pub fn cancel_limit_order(
        &mut self,
        account: AccountId,
        order: OrderId,
    ) -> Result<Vec<Notice>> {
        let market_key = self.find_order_market(order)?;
        let ((), notices) = self.apply(|l, sink| {
            let ctx = l.exec_context();
            let market = l
                .markets
                .get_mut(&market_key)
                .ok_or(BitmatchError::AssetNotFound(market_key))?;
            Matcher::new(market, &ctx, sink).cancel_limit_order(order, account)
        })?;
        Ok(notices)
    }

    /// Cancel every expired resting order in one market. Scheduler entry
    /// point; expiration never charges a cancellation fee.
    ///
    /// # Errors
    /// Fails only on internal inconsistency.
    pub fn process_expired_orders(&mut self, asset: AssetId) -> Result<Vec<Notice>> {
        let ((), notices) = self.apply(|l, sink| {
            let ctx = l.exec_context();
            let market = l
                .markets
                .get_mut(&asset)
                .ok_or(BitmatchError::AssetNotFound(asset))?;
            Matcher::new(market, &ctx, sink).cancel_expired_orders()
        })?;
        Ok(notices)
    }

    // =================================================================
    // Margin positions
    // =================================================================

    /// Open, adjust, or close a margin position by collateral and debt
    /// deltas. Borrowing issues new debt-asset units to the funding
    /// account; covering burns them out of its balance. The position must
    /// end strictly above the maintenance collateralization, and closing
    /// requires withdrawing all collateral.
    ///
    /// # Errors
    /// Fails after a global settlement, on insufficient balance or
    /// collateral, or when the deltas produce a nonsensical position.
    pub fn update_call_order(
        &mut self,
        account: AccountId,
        asset: AssetId,
        delta_collateral: i64,
        delta_debt: i64,
        target_collateral_ratio: Option<u16>,
    ) -> Result<Vec<Notice>> {
        let ((), notices) = self.apply(|l, sink| {
            let ctx = l.exec_context();
            let new_call_id = CallOrderId(l.alloc_call_id());
            let market = l
                .markets
                .get_mut(&asset)
                .ok_or(BitmatchError::AssetNotFound(asset))?;
            if market.bitasset.is_globally_settled() {
                return Err(BitmatchError::GloballySettled(asset));
            }
            let debt_asset = market.debt_asset();
            let collateral_asset = market.collateral_asset();

            let existing = market.calls.by_borrower(account).cloned();
            let (call_id, old_collateral, old_debt) = match &existing {
                Some(call) => (call.id, call.collateral, call.debt),
                None => (new_call_id, 0, 0),
            };
            let new_collateral = old_collateral
                .checked_add(delta_collateral)
                .ok_or(BitmatchError::AmountOverflow)?;
            let new_debt = old_debt
                .checked_add(delta_debt)
                .ok_or(BitmatchError::AmountOverflow)?;
            if new_collateral < 0 || new_debt < 0 {
                return Err(BitmatchError::InvalidCallUpdate {
                    reason: "delta exceeds the position".into(),
                });
            }
            if (new_debt == 0) != (new_collateral == 0) {
                return Err(BitmatchError::InvalidCallUpdate {
                    reason: "a position holds collateral iff it owes debt".into(),
                });
            }
            if delta_collateral == 0 && delta_debt == 0 {
                return Err(BitmatchError::InvalidCallUpdate {
                    reason: "empty update".into(),
                });
            }

            // Escrow moves first so a shortfall aborts before any index
            // mutation.
            if delta_collateral > 0 {
                l.balances
                    .debit(account, AssetAmount::new(delta_collateral, collateral_asset))?;
            }
            if delta_debt < 0 {
                l.balances
                    .debit(account, AssetAmount::new(-delta_debt, debt_asset))?;
            }

            let market = l
                .markets
                .get_mut(&asset)
                .ok_or(BitmatchError::AssetNotFound(asset))?;
            if existing.is_some() {
                market.calls.remove(call_id);
            }
            if new_debt > 0 {
                let feed = *market.feed()?;
                let mut call = CallOrder {
                    id: call_id,
                    borrower: account,
                    collateral: new_collateral,
                    debt: new_debt,
                    collateral_asset,
                    debt_asset,
                    call_price: Price::max(collateral_asset, debt_asset),
                    target_collateral_ratio,
                    maintenance_collateral_ratio: None,
                };
                call.update_call_price(feed.maintenance_collateral_ratio);
                let maintenance = market
                    .bitasset
                    .maintenance_collateralization
                    .unwrap_or_else(|| feed.maintenance_collateralization());
                if call.collateralization() <= maintenance {
                    return Err(BitmatchError::InsufficientCollateral(call_id));
                }
                market.calls.insert(call)?;
            } else {
                sink.credit(account, AssetAmount::new(-delta_collateral, collateral_asset));
                sink.notice(Notice::PositionClosed {
                    call: call_id,
                    borrower: account,
                    collateral_returned: AssetAmount::new(-delta_collateral, collateral_asset),
                });
            }

            let mut matcher = Matcher::new(market, &ctx, sink);
            if delta_debt > 0 {
                matcher.issue_debt(account, AssetAmount::new(delta_debt, debt_asset))?;
            } else if delta_debt < 0 {
                matcher.burn_debt(AssetAmount::new(-delta_debt, debt_asset))?;
            }
            matcher.sweep_margin_calls(false)?;
            Ok(())
        })?;
        Ok(notices)
    }

    // =================================================================
    // Force settlement
    // =================================================================

    /// Request redemption of debt-asset units for collateral at the feed
    /// price. While globally settled the redemption executes instantly
    /// against the settlement fund; otherwise the balance is escrowed and
    /// queued behind the asset's settlement delay.
    ///
    /// # Errors
    /// Fails on a zero amount, insufficient balance, or an unresolved
    /// prediction market.
    pub fn force_settle(
        &mut self,
        account: AccountId,
        amount: AssetAmount,
    ) -> Result<(Option<SettlementId>, Vec<Notice>)> {
        let asset = amount.asset_id;
        let (queued, notices) = self.apply(|l, sink| {
            if amount.amount <= 0 {
                return Err(BitmatchError::InvalidOrder {
                    reason: "settlement amount must be positive".into(),
                });
            }
            let ctx = l.exec_context();
            let id = l.alloc_settlement_id();
            l.balances.debit(account, amount)?;
            let market = l
                .markets
                .get_mut(&asset)
                .ok_or(BitmatchError::AssetNotFound(asset))?;
            if market.bitasset.is_globally_settled() {
                Matcher::new(market, &ctx, sink).settle_from_global_fund(account, amount)?;
                return Ok(None);
            }
            if market.bitasset.is_prediction_market {
                return Err(BitmatchError::InvalidOrder {
                    reason: "prediction markets settle only after resolution".into(),
                });
            }
            let delay = Duration::seconds(market.bitasset.force_settlement_delay_secs);
            market.settlements.insert(ForceSettlement {
                id,
                owner: account,
                balance: amount,
                settlement_date: ctx.now + delay,
            })?;
            Ok(Some(id))
        })?;
        Ok((queued, notices))
    }

    /// Execute every matured queued settlement in one market. Scheduler
    /// entry point.
    ///
    /// # Errors
    /// Propagates kernel failures; the batch is atomic.
    pub fn execute_matured_settlements(&mut self, asset: AssetId) -> Result<Vec<Notice>> {
        let ((), notices) = self.apply(|l, sink| {
            let ctx = l.exec_context();
            let market = l
                .markets
                .get_mut(&asset)
                .ok_or(BitmatchError::AssetNotFound(asset))?;
            loop {
                let Some(id) = market.settlements.oldest_matured(ctx.now).map(|s| s.id) else {
                    return Ok(());
                };
                Matcher::new(market, &ctx, sink).execute_force_settlement(id)?;
            }
        })?;
        Ok(notices)
    }

    // =================================================================
    // Global settlement lifecycle
    // =================================================================

    /// Issuer-forced global settlement at a chosen debt/collateral price.
    ///
    /// # Errors
    /// Fails unless `issuer` issues the asset, the price is oriented on
    /// the market's pair, and the asset is live.
    pub fn global_settle(
        &mut self,
        issuer: AccountId,
        asset: AssetId,
        price: Price,
    ) -> Result<Vec<Notice>> {
        let record = self
            .assets
            .get(&asset)
            .ok_or(BitmatchError::AssetNotFound(asset))?;
        if record.issuer != issuer {
            return Err(BitmatchError::InvalidOrder {
                reason: format!("only the issuer may settle {asset}"),
            });
        }
        let ((), notices) = self.apply(|l, sink| {
            let ctx = l.exec_context();
            let market = l
                .markets
                .get_mut(&asset)
                .ok_or(BitmatchError::AssetNotFound(asset))?;
            if price.base.asset_id != market.debt_asset()
                || price.quote.asset_id != market.collateral_asset()
            {
                return Err(BitmatchError::MismatchedAssets {
                    a: price.base.asset_id,
                    b: market.debt_asset(),
                });
            }
            info!(%asset, "issuer-forced global settlement");
            Matcher::new(market, &ctx, sink).globally_settle(price)
        })?;
        Ok(notices)
    }

    /// Stand a collateral bid while the asset is globally settled. A new
    /// bid from the same bidder replaces (and refunds) the previous one;
    /// a zero bid is a pure cancellation.
    ///
    /// # Errors
    /// Fails when the asset is live, the legs mismatch the market pair,
    /// or the bid covers more than the outstanding supply.
    pub fn bid_collateral(
        &mut self,
        bidder: AccountId,
        debt_covered: AssetAmount,
        additional_collateral: AssetAmount,
    ) -> Result<(Option<BidId>, Vec<Notice>)> {
        let asset = debt_covered.asset_id;
        let (placed, notices) = self.apply(|l, sink| {
            let id = l.alloc_bid_id();
            let market = l
                .markets
                .get_mut(&asset)
                .ok_or(BitmatchError::AssetNotFound(asset))?;
            if !market.bitasset.is_globally_settled() {
                return Err(BitmatchError::NotGloballySettled(asset));
            }
            if additional_collateral.asset_id != market.collateral_asset() {
                return Err(BitmatchError::MismatchedAssets {
                    a: additional_collateral.asset_id,
                    b: market.collateral_asset(),
                });
            }
            if let Some(previous) = market.bids.by_bidder(bidder).map(|b| b.id) {
                let refund = market
                    .bids
                    .remove(previous)
                    .map(|b| b.additional_collateral)
                    .unwrap_or_else(|| AssetAmount::zero(additional_collateral.asset_id));
                sink.credit(bidder, refund);
            }
            if debt_covered.amount == 0 && additional_collateral.amount == 0 {
                return Ok(None);
            }
            if debt_covered.amount <= 0 || additional_collateral.amount <= 0 {
                return Err(BitmatchError::InvalidBid {
                    reason: "both legs of a live bid must be positive".into(),
                });
            }
            if debt_covered.amount > market.current_supply {
                return Err(BitmatchError::InvalidBid {
                    reason: "bid covers more than the outstanding supply".into(),
                });
            }
            l.balances.debit(bidder, additional_collateral)?;
            let market = l
                .markets
                .get_mut(&asset)
                .ok_or(BitmatchError::AssetNotFound(asset))?;
            market.bids.insert(CollateralBid {
                id,
                bidder,
                debt_covered,
                additional_collateral,
            })?;
            Ok(Some(id))
        })?;
        Ok((placed, notices))
    }

    /// Revive a globally settled asset from the standing collateral bids,
    /// redistributing the settlement fund over the executed bids.
    ///
    /// # Errors
    /// Fails while the bids do not cover the outstanding supply.
    pub fn revive_bitasset(&mut self, asset: AssetId) -> Result<Vec<Notice>> {
        let ((), notices) = self.apply(|l, sink| {
            let ctx = l.exec_context();
            let market = l
                .markets
                .get_mut(&asset)
                .ok_or(BitmatchError::AssetNotFound(asset))?;
            Matcher::new(market, &ctx, sink).revive()
        })?;
        Ok(notices)
    }

    // =================================================================
    // Price feeds
    // =================================================================

    /// Publish a new price feed, refresh the derived thresholds, and run
    /// the margin-call sweeper with black swans permitted.
    ///
    /// # Errors
    /// Fails on an invalid or misoriented feed.
    pub fn update_price_feed(&mut self, asset: AssetId, feed: PriceFeed) -> Result<Vec<Notice>> {
        feed.validate()?;
        let ((), notices) = self.apply(|l, sink| {
            let ctx = l.exec_context();
            let market = l
                .markets
                .get_mut(&asset)
                .ok_or(BitmatchError::AssetNotFound(asset))?;
            if feed.settlement_price.base.asset_id != market.debt_asset()
                || feed.settlement_price.quote.asset_id != market.collateral_asset()
            {
                return Err(BitmatchError::InvalidFeed {
                    reason: "feed is not oriented debt per collateral on this pair".into(),
                });
            }
            market.bitasset.current_feed = Some(feed);
            market.bitasset.refresh_feed_caches();
            Matcher::new(market, &ctx, sink).sweep_margin_calls(true)?;
            Ok(())
        })?;
        Ok(notices)
    }
}

// =====================================================================
// Tests
// =====================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::AssetRecord;
    use bitmatch_types::{
        BitassetState, BlackSwanResponse, HardforkSchedule, MarketFeeParams,
    };
    use chrono::TimeZone;

    const CORE: AssetId = AssetId(0);
    const USD: AssetId = AssetId(1);
    const ISSUER: AccountId = AccountId(10);
    const ALICE: AccountId = AccountId(1);
    const BOB: AccountId = AccountId(2);

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2030, 1, 1, 0, 0, 0).unwrap()
    }

    fn ledger() -> Ledger {
        let mut ledger = Ledger::new(CORE, HardforkSchedule::mainnet(), now());
        ledger.register_account(ISSUER, "issuer", None);
        ledger.register_account(ALICE, "alice", None);
        ledger.register_account(BOB, "bob", None);
        ledger.register_asset(CORE, AssetRecord::new("CORE", ISSUER, MarketFeeParams::none()));
        ledger.register_asset(USD, AssetRecord::new("USD", ISSUER, MarketFeeParams::none()));
        ledger
            .register_smart_asset(BitassetState::new(
                USD,
                CORE,
                BlackSwanResponse::GlobalSettlement,
            ))
            .unwrap();
        ledger.deposit(ALICE, AssetAmount::new(1_000_000, CORE)).unwrap();
        ledger.deposit(BOB, AssetAmount::new(1_000_000, CORE)).unwrap();
        publish_feed(&mut ledger, 1, 1);
        ledger
    }

    fn publish_feed(ledger: &mut Ledger, debt: i64, collateral: i64) {
        let feed = PriceFeed::dummy(debt, USD, collateral, CORE);
        ledger.update_price_feed(USD, feed).unwrap();
    }

    fn borrow(ledger: &mut Ledger, who: AccountId, debt: i64, collateral: i64) {
        ledger
            .update_call_order(who, USD, collateral, debt, None)
            .unwrap();
    }

    #[test]
    fn borrowing_issues_supply_to_the_borrower() {
        let mut ledger = ledger();
        borrow(&mut ledger, ALICE, 1000, 3000);
        assert_eq!(ledger.balances.balance(ALICE, USD), 1000);
        assert_eq!(ledger.balances.balance(ALICE, CORE), 997_000);
        assert_eq!(ledger.markets[&USD].current_supply, 1000);
        assert_eq!(ledger.markets[&USD].calls.len(), 1);
    }

    #[test]
    fn covering_everything_closes_the_position() {
        let mut ledger = ledger();
        borrow(&mut ledger, ALICE, 1000, 3000);
        let notices = ledger
            .update_call_order(ALICE, USD, -3000, -1000, None)
            .unwrap();
        assert_eq!(ledger.balances.balance(ALICE, USD), 0);
        assert_eq!(ledger.balances.balance(ALICE, CORE), 1_000_000);
        assert_eq!(ledger.markets[&USD].current_supply, 0);
        assert!(ledger.markets[&USD].calls.is_empty());
        assert!(notices
            .iter()
            .any(|n| matches!(n, Notice::PositionClosed { .. })));
    }

    #[test]
    fn undercollateralized_borrow_is_rejected() {
        let mut ledger = ledger();
        // 1.5x is below the 1.75x maintenance requirement
        let err = ledger
            .update_call_order(ALICE, USD, 1500, 1000, None)
            .unwrap_err();
        assert!(matches!(err, BitmatchError::InsufficientCollateral(_)));
        assert_eq!(ledger.markets[&USD].current_supply, 0);
        assert_eq!(ledger.balances.balance(ALICE, CORE), 1_000_000);
    }

    #[test]
    fn orphan_collateral_is_rejected() {
        let mut ledger = ledger();
        let err = ledger
            .update_call_order(ALICE, USD, 3000, 0, None)
            .unwrap_err();
        assert!(matches!(err, BitmatchError::InvalidCallUpdate { .. }));
    }

    #[test]
    fn booked_order_escrows_the_sale_amount() {
        let mut ledger = ledger();
        borrow(&mut ledger, ALICE, 1000, 3000);
        let (id, outcome, _) = ledger
            .place_limit_order(
                ALICE,
                AssetAmount::new(400, USD),
                AssetAmount::new(400, CORE),
                now() + Duration::days(30),
                false,
            )
            .unwrap();
        assert_eq!(outcome, PlaceOutcome::Booked);
        assert_eq!(ledger.balances.balance(ALICE, USD), 600);
        assert!(ledger.markets[&USD].book.selling_debt.get(id).is_some());
    }

    #[test]
    fn cancel_refunds_and_double_cancel_fails() {
        let mut ledger = ledger();
        borrow(&mut ledger, ALICE, 1000, 3000);
        let (id, _, _) = ledger
            .place_limit_order(
                ALICE,
                AssetAmount::new(400, USD),
                AssetAmount::new(400, CORE),
                now() + Duration::days(30),
                false,
            )
            .unwrap();
        ledger.cancel_limit_order(ALICE, id).unwrap();
        assert_eq!(ledger.balances.balance(ALICE, USD), 1000);
        assert!(matches!(
            ledger.cancel_limit_order(ALICE, id).unwrap_err(),
            BitmatchError::OrderNotFound(_)
        ));
    }

    #[test]
    fn only_the_owner_may_cancel() {
        let mut ledger = ledger();
        borrow(&mut ledger, ALICE, 1000, 3000);
        let (id, _, _) = ledger
            .place_limit_order(
                ALICE,
                AssetAmount::new(400, USD),
                AssetAmount::new(400, CORE),
                now() + Duration::days(30),
                false,
            )
            .unwrap();
        assert!(matches!(
            ledger.cancel_limit_order(BOB, id).unwrap_err(),
            BitmatchError::NotOrderOwner { .. }
        ));
    }

    #[test]
    fn two_limit_orders_cross_and_settle_balances() {
        let mut ledger = ledger();
        borrow(&mut ledger, ALICE, 1000, 3000);
        ledger
            .place_limit_order(
                BOB,
                AssetAmount::new(500, CORE),
                AssetAmount::new(500, USD),
                now() + Duration::days(30),
                false,
            )
            .unwrap();
        let (_, outcome, notices) = ledger
            .place_limit_order(
                ALICE,
                AssetAmount::new(500, USD),
                AssetAmount::new(500, CORE),
                now() + Duration::days(30),
                false,
            )
            .unwrap();
        assert_eq!(outcome, PlaceOutcome::Filled);
        assert_eq!(ledger.balances.balance(BOB, USD), 500);
        assert_eq!(ledger.balances.balance(ALICE, CORE), 997_500);
        let fills = notices
            .iter()
            .filter(|n| matches!(n, Notice::Fill(_)))
            .count();
        assert_eq!(fills, 2);
    }

    #[test]
    fn force_settlement_queues_behind_the_delay() {
        let mut ledger = ledger();
        borrow(&mut ledger, ALICE, 1000, 3000);
        let (queued, _) = ledger
            .force_settle(ALICE, AssetAmount::new(400, USD))
            .unwrap();
        let id = queued.unwrap();
        assert_eq!(ledger.balances.balance(ALICE, USD), 600);
        assert!(ledger.markets[&USD].settlements.get(id).is_some());

        // not matured yet, nothing happens
        ledger.execute_matured_settlements(USD).unwrap();
        assert!(ledger.markets[&USD].settlements.get(id).is_some());

        ledger.begin_block(now() + Duration::days(2));
        let notices = ledger.execute_matured_settlements(USD).unwrap();
        assert!(ledger.markets[&USD].settlements.is_empty());
        assert!(notices.iter().any(|n| matches!(n, Notice::Fill(_))));
        // settled at the feed price against the least-collateralized call
        assert_eq!(ledger.balances.balance(ALICE, CORE), 997_400);
        assert_eq!(ledger.markets[&USD].current_supply, 600);
    }

    #[test]
    fn global_settle_requires_the_issuer() {
        let mut ledger = ledger();
        borrow(&mut ledger, ALICE, 1000, 3000);
        let price = Price::new(AssetAmount::new(1, USD), AssetAmount::new(1, CORE)).unwrap();
        assert!(ledger.global_settle(ALICE, USD, price).is_err());
        ledger.global_settle(ISSUER, USD, price).unwrap();
        assert!(ledger.markets[&USD].bitasset.is_globally_settled());
        assert!(ledger.markets[&USD].calls.is_empty());
        // new positions are blocked from here on
        assert!(matches!(
            ledger.update_call_order(BOB, USD, 3000, 1000, None).unwrap_err(),
            BitmatchError::GloballySettled(_)
        ));
    }

    #[test]
    fn settled_asset_redeems_instantly_from_the_fund() {
        let mut ledger = ledger();
        borrow(&mut ledger, ALICE, 1000, 3000);
        let price = Price::new(AssetAmount::new(1, USD), AssetAmount::new(1, CORE)).unwrap();
        ledger.global_settle(ISSUER, USD, price).unwrap();
        let (queued, _) = ledger
            .force_settle(ALICE, AssetAmount::new(1000, USD))
            .unwrap();
        assert!(queued.is_none());
        assert_eq!(ledger.balances.balance(ALICE, USD), 0);
        assert_eq!(ledger.markets[&USD].current_supply, 0);
        // 1000 out of the fund at the frozen 1:1 price, plus the 2000
        // collateral returned when the position was closed
        assert_eq!(ledger.balances.balance(ALICE, CORE), 1_000_000);
    }

    #[test]
    fn rebidding_replaces_and_zero_bid_cancels() {
        let mut ledger = ledger();
        borrow(&mut ledger, ALICE, 1000, 3000);
        let price = Price::new(AssetAmount::new(1, USD), AssetAmount::new(1, CORE)).unwrap();
        ledger.global_settle(ISSUER, USD, price).unwrap();

        let (first, _) = ledger
            .bid_collateral(BOB, AssetAmount::new(400, USD), AssetAmount::new(900, CORE))
            .unwrap();
        assert!(first.is_some());
        assert_eq!(ledger.balances.balance(BOB, CORE), 999_100);

        let (second, _) = ledger
            .bid_collateral(BOB, AssetAmount::new(500, USD), AssetAmount::new(700, CORE))
            .unwrap();
        assert!(second.is_some());
        assert_ne!(first, second);
        assert_eq!(ledger.balances.balance(BOB, CORE), 999_300);
        assert_eq!(ledger.markets[&USD].bids.len(), 1);

        let (cancelled, _) = ledger
            .bid_collateral(BOB, AssetAmount::zero(USD), AssetAmount::zero(CORE))
            .unwrap();
        assert!(cancelled.is_none());
        assert!(ledger.markets[&USD].bids.is_empty());
        assert_eq!(ledger.balances.balance(BOB, CORE), 1_000_000);
    }

    #[test]
    fn revive_executes_covering_bids() {
        let mut ledger = ledger();
        borrow(&mut ledger, ALICE, 1000, 3000);
        let price = Price::new(AssetAmount::new(1, USD), AssetAmount::new(1, CORE)).unwrap();
        ledger.global_settle(ISSUER, USD, price).unwrap();

        assert!(matches!(
            ledger.revive_bitasset(USD).unwrap_err(),
            BitmatchError::ReviveNotReady(_)
        ));

        ledger
            .bid_collateral(BOB, AssetAmount::new(1000, USD), AssetAmount::new(2000, CORE))
            .unwrap();
        let notices = ledger.revive_bitasset(USD).unwrap();
        assert!(notices.iter().any(|n| matches!(n, Notice::AssetRevived { .. })));
        assert!(!ledger.markets[&USD].bitasset.is_globally_settled());
        let call = ledger.markets[&USD].calls.by_borrower(BOB).unwrap();
        assert_eq!(call.debt, 1000);
        // bid collateral plus the full settlement fund
        assert_eq!(call.collateral, 3000);
    }

    #[test]
    fn feed_update_sweeps_into_a_resting_order() {
        let mut ledger = ledger();
        borrow(&mut ledger, ALICE, 1000, 2000);
        // alice offers her debt for 1.15 collateral apiece, under the
        // eventual squeeze price of 1.32
        ledger
            .place_limit_order(
                ALICE,
                AssetAmount::new(1000, USD),
                AssetAmount::new(1150, CORE),
                now() + Duration::days(30),
                false,
            )
            .unwrap();
        // the feed drops; alice's position at 2.0x falls below the new
        // 2.52 maintenance collateralization
        let feed = PriceFeed {
            settlement_price: Price::new(
                AssetAmount::new(10, USD),
                AssetAmount::new(12, CORE),
            )
            .unwrap(),
            maintenance_collateral_ratio: 2100,
            maximum_short_squeeze_ratio: 1100,
            margin_call_fee_ratio: None,
        };
        let notices = ledger.update_price_feed(USD, feed).unwrap();
        assert!(notices.iter().any(|n| matches!(n, Notice::Fill(_))));
        assert!(ledger.markets[&USD].calls.is_empty());
        assert_eq!(ledger.markets[&USD].current_supply, 0);
        // alice is on both sides: her limit receives 1150 and her closed
        // position returns the remaining 850 of its 2000 collateral
        assert_eq!(ledger.balances.balance(ALICE, CORE), 1_000_000);
        assert_eq!(ledger.balances.balance(ALICE, USD), 0);
    }
}
