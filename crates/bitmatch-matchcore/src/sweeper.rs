//! The margin-call sweeper.
//!
//! Runs after anything that can change a position's standing relative to
//! the book or the feed: order placement, collateral updates, and feed
//! publication. Repeatedly takes the least-collateralized callable
//! position and fills it from the best limit order selling debt, falling
//! back to queued force settlements when no limit order qualifies. Every
//! round first re-checks for a black swan, since each fill moves the
//! frontier.

use bitmatch_types::*;
use tracing::debug;

use crate::engine::Matcher;

impl Matcher<'_> {
    /// Sweep callable positions against the book. Returns whether anything
    /// was margin-called. `allow_black_swan` propagates to the swan check:
    /// operations that merely observe prices (order placement) must not
    /// trigger a global settlement, feed publication must.
    pub fn sweep_margin_calls(&mut self, allow_black_swan: bool) -> Result<bool> {
        {
            let b = &self.market.bitasset;
            if b.is_prediction_market || b.is_globally_settled() || !b.has_feed() {
                return Ok(false);
            }
        }
        let mut margin_called = false;

        loop {
            if self.check_for_blackswan(allow_black_swan)? {
                // globally settled; the books for this asset are done
                return Ok(true);
            }
            let feed = *self.market.feed()?;
            let Some(call) = self.market.calls.least_collateralized() else {
                break;
            };
            let call_id = call.id;
            let callable = if self.ctx.rules.call_orders_are_takers {
                let maintenance = self
                    .market
                    .bitasset
                    .maintenance_collateralization
                    .unwrap_or_else(|| feed.maintenance_collateralization());
                call.collateralization() <= maintenance
            } else {
                call.call_price < !feed.settlement_price
            };
            if !callable {
                break;
            }

            let mcop = feed.margin_call_order_price(self.ctx.rules.margin_call_fee_enabled);
            let maker = self
                .market
                .book
                .selling_debt
                .best()
                .map(|o| (o.id, o.sell_price));
            let qualifying = maker.filter(|(_, p)| *p >= mcop);

            let Some((maker_id, maker_price)) = qualifying else {
                // no limit order qualifies; try the settlement queue
                if self.ctx.rules.settle_orders_match_calls {
                    if let Some(settle_id) = self.market.settlements.oldest().map(|s| s.id) {
                        let filled = self.match_call_settle(call_id, settle_id, true)?;
                        if filled > 0 {
                            margin_called = true;
                            continue;
                        }
                    }
                }
                break;
            };

            // the call takes the maker's price
            let (num, den) = feed.margin_call_pays_ratio(self.ctx.rules.margin_call_fee_enabled);
            let call_pays_price = maker_price.scale(num, den);
            let mut limit = self
                .market
                .book
                .selling_debt
                .remove(maker_id)
                .ok_or(BitmatchError::OrderNotFound(maker_id))?;
            let (limit_done, call_done) =
                self.fill_limit_call(&mut limit, true, call_id, maker_price, call_pays_price)?;
            if !limit_done {
                self.market.book.selling_debt.insert(limit)?;
            }
            if !limit_done && !call_done {
                return Err(BitmatchError::MatchingFailed {
                    reason: format!("sweep made no progress on {call_id}"),
                });
            }
            margin_called = true;
            debug!(call = %call_id, "margin call filled");
        }
        Ok(margin_called)
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

    fn market_with_feed() -> MarketState {
        let mut market = MarketState::new(
            BitassetState::new(DEBT, COLL, BlackSwanResponse::GlobalSettlement),
            AccountId(99),
        );
        market.bitasset.current_feed = Some(PriceFeed::dummy(1, DEBT, 1, COLL));
        market.bitasset.refresh_feed_caches();
        market
    }

    fn sweep(market: &mut MarketState, allow: bool) -> (Result<bool>, EventSink) {
        let ctx = ExecContext::latest(Utc::now());
        let mut sink = EventSink::new();
        let res = Matcher::new(market, &ctx, &mut sink).sweep_margin_calls(allow);
        (res, sink)
    }

    #[test]
    fn healthy_positions_are_left_alone() {
        let mut market = market_with_feed();
        market.current_supply = 1000;
        market
            .calls
            .insert(CallOrder::dummy(1, AccountId(1), 2000, 1000, COLL, DEBT))
            .unwrap();
        market
            .book
            .selling_debt
            .insert(LimitOrder::dummy(1, AccountId(2), 1000, price(1, 1)))
            .unwrap();
        let (res, sink) = sweep(&mut market, false);
        assert!(!res.unwrap());
        assert!(sink.effects.is_empty());
    }

    #[test]
    fn callable_position_fills_at_the_makers_price() {
        let mut market = market_with_feed();
        market.current_supply = 1000;
        // 1.6x collateralized, below MCR 1.75
        market
            .calls
            .insert(CallOrder::dummy(1, AccountId(1), 1600, 1000, COLL, DEBT))
            .unwrap();
        // maker sells 1000 debt at 1 debt / 1.05 coll, above MCOP (1/1.1)
        market
            .book
            .selling_debt
            .insert(LimitOrder::dummy(1, AccountId(2), 1000, price(100, 105)))
            .unwrap();
        let (res, sink) = sweep(&mut market, false);
        assert!(res.unwrap());
        // the call covered all 1000 debt, paying 1050 collateral
        assert!(market.calls.get(CallOrderId(1)).is_none());
        assert_eq!(market.current_supply, 0);
        let seller: i64 = sink
            .effects
            .iter()
            .filter_map(|e| match e {
                BalanceEffect::Credit { account, amount }
                    if *account == AccountId(2) && amount.asset_id == COLL =>
                {
                    Some(amount.amount)
                }
                _ => None,
            })
            .sum();
        assert_eq!(seller, 1050);
        assert!(market.book.selling_debt.is_empty());
    }

    #[test]
    fn limit_below_mcop_does_not_qualify() {
        let mut market = market_with_feed();
        market.current_supply = 1000;
        market
            .calls
            .insert(CallOrder::dummy(1, AccountId(1), 1600, 1000, COLL, DEBT))
            .unwrap();
        // maker demands 1.2 coll per debt, beyond the squeeze protection
        market
            .book
            .selling_debt
            .insert(LimitOrder::dummy(1, AccountId(2), 1000, price(100, 120)))
            .unwrap();
        let (res, _) = sweep(&mut market, false);
        assert!(!res.unwrap());
        assert!(market.calls.get(CallOrderId(1)).is_some());
    }

    #[test]
    fn tcr_position_covers_only_to_target() {
        let mut market = market_with_feed();
        market.current_supply = 1000;
        let mut call = CallOrder::dummy(1, AccountId(1), 1600, 1000, COLL, DEBT);
        call.target_collateral_ratio = Some(2200);
        market.calls.insert(call).unwrap();
        market
            .book
            .selling_debt
            .insert(LimitOrder::dummy(1, AccountId(2), 1000, price(10, 11)))
            .unwrap();
        let (res, _) = sweep(&mut market, false);
        assert!(res.unwrap());
        let call = market.calls.get(CallOrderId(1)).unwrap();
        assert!(call.debt > 0 && call.debt < 1000, "partial cover");
        // remaining position is back above the maintenance ratio
        let maintenance = market.bitasset.maintenance_collateralization.unwrap();
        assert!(call.collateralization() > maintenance);
    }

    #[test]
    fn sweep_stops_at_prediction_markets_and_settled_assets() {
        let mut market = market_with_feed();
        market.bitasset.is_prediction_market = true;
        let (res, _) = sweep(&mut market, true);
        assert!(!res.unwrap());

        let mut market = market_with_feed();
        market.bitasset.settlement_price = Some(price(1, 1));
        let (res, _) = sweep(&mut market, true);
        assert!(!res.unwrap());
    }

    #[test]
    fn undercollateralized_book_blocks_swanless_sweep() {
        let mut market = market_with_feed();
        market.current_supply = 1000;
        // below 1x collateralized at the feed: a swan
        market
            .calls
            .insert(CallOrder::dummy(1, AccountId(1), 900, 1000, COLL, DEBT))
            .unwrap();
        market
            .book
            .selling_debt
            .insert(LimitOrder::dummy(1, AccountId(2), 1000, price(1, 1)))
            .unwrap();
        let (res, _) = sweep(&mut market, false);
        assert!(matches!(res, Err(BitmatchError::BlackSwanBlocked(_))));
    }
}
