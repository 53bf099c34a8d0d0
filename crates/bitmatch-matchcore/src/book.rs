//! The books and indexes for a single smart-asset market.
//!
//! Uses `BTreeMap` for deterministic ordering:
//! - **Limit orders**: keyed by (price descending, id ascending), best
//!   offer first, ties broken by age.
//! - **Call orders**: keyed by (collateralization ascending, id), the
//!   least-collateralized (riskiest) position first.
//! - **Force settlements**: keyed by (maturity date, id), oldest first.
//! - **Collateral bids**: keyed by (price descending, id), best bid first.
//!
//! Auxiliary `HashMap` indexes enable O(log N) removal by id.

use std::collections::{BTreeMap, HashMap};

use bitmatch_types::*;
use chrono::{DateTime, Utc};

// =====================================================================
// Limit orders
// =====================================================================

/// Sort key for one side of the limit book: best (highest) sell price
/// first, older order first on a price tie.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrderKey {
    pub price: Price,
    pub id: OrderId,
}

impl PartialOrd for OrderKey {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for OrderKey {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        other
            .price
            .cmp(&self.price)
            .then_with(|| self.id.cmp(&other.id))
    }
}

/// One side of the limit book: every order selling the same asset.
#[derive(Debug, Clone, Default)]
pub struct BookSide {
    orders: BTreeMap<OrderKey, LimitOrder>,
    index: HashMap<OrderId, OrderKey>,
}

impl BookSide {
    pub fn insert(&mut self, order: LimitOrder) -> Result<()> {
        if self.index.contains_key(&order.id) {
            return Err(BitmatchError::DuplicateOrder(order.id));
        }
        let key = OrderKey {
            price: order.sell_price,
            id: order.id,
        };
        self.index.insert(order.id, key);
        self.orders.insert(key, order);
        Ok(())
    }

    pub fn remove(&mut self, id: OrderId) -> Option<LimitOrder> {
        let key = self.index.remove(&id)?;
        self.orders.remove(&key)
    }

    #[must_use]
    pub fn get(&self, id: OrderId) -> Option<&LimitOrder> {
        self.index.get(&id).and_then(|k| self.orders.get(k))
    }

    /// The best offer on this side. Orders never change price in place, so
    /// the key stays valid for the order's whole lifetime.
    #[must_use]
    pub fn best(&self) -> Option<&LimitOrder> {
        self.orders.values().next()
    }

    /// Update an order's remaining amount in place. The key only encodes
    /// price and id, so `for_sale` changes never require re-keying.
    pub fn set_for_sale(&mut self, id: OrderId, for_sale: i64) -> Result<()> {
        let key = self
            .index
            .get(&id)
            .ok_or(BitmatchError::OrderNotFound(id))?;
        let order = self
            .orders
            .get_mut(key)
            .ok_or(BitmatchError::OrderNotFound(id))?;
        order.for_sale = for_sale;
        Ok(())
    }

    /// Re-key an order whose price changed (settled-debt orders resize).
    pub fn reprice(&mut self, id: OrderId, order: LimitOrder) -> Result<()> {
        self.remove(id).ok_or(BitmatchError::OrderNotFound(id))?;
        self.insert(order)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.orders.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.orders.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &LimitOrder> {
        self.orders.values()
    }

    /// Orders expired at `now`, in book order.
    pub fn expired(&self, now: DateTime<Utc>) -> Vec<OrderId> {
        self.orders
            .values()
            .filter(|o| o.expiration <= now)
            .map(|o| o.id)
            .collect()
    }
}

/// Both sides of a market's limit book.
#[derive(Debug, Clone, Default)]
pub struct LimitBook {
    /// Orders selling the debt (smart) asset for collateral.
    pub selling_debt: BookSide,
    /// Orders selling collateral for the debt asset.
    pub selling_collateral: BookSide,
}

impl LimitBook {
    #[must_use]
    pub fn order_count(&self) -> usize {
        self.selling_debt.len() + self.selling_collateral.len()
    }
}

// =====================================================================
// Call orders
// =====================================================================

/// Sort key for margin positions: least collateralized first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallKey {
    pub collateralization: Price,
    pub id: CallOrderId,
}

impl PartialOrd for CallKey {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for CallKey {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.collateralization
            .cmp(&other.collateralization)
            .then_with(|| self.id.cmp(&other.id))
    }
}

/// All margin positions of one market, ordered by risk.
#[derive(Debug, Clone, Default)]
pub struct CallIndex {
    orders: BTreeMap<CallKey, CallOrder>,
    index: HashMap<CallOrderId, CallKey>,
}

impl CallIndex {
    pub fn insert(&mut self, call: CallOrder) -> Result<()> {
        if self.index.contains_key(&call.id) {
            return Err(BitmatchError::InternalInvariant(format!(
                "duplicate call order {}",
                call.id
            )));
        }
        let key = CallKey {
            collateralization: call.collateralization(),
            id: call.id,
        };
        self.index.insert(call.id, key);
        self.orders.insert(key, call);
        Ok(())
    }

    pub fn remove(&mut self, id: CallOrderId) -> Option<CallOrder> {
        let key = self.index.remove(&id)?;
        self.orders.remove(&key)
    }

    #[must_use]
    pub fn get(&self, id: CallOrderId) -> Option<&CallOrder> {
        self.index.get(&id).and_then(|k| self.orders.get(k))
    }

    /// The riskiest open position, the first margin-call candidate.
    #[must_use]
    pub fn least_collateralized(&self) -> Option<&CallOrder> {
        self.orders.values().next()
    }

    /// The single position of `borrower`, if any. A borrower holds at most
    /// one position per market.
    #[must_use]
    pub fn by_borrower(&self, borrower: AccountId) -> Option<&CallOrder> {
        self.orders.values().find(|c| c.borrower == borrower)
    }

    /// Mutate a position through a closure and restore its sort key, since
    /// debt or collateral changes move it in the risk ordering.
    pub fn modify<F>(&mut self, id: CallOrderId, f: F) -> Result<()>
    where
        F: FnOnce(&mut CallOrder),
    {
        let mut call = self.remove(id).ok_or(BitmatchError::CallOrderNotFound(id))?;
        f(&mut call);
        self.insert(call)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.orders.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.orders.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &CallOrder> {
        self.orders.values()
    }

    /// Remove every position, in risk order. Used by global settlement.
    pub fn drain_all(&mut self) -> Vec<CallOrder> {
        self.index.clear();
        std::mem::take(&mut self.orders).into_values().collect()
    }

    #[must_use]
    pub fn total_debt(&self) -> i64 {
        self.orders.values().map(|c| c.debt).sum()
    }
}

// =====================================================================
// Force settlements
// =====================================================================

/// Queued force settlements, oldest maturity first.
#[derive(Debug, Clone, Default)]
pub struct SettlementQueue {
    orders: BTreeMap<(DateTime<Utc>, SettlementId), ForceSettlement>,
    index: HashMap<SettlementId, (DateTime<Utc>, SettlementId)>,
}

impl SettlementQueue {
    pub fn insert(&mut self, settle: ForceSettlement) -> Result<()> {
        if self.index.contains_key(&settle.id) {
            return Err(BitmatchError::InternalInvariant(format!(
                "duplicate settlement {}",
                settle.id
            )));
        }
        let key = (settle.settlement_date, settle.id);
        self.index.insert(settle.id, key);
        self.orders.insert(key, settle);
        Ok(())
    }

    pub fn remove(&mut self, id: SettlementId) -> Option<ForceSettlement> {
        let key = self.index.remove(&id)?;
        self.orders.remove(&key)
    }

    #[must_use]
    pub fn get(&self, id: SettlementId) -> Option<&ForceSettlement> {
        self.index.get(&id).and_then(|k| self.orders.get(k))
    }

    /// Reduce a settlement's remaining balance in place; the key encodes
    /// only date and id.
    pub fn set_balance(&mut self, id: SettlementId, balance: AssetAmount) -> Result<()> {
        let key = self
            .index
            .get(&id)
            .ok_or(BitmatchError::SettlementNotFound(id))?;
        let settle = self
            .orders
            .get_mut(key)
            .ok_or(BitmatchError::SettlementNotFound(id))?;
        settle.balance = balance;
        Ok(())
    }

    /// The oldest queued settlement regardless of maturity.
    #[must_use]
    pub fn oldest(&self) -> Option<&ForceSettlement> {
        self.orders.values().next()
    }

    /// The oldest settlement whose maturity has passed.
    #[must_use]
    pub fn oldest_matured(&self, now: DateTime<Utc>) -> Option<&ForceSettlement> {
        self.orders
            .values()
            .next()
            .filter(|s| s.settlement_date <= now)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.orders.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.orders.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ForceSettlement> {
        self.orders.values()
    }

    #[must_use]
    pub fn total_balance(&self) -> i64 {
        self.orders.values().map(|s| s.balance.amount).sum()
    }
}

// =====================================================================
// Collateral bids
// =====================================================================

/// Sort key for collateral bids: best (highest debt per collateral) first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BidKey {
    pub price: Price,
    pub id: BidId,
}

impl PartialOrd for BidKey {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for BidKey {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        other
            .price
            .cmp(&self.price)
            .then_with(|| self.id.cmp(&other.id))
    }
}

/// Standing collateral bids on a globally settled asset.
#[derive(Debug, Clone, Default)]
pub struct BidQueue {
    orders: BTreeMap<BidKey, CollateralBid>,
    index: HashMap<BidId, BidKey>,
}

impl BidQueue {
    pub fn insert(&mut self, bid: CollateralBid) -> Result<()> {
        if self.index.contains_key(&bid.id) {
            return Err(BitmatchError::InternalInvariant(format!(
                "duplicate bid {}",
                bid.id
            )));
        }
        let key = BidKey {
            price: bid.price(),
            id: bid.id,
        };
        self.index.insert(bid.id, key);
        self.orders.insert(key, bid);
        Ok(())
    }

    pub fn remove(&mut self, id: BidId) -> Option<CollateralBid> {
        let key = self.index.remove(&id)?;
        self.orders.remove(&key)
    }

    #[must_use]
    pub fn get(&self, id: BidId) -> Option<&CollateralBid> {
        self.index.get(&id).and_then(|k| self.orders.get(k))
    }

    #[must_use]
    pub fn by_bidder(&self, bidder: AccountId) -> Option<&CollateralBid> {
        self.orders.values().find(|b| b.bidder == bidder)
    }

    /// Pop the best bid.
    pub fn pop_best(&mut self) -> Option<CollateralBid> {
        let key = *self.orders.keys().next()?;
        self.index.remove(&key.id);
        self.orders.remove(&key)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.orders.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.orders.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &CollateralBid> {
        self.orders.values()
    }

    #[must_use]
    pub fn total_debt_covered(&self) -> i64 {
        self.orders.values().map(|b| b.debt_covered.amount).sum()
    }
}

// =====================================================================
// Market state
// =====================================================================

/// The complete kernel state of one smart-asset market. Balances live in
/// the settlement plane; everything here is book and bitasset state, and
/// cloning it yields a rollback snapshot.
#[derive(Debug, Clone)]
pub struct MarketState {
    pub bitasset: BitassetState,
    /// Issuer of the debt asset; owns the synthetic settled-debt order and
    /// receives the collateral-denominated fee pool.
    pub debt_issuer: AccountId,
    /// Market-fee parameters of the debt asset.
    pub debt_fees: MarketFeeParams,
    /// Market-fee parameters of the collateral asset.
    pub collateral_fees: MarketFeeParams,
    /// Outstanding supply of the debt asset. Issued by borrowing, burned
    /// by covers and settlements; the settlement plane mirrors it.
    pub current_supply: i64,
    pub book: LimitBook,
    pub calls: CallIndex,
    pub settlements: SettlementQueue,
    pub bids: BidQueue,
    /// Allocator for positions the kernel itself creates (bid revival).
    next_call_id: u64,
}

impl MarketState {
    #[must_use]
    pub fn new(bitasset: BitassetState, debt_issuer: AccountId) -> Self {
        Self {
            bitasset,
            debt_issuer,
            debt_fees: MarketFeeParams::none(),
            collateral_fees: MarketFeeParams::none(),
            current_supply: 0,
            book: LimitBook::default(),
            calls: CallIndex::default(),
            settlements: SettlementQueue::default(),
            bids: BidQueue::default(),
            next_call_id: 1 << 32,
        }
    }

    #[must_use]
    pub fn debt_asset(&self) -> AssetId {
        self.bitasset.asset_id
    }

    #[must_use]
    pub fn collateral_asset(&self) -> AssetId {
        self.bitasset.backing_asset
    }

    /// The book side selling `asset`.
    pub fn side(&self, asset: AssetId) -> Result<&BookSide> {
        if asset == self.debt_asset() {
            Ok(&self.book.selling_debt)
        } else if asset == self.collateral_asset() {
            Ok(&self.book.selling_collateral)
        } else {
            Err(BitmatchError::MismatchedAssets {
                a: asset,
                b: self.debt_asset(),
            })
        }
    }

    pub fn side_mut(&mut self, asset: AssetId) -> Result<&mut BookSide> {
        if asset == self.bitasset.asset_id {
            Ok(&mut self.book.selling_debt)
        } else if asset == self.bitasset.backing_asset {
            Ok(&mut self.book.selling_collateral)
        } else {
            Err(BitmatchError::MismatchedAssets {
                a: asset,
                b: self.bitasset.asset_id,
            })
        }
    }

    /// Fee parameters of the asset a fill pays out in.
    pub fn fee_params(&self, asset: AssetId) -> Result<&MarketFeeParams> {
        if asset == self.debt_asset() {
            Ok(&self.debt_fees)
        } else if asset == self.collateral_asset() {
            Ok(&self.collateral_fees)
        } else {
            Err(BitmatchError::MismatchedAssets {
                a: asset,
                b: self.debt_asset(),
            })
        }
    }

    /// Fixed id of the market's settled-debt order. At most one exists per
    /// market, so the id is derived from the asset rather than allocated.
    #[must_use]
    pub fn settled_debt_order_id(&self) -> OrderId {
        OrderId((1 << 63) | u64::from(self.bitasset.asset_id.0))
    }

    /// Allocate an id for a kernel-created position.
    pub fn alloc_call_id(&mut self) -> CallOrderId {
        let id = CallOrderId(self.next_call_id);
        self.next_call_id += 1;
        id
    }

    /// The current feed, or the no-feed error.
    pub fn feed(&self) -> Result<&PriceFeed> {
        self.bitasset
            .current_feed
            .as_ref()
            .ok_or(BitmatchError::NoPriceFeed(self.bitasset.asset_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DEBT: AssetId = AssetId(10);
    const COLL: AssetId = AssetId(0);

    fn price(base: i64, quote: i64) -> Price {
        Price::new(AssetAmount::new(base, DEBT), AssetAmount::new(quote, COLL)).unwrap()
    }

    fn market() -> MarketState {
        MarketState::new(
            BitassetState::new(DEBT, COLL, BlackSwanResponse::GlobalSettlement),
            AccountId(99),
        )
    }

    #[test]
    fn best_offer_is_highest_price_then_oldest() {
        let mut side = BookSide::default();
        side.insert(LimitOrder::dummy(2, AccountId(1), 100, price(1, 1)))
            .unwrap();
        side.insert(LimitOrder::dummy(1, AccountId(1), 100, price(2, 1)))
            .unwrap();
        side.insert(LimitOrder::dummy(3, AccountId(1), 100, price(2, 1)))
            .unwrap();
        assert_eq!(side.best().unwrap().id, OrderId(1));
        side.remove(OrderId(1)).unwrap();
        assert_eq!(side.best().unwrap().id, OrderId(3));
    }

    #[test]
    fn duplicate_order_rejected() {
        let mut side = BookSide::default();
        side.insert(LimitOrder::dummy(1, AccountId(1), 100, price(1, 1)))
            .unwrap();
        let err = side
            .insert(LimitOrder::dummy(1, AccountId(1), 50, price(1, 1)))
            .unwrap_err();
        assert!(matches!(err, BitmatchError::DuplicateOrder(_)));
    }

    #[test]
    fn call_index_orders_by_risk_and_rekeys_on_modify() {
        let mut calls = CallIndex::default();
        calls
            .insert(CallOrder::dummy(1, AccountId(1), 2000, 1000, COLL, DEBT))
            .unwrap();
        calls
            .insert(CallOrder::dummy(2, AccountId(2), 1500, 1000, COLL, DEBT))
            .unwrap();
        assert_eq!(calls.least_collateralized().unwrap().id, CallOrderId(2));

        // adding collateral makes position 2 the safer one
        calls
            .modify(CallOrderId(2), |c| c.collateral = 3000)
            .unwrap();
        assert_eq!(calls.least_collateralized().unwrap().id, CallOrderId(1));
    }

    #[test]
    fn settlement_queue_is_fifo_by_maturity() {
        use chrono::TimeZone;
        let t0 = Utc.with_ymd_and_hms(2023, 1, 1, 0, 0, 0).unwrap();
        let t1 = Utc.with_ymd_and_hms(2023, 1, 2, 0, 0, 0).unwrap();
        let mut q = SettlementQueue::default();
        q.insert(ForceSettlement {
            id: SettlementId(2),
            owner: AccountId(1),
            balance: AssetAmount::new(10, DEBT),
            settlement_date: t1,
        })
        .unwrap();
        q.insert(ForceSettlement {
            id: SettlementId(1),
            owner: AccountId(1),
            balance: AssetAmount::new(10, DEBT),
            settlement_date: t0,
        })
        .unwrap();
        assert_eq!(q.oldest().unwrap().id, SettlementId(1));
        assert!(q.oldest_matured(t0).is_some());
        q.remove(SettlementId(1)).unwrap();
        assert_eq!(q.oldest_matured(t0), None, "next entry not yet matured");
    }

    #[test]
    fn bid_queue_pops_best_price_first() {
        let mut bids = BidQueue::default();
        // bid 1: covers 100 debt with 50 collateral; bid 2: 100 with 40
        bids.insert(CollateralBid {
            id: BidId(1),
            bidder: AccountId(1),
            debt_covered: AssetAmount::new(100, DEBT),
            additional_collateral: AssetAmount::new(50, COLL),
        })
        .unwrap();
        bids.insert(CollateralBid {
            id: BidId(2),
            bidder: AccountId(2),
            debt_covered: AssetAmount::new(100, DEBT),
            additional_collateral: AssetAmount::new(40, COLL),
        })
        .unwrap();
        assert_eq!(bids.pop_best().unwrap().id, BidId(2));
        assert_eq!(bids.total_debt_covered(), 100);
    }

    #[test]
    fn market_routes_sides_and_fees_by_asset() {
        let market = market();
        assert!(market.side(DEBT).is_ok());
        assert!(market.side(COLL).is_ok());
        assert!(market.side(AssetId(7)).is_err());
        assert!(market.fee_params(AssetId(7)).is_err());
        assert_eq!(market.settled_debt_order_id(), OrderId((1 << 63) | 10));
    }
}
