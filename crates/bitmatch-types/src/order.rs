//! Book-resident entities: limit orders, margin positions, force
//! settlements, and post-swan collateral bids.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    AccountId, AssetAmount, AssetId, BidId, CallOrderId, OrderId, Price, Result, SettlementId,
};

/// An open limit order. The funds backing `for_sale` were debited from the
/// seller when the order was created; the order itself owns them until it
/// fills or is cancelled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LimitOrder {
    pub id: OrderId,
    pub seller: AccountId,
    /// Remaining amount for sale, denominated in `sell_price.base`.
    pub for_sale: i64,
    /// Sell price; base is the asset being sold.
    pub sell_price: Price,
    pub expiration: DateTime<Utc>,
    /// Deferred operation fee in the core asset, consumed on first fill or
    /// refunded (possibly minus a cancellation fee) on cancel.
    pub deferred_fee: i64,
    /// A prepaid fee in a non-core asset, refunded in full on cancel.
    pub deferred_paid_fee: Option<AssetAmount>,
    /// Follow-up order to create once this one fully fills. The kernel only
    /// reports the trigger; the order layer owns the chaining.
    pub take_profit_order: Option<OrderId>,
    /// Synthetic order backed by a bitasset's individual-settlement
    /// accumulators rather than by an account.
    pub is_settled_debt: bool,
}

impl LimitOrder {
    #[must_use]
    pub fn sold_asset(&self) -> AssetId {
        self.sell_price.base.asset_id
    }

    #[must_use]
    pub fn received_asset(&self) -> AssetId {
        self.sell_price.quote.asset_id
    }

    #[must_use]
    pub fn amount_for_sale(&self) -> AssetAmount {
        AssetAmount::new(self.for_sale, self.sold_asset())
    }

    /// What the remainder buys at the order's own price. Zero means the
    /// order is dust and should be culled.
    pub fn amount_to_receive(&self) -> Result<AssetAmount> {
        self.amount_for_sale().multiply(&self.sell_price)
    }
}

/// A margin position: `debt` units of a smart asset issued against
/// `collateral` units of its backing asset. Collateral only leaves the
/// position through margin-call fills or when the debt reaches zero.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallOrder {
    pub id: CallOrderId,
    pub borrower: AccountId,
    pub collateral: i64,
    pub debt: i64,
    pub collateral_asset: AssetId,
    pub debt_asset: AssetId,
    /// Cached call price, only meaningful under the legacy rule versions
    /// that match against it instead of recomputing collateralization.
    pub call_price: Price,
    /// TCR: when set, margin calls cover only enough debt to lift the
    /// position back to this ratio.
    pub target_collateral_ratio: Option<u16>,
    /// Per-position MCR override used instead of the feed's ratio.
    pub maintenance_collateral_ratio: Option<u16>,
}

impl CallOrder {
    #[must_use]
    pub fn get_debt(&self) -> AssetAmount {
        AssetAmount::new(self.debt, self.debt_asset)
    }

    #[must_use]
    pub fn get_collateral(&self) -> AssetAmount {
        AssetAmount::new(self.collateral, self.collateral_asset)
    }

    /// Collateral per debt, oriented collateral/debt. Lower sorts first:
    /// the least-collateralized position is the most at risk.
    #[must_use]
    pub fn collateralization(&self) -> Price {
        Price {
            base: self.get_collateral(),
            quote: self.get_debt(),
        }
    }

    /// Effective MCR for this position.
    #[must_use]
    pub fn effective_mcr(&self, feed_mcr: u16) -> u16 {
        self.maintenance_collateral_ratio.unwrap_or(feed_mcr)
    }

    /// Refresh the legacy cached call price.
    pub fn update_call_price(&mut self, mcr: u16) {
        self.call_price = Price::call_price(self.get_debt(), self.get_collateral(), mcr);
    }
}

/// A holder's queued request to redeem debt asset for collateral once the
/// holding period elapses. The balance was escrowed at creation time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForceSettlement {
    pub id: SettlementId,
    pub owner: AccountId,
    /// Remaining debt-asset balance to settle.
    pub balance: AssetAmount,
    /// When the settlement becomes eligible for execution.
    pub settlement_date: DateTime<Utc>,
}

/// A standing offer to re-collateralize part of a globally settled asset's
/// debt. Only exists while the asset is settled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollateralBid {
    pub id: BidId,
    pub bidder: AccountId,
    /// Debt the bidder offers to take over.
    pub debt_covered: AssetAmount,
    /// Collateral the bidder adds on top of the settlement-fund share.
    pub additional_collateral: AssetAmount,
}

impl CollateralBid {
    /// Bid price, debt per collateral. Higher = more debt covered per unit
    /// of collateral offered = better bid.
    #[must_use]
    pub fn price(&self) -> Price {
        Price {
            base: self.debt_covered,
            quote: self.additional_collateral,
        }
    }
}

/// Test helpers.
#[cfg(any(test, feature = "test-helpers"))]
impl LimitOrder {
    pub fn dummy(id: u64, seller: AccountId, for_sale: i64, sell_price: Price) -> Self {
        Self {
            id: OrderId(id),
            seller,
            for_sale,
            sell_price,
            expiration: DateTime::<Utc>::MAX_UTC,
            deferred_fee: 0,
            deferred_paid_fee: None,
            take_profit_order: None,
            is_settled_debt: false,
        }
    }
}

#[cfg(any(test, feature = "test-helpers"))]
impl CallOrder {
    pub fn dummy(
        id: u64,
        borrower: AccountId,
        collateral: i64,
        debt: i64,
        collateral_asset: AssetId,
        debt_asset: AssetId,
    ) -> Self {
        Self {
            id: CallOrderId(id),
            borrower,
            collateral,
            debt,
            collateral_asset,
            debt_asset,
            call_price: Price::max(collateral_asset, debt_asset),
            target_collateral_ratio: None,
            maintenance_collateral_ratio: None,
        }
    }
}
