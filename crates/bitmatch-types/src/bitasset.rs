//! Per-smart-asset state: feed, settlement condition, and the
//! black-swan-response configuration.

use serde::{Deserialize, Serialize};

use crate::{AssetAmount, AssetId, Price, PriceFeed};

/// What the kernel does when the least-collateralized position can no longer
/// cover its debt at the best available price.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BlackSwanResponse {
    /// Freeze the whole asset at a fixed settlement price.
    GlobalSettlement,
    /// Configured to never reach a swan; hitting one anyway is handled like
    /// a global settlement as a fail-safe.
    NoSettlement,
    /// Close only the offending position into a per-asset settlement fund.
    IndividualSettlementToFund,
    /// Close only the offending position into a synthetic settled-debt
    /// order on the book.
    IndividualSettlementToOrder,
}

/// Market-fee parameters of one asset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarketFeeParams {
    /// Maker rate, in [`PERCENT_100`](crate::constants::PERCENT_100) units.
    pub market_fee_percent: u16,
    /// Taker rate; `None` falls back to the maker rate.
    pub taker_fee_percent: Option<u16>,
    /// Absolute cap on a single fill's fee.
    pub max_market_fee: i64,
    /// Share of each fee handed to the seller's referrer, gated by the
    /// asset's fee-sharing whitelist.
    pub reward_percent: u16,
}

impl MarketFeeParams {
    #[must_use]
    pub fn none() -> Self {
        Self {
            market_fee_percent: 0,
            taker_fee_percent: None,
            max_market_fee: i64::MAX,
            reward_percent: 0,
        }
    }
}

/// Mutable bitasset state the kernel maintains for one smart asset.
///
/// Invariant: `settlement_price` is `Some` iff the asset is globally
/// settled; while settled no margin position can exist or be opened.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BitassetState {
    /// The smart (debt) asset.
    pub asset_id: AssetId,
    /// The collateral asset backing it.
    pub backing_asset: AssetId,
    pub current_feed: Option<PriceFeed>,
    /// Fixed redemption price after a global settlement, debt/collateral.
    pub settlement_price: Option<Price>,
    /// Collateral gathered by a global settlement, redeemable at
    /// `settlement_price`.
    pub settlement_fund: i64,
    /// Debt absorbed by individual settlements, not yet bought back.
    pub individual_settlement_debt: i64,
    /// Collateral backing `individual_settlement_debt`.
    pub individual_settlement_fund: i64,
    pub swan_response: BlackSwanResponse,
    pub is_prediction_market: bool,
    /// Price offset against the settler on queued force settlements, in
    /// [`PERCENT_100`](crate::constants::PERCENT_100) units.
    pub force_settlement_offset_percent: u16,
    /// Holding period before a queued force settlement matures.
    pub force_settlement_delay_secs: i64,
    /// Percentage of collateral received charged on force settlements.
    pub force_settlement_fee_percent: Option<u16>,
    /// Cached `current_feed.maintenance_collateralization()`; refreshed on
    /// every feed update.
    pub maintenance_collateralization: Option<Price>,
}

impl BitassetState {
    #[must_use]
    pub fn new(asset_id: AssetId, backing_asset: AssetId, swan_response: BlackSwanResponse) -> Self {
        Self {
            asset_id,
            backing_asset,
            current_feed: None,
            settlement_price: None,
            settlement_fund: 0,
            individual_settlement_debt: 0,
            individual_settlement_fund: 0,
            swan_response,
            is_prediction_market: false,
            force_settlement_offset_percent: 0,
            force_settlement_delay_secs: 24 * 3600,
            force_settlement_fee_percent: None,
            maintenance_collateralization: None,
        }
    }

    #[must_use]
    pub fn is_globally_settled(&self) -> bool {
        self.settlement_price.is_some()
    }

    #[must_use]
    pub fn has_feed(&self) -> bool {
        self.current_feed.is_some()
    }

    /// Refresh every feed-derived cache. Must be called after any feed
    /// mutation, inside the same operation.
    pub fn refresh_feed_caches(&mut self) {
        self.maintenance_collateralization = self
            .current_feed
            .as_ref()
            .map(PriceFeed::maintenance_collateralization);
    }

    /// Price of the individual-settlement accumulators, debt/collateral.
    /// `None` while the accumulators are empty.
    #[must_use]
    pub fn individual_settlement_price(&self) -> Option<Price> {
        if self.individual_settlement_debt <= 0 || self.individual_settlement_fund <= 0 {
            return None;
        }
        Some(Price {
            base: AssetAmount::new(self.individual_settlement_debt, self.asset_id),
            quote: AssetAmount::new(self.individual_settlement_fund, self.backing_asset),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::AssetAmount;

    #[test]
    fn settled_iff_settlement_price_set() {
        let mut state = BitassetState::new(AssetId(10), AssetId(0), BlackSwanResponse::GlobalSettlement);
        assert!(!state.is_globally_settled());
        state.settlement_price = Some(Price {
            base: AssetAmount::new(1, AssetId(10)),
            quote: AssetAmount::new(1, AssetId(0)),
        });
        assert!(state.is_globally_settled());
    }

    #[test]
    fn individual_settlement_price_tracks_accumulators() {
        let mut state =
            BitassetState::new(AssetId(10), AssetId(0), BlackSwanResponse::IndividualSettlementToFund);
        assert!(state.individual_settlement_price().is_none());
        state.individual_settlement_debt = 100;
        state.individual_settlement_fund = 150;
        let p = state.individual_settlement_price().unwrap();
        assert_eq!(p.base.amount, 100);
        assert_eq!(p.quote.amount, 150);
    }
}
