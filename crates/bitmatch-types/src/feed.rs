//! Published price feeds for smart assets.
//!
//! The settlement price is always oriented debt/collateral (base = debt
//! asset), so converting a debt amount through it yields collateral. Every
//! derived price below keeps that orientation unless it says otherwise.

use serde::{Deserialize, Serialize};

use crate::constants::{COLLATERAL_RATIO_DENOM, MAX_COLLATERAL_RATIO, MIN_COLLATERAL_RATIO};
use crate::{BitmatchError, Price, Result};

/// The median feed data driving margin calls for one smart asset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceFeed {
    /// Feed price, debt per collateral.
    pub settlement_price: Price,
    /// MCR, denominated in [`COLLATERAL_RATIO_DENOM`] (1750 = 1.75x).
    pub maintenance_collateral_ratio: u16,
    /// MSSR, same denomination (1100 = 1.10x).
    pub maximum_short_squeeze_ratio: u16,
    /// MCFR: the slice of the short squeeze premium kept by the issuer.
    pub margin_call_fee_ratio: Option<u16>,
}

impl PriceFeed {
    pub fn validate(&self) -> Result<()> {
        let ok_range = |r: u16| (MIN_COLLATERAL_RATIO..=MAX_COLLATERAL_RATIO).contains(&r);
        if !ok_range(self.maintenance_collateral_ratio) {
            return Err(BitmatchError::InvalidFeed {
                reason: format!("MCR {} out of range", self.maintenance_collateral_ratio),
            });
        }
        if !ok_range(self.maximum_short_squeeze_ratio) {
            return Err(BitmatchError::InvalidFeed {
                reason: format!("MSSR {} out of range", self.maximum_short_squeeze_ratio),
            });
        }
        Ok(())
    }

    fn mcfr(&self, mcfr_enabled: bool) -> u16 {
        if mcfr_enabled {
            self.margin_call_fee_ratio.unwrap_or(0)
        } else {
            0
        }
    }

    /// The worst price at which a margin call can be forced to relinquish
    /// collateral: feed scaled down by MSSR.
    #[must_use]
    pub fn max_short_squeeze_price(&self) -> Price {
        self.settlement_price.scale(
            u64::from(COLLATERAL_RATIO_DENOM),
            u64::from(self.maximum_short_squeeze_ratio),
        )
    }

    /// MCOP: the price margin calls offer on the book. With an active MCFR
    /// the offer is slightly better than the squeeze price, leaving the fee
    /// slice for the issuer. Never better than the feed itself.
    #[must_use]
    pub fn margin_call_order_price(&self, mcfr_enabled: bool) -> Price {
        let ratio = self
            .maximum_short_squeeze_ratio
            .saturating_sub(self.mcfr(mcfr_enabled))
            .max(COLLATERAL_RATIO_DENOM);
        self.settlement_price
            .scale(u64::from(COLLATERAL_RATIO_DENOM), u64::from(ratio))
    }

    /// Ratio `(MSSR - MCFR) / MSSR` applied to a match price to get the
    /// price the call actually pays collateral at.
    #[must_use]
    pub fn margin_call_pays_ratio(&self, mcfr_enabled: bool) -> (u64, u64) {
        let num = self
            .maximum_short_squeeze_ratio
            .saturating_sub(self.mcfr(mcfr_enabled))
            .max(COLLATERAL_RATIO_DENOM);
        (u64::from(num), u64::from(self.maximum_short_squeeze_ratio))
    }

    /// Minimum collateral per debt before a position is callable, oriented
    /// collateral/debt to compare directly against
    /// [`CallOrder::collateralization`](crate::CallOrder::collateralization).
    #[must_use]
    pub fn maintenance_collateralization(&self) -> Price {
        (!self.settlement_price).scale(
            u64::from(self.maintenance_collateral_ratio),
            u64::from(COLLATERAL_RATIO_DENOM),
        )
    }
}

/// Test helpers.
#[cfg(any(test, feature = "test-helpers"))]
impl PriceFeed {
    /// A feed at `debt_per_collateral` (as a plain integer pair) with common
    /// ratios: MCR 1.75x, MSSR 1.10x, no MCFR.
    pub fn dummy(
        debt: i64,
        debt_asset: crate::AssetId,
        collateral: i64,
        collateral_asset: crate::AssetId,
    ) -> Self {
        Self {
            settlement_price: Price::new(
                crate::AssetAmount::new(debt, debt_asset),
                crate::AssetAmount::new(collateral, collateral_asset),
            )
            .unwrap(),
            maintenance_collateral_ratio: 1750,
            maximum_short_squeeze_ratio: 1100,
            margin_call_fee_ratio: None,
        }
    }
}
