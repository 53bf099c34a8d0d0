//! Exchange-rate ratios with consensus-exact rounding.
//!
//! A [`Price`] is a ratio of two asset amounts, read as "base per quote".
//! All comparisons cross-multiply in `i128`, so two prices are equal iff
//! they denote the same rational number, regardless of representation.
//! Conversions through a price come in exactly two rounding flavors,
//! [`AssetAmount::multiply`] (round down) and
//! [`AssetAmount::multiply_round_up`], and every call site picks one
//! deliberately; the direction is part of consensus.

use std::cmp::Ordering;
use std::ops::Not;

use serde::{Deserialize, Serialize};

use crate::constants::MAX_SHARE_SUPPLY;
use crate::{AssetAmount, AssetId, BitmatchError, Result};

/// A ratio of two asset amounts: `base / quote`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Price {
    pub base: AssetAmount,
    pub quote: AssetAmount,
}

impl Price {
    /// Build a price, rejecting zero amounts and same-asset pairs.
    pub fn new(base: AssetAmount, quote: AssetAmount) -> Result<Self> {
        if base.amount <= 0 || quote.amount <= 0 {
            return Err(BitmatchError::InvalidOrder {
                reason: "price amounts must be positive".into(),
            });
        }
        if base.asset_id == quote.asset_id {
            return Err(BitmatchError::MismatchedAssets {
                a: base.asset_id,
                b: quote.asset_id,
            });
        }
        Ok(Self { base, quote })
    }

    /// Canonical maximum price for an asset pair (upper index bound).
    #[must_use]
    pub fn max(base: AssetId, quote: AssetId) -> Self {
        Self {
            base: AssetAmount::new(MAX_SHARE_SUPPLY, base),
            quote: AssetAmount::new(1, quote),
        }
    }

    /// Canonical minimum price for an asset pair (lower index bound).
    #[must_use]
    pub fn min(base: AssetId, quote: AssetId) -> Self {
        Self {
            base: AssetAmount::new(1, base),
            quote: AssetAmount::new(MAX_SHARE_SUPPLY, quote),
        }
    }

    /// Legacy cached call price: `collateral / (debt * mcr)`, the price at
    /// which a position with the given margin becomes callable under the
    /// pre-recompute rule versions.
    #[must_use]
    pub fn call_price(debt: AssetAmount, collateral: AssetAmount, mcr: u16) -> Self {
        Self {
            base: collateral,
            quote: debt,
        }
        .scale(u64::from(crate::constants::COLLATERAL_RATIO_DENOM), u64::from(mcr))
    }

    fn same_pair(&self, other: &Self) -> bool {
        self.base.asset_id == other.base.asset_id && self.quote.asset_id == other.quote.asset_id
    }

    /// Multiply the ratio by `num / den`, reducing by gcd and then halving
    /// both sides until they fit the amount cap. The halving loses at most
    /// one bit of precision and is identical on every node.
    #[must_use]
    pub fn scale(self, num: u64, den: u64) -> Self {
        let mut n = i128::from(self.base.amount) * i128::from(num);
        let mut d = i128::from(self.quote.amount) * i128::from(den);
        let g = gcd(n, d);
        if g > 1 {
            n /= g;
            d /= g;
        }
        let cap = i128::from(MAX_SHARE_SUPPLY);
        while n > cap || d > cap {
            n >>= 1;
            d >>= 1;
        }
        Self {
            base: AssetAmount::new(n.max(1) as i64, self.base.asset_id),
            quote: AssetAmount::new(d.max(1) as i64, self.quote.asset_id),
        }
    }
}

fn gcd(mut a: i128, mut b: i128) -> i128 {
    while b != 0 {
        (a, b) = (b, a % b);
    }
    a.max(1)
}

/// `~price`: the same rate seen from the other asset's side.
impl Not for Price {
    type Output = Self;

    fn not(self) -> Self {
        Self {
            base: self.quote,
            quote: self.base,
        }
    }
}

impl PartialEq for Price {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Price {}

impl PartialOrd for Price {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Price {
    /// Compares by cross-multiplication. Comparing prices over different
    /// asset pairs is a kernel bug; the assert is the 9xx class in disguise.
    fn cmp(&self, other: &Self) -> Ordering {
        assert!(
            self.same_pair(other),
            "price comparison across asset pairs: {}/{} vs {}/{}",
            self.base.asset_id,
            self.quote.asset_id,
            other.base.asset_id,
            other.quote.asset_id
        );
        let lhs = i128::from(self.base.amount) * i128::from(other.quote.amount);
        let rhs = i128::from(other.base.amount) * i128::from(self.quote.amount);
        lhs.cmp(&rhs)
    }
}

impl AssetAmount {
    /// Convert through a price, rounding down.
    pub fn multiply(self, p: &Price) -> Result<AssetAmount> {
        self.convert(p, false)
    }

    /// Convert through a price, rounding up (in favor of the counterparty
    /// that receives this payment).
    pub fn multiply_round_up(self, p: &Price) -> Result<AssetAmount> {
        self.convert(p, true)
    }

    fn convert(self, p: &Price, round_up: bool) -> Result<AssetAmount> {
        let (num, den, out_asset) = if self.asset_id == p.base.asset_id {
            (p.quote.amount, p.base.amount, p.quote.asset_id)
        } else if self.asset_id == p.quote.asset_id {
            (p.base.amount, p.quote.amount, p.base.asset_id)
        } else {
            return Err(BitmatchError::MismatchedAssets {
                a: self.asset_id,
                b: p.base.asset_id,
            });
        };
        debug_assert!(self.amount >= 0 && num > 0 && den > 0);
        let wide = i128::from(self.amount) * i128::from(num);
        let den = i128::from(den);
        let result = if round_up {
            (wide + den - 1) / den
        } else {
            wide / den
        };
        if result > i128::from(MAX_SHARE_SUPPLY) {
            return Err(BitmatchError::AmountOverflow);
        }
        Ok(AssetAmount::new(result as i64, out_asset))
    }
}
