//! Fixed-point asset amounts.
//!
//! An [`AssetAmount`] is an integer quantity tagged with the asset it
//! denominates. Arithmetic between amounts of different assets is forbidden
//! everywhere except through a [`Price`](crate::Price) conversion; mixing
//! them is a 9xx internal error, not a recoverable condition.

use serde::{Deserialize, Serialize};

use crate::constants::MAX_SHARE_SUPPLY;
use crate::{AssetId, BitmatchError, Result};

/// An integer amount of one specific asset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AssetAmount {
    pub amount: i64,
    pub asset_id: AssetId,
}

impl AssetAmount {
    #[must_use]
    pub fn new(amount: i64, asset_id: AssetId) -> Self {
        Self { amount, asset_id }
    }

    #[must_use]
    pub fn zero(asset_id: AssetId) -> Self {
        Self { amount: 0, asset_id }
    }

    #[must_use]
    pub fn is_zero(&self) -> bool {
        self.amount == 0
    }

    fn require_same_asset(&self, other: &Self) -> Result<()> {
        if self.asset_id == other.asset_id {
            Ok(())
        } else {
            Err(BitmatchError::MismatchedAssets {
                a: self.asset_id,
                b: other.asset_id,
            })
        }
    }

    pub fn checked_add(self, other: Self) -> Result<Self> {
        self.require_same_asset(&other)?;
        let amount = self
            .amount
            .checked_add(other.amount)
            .ok_or(BitmatchError::AmountOverflow)?;
        if amount > MAX_SHARE_SUPPLY {
            return Err(BitmatchError::AmountOverflow);
        }
        Ok(Self { amount, asset_id: self.asset_id })
    }

    pub fn checked_sub(self, other: Self) -> Result<Self> {
        self.require_same_asset(&other)?;
        let amount = self
            .amount
            .checked_sub(other.amount)
            .ok_or(BitmatchError::BalanceUnderflow)?;
        if amount < 0 {
            return Err(BitmatchError::BalanceUnderflow);
        }
        Ok(Self { amount, asset_id: self.asset_id })
    }
}

impl std::fmt::Display for AssetAmount {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.amount, self.asset_id)
    }
}
