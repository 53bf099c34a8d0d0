//! Per-account, per-asset balance sheet.
//!
//! Amounts are raw `i64` units tagged by [`AssetId`]. Every mutation is
//! checked: a debit may not exceed the available balance and a credit may
//! not overflow `MAX_SHARE_SUPPLY`.

use std::collections::HashMap;

use bitmatch_types::constants::MAX_SHARE_SUPPLY;
use bitmatch_types::{AccountId, AssetAmount, AssetId, BitmatchError, Result};

/// All liquid account balances the kernel can touch.
///
/// Escrowed funds (order `for_sale`, queued settlement balances, collateral
/// inside margin positions) live in the owning index, not here.
#[derive(Debug, Clone, Default)]
pub struct BalanceSheet {
    balances: HashMap<(AccountId, AssetId), i64>,
}

impl BalanceSheet {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Current balance, zero for accounts that never held the asset.
    #[must_use]
    pub fn balance(&self, account: AccountId, asset: AssetId) -> i64 {
        self.balances.get(&(account, asset)).copied().unwrap_or(0)
    }

    /// Add `amount` to an account. Zero amounts are a no-op.
    ///
    /// # Errors
    /// Returns [`BitmatchError::AmountOverflow`] if the balance would
    /// exceed `MAX_SHARE_SUPPLY`.
    pub fn credit(&mut self, account: AccountId, amount: AssetAmount) -> Result<()> {
        if amount.amount < 0 {
            return Err(BitmatchError::InternalInvariant(format!(
                "negative credit of {} to {account}",
                amount.amount
            )));
        }
        if amount.amount == 0 {
            return Ok(());
        }
        let entry = self.balances.entry((account, amount.asset_id)).or_insert(0);
        let next = entry
            .checked_add(amount.amount)
            .ok_or(BitmatchError::AmountOverflow)?;
        if next > MAX_SHARE_SUPPLY {
            return Err(BitmatchError::AmountOverflow);
        }
        *entry = next;
        Ok(())
    }

    /// Remove `amount` from an account.
    ///
    /// # Errors
    /// Returns [`BitmatchError::InsufficientBalance`] if the account holds
    /// less than `amount`.
    pub fn debit(&mut self, account: AccountId, amount: AssetAmount) -> Result<()> {
        if amount.amount < 0 {
            return Err(BitmatchError::BalanceUnderflow);
        }
        if amount.amount == 0 {
            return Ok(());
        }
        let available = self.balance(account, amount.asset_id);
        if available < amount.amount {
            return Err(BitmatchError::InsufficientBalance {
                asset: amount.asset_id,
                needed: amount.amount,
                available,
            });
        }
        let key = (account, amount.asset_id);
        if available == amount.amount {
            self.balances.remove(&key);
        } else {
            self.balances.insert(key, available - amount.amount);
        }
        Ok(())
    }

    /// Sum of all account balances in one asset.
    #[must_use]
    pub fn total(&self, asset: AssetId) -> i64 {
        self.balances
            .iter()
            .filter(|((_, a), _)| *a == asset)
            .map(|(_, amount)| amount)
            .sum()
    }

    /// Number of nonzero (account, asset) entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.balances.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.balances.is_empty()
    }
}

// =====================================================================
// Tests
// =====================================================================
