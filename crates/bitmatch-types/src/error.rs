//! Error types for the bitmatch kernel.
//!
//! All errors use the `BM_ERR_` prefix convention for easy grepping in logs.
//! Error codes are grouped by subsystem:
//! - 1xx: Order errors
//! - 2xx: Balance errors
//! - 3xx: Margin / call-order errors
//! - 4xx: Settlement errors
//! - 5xx: Matching errors
//! - 6xx: Feed / bitasset errors
//! - 9xx: Internal invariant violations
//!
//! Production code treats the 9xx paths as
//! unreachable, and any occurrence in a test run is a bug, not a condition
//! to recover from. Everything else is a business-rule violation that aborts
//! (and rolls back) the enclosing operation.

use thiserror::Error;

use crate::{AccountId, AssetId, BidId, CallOrderId, OrderId, SettlementId};

/// Central error enum for all kernel operations.
#[derive(Debug, Error)]
pub enum BitmatchError {
    // =================================================================
    // Order Errors (1xx)
    // =================================================================
    /// The requested limit order does not exist (already filled or cancelled).
    #[error("BM_ERR_100: Order not found: {0}")]
    OrderNotFound(OrderId),

    /// The order failed validation (zero amounts, bad asset pair, ...).
    #[error("BM_ERR_101: Invalid order: {reason}")]
    InvalidOrder { reason: String },

    /// An order with this id already exists in the book.
    #[error("BM_ERR_102: Order already exists: {0}")]
    DuplicateOrder(OrderId),

    /// A fill-or-kill order could not be completely filled.
    #[error("BM_ERR_103: Fill-or-kill order not fully filled: {0}")]
    FillOrKillUnfilled(OrderId),

    /// Only the order owner may cancel it.
    #[error("BM_ERR_104: Account {account} does not own {order}")]
    NotOrderOwner { account: AccountId, order: OrderId },

    // =================================================================
    // Balance Errors (2xx)
    // =================================================================
    /// Not enough balance to perform the operation.
    #[error("BM_ERR_200: Insufficient balance of {asset}: need {needed}, have {available}")]
    InsufficientBalance {
        asset: AssetId,
        needed: i64,
        available: i64,
    },

    /// An amount exceeded `MAX_SHARE_SUPPLY` or an `i64` bound.
    #[error("BM_ERR_201: Amount overflow")]
    AmountOverflow,

    /// A balance operation would produce a negative value.
    #[error("BM_ERR_202: Balance underflow")]
    BalanceUnderflow,

    // =================================================================
    // Margin / Call-Order Errors (3xx)
    // =================================================================
    /// The requested margin position does not exist.
    #[error("BM_ERR_300: Call order not found: {0}")]
    CallOrderNotFound(CallOrderId),

    /// The position would be below the maintenance collateral ratio.
    #[error("BM_ERR_301: Insufficient collateral for call {0}")]
    InsufficientCollateral(CallOrderId),

    /// The update failed validation (zero deltas, bad TCR, ...).
    #[error("BM_ERR_302: Invalid call order update: {reason}")]
    InvalidCallUpdate { reason: String },

    /// A black swan would occur and the caller did not permit one.
    #[error("BM_ERR_303: Black swan detected for {0} without permission")]
    BlackSwanBlocked(AssetId),

    // =================================================================
    // Settlement Errors (4xx)
    // =================================================================
    /// The asset is globally settled; the operation is not available.
    #[error("BM_ERR_400: Asset {0} is globally settled")]
    GloballySettled(AssetId),

    /// The operation requires the asset to be globally settled.
    #[error("BM_ERR_401: Asset {0} is not globally settled")]
    NotGloballySettled(AssetId),

    /// The requested force settlement does not exist.
    #[error("BM_ERR_402: Force settlement not found: {0}")]
    SettlementNotFound(SettlementId),

    /// The requested collateral bid does not exist.
    #[error("BM_ERR_403: Collateral bid not found: {0}")]
    BidNotFound(BidId),

    /// Revival preconditions are not met (outstanding supply not covered).
    #[error("BM_ERR_404: Asset {0} cannot be revived yet")]
    ReviveNotReady(AssetId),

    /// The bid failed validation.
    #[error("BM_ERR_405: Invalid collateral bid: {reason}")]
    InvalidBid { reason: String },

    // =================================================================
    // Matching Errors (5xx)
    // =================================================================
    /// The matching algorithm was handed inconsistent inputs.
    #[error("BM_ERR_500: Matching failed: {reason}")]
    MatchingFailed { reason: String },

    // =================================================================
    // Feed / Bitasset Errors (6xx)
    // =================================================================
    /// The asset is not a smart (debt-backed) asset.
    #[error("BM_ERR_600: Asset {0} is not a smart asset")]
    NotSmartAsset(AssetId),

    /// No current price feed is published for the asset.
    #[error("BM_ERR_601: No price feed for asset {0}")]
    NoPriceFeed(AssetId),

    /// The published feed failed validation.
    #[error("BM_ERR_602: Invalid price feed: {reason}")]
    InvalidFeed { reason: String },

    /// The referenced asset does not exist.
    #[error("BM_ERR_603: Asset not found: {0}")]
    AssetNotFound(AssetId),

    // =================================================================
    // Internal Invariant Violations (9xx)
    // =================================================================
    /// Arithmetic across two different assets outside a `Price`.
    #[error("BM_ERR_900: Mismatched assets: {a} vs {b}")]
    MismatchedAssets { a: AssetId, b: AssetId },

    /// A "this should never happen" condition.
    #[error("BM_ERR_901: Internal invariant violated: {0}")]
    InternalInvariant(String),
}

impl BitmatchError {
    /// True for the 9xx class that signals a kernel bug rather than a
    /// rejectable operation.
    #[must_use]
    pub fn is_internal(&self) -> bool {
        matches!(
            self,
            Self::MismatchedAssets { .. } | Self::InternalInvariant(_)
        )
    }
}

/// Crate-wide `Result` alias.
pub type Result<T> = std::result::Result<T, BitmatchError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_contains_prefix() {
        let err = BitmatchError::OrderNotFound(OrderId(1));
        assert!(format!("{err}").starts_with("BM_ERR_100"));
    }

    #[test]
    fn internal_classification() {
        assert!(BitmatchError::InternalInvariant("x".into()).is_internal());
        assert!(
            !BitmatchError::BlackSwanBlocked(AssetId(1)).is_internal(),
            "a blocked swan is a business-rule rejection"
        );
    }

    #[test]
    fn insufficient_balance_display() {
        let err = BitmatchError::InsufficientBalance {
            asset: AssetId(2),
            needed: 100,
            available: 40,
        };
        let msg = format!("{err}");
        assert!(msg.contains("BM_ERR_200"));
        assert!(msg.contains("100"));
        assert!(msg.contains("40"));
    }
}
