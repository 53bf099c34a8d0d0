//! Events emitted by the matching kernel.
//!
//! The kernel mutates books and bitasset state directly but never touches a
//! balance. Everything that moves value is expressed as a [`BalanceEffect`]
//! and applied by the settlement plane; everything a history/indexing
//! collaborator needs to observe is a [`Notice`]. One [`EventSink`] instance
//! lives for the duration of one operation, so a rollback discards both
//! streams together with the state mutations.

use serde::{Deserialize, Serialize};

use crate::{
    AccountId, AssetAmount, AssetId, BidId, CallOrderId, OrderId, Price, SettlementId,
};

/// Which book entity a fill touched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderRef {
    Limit(OrderId),
    Call(CallOrderId),
    Settlement(SettlementId),
    /// The individual-settlement fund acting as a virtual counterparty.
    SettlementFund(AssetId),
}

/// One side of a match. `pays` and `receives` are gross; `fee` is the slice
/// of `receives` withheld (market fee) or of `pays` retained by the issuer
/// (margin-call fee).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fill {
    pub order: OrderRef,
    pub account: AccountId,
    pub pays: AssetAmount,
    pub receives: AssetAmount,
    pub fee: AssetAmount,
    pub fill_price: Price,
    pub is_maker: bool,
}

/// Outbound notifications, one per observable state change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Notice {
    Fill(Fill),
    Cancel {
        order: OrderId,
        account: AccountId,
        refund: AssetAmount,
        fee_refund: i64,
    },
    SettleCancelled {
        settlement: SettlementId,
        account: AccountId,
        refund: AssetAmount,
    },
    PositionClosed {
        call: CallOrderId,
        borrower: AccountId,
        collateral_returned: AssetAmount,
    },
    BlackSwan {
        asset: AssetId,
        /// True for a global settlement, false for an individual one.
        global: bool,
        settlement_price: Price,
    },
    AssetRevived {
        asset: AssetId,
    },
    BidExecuted {
        bid: BidId,
        bidder: AccountId,
        debt: AssetAmount,
        collateral: AssetAmount,
    },
    /// A fully filled order carried a take-profit link; chaining is the
    /// order layer's job.
    TakeProfitTriggered {
        order: OrderId,
        linked: OrderId,
    },
}

/// A single balance mutation for the settlement plane to apply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum BalanceEffect {
    /// Credit an account; supply unchanged.
    Credit { account: AccountId, amount: AssetAmount },
    /// Credit an account and grow the asset's supply (borrowing).
    Issue { account: AccountId, amount: AssetAmount },
    /// Destroy units, shrinking the asset's supply (debt covered/settled).
    Burn { amount: AssetAmount },
    /// Accrue an ordinary market fee to the asset's own fee pool.
    AccrueMarketFee { asset: AssetId, amount: i64 },
    /// Accrue a collateral-denominated fee (margin-call or force-settle
    /// fee) to the debt asset's collateral fee pool.
    AccrueCollateralFee { asset: AssetId, amount: AssetAmount },
    /// Network's share of a split fee.
    Network { amount: AssetAmount },
    /// Referral reward for `seller`'s referrer, subject to the asset's
    /// fee-sharing whitelist; falls back to the issuer pool when gated.
    ReferralReward { seller: AccountId, amount: AssetAmount },
}

/// Collects everything one operation emits.
#[derive(Debug, Default)]
pub struct EventSink {
    pub notices: Vec<Notice>,
    pub effects: Vec<BalanceEffect>,
}

impl EventSink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn notice(&mut self, n: Notice) {
        self.notices.push(n);
    }

    pub fn effect(&mut self, e: BalanceEffect) {
        self.effects.push(e);
    }

    /// Credit, skipping zero amounts to keep effect streams minimal.
    pub fn credit(&mut self, account: AccountId, amount: AssetAmount) {
        if !amount.is_zero() {
            self.effect(BalanceEffect::Credit { account, amount });
        }
    }

    pub fn burn(&mut self, amount: AssetAmount) {
        if !amount.is_zero() {
            self.effect(BalanceEffect::Burn { amount });
        }
    }

    pub fn fills(&self) -> impl Iterator<Item = &Fill> {
        self.notices.iter().filter_map(|n| match n {
            Notice::Fill(f) => Some(f),
            _ => None,
        })
    }
}
