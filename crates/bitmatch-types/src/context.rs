//! The explicit execution context threaded into every kernel function.
//!
//! The kernel never reads ambient chain state: whatever an operation needs
//! beyond the market itself arrives here, which keeps the core pure given
//! its inputs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{AssetId, RuleSet};

/// Immutable per-operation context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecContext {
    /// Current block time.
    pub now: DateTime<Utc>,
    /// Behavior flags resolved for `now`.
    pub rules: RuleSet,
    /// The native currency (collateral of last resort, fee denomination).
    pub core_asset: AssetId,
    /// Network's cut of split fees, in `PERCENT_100` units.
    pub network_fee_percent: u16,
    /// Flat cancellation fee in core units, charged only under
    /// `rules.cancel_fee_to_referral` and capped at the deferred fee.
    pub cancel_fee: i64,
}

#[cfg(any(test, feature = "test-helpers"))]
impl ExecContext {
    /// A context with every rule active, for tests.
    #[must_use]
    pub fn latest(now: DateTime<Utc>) -> Self {
        Self {
            now,
            rules: RuleSet::latest(),
            core_asset: AssetId(0),
            network_fee_percent: 2000,
            cancel_fee: 10,
        }
    }
}
