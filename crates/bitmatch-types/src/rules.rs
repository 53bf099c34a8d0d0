//! The rule-version resolver.
//!
//! Matching behavior changed several times over the chain's history, always
//! activated at a protocol-upgrade timestamp. Instead of sprinkling
//! timestamp comparisons through the kernel, the resolver turns the block
//! time into one [`RuleSet`] per operation, and every call site consults a
//! named flag. The full catalogue of historical behavior changes lives
//! here and nowhere else.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// The protocol-upgrade timestamps, in activation order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HardforkSchedule {
    /// A taker that would receive zero even at the match price is treated
    /// as filled and cancelled instead of donating its dust.
    pub dust_cancel: DateTime<Utc>,
    /// Partial fills round the larger order's payment up instead of letting
    /// the smaller order donate the remainder; dust remainders are culled
    /// eagerly.
    pub rounding_fix: DateTime<Utc>,
    /// Cancelling a limit order charges a fee (capped at the deferred
    /// amount) routed to the referral program instead of refunding it all.
    pub cancel_fee: DateTime<Utc>,
    /// Target collateral ratio honored on margin-call fills.
    pub target_cr: DateTime<Utc>,
    /// Margin calls match as takers against the limit book at the maker's
    /// price, and collateralization is recomputed instead of read from the
    /// cached call price.
    pub call_as_taker: DateTime<Utc>,
    /// Margin-call fee: MCOP accounts for the feed's MCFR and the residual
    /// is credited to the issuer.
    pub margin_call_fee: DateTime<Utc>,
    /// Individual settlement response modes become available.
    pub individual_settlement: DateTime<Utc>,
    /// Margin calls match directly against queued force settlements when no
    /// limit order qualifies.
    pub settle_match: DateTime<Utc>,
}

impl HardforkSchedule {
    /// The production schedule.
    #[must_use]
    pub fn mainnet() -> Self {
        let at = |y, mo, d| Utc.with_ymd_and_hms(y, mo, d, 0, 0, 0).unwrap();
        Self {
            dust_cancel: at(2016, 3, 23),
            rounding_fix: at(2016, 6, 1),
            cancel_fee: at(2017, 3, 15),
            target_cr: at(2019, 1, 19),
            call_as_taker: at(2019, 1, 19),
            margin_call_fee: at(2021, 5, 13),
            individual_settlement: at(2022, 10, 26),
            settle_match: at(2022, 10, 26),
        }
    }
}

/// The resolved behavior flags for one block time. Pure data; resolving is
/// the only place a timestamp is ever compared.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleSet {
    pub dust_cancel: bool,
    /// Round up the larger side's payment; cull dust eagerly.
    pub round_up_avoids_dust: bool,
    pub cancel_fee_to_referral: bool,
    pub target_cr_enabled: bool,
    /// False selects the legacy cached-call-price matching.
    pub call_orders_are_takers: bool,
    pub margin_call_fee_enabled: bool,
    pub individual_settlement_enabled: bool,
    pub settle_orders_match_calls: bool,
}

impl RuleSet {
    /// Resolve the flags active at `at`.
    #[must_use]
    pub fn resolve(schedule: &HardforkSchedule, at: DateTime<Utc>) -> Self {
        Self {
            dust_cancel: at >= schedule.dust_cancel,
            round_up_avoids_dust: at >= schedule.rounding_fix,
            cancel_fee_to_referral: at >= schedule.cancel_fee,
            target_cr_enabled: at >= schedule.target_cr,
            call_orders_are_takers: at >= schedule.call_as_taker,
            margin_call_fee_enabled: at >= schedule.margin_call_fee,
            individual_settlement_enabled: at >= schedule.individual_settlement,
            settle_orders_match_calls: at >= schedule.settle_match,
        }
    }

    /// Every behavior change active, as a current chain runs.
    #[must_use]
    pub fn latest() -> Self {
        Self {
            dust_cancel: true,
            round_up_avoids_dust: true,
            cancel_fee_to_referral: true,
            target_cr_enabled: true,
            call_orders_are_takers: true,
            margin_call_fee_enabled: true,
            individual_settlement_enabled: true,
            settle_orders_match_calls: true,
        }
    }

    /// Genesis behavior, nothing active.
    #[must_use]
    pub fn genesis() -> Self {
        Self {
            dust_cancel: false,
            round_up_avoids_dust: false,
            cancel_fee_to_referral: false,
            target_cr_enabled: false,
            call_orders_are_takers: false,
            margin_call_fee_enabled: false,
            individual_settlement_enabled: false,
            settle_orders_match_calls: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn genesis_time_resolves_to_nothing() {
        let schedule = HardforkSchedule::mainnet();
        let rules = RuleSet::resolve(&schedule, Utc.with_ymd_and_hms(2015, 1, 1, 0, 0, 0).unwrap());
        assert_eq!(rules, RuleSet::genesis());
    }

    #[test]
    fn far_future_resolves_to_latest() {
        let schedule = HardforkSchedule::mainnet();
        let rules = RuleSet::resolve(&schedule, Utc.with_ymd_and_hms(2030, 1, 1, 0, 0, 0).unwrap());
        assert_eq!(rules, RuleSet::latest());
    }

    #[test]
    fn activation_is_inclusive() {
        let schedule = HardforkSchedule::mainnet();
        let rules = RuleSet::resolve(&schedule, schedule.rounding_fix);
        assert!(rules.round_up_avoids_dust);
        assert!(!rules.cancel_fee_to_referral);
    }

    #[test]
    fn mid_history_mixes_flags() {
        let schedule = HardforkSchedule::mainnet();
        let rules = RuleSet::resolve(&schedule, Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap());
        assert!(rules.call_orders_are_takers);
        assert!(rules.target_cr_enabled);
        assert!(!rules.margin_call_fee_enabled);
        assert!(!rules.settle_orders_match_calls);
    }
}
