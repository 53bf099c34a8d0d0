//! # bitmatch-matchcore
//!
//! **Pure deterministic matching kernel for bitmatch.**
//!
//! The kernel is the compute plane -- it takes one market's state plus an
//! execution context and produces book mutations and an event stream. It
//! has:
//!
//! - **Zero balance knowledge**: every value movement is an emitted
//!   [`BalanceEffect`](bitmatch_types::BalanceEffect) for the settlement
//!   plane to apply
//! - **Deterministic output**: integer-rational prices, explicit rounding
//!   directions, total orderings everywhere
//! - **Rule-versioned behavior**: every historical matching change is a
//!   flag resolved from the block time, never an inline timestamp check
//!
//! Entry points: [`Matcher::apply_limit_order`] for order flow,
//! [`Matcher::sweep_margin_calls`] after anything that moves prices or
//! collateral, and the settlement/swan methods for the rest of a smart
//! asset's life cycle.

pub mod book;
pub mod engine;
pub mod fees;
pub mod settle;
pub mod swan;
pub mod sweeper;
pub mod tcr;

pub use book::{BidQueue, BookSide, CallIndex, LimitBook, MarketState, SettlementQueue};
pub use engine::{MatchOutcome, Matcher};
pub use fees::{FeeSplit, calculate_market_fee, force_settle_fee, pay_market_fees, split_market_fee};
pub use tcr::max_debt_to_cover;
