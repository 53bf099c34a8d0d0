//! # bitmatch-types
//!
//! Shared types for the **bitmatch** matching and settlement kernel.
//!
//! This crate is the leaf dependency of the workspace: every other crate
//! depends on it. It defines:
//!
//! - **Identifiers**: [`AccountId`], [`AssetId`], [`OrderId`], [`CallOrderId`],
//!   [`SettlementId`], [`BidId`]: plain sequence numbers, deterministic
//!   across replaying nodes
//! - **Numerics**: [`AssetAmount`] and [`Price`] with consensus-exact
//!   directed rounding
//! - **Book entities**: [`LimitOrder`], [`CallOrder`], [`ForceSettlement`],
//!   [`CollateralBid`]
//! - **Bitasset state**: [`BitassetState`], [`PriceFeed`],
//!   [`BlackSwanResponse`], [`MarketFeeParams`]
//! - **Rule versions**: [`HardforkSchedule`], [`RuleSet`], the one place
//!   protocol-upgrade timestamps are compared
//! - **Events**: [`EventSink`], [`Notice`], [`BalanceEffect`]
//! - **Errors**: [`BitmatchError`] with `BM_ERR_` prefix codes
//! - **Context**: [`ExecContext`] threaded through every kernel function

pub mod amount;
pub mod bitasset;
pub mod constants;
pub mod context;
pub mod error;
pub mod events;
pub mod feed;
pub mod ids;
pub mod order;
pub mod price;
pub mod rules;

pub use amount::*;
pub use bitasset::*;
pub use context::*;
pub use error::*;
pub use events::*;
pub use feed::*;
pub use ids::*;
pub use order::*;
pub use price::*;
pub use rules::*;

// Constants are accessed via `bitmatch_types::constants::FOO`
// (not re-exported to avoid name collisions).
