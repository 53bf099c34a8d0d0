//! System-wide constants for the bitmatch kernel.

/// Denominator for percentage values (fees): 10_000 == 100%.
pub const PERCENT_100: u16 = 10_000;

/// 1% in fee units.
pub const PERCENT_1: u16 = 100;

/// Denominator for collateral ratios (MCR / MSSR / TCR / MCFR): 1_000 == 1.0x.
pub const COLLATERAL_RATIO_DENOM: u16 = 1_000;

/// Hard cap on any single asset amount. Keeping amounts below 2^50 lets every
/// ratio product in the kernel fit in an `i128` intermediate.
pub const MAX_SHARE_SUPPLY: i64 = 1_000_000_000_000_000;

/// Largest accepted collateral ratio (32x).
pub const MAX_COLLATERAL_RATIO: u16 = 32_000;

/// Smallest accepted collateral ratio (slightly above 1x).
pub const MIN_COLLATERAL_RATIO: u16 = 1_001;

/// Version string.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Engine name.
pub const ENGINE_NAME: &str = "bitmatch";
