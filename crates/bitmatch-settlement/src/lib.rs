//! # bitmatch-settlement
//!
//! **Settlement Plane**: ledger state, balances, and operation dispatch.
//!
//! ## Architecture
//!
//! The settlement plane wraps the matching kernel in the state it is the
//! transition function for. Each inbound operation:
//! 1. Validates against the registries and the balance sheet
//! 2. Escrows the funds the operation commits
//! 3. Invokes the matching kernel
//! 4. Applies the balance effects the kernel emitted
//! 5. Checks the supply conservation invariant
//!
//! Steps 1-5 are atomic: any failure rolls the ledger back to the state
//! before the operation and nothing is observed. Determinism end to end,
//! every replica applying the same operations reaches identical state.

pub mod balances;
pub mod ledger;
pub mod ops;

pub use balances::BalanceSheet;
pub use ledger::{AccountRecord, AssetRecord, Ledger};
pub use ops::PlaceOutcome;
