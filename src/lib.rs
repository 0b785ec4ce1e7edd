//! CampusCoin
//!
//! Student activity reward settlement: an off-chain registration state
//! machine and audit ledger bridged to an on-chain token via a
//! single-authority chain gateway.
//!
//! This crate is a facade over the workspace members; applications link
//! the individual crates directly, integration tests link this one.

pub use campuscoin_chain as chain;
pub use campuscoin_core as core;
pub use campuscoin_ledger as ledger;
pub use campuscoin_registry as registry;
pub use campuscoin_settlement as settlement;
pub use campuscoin_wallet as wallet;
