//! CampusCoin settlement
//!
//! The orchestrator that converts a confirmed participation into a
//! permanent credit on both ledgers:
//!
//! 1. resolve the student's wallet (callers provision first),
//! 2. self-heal the on-chain student allow-list if needed,
//! 3. record the completion in the on-chain registry when the activity
//!    is mirrored there (the hard duplicate boundary),
//! 4. mint the reward through the single-authority submitter,
//! 5. append the audit row and bump the cached balance in one local
//!    transaction.
//!
//! Writes are ordered chain-first: a chain failure leaves no local
//! trace and the operation is safe to retry. A local persistence
//! failure *after* a successful mint is the one divergence this design
//! cannot prevent; it is logged loudly and left to the reconciliation
//! sweep, which finds confirmed registrations with no matching audit
//! row.

mod service;

pub use service::{SettlementResult, SettlementService};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum SettlementError {
    /// Caller must provision a wallet before settling
    #[error("student has no wallet")]
    NoWallet,

    #[error("wallet address is not a valid account address")]
    CorruptAddress,

    #[error(transparent)]
    Chain(#[from] campuscoin_chain::ChainError),

    /// Mint landed on-chain but the local write failed — the ledgers
    /// are divergent until reconciliation corrects them.
    #[error("local persistence failed after mint {chain_ref}: {source}")]
    Persistence {
        chain_ref: String,
        #[source]
        source: campuscoin_ledger::LedgerError,
    },

    #[error(transparent)]
    Ledger(#[from] campuscoin_ledger::LedgerError),

    #[error(transparent)]
    Unit(#[from] campuscoin_core::UnitError),
}

pub type Result<T> = std::result::Result<T, SettlementError>;
