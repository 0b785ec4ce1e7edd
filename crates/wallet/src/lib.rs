//! CampusCoin wallet service
//!
//! One blockchain keypair per user. Provisioning is idempotent and
//! race-safe: the wallet row's user-id uniqueness decides concurrent
//! provisioners, and the loser returns the winner's wallet.
//!
//! The cached balance column is advisory. [`WalletService::sync_balance`]
//! overwrites it from the authoritative on-chain balance and is a hard
//! error when the node is unreachable; [`WalletService::sync_balance_or_cached`]
//! is the best-effort variant for display paths (login, dashboard) that
//! would rather show a stale number than fail.

mod service;

pub use service::{WalletReadModel, WalletService};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum WalletError {
    #[error("user does not exist")]
    InvalidUser,

    #[error("no wallet provisioned for this user")]
    NoWallet,

    #[error("stored wallet key material is corrupt")]
    CorruptKey,

    #[error("insufficient balance")]
    InsufficientBalance,

    #[error(transparent)]
    Chain(#[from] campuscoin_chain::ChainError),

    #[error(transparent)]
    Ledger(#[from] campuscoin_ledger::LedgerError),

    #[error(transparent)]
    Unit(#[from] campuscoin_core::UnitError),
}

pub type Result<T> = std::result::Result<T, WalletError>;
