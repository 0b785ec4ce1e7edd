//! CampusCoin ledger store
//!
//! Relational persistence for users, wallets, activities, activity
//! registrations and the append-only transaction log. SQLite via sqlx
//! with WAL mode and an embedded migration.
//!
//! The store owns no reward policy. It exposes plain CRUD plus a small
//! set of *guarded* write operations — single SQL statements whose
//! `rows_affected` tells the caller whether a check-then-act transition
//! won or lost. The registration state machine and the settlement
//! service interpret those results; concurrent callers racing on the
//! same row are serialized by the database, not by Rust-side locks.

mod models;
mod store;

pub use models::*;
pub use store::Ledger;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("user not found")]
    UserNotFound,

    #[error("wallet not found")]
    WalletNotFound,

    #[error("insufficient cached balance")]
    InsufficientBalance,
}

/// Whether a sqlx error is a UNIQUE constraint violation.
///
/// Used by callers to tell "duplicate registration" / "wallet already
/// provisioned" apart from real database failures.
pub fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db) => db.is_unique_violation(),
        _ => false,
    }
}

pub type Result<T> = std::result::Result<T, LedgerError>;
