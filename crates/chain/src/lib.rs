//! CampusCoin chain gateway
//!
//! Thin, stateless client for the two deployed on-chain programs:
//!
//! - **Token program**: access-controlled fungible token. Admin mints,
//!   students receive; the student allow-list is enforced in the mint
//!   path on-chain.
//! - **Reward program**: per-activity completion registry. One
//!   completion record per (student, activity); a second completion for
//!   the same pair reverts at the contract level.
//!
//! Supports two modes:
//! - **Mock mode**: for development/testing without a Solana node. All
//!   contract invariants are enforced against in-memory state.
//! - **Live mode**: actual RPC calls against the deployed programs.
//!
//! All privileged submissions are signed by the single authority
//! account. Because the chain assigns that account a strictly ordered
//! transaction sequence, writes must not race: route them through the
//! [`AuthoritySubmitter`] queue, which keeps one submission in flight at
//! a time and retries transient node failures with bounded backoff.

mod client;
mod submitter;
mod types;

pub use client::{ChainClient, ChainConfig, ChainMode};
pub use submitter::{spawn_authority_submitter, ChainJob, SubmitterHandle};
pub use types::*;

use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum ChainError {
    /// Node unreachable or timed out. Retryable with backoff.
    #[error("chain unavailable: {0}")]
    Unavailable(String),

    /// Contract-level rejection. Not retryable.
    #[error("transaction reverted: {0}")]
    Reverted(String),

    #[error("not authorized: signing key missing or not the admin")]
    NotAuthorized,

    #[error("address is not a registered student")]
    NotStudent,

    #[error("on-chain activity {0} not found")]
    ActivityNotFound(u64),

    #[error("on-chain activity {0} is inactive")]
    ActivityInactive(u64),

    #[error("activity {activity_id} already completed for this account")]
    AlreadyCompleted { activity_id: u64 },
}

impl ChainError {
    /// Whether a retry with backoff can reasonably succeed
    pub fn is_retryable(&self) -> bool {
        matches!(self, ChainError::Unavailable(_))
    }
}

pub type Result<T> = std::result::Result<T, ChainError>;
