//! Registration state machine
//!
//! Governs the lifecycle of a student's participation in an activity:
//!
//! ```text
//! Registered -> Approved -> ParticipationConfirmed -> RewardIssued
//! ```
//!
//! `RewardIssued` is derived, not stored: a registration is in that
//! state when participation is confirmed AND a reward row exists in the
//! transaction log. Every transition is a guarded write-once flip in the
//! ledger, so two concurrent requests for the same transition resolve to
//! exactly one winner — the confirm transition in particular is the sole
//! settlement trigger and can only ever fire once per registration.

mod service;

pub use service::{ConfirmedParticipation, RegistrationService, RegistrationState};

use thiserror::Error;

/// Rejection reasons reported verbatim to the calling layer.
///
/// These are terminal validation outcomes, never retried, and none of
/// them touches the chain.
#[derive(Error, Debug)]
pub enum RegistrationError {
    #[error("student not found")]
    StudentNotFound,

    #[error("activity not found")]
    ActivityNotFound,

    #[error("activity is no longer active")]
    ActivityInactive,

    #[error("registration window has closed")]
    RegistrationClosed,

    #[error("class not allowed for this activity")]
    ClassNotAllowed,

    #[error("already registered for this activity")]
    AlreadyRegistered,

    #[error("activity has no remaining slots")]
    SlotsFull,

    #[error("no registration exists for this activity")]
    NotRegistered,

    #[error("registration is not yet approved")]
    NotApproved,

    #[error("registration is already approved")]
    AlreadyApproved,

    #[error("participation is already confirmed")]
    AlreadyConfirmed,

    #[error(transparent)]
    Ledger(#[from] campuscoin_ledger::LedgerError),
}

pub type Result<T> = std::result::Result<T, RegistrationError>;
