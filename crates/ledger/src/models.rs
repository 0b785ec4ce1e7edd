//! Row types for the ledger tables

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// A user known to the ledger. Students carry a student code and a class
/// name; administrators have neither.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct UserRow {
    pub id: String,
    pub student_code: Option<String>,
    pub full_name: String,
    pub class_name: Option<String>,
    pub is_student: bool,
    /// Training points accumulated through coin conversion
    pub training_points: i64,
}

/// One blockchain wallet per user.
///
/// `balance` is the cached base-unit balance — a derived, advisory value.
/// The on-chain balance is authoritative; reconciliation overwrites this
/// column, it is never trusted for settlement decisions.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct WalletRow {
    pub id: i64,
    pub user_id: String,
    /// Hex-encoded 32-byte account address
    pub address: String,
    /// Raw ed25519 secret key bytes
    #[serde(skip_serializing)]
    pub secret_key: Vec<u8>,
    pub balance: i64,
    pub created_at: i64,
}

/// An activity students can register for
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ActivityRow {
    pub id: i64,
    pub name: String,
    pub description: String,
    /// Reward in whole tokens
    pub reward_amount: i64,
    pub max_participants: i64,
    pub start_date: i64,
    pub end_date: i64,
    /// CSV of allowed class names; NULL or empty = unrestricted
    pub allowed_classes: Option<String>,
    pub auto_approve: bool,
    pub is_active: bool,
    /// Id of the mirrored activity in the on-chain completion registry.
    /// The two id spaces are independent; this column is the mapping.
    pub chain_activity_id: Option<i64>,
    pub created_at: i64,
}

impl ActivityRow {
    /// Whether a student of `class_name` passes the allowed-class restriction
    pub fn class_allowed(&self, class_name: Option<&str>) -> bool {
        match self.allowed_classes.as_deref() {
            None | Some("") => true,
            Some(csv) => match class_name {
                Some(class) => csv.split(',').any(|c| c.trim() == class),
                None => false,
            },
        }
    }
}

/// A student's registration for an activity — the state machine instance.
///
/// The boolean flags are write-once: once set they are never reset, and
/// the guarded UPDATE statements in [`crate::Ledger`] refuse to set them
/// twice.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct RegistrationRow {
    pub id: i64,
    pub student_id: String,
    pub activity_id: i64,
    pub registered_at: i64,
    pub is_approved: bool,
    pub approved_at: Option<i64>,
    pub is_participation_confirmed: bool,
    pub participation_confirmed_at: Option<i64>,
    pub evidence_image_url: Option<String>,
}

/// Append-only audit row
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct TransactionLogRow {
    pub id: i64,
    pub user_id: String,
    pub activity_id: Option<i64>,
    /// Signed base units: positive for rewards, negative for conversions
    pub amount: i64,
    pub transaction_type: String,
    pub description: String,
    /// Hex-encoded on-chain transaction signature, when one exists
    pub chain_ref: Option<String>,
    pub created_at: i64,
}

/// A confirmed participation with no matching reward log row — the
/// divergence alert surfaced by the reconciliation sweep.
#[derive(Debug, Clone, FromRow)]
pub struct UnsettledConfirmation {
    pub student_id: String,
    pub activity_id: i64,
    pub participation_confirmed_at: Option<i64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn activity_with_classes(csv: Option<&str>) -> ActivityRow {
        ActivityRow {
            id: 1,
            name: "Test".into(),
            description: String::new(),
            reward_amount: 10,
            max_participants: 5,
            start_date: 0,
            end_date: i64::MAX,
            allowed_classes: csv.map(String::from),
            auto_approve: false,
            is_active: true,
            chain_activity_id: None,
            created_at: 0,
        }
    }

    #[test]
    fn test_class_allowed_unrestricted() {
        let a = activity_with_classes(None);
        assert!(a.class_allowed(Some("B1")));
        assert!(a.class_allowed(None));

        let a = activity_with_classes(Some(""));
        assert!(a.class_allowed(Some("B1")));
    }

    #[test]
    fn test_class_allowed_restricted() {
        let a = activity_with_classes(Some("A1,A2"));
        assert!(a.class_allowed(Some("A1")));
        assert!(a.class_allowed(Some("A2")));
        assert!(!a.class_allowed(Some("B1")));
        assert!(!a.class_allowed(None));
    }

    #[test]
    fn test_class_allowed_trims_whitespace() {
        let a = activity_with_classes(Some("A1, A2"));
        assert!(a.class_allowed(Some("A2")));
    }
}
