//! Registration transitions over the ledger's guarded writes

use chrono::Utc;
use tracing::{debug, info};

use campuscoin_ledger::{
    is_unique_violation, ActivityRow, Ledger, LedgerError, RegistrationRow, UserRow,
};

use crate::{RegistrationError, Result};

/// Observable state of one (student, activity) registration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistrationState {
    Registered,
    Approved,
    ParticipationConfirmed,
    /// Confirmed and a reward row exists in the transaction log
    RewardIssued,
}

/// A freshly confirmed participation — the settlement trigger.
///
/// Produced at most once per registration: the underlying flag is
/// write-once, so a second confirm attempt cannot mint this value again.
#[derive(Debug, Clone)]
pub struct ConfirmedParticipation {
    pub student_id: String,
    pub activity_id: i64,
    pub activity_name: String,
    /// Reward in whole tokens at confirmation time
    pub reward_amount: u64,
    /// On-chain completion-registry id, when the activity is mirrored
    pub chain_activity_id: Option<u64>,
}

/// The registration state machine service
#[derive(Clone)]
pub struct RegistrationService {
    ledger: Ledger,
}

impl RegistrationService {
    pub fn new(ledger: Ledger) -> Self {
        Self { ledger }
    }

    async fn student_by_code(&self, student_code: &str) -> Result<UserRow> {
        let user = self
            .ledger
            .user_by_student_code(student_code)
            .await?
            .ok_or(RegistrationError::StudentNotFound)?;
        if !user.is_student {
            return Err(RegistrationError::StudentNotFound);
        }
        Ok(user)
    }

    async fn activity(&self, activity_id: i64) -> Result<ActivityRow> {
        self.ledger
            .activity_by_id(activity_id)
            .await?
            .ok_or(RegistrationError::ActivityNotFound)
    }

    /// Register a student for an activity.
    ///
    /// Validates activity liveness, the registration window and the
    /// allowed-class restriction, then attempts the capacity-guarded
    /// insert. Auto-approve activities enter the approved state
    /// immediately, with the approval instant equal to the registration
    /// instant.
    pub async fn register(
        &self,
        student_code: &str,
        activity_id: i64,
    ) -> Result<RegistrationRow> {
        let student = self.student_by_code(student_code).await?;
        let activity = self.activity(activity_id).await?;

        if !activity.is_active {
            return Err(RegistrationError::ActivityInactive);
        }
        if Utc::now().timestamp() > activity.end_date {
            return Err(RegistrationError::RegistrationClosed);
        }
        if !activity.class_allowed(student.class_name.as_deref()) {
            return Err(RegistrationError::ClassNotAllowed);
        }

        let inserted = self
            .ledger
            .insert_registration_if_capacity(
                &student.id,
                activity_id,
                activity.max_participants,
                activity.auto_approve,
            )
            .await
            .map_err(|e| match e {
                LedgerError::Database(ref db) if is_unique_violation(db) => {
                    RegistrationError::AlreadyRegistered
                }
                other => RegistrationError::Ledger(other),
            })?;
        if !inserted {
            return Err(RegistrationError::SlotsFull);
        }

        info!(
            "Student {} registered for activity {} ({})",
            student_code,
            activity_id,
            if activity.auto_approve { "auto-approved" } else { "pending approval" },
        );

        self.ledger
            .registration(&student.id, activity_id)
            .await?
            .ok_or(RegistrationError::NotRegistered)
    }

    /// Approve a registration (administrator action).
    ///
    /// Approving an already-approved registration is rejected, not
    /// silently accepted.
    pub async fn approve(
        &self,
        activity_id: i64,
        student_code: &str,
    ) -> Result<RegistrationRow> {
        let student = self.student_by_code(student_code).await?;

        self.ledger
            .registration(&student.id, activity_id)
            .await?
            .ok_or(RegistrationError::NotRegistered)?;

        let flipped = self
            .ledger
            .mark_registration_approved(&student.id, activity_id)
            .await?;
        if !flipped {
            debug!(
                "Approve rejected for student {} activity {}: already approved",
                student_code, activity_id,
            );
            return Err(RegistrationError::AlreadyApproved);
        }

        info!("Approved registration of {} for activity {}", student_code, activity_id);

        self.ledger
            .registration(&student.id, activity_id)
            .await?
            .ok_or(RegistrationError::NotRegistered)
    }

    /// Confirm participation — the sole settlement trigger.
    ///
    /// Requires an approved registration; the write-once flip guarantees
    /// at most one `ConfirmedParticipation` is ever produced per
    /// (student, activity), even under concurrent confirm attempts.
    pub async fn confirm_participation(
        &self,
        activity_id: i64,
        student_code: &str,
        evidence_image_url: Option<&str>,
    ) -> Result<ConfirmedParticipation> {
        let student = self.student_by_code(student_code).await?;
        let activity = self.activity(activity_id).await?;

        let registration = self
            .ledger
            .registration(&student.id, activity_id)
            .await?
            .ok_or(RegistrationError::NotRegistered)?;
        if !registration.is_approved {
            return Err(RegistrationError::NotApproved);
        }

        let flipped = self
            .ledger
            .mark_participation_confirmed(&student.id, activity_id, evidence_image_url)
            .await?;
        if !flipped {
            return Err(RegistrationError::AlreadyConfirmed);
        }

        info!(
            "Confirmed participation of {} in activity {} (reward: {} tokens)",
            student_code, activity_id, activity.reward_amount,
        );

        Ok(ConfirmedParticipation {
            student_id: student.id,
            activity_id,
            activity_name: activity.name,
            reward_amount: activity.reward_amount.max(0) as u64,
            chain_activity_id: activity.chain_activity_id.map(|id| id as u64),
        })
    }

    /// Derived state of a registration
    pub async fn state(
        &self,
        student_id: &str,
        activity_id: i64,
    ) -> Result<RegistrationState> {
        let registration = self
            .ledger
            .registration(student_id, activity_id)
            .await?
            .ok_or(RegistrationError::NotRegistered)?;

        if registration.is_participation_confirmed {
            if self.ledger.has_reward_log(student_id, activity_id).await? {
                return Ok(RegistrationState::RewardIssued);
            }
            return Ok(RegistrationState::ParticipationConfirmed);
        }
        if registration.is_approved {
            return Ok(RegistrationState::Approved);
        }
        Ok(RegistrationState::Registered)
    }

    /// Activities currently open for registration (student view)
    pub async fn available_activities(&self) -> Result<Vec<ActivityRow>> {
        let now = Utc::now().timestamp();
        let activities = self.ledger.list_active_activities().await?;
        Ok(activities.into_iter().filter(|a| a.end_date >= now).collect())
    }

    /// Registrations for an activity (administrator view)
    pub async fn registrations_for_activity(
        &self,
        activity_id: i64,
    ) -> Result<Vec<RegistrationRow>> {
        Ok(self.ledger.registrations_for_activity(activity_id).await?)
    }

    /// A student's participation history
    pub async fn history_for_student(&self, student_id: &str) -> Result<Vec<RegistrationRow>> {
        Ok(self.ledger.registrations_for_student(student_id).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn setup() -> (Ledger, RegistrationService) {
        let ledger = Ledger::open_in_memory().await.unwrap();
        let service = RegistrationService::new(ledger.clone());
        (ledger, service)
    }

    async fn seed_student(ledger: &Ledger, id: &str, code: &str, class: &str) {
        ledger
            .insert_user(id, Some(code), "Test Student", Some(class), true)
            .await
            .unwrap();
    }

    async fn seed_activity(ledger: &Ledger, max: i64, classes: Option<&str>, auto: bool) -> i64 {
        ledger
            .insert_activity("Cleanup Day", "Campus cleanup", 50, max, 0, i64::MAX, classes, auto)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_register_happy_path() {
        let (ledger, service) = setup().await;
        seed_student(&ledger, "u1", "SV001", "A1").await;
        let activity = seed_activity(&ledger, 10, None, false).await;

        let reg = service.register("SV001", activity).await.unwrap();
        assert!(!reg.is_approved);
        assert_eq!(
            service.state("u1", activity).await.unwrap(),
            RegistrationState::Registered
        );
    }

    #[tokio::test]
    async fn test_register_rejects_wrong_class() {
        let (ledger, service) = setup().await;
        seed_student(&ledger, "u1", "SV001", "B1").await;
        let activity = seed_activity(&ledger, 10, Some("A1,A2"), false).await;

        assert!(matches!(
            service.register("SV001", activity).await,
            Err(RegistrationError::ClassNotAllowed)
        ));
    }

    #[tokio::test]
    async fn test_register_rejects_duplicate() {
        let (ledger, service) = setup().await;
        seed_student(&ledger, "u1", "SV001", "A1").await;
        let activity = seed_activity(&ledger, 10, None, false).await;

        service.register("SV001", activity).await.unwrap();
        assert!(matches!(
            service.register("SV001", activity).await,
            Err(RegistrationError::AlreadyRegistered)
        ));
    }

    #[tokio::test]
    async fn test_register_rejects_when_full() {
        let (ledger, service) = setup().await;
        seed_student(&ledger, "u1", "SV001", "A1").await;
        seed_student(&ledger, "u2", "SV002", "A1").await;
        let activity = seed_activity(&ledger, 1, None, false).await;

        service.register("SV001", activity).await.unwrap();
        assert!(matches!(
            service.register("SV002", activity).await,
            Err(RegistrationError::SlotsFull)
        ));
    }

    #[tokio::test]
    async fn test_register_rejects_inactive_and_closed() {
        let (ledger, service) = setup().await;
        seed_student(&ledger, "u1", "SV001", "A1").await;

        let inactive = seed_activity(&ledger, 10, None, false).await;
        ledger.deactivate_activity(inactive).await.unwrap();
        assert!(matches!(
            service.register("SV001", inactive).await,
            Err(RegistrationError::ActivityInactive)
        ));

        let closed = ledger
            .insert_activity("Old", "", 50, 10, 0, 1, None, false)
            .await
            .unwrap();
        assert!(matches!(
            service.register("SV001", closed).await,
            Err(RegistrationError::RegistrationClosed)
        ));
    }

    #[tokio::test]
    async fn test_unknown_student_and_activity() {
        let (ledger, service) = setup().await;
        seed_student(&ledger, "u1", "SV001", "A1").await;
        let activity = seed_activity(&ledger, 10, None, false).await;

        assert!(matches!(
            service.register("SV999", activity).await,
            Err(RegistrationError::StudentNotFound)
        ));
        assert!(matches!(
            service.register("SV001", 999).await,
            Err(RegistrationError::ActivityNotFound)
        ));
    }

    #[tokio::test]
    async fn test_auto_approve_enters_approved_state() {
        let (ledger, service) = setup().await;
        seed_student(&ledger, "u1", "SV001", "A1").await;
        let activity = seed_activity(&ledger, 10, None, true).await;

        let reg = service.register("SV001", activity).await.unwrap();
        assert!(reg.is_approved);
        assert_eq!(reg.approved_at, Some(reg.registered_at));
        assert_eq!(
            service.state("u1", activity).await.unwrap(),
            RegistrationState::Approved
        );
    }

    #[tokio::test]
    async fn test_approve_is_guarded() {
        let (ledger, service) = setup().await;
        seed_student(&ledger, "u1", "SV001", "A1").await;
        let activity = seed_activity(&ledger, 10, None, false).await;
        service.register("SV001", activity).await.unwrap();

        let reg = service.approve(activity, "SV001").await.unwrap();
        assert!(reg.is_approved);

        assert!(matches!(
            service.approve(activity, "SV001").await,
            Err(RegistrationError::AlreadyApproved)
        ));
        assert!(matches!(
            service.approve(999, "SV001").await,
            Err(RegistrationError::NotRegistered)
        ));
    }

    #[tokio::test]
    async fn test_confirm_requires_approval() {
        let (ledger, service) = setup().await;
        seed_student(&ledger, "u1", "SV001", "A1").await;
        let activity = seed_activity(&ledger, 10, None, false).await;
        service.register("SV001", activity).await.unwrap();

        assert!(matches!(
            service.confirm_participation(activity, "SV001", None).await,
            Err(RegistrationError::NotApproved)
        ));
    }

    #[tokio::test]
    async fn test_confirm_fires_exactly_once() {
        let (ledger, service) = setup().await;
        seed_student(&ledger, "u1", "SV001", "A1").await;
        let activity = seed_activity(&ledger, 10, None, false).await;
        service.register("SV001", activity).await.unwrap();
        service.approve(activity, "SV001").await.unwrap();

        let confirmed = service
            .confirm_participation(activity, "SV001", Some("https://img/proof.png"))
            .await
            .unwrap();
        assert_eq!(confirmed.student_id, "u1");
        assert_eq!(confirmed.reward_amount, 50);
        assert_eq!(confirmed.chain_activity_id, None);

        assert!(matches!(
            service.confirm_participation(activity, "SV001", None).await,
            Err(RegistrationError::AlreadyConfirmed)
        ));
        assert_eq!(
            service.state("u1", activity).await.unwrap(),
            RegistrationState::ParticipationConfirmed
        );
    }

    #[tokio::test]
    async fn test_reward_issued_is_derived() {
        let (ledger, service) = setup().await;
        seed_student(&ledger, "u1", "SV001", "A1").await;
        ledger.insert_wallet("u1", "aabb", &[1u8; 32]).await.unwrap();
        let activity = seed_activity(&ledger, 10, None, true).await;
        service.register("SV001", activity).await.unwrap();
        service.confirm_participation(activity, "SV001", None).await.unwrap();

        ledger
            .credit_wallet_and_log("u1", Some(activity), 50, "activity-reward", "Cleanup Day", None)
            .await
            .unwrap();

        assert_eq!(
            service.state("u1", activity).await.unwrap(),
            RegistrationState::RewardIssued
        );
    }

    #[tokio::test]
    async fn test_confirmed_carries_chain_mapping() {
        let (ledger, service) = setup().await;
        seed_student(&ledger, "u1", "SV001", "A1").await;
        let activity = seed_activity(&ledger, 10, None, true).await;
        ledger.set_chain_activity_id(activity, 4).await.unwrap();
        service.register("SV001", activity).await.unwrap();

        let confirmed = service
            .confirm_participation(activity, "SV001", None)
            .await
            .unwrap();
        assert_eq!(confirmed.chain_activity_id, Some(4));
    }

    #[tokio::test]
    async fn test_available_activities_filters_closed() {
        let (ledger, service) = setup().await;
        seed_activity(&ledger, 10, None, false).await;
        ledger
            .insert_activity("Old", "", 50, 10, 0, 1, None, false)
            .await
            .unwrap();

        let open = service.available_activities().await.unwrap();
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].name, "Cleanup Day");
    }
}
