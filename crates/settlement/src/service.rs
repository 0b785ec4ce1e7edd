//! Settlement orchestration

use tracing::{error, info, warn};

use campuscoin_chain::{ChainClient, ChainError, ChainJob, SubmitterHandle};
use campuscoin_core::{address_from_hex, hex_encode, whole_to_base, TransactionKind};
use campuscoin_ledger::{Ledger, UnsettledConfirmation};
use campuscoin_registry::ConfirmedParticipation;

use crate::{Result, SettlementError};

/// Outcome handed back to the calling layer.
///
/// Failures carry a generic message; the underlying cause is logged
/// server-side and never exposed verbatim to end users.
#[derive(Debug, Clone)]
pub struct SettlementResult {
    pub success: bool,
    /// New cached balance in base units, on success
    pub new_balance: Option<u64>,
    /// Hex-encoded on-chain transaction signature of the mint
    pub on_chain_ref: Option<String>,
    pub message: String,
}

impl SettlementResult {
    fn issued(new_balance: u64, on_chain_ref: String, whole_amount: u64) -> Self {
        Self {
            success: true,
            new_balance: Some(new_balance),
            on_chain_ref: Some(on_chain_ref),
            message: format!("Reward of {} tokens issued", whole_amount),
        }
    }

    fn failed() -> Self {
        Self {
            success: false,
            new_balance: None,
            on_chain_ref: None,
            message: "could not issue reward".to_string(),
        }
    }
}

/// The settlement service
#[derive(Clone)]
pub struct SettlementService {
    ledger: Ledger,
    /// Read-side chain access (role checks); shares state with the
    /// submitter's client
    chain: ChainClient,
    /// All authority-signed writes go through this queue
    submitter: SubmitterHandle,
}

impl SettlementService {
    pub fn new(ledger: Ledger, chain: ChainClient, submitter: SubmitterHandle) -> Self {
        Self { ledger, chain, submitter }
    }

    /// Settle the reward for a confirmed participation.
    ///
    /// Infallible from the caller's perspective: failures come back as
    /// `success == false` with the cause logged, per the policy that
    /// settlement internals are never surfaced to end users.
    pub async fn settle_confirmed(&self, confirmed: &ConfirmedParticipation) -> SettlementResult {
        self.settle_reward(
            &confirmed.student_id,
            confirmed.activity_id,
            confirmed.reward_amount,
            &confirmed.activity_name,
            confirmed.chain_activity_id,
        )
        .await
    }

    /// Settle `whole_amount` tokens for (student, activity).
    ///
    /// Settlement is only ever invoked once per registration — the
    /// write-once confirm transition is the de-duplication key — but a
    /// failed settlement may be retried for the same registration, and
    /// the on-chain completion registry guards the retry path when the
    /// activity is mirrored there.
    pub async fn settle_reward(
        &self,
        student_id: &str,
        activity_id: i64,
        whole_amount: u64,
        activity_label: &str,
        chain_activity_id: Option<u64>,
    ) -> SettlementResult {
        match self
            .try_settle(student_id, activity_id, whole_amount, activity_label, chain_activity_id)
            .await
        {
            Ok(result) => result,
            Err(e) => {
                error!(
                    "Settlement failed for student {} activity {}: {}",
                    student_id, activity_id, e,
                );
                SettlementResult::failed()
            }
        }
    }

    async fn try_settle(
        &self,
        student_id: &str,
        activity_id: i64,
        whole_amount: u64,
        activity_label: &str,
        chain_activity_id: Option<u64>,
    ) -> Result<SettlementResult> {
        let wallet = self
            .ledger
            .wallet_by_user(student_id)
            .await?
            .ok_or(SettlementError::NoWallet)?;
        let address = address_from_hex(&wallet.address).ok_or(SettlementError::CorruptAddress)?;

        // A missing allow-list role is not a hard failure; grant it and
        // carry on.
        if !self.chain.is_student(&address).await? {
            info!("Student {} not yet allow-listed; granting role", student_id);
            self.submitter
                .submit(ChainJob::GrantStudentRole { address })
                .await?;
        }

        // The completion registry is the duplicate boundary the chain
        // itself enforces. An AlreadyCompleted revert here means a prior
        // attempt reached the chain before failing locally; the absent
        // audit row says the reward was never recorded, so continue to
        // the mint and let balance reconciliation correct any drift.
        if let Some(registry_id) = chain_activity_id {
            match self
                .submitter
                .submit(ChainJob::CompleteActivity { address, chain_activity_id: registry_id })
                .await
            {
                Ok(_) => {}
                Err(ChainError::AlreadyCompleted { .. }) => {
                    warn!(
                        "Registry already has completion for student {} activity {} (registry id {}); \
                         resuming interrupted settlement",
                        student_id, activity_id, registry_id,
                    );
                }
                Err(e) => return Err(e.into()),
            }
        }

        let base_units = whole_to_base(whole_amount)?;
        let signature = self
            .submitter
            .submit(ChainJob::Mint { to: address, base_units })
            .await?;
        let chain_ref = hex_encode(&signature);

        // Chain succeeded; now the local audit row and cache credit, as
        // one transaction. From here on a failure means divergence.
        let new_balance = self
            .ledger
            .credit_wallet_and_log(
                student_id,
                Some(activity_id),
                base_units as i64,
                TransactionKind::ActivityReward.as_str(),
                &format!("Reward for activity {}", activity_label),
                Some(&chain_ref),
            )
            .await
            .map_err(|source| {
                error!(
                    "DIVERGENCE: mint {} landed for student {} activity {} but local persistence \
                     failed; operator reconciliation required",
                    chain_ref, student_id, activity_id,
                );
                SettlementError::Persistence { chain_ref: chain_ref.clone(), source }
            })?;

        info!(
            "Settled {} tokens for student {} activity {} (tx {})",
            whole_amount,
            student_id,
            activity_id,
            &chain_ref[..16],
        );

        Ok(SettlementResult::issued(
            new_balance.max(0) as u64,
            chain_ref,
            whole_amount,
        ))
    }

    /// Sweep for confirmed participations with no matching audit row.
    ///
    /// The confirmation timestamp is the durable evidence a settlement
    /// was attempted; anything returned here diverged (settlement never
    /// ran to completion) and needs operator attention or a retry.
    pub async fn reconcile_unsettled(&self) -> Result<Vec<UnsettledConfirmation>> {
        let unsettled = self.ledger.find_unsettled_confirmations().await?;
        for row in &unsettled {
            warn!(
                "Unsettled confirmation: student {} activity {} (confirmed at {:?})",
                row.student_id, row.activity_id, row.participation_confirmed_at,
            );
        }
        Ok(unsettled)
    }
}
