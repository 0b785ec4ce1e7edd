//! End-to-end settlement flow
//!
//! Drives the full stack against the mock chain: provision a wallet,
//! register, approve, confirm, settle, reconcile. Covers the dual-path
//! design (direct mint vs. completion-registry-guarded mint) and the
//! chain-first failure ordering.

use campuscoin::chain::{spawn_authority_submitter, ChainClient, ChainConfig};
use campuscoin::core::{address_from_hex, BASE_UNITS_PER_TOKEN};
use campuscoin::ledger::Ledger;
use campuscoin::registry::{RegistrationService, RegistrationState};
use campuscoin::settlement::SettlementService;
use campuscoin::wallet::WalletService;

struct Stack {
    ledger: Ledger,
    chain: ChainClient,
    registry: RegistrationService,
    wallets: WalletService,
    settlement: SettlementService,
}

async fn stack() -> Stack {
    let ledger = Ledger::open_in_memory().await.unwrap();
    let chain = ChainClient::new(ChainConfig::mock(), [0u8; 32]);
    let submitter = spawn_authority_submitter(chain.clone(), 32);
    Stack {
        registry: RegistrationService::new(ledger.clone()),
        wallets: WalletService::new(ledger.clone(), chain.clone()),
        settlement: SettlementService::new(ledger.clone(), chain.clone(), submitter),
        ledger,
        chain,
    }
}

async fn seed_student(stack: &Stack, id: &str, code: &str, class: &str) -> String {
    stack
        .ledger
        .insert_user(id, Some(code), "Student", Some(class), true)
        .await
        .unwrap();
    stack.wallets.provision_wallet(id).await.unwrap().address
}

async fn seed_activity(stack: &Stack, reward: i64, auto: bool) -> i64 {
    stack
        .ledger
        .insert_activity("Cleanup Day", "Campus cleanup", reward, 50, 0, i64::MAX, None, auto)
        .await
        .unwrap()
}

#[tokio::test]
async fn confirm_then_settle_credits_fifty_tokens() {
    let s = stack().await;
    let address = seed_student(&s, "u1", "SV001", "A1").await;
    let activity = seed_activity(&s, 50, false).await;

    s.registry.register("SV001", activity).await.unwrap();
    s.registry.approve(activity, "SV001").await.unwrap();

    // Before confirmation the cached balance is zero
    assert_eq!(s.wallets.wallet_for_user("u1").await.unwrap().balance, 0);

    let confirmed = s
        .registry
        .confirm_participation(activity, "SV001", None)
        .await
        .unwrap();
    let result = s.settlement.settle_confirmed(&confirmed).await;
    assert!(result.success, "{}", result.message);

    // Cached balance is 50 tokens and exactly one audit row exists
    let wallet = s.wallets.wallet_for_user("u1").await.unwrap();
    assert_eq!(wallet.balance, 50 * BASE_UNITS_PER_TOKEN);

    let log = s.ledger.transactions_for_user("u1").await.unwrap();
    assert_eq!(log.len(), 1);
    assert_eq!(log[0].amount, (50 * BASE_UNITS_PER_TOKEN) as i64);

    // The on-chain balance agrees with the cache
    let address_bytes = address_from_hex(&address).unwrap();
    assert_eq!(
        s.chain.balance_of(&address_bytes).await.unwrap(),
        50 * BASE_UNITS_PER_TOKEN
    );

    // The registration reached its terminal derived state
    assert_eq!(
        s.registry.state("u1", activity).await.unwrap(),
        RegistrationState::RewardIssued
    );
}

#[tokio::test]
async fn settlement_is_all_or_nothing_when_mint_fails() {
    let s = stack().await;
    let address = seed_student(&s, "u1", "SV001", "A1").await;
    let address_bytes = address_from_hex(&address).unwrap();
    s.chain.add_student(&address_bytes).await.unwrap();
    let activity = seed_activity(&s, 50, true).await;

    s.registry.register("SV001", activity).await.unwrap();
    let confirmed = s
        .registry
        .confirm_participation(activity, "SV001", None)
        .await
        .unwrap();

    // The node times out past the submitter's retry budget
    s.chain.fail_next_submissions(3);
    let result = s.settlement.settle_confirmed(&confirmed).await;
    assert!(!result.success);
    assert_eq!(result.message, "could not issue reward");

    // No local state changed: cache untouched, no audit row, and the
    // registration remains confirmed-but-unsettled
    assert_eq!(s.wallets.wallet_for_user("u1").await.unwrap().balance, 0);
    assert!(s.ledger.transactions_for_user("u1").await.unwrap().is_empty());
    assert_eq!(
        s.registry.state("u1", activity).await.unwrap(),
        RegistrationState::ParticipationConfirmed
    );

    // The reconciliation sweep reports it, a retry settles it, and the
    // alert clears
    let unsettled = s.settlement.reconcile_unsettled().await.unwrap();
    assert_eq!(unsettled.len(), 1);

    let retry = s.settlement.settle_confirmed(&confirmed).await;
    assert!(retry.success);
    assert_eq!(s.ledger.transactions_for_user("u1").await.unwrap().len(), 1);
    assert!(s.settlement.reconcile_unsettled().await.unwrap().is_empty());
}

#[tokio::test]
async fn registry_backed_activity_records_completion_on_chain() {
    let s = stack().await;
    let address = seed_student(&s, "u1", "SV001", "A1").await;
    let address_bytes = address_from_hex(&address).unwrap();
    let activity = seed_activity(&s, 50, true).await;

    // Mirror the activity into the on-chain registry; the id spaces are
    // independent and the ledger records the mapping
    let (_, registry_id) = s.chain.create_activity("Cleanup Day", "", 50).await.unwrap();
    s.ledger.set_chain_activity_id(activity, registry_id as i64).await.unwrap();

    s.registry.register("SV001", activity).await.unwrap();
    let confirmed = s
        .registry
        .confirm_participation(activity, "SV001", None)
        .await
        .unwrap();
    assert_eq!(confirmed.chain_activity_id, Some(registry_id));

    let result = s.settlement.settle_confirmed(&confirmed).await;
    assert!(result.success);
    assert!(s.chain.has_completed(&address_bytes, registry_id).await.unwrap());
}

#[tokio::test]
async fn settlement_self_heals_missing_student_role() {
    let s = stack().await;
    let address = seed_student(&s, "u1", "SV001", "A1").await;
    let address_bytes = address_from_hex(&address).unwrap();
    let activity = seed_activity(&s, 50, true).await;

    s.registry.register("SV001", activity).await.unwrap();
    let confirmed = s
        .registry
        .confirm_participation(activity, "SV001", None)
        .await
        .unwrap();

    assert!(!s.chain.is_student(&address_bytes).await.unwrap());
    let result = s.settlement.settle_confirmed(&confirmed).await;
    assert!(result.success);
    assert!(s.chain.is_student(&address_bytes).await.unwrap());
}

#[tokio::test]
async fn sync_balance_corrects_cache_drift_by_overwrite() {
    let s = stack().await;
    let address = seed_student(&s, "u1", "SV001", "A1").await;
    let address_bytes = address_from_hex(&address).unwrap();

    // Simulate drift: the chain holds more than the cache knows about
    s.chain.mock_set_balance(&address_bytes, 120 * BASE_UNITS_PER_TOKEN);

    let synced = s.wallets.sync_balance(&address).await.unwrap();
    assert_eq!(synced, 120 * BASE_UNITS_PER_TOKEN);
    assert_eq!(
        s.wallets.wallet_for_user("u1").await.unwrap().balance,
        120 * BASE_UNITS_PER_TOKEN
    );

    // Idempotent with no intervening mutation
    assert_eq!(s.wallets.sync_balance(&address).await.unwrap(), synced);
}

#[tokio::test]
async fn batch_completion_covers_whole_roster() {
    let s = stack().await;
    let a1 = seed_student(&s, "u1", "SV001", "A1").await;
    let a2 = seed_student(&s, "u2", "SV002", "A1").await;
    let b1 = address_from_hex(&a1).unwrap();
    let b2 = address_from_hex(&a2).unwrap();
    s.chain.add_student(&b1).await.unwrap();
    s.chain.add_student(&b2).await.unwrap();

    let (_, registry_id) = s.chain.create_activity("Seminar", "", 20).await.unwrap();
    s.chain.batch_complete_activity(&[b1, b2], registry_id).await.unwrap();

    assert!(s.chain.has_completed(&b1, registry_id).await.unwrap());
    assert!(s.chain.has_completed(&b2, registry_id).await.unwrap());
}
