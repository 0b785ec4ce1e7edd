//! Wallet provisioning and balance reconciliation

use ed25519_dalek::SigningKey;
use rand::rngs::OsRng;
use tracing::{info, warn};

use campuscoin_chain::ChainClient;
use campuscoin_core::{address_from_hex, format_base_units, hex_encode, whole_to_base};
use campuscoin_ledger::{is_unique_violation, Ledger, LedgerError, TransactionLogRow, WalletRow};

use crate::{Result, WalletError};

/// Wallet view exposed to the calling layer: address and cached balance
/// only, never key material.
#[derive(Debug, Clone)]
pub struct WalletReadModel {
    pub address: String,
    /// Cached balance in base units (advisory)
    pub balance: u64,
    /// Cached balance formatted as whole tokens for display
    pub display_balance: String,
}

impl WalletReadModel {
    fn from_row(row: &WalletRow) -> Self {
        let balance = row.balance.max(0) as u64;
        Self {
            address: row.address.clone(),
            balance,
            display_balance: format_base_units(balance),
        }
    }
}

/// Wallet provisioning service
#[derive(Clone)]
pub struct WalletService {
    ledger: Ledger,
    chain: ChainClient,
}

impl WalletService {
    pub fn new(ledger: Ledger, chain: ChainClient) -> Self {
        Self { ledger, chain }
    }

    /// Provision a wallet for a user, or return the existing one.
    ///
    /// Concurrent calls for the same user cannot create two wallets: the
    /// unique constraint on the user id picks one winner, and the loser
    /// reads back the winner's row instead of erroring.
    pub async fn provision_wallet(&self, user_id: &str) -> Result<WalletRow> {
        self.ledger
            .user_by_id(user_id)
            .await?
            .ok_or(WalletError::InvalidUser)?;

        if let Some(existing) = self.ledger.wallet_by_user(user_id).await? {
            info!("Wallet already exists for user {}", user_id);
            return Ok(existing);
        }

        let signing_key = SigningKey::generate(&mut OsRng);
        let address_bytes = signing_key.verifying_key().to_bytes();
        let address = hex_encode(&address_bytes);
        let secret = signing_key.to_bytes();

        match self.ledger.insert_wallet(user_id, &address, &secret).await {
            Ok(wallet) => {
                info!("Provisioned wallet {} for user {}", &address[..16], user_id);
                Ok(wallet)
            }
            Err(LedgerError::Database(ref db)) if is_unique_violation(db) => {
                // A concurrent provisioner won; return its wallet
                self.ledger
                    .wallet_by_user(user_id)
                    .await?
                    .ok_or(WalletError::NoWallet)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Wallet read model for a user
    pub async fn wallet_for_user(&self, user_id: &str) -> Result<WalletReadModel> {
        let row = self
            .ledger
            .wallet_by_user(user_id)
            .await?
            .ok_or(WalletError::NoWallet)?;
        Ok(WalletReadModel::from_row(&row))
    }

    /// Transaction history read model for a user
    pub async fn history_for_user(&self, user_id: &str) -> Result<Vec<TransactionLogRow>> {
        Ok(self.ledger.transactions_for_user(user_id).await?)
    }

    /// Overwrite the cached balance with the authoritative on-chain
    /// balance and return it (base units). A node failure is a hard
    /// error; callers on this path need a guaranteed-current value.
    pub async fn sync_balance(&self, address: &str) -> Result<u64> {
        self.ledger
            .wallet_by_address(address)
            .await?
            .ok_or(WalletError::NoWallet)?;

        let address_bytes = address_from_hex(address).ok_or(WalletError::CorruptKey)?;
        let balance = self.chain.balance_of(&address_bytes).await?;

        self.ledger.overwrite_balance(address, balance as i64).await?;
        Ok(balance)
    }

    /// Best-effort balance read: syncs if the chain is reachable, falls
    /// back to the last-known cached value otherwise. For display paths
    /// only.
    pub async fn sync_balance_or_cached(&self, address: &str) -> Result<u64> {
        match self.sync_balance(address).await {
            Ok(balance) => Ok(balance),
            Err(WalletError::Chain(e)) => {
                let cached = self
                    .ledger
                    .wallet_by_address(address)
                    .await?
                    .ok_or(WalletError::NoWallet)?
                    .balance
                    .max(0) as u64;
                warn!(
                    "Balance sync for {} failed ({}); serving cached value {}",
                    &address[..16.min(address.len())],
                    e,
                    cached,
                );
                Ok(cached)
            }
            Err(e) => Err(e),
        }
    }

    /// Convert whole coins into training points (1:1).
    ///
    /// This path requires a guaranteed-current balance, so the sync is
    /// strict and any chain failure aborts before anything changes. The
    /// coins are burned on-chain with the holder's own key, then the
    /// cache debit, the audit row and the point credit land in one local
    /// transaction.
    pub async fn convert_coins_to_points(
        &self,
        user_id: &str,
        whole_coins: u64,
    ) -> Result<(u64, i64)> {
        let wallet = self
            .ledger
            .wallet_by_user(user_id)
            .await?
            .ok_or(WalletError::NoWallet)?;

        let base_units = whole_to_base(whole_coins)?;

        let synced = self.sync_balance(&wallet.address).await?;
        if synced < base_units {
            return Err(WalletError::InsufficientBalance);
        }

        let secret: [u8; 32] = wallet
            .secret_key
            .as_slice()
            .try_into()
            .map_err(|_| WalletError::CorruptKey)?;
        let signature = self.chain.burn(&secret, base_units).await?;

        let new_balance = self
            .ledger
            .debit_and_convert(
                user_id,
                base_units as i64,
                whole_coins as i64,
                &format!("Converted {} coins to training points", whole_coins),
                Some(&hex_encode(&signature)),
            )
            .await?;

        info!(
            "Converted {} coins to points for user {} (new balance: {})",
            whole_coins, user_id, new_balance,
        );

        let points = self
            .ledger
            .user_by_id(user_id)
            .await?
            .map(|u| u.training_points)
            .unwrap_or(0);
        Ok((new_balance.max(0) as u64, points))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use campuscoin_chain::ChainConfig;
    use campuscoin_core::BASE_UNITS_PER_TOKEN;

    async fn setup() -> (Ledger, ChainClient, WalletService) {
        let ledger = Ledger::open_in_memory().await.unwrap();
        let chain = ChainClient::new(ChainConfig::mock(), [0u8; 32]);
        let service = WalletService::new(ledger.clone(), chain.clone());
        (ledger, chain, service)
    }

    async fn seed_user(ledger: &Ledger, id: &str) {
        ledger
            .insert_user(id, Some(&format!("SV-{id}")), "Test Student", Some("A1"), true)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_provision_is_idempotent() {
        let (ledger, _, service) = setup().await;
        seed_user(&ledger, "u1").await;

        let first = service.provision_wallet("u1").await.unwrap();
        assert_eq!(first.balance, 0);
        assert_eq!(first.address.len(), 64);
        assert_eq!(first.secret_key.len(), 32);

        let second = service.provision_wallet("u1").await.unwrap();
        assert_eq!(first.address, second.address);
        assert_eq!(first.id, second.id);
    }

    #[tokio::test]
    async fn test_provision_unknown_user() {
        let (_, _, service) = setup().await;
        assert!(matches!(
            service.provision_wallet("ghost").await,
            Err(WalletError::InvalidUser)
        ));
    }

    #[tokio::test]
    async fn test_address_matches_keypair() {
        let (ledger, _, service) = setup().await;
        seed_user(&ledger, "u1").await;

        let wallet = service.provision_wallet("u1").await.unwrap();
        let secret: [u8; 32] = wallet.secret_key.as_slice().try_into().unwrap();
        let derived = SigningKey::from_bytes(&secret).verifying_key().to_bytes();
        assert_eq!(wallet.address, hex_encode(&derived));
    }

    #[tokio::test]
    async fn test_sync_balance_overwrites_cache() {
        let (ledger, chain, service) = setup().await;
        seed_user(&ledger, "u1").await;
        let wallet = service.provision_wallet("u1").await.unwrap();
        let address_bytes = address_from_hex(&wallet.address).unwrap();

        chain.mock_set_balance(&address_bytes, 75_000_000_000);
        let synced = service.sync_balance(&wallet.address).await.unwrap();
        assert_eq!(synced, 75_000_000_000);

        let row = ledger.wallet_by_user("u1").await.unwrap().unwrap();
        assert_eq!(row.balance, 75_000_000_000);

        // Idempotent: a second sync with no chain mutation returns the same value
        let again = service.sync_balance(&wallet.address).await.unwrap();
        assert_eq!(again, synced);
    }

    #[tokio::test]
    async fn test_sync_unknown_wallet() {
        let (_, _, service) = setup().await;
        assert!(matches!(
            service.sync_balance("00ff").await,
            Err(WalletError::NoWallet)
        ));
    }

    #[tokio::test]
    async fn test_best_effort_read_falls_back_to_cache() {
        let (ledger, chain, service) = setup().await;
        seed_user(&ledger, "u1").await;
        let wallet = service.provision_wallet("u1").await.unwrap();
        let address_bytes = address_from_hex(&wallet.address).unwrap();

        chain.mock_set_balance(&address_bytes, 30_000_000_000);
        service.sync_balance(&wallet.address).await.unwrap();

        // Node goes away: strict sync errors, best-effort serves cache
        chain.fail_next_submissions(2);
        assert!(matches!(
            service.sync_balance(&wallet.address).await,
            Err(WalletError::Chain(_))
        ));
        let cached = service.sync_balance_or_cached(&wallet.address).await.unwrap();
        assert_eq!(cached, 30_000_000_000);
    }

    #[tokio::test]
    async fn test_convert_coins_to_points() {
        let (ledger, chain, service) = setup().await;
        seed_user(&ledger, "u1").await;
        let wallet = service.provision_wallet("u1").await.unwrap();
        let address_bytes = address_from_hex(&wallet.address).unwrap();

        chain.add_student(&address_bytes).await.unwrap();
        chain.mock_set_balance(&address_bytes, 10 * BASE_UNITS_PER_TOKEN);

        let (new_balance, points) = service.convert_coins_to_points("u1", 4).await.unwrap();
        assert_eq!(new_balance, 6 * BASE_UNITS_PER_TOKEN);
        assert_eq!(points, 4);

        // Burned on-chain as well as debited locally
        assert_eq!(
            chain.balance_of(&address_bytes).await.unwrap(),
            6 * BASE_UNITS_PER_TOKEN
        );

        let log = ledger.transactions_for_user("u1").await.unwrap();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].transaction_type, "coin-conversion");
        assert_eq!(log[0].amount, -(4 * BASE_UNITS_PER_TOKEN as i64));
        assert!(log[0].chain_ref.is_some());
    }

    #[tokio::test]
    async fn test_convert_rejects_insufficient_balance() {
        let (ledger, chain, service) = setup().await;
        seed_user(&ledger, "u1").await;
        let wallet = service.provision_wallet("u1").await.unwrap();
        let address_bytes = address_from_hex(&wallet.address).unwrap();
        chain.mock_set_balance(&address_bytes, BASE_UNITS_PER_TOKEN);

        assert!(matches!(
            service.convert_coins_to_points("u1", 5).await,
            Err(WalletError::InsufficientBalance)
        ));

        let user = ledger.user_by_id("u1").await.unwrap().unwrap();
        assert_eq!(user.training_points, 0);
    }

    #[tokio::test]
    async fn test_convert_hard_fails_when_chain_down() {
        let (ledger, chain, service) = setup().await;
        seed_user(&ledger, "u1").await;
        let wallet = service.provision_wallet("u1").await.unwrap();
        let address_bytes = address_from_hex(&wallet.address).unwrap();
        chain.add_student(&address_bytes).await.unwrap();
        chain.mock_set_balance(&address_bytes, 10 * BASE_UNITS_PER_TOKEN);

        // The burn submission fails; nothing local may change
        chain.fail_next_submissions(1);
        assert!(matches!(
            service.convert_coins_to_points("u1", 4).await,
            Err(WalletError::Chain(_))
        ));

        let user = ledger.user_by_id("u1").await.unwrap().unwrap();
        assert_eq!(user.training_points, 0);
        assert!(ledger.transactions_for_user("u1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_read_models() {
        let (ledger, _, service) = setup().await;
        seed_user(&ledger, "u1").await;
        let wallet = service.provision_wallet("u1").await.unwrap();

        let model = service.wallet_for_user("u1").await.unwrap();
        assert_eq!(model.address, wallet.address);
        assert_eq!(model.balance, 0);
        assert_eq!(model.display_balance, "0");

        assert!(service.history_for_user("u1").await.unwrap().is_empty());
    }
}
