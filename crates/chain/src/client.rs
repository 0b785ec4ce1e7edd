//! Chain client for the CampusCoin token and reward programs
//!
//! Mock mode mirrors the deployed programs' invariants against
//! in-memory state so the full settlement stack can run and be tested
//! without a node. Live mode builds raw instructions (8-byte Anchor
//! discriminators, little-endian args) and submits them over nonblocking
//! RPC.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};

use sha2::{Digest, Sha256};
use tracing::{debug, info};

use solana_client::nonblocking::rpc_client::RpcClient;
use solana_sdk::{
    commitment_config::CommitmentConfig,
    instruction::{AccountMeta, Instruction},
    pubkey::Pubkey,
    signature::{Keypair, Signer},
    transaction::Transaction,
};
use solana_sdk_ids::system_program;
use spl_associated_token_account::get_associated_token_address;

use campuscoin_core::{hex_encode, AccountAddress, TransactionSignature};

use crate::{ActivityUpdate, ChainError, OnChainActivity, Result};

/// Gateway mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainMode {
    /// In-memory contract simulation for development and tests
    Mock,
    /// Live Solana RPC against the deployed programs
    Live,
}

/// Gateway configuration
#[derive(Debug, Clone)]
pub struct ChainConfig {
    pub mode: ChainMode,
    /// Solana RPC endpoint (Live mode only)
    pub rpc_url: String,
    /// Token program id
    pub token_program_id: [u8; 32],
    /// Reward (completion registry) program id
    pub reward_program_id: [u8; 32],
    /// SPL mint backing the token program
    pub token_mint: [u8; 32],
    /// Commitment level for transactions
    pub commitment: String,
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            mode: ChainMode::Mock,
            rpc_url: "https://api.devnet.solana.com".to_string(),
            token_program_id: [0u8; 32],
            reward_program_id: [0u8; 32],
            token_mint: [0u8; 32],
            commitment: "confirmed".to_string(),
        }
    }
}

impl ChainConfig {
    /// Mock configuration for development
    pub fn mock() -> Self {
        Self {
            mode: ChainMode::Mock,
            ..Default::default()
        }
    }

    /// Devnet token program id
    /// Program: `H7WDfeXqAZ3PGGojXVdRUFnTv8eQkqhPNJ4m2NyzRBXB`
    pub const DEVNET_TOKEN_PROGRAM_ID: [u8; 32] = [
        239, 101, 131, 84, 148, 33, 230, 162, 45, 162, 209, 61, 166, 25, 115, 3,
        133, 165, 234, 156, 209, 82, 156, 165, 30, 196, 208, 186, 248, 238, 53, 78,
    ];

    /// Devnet reward program id
    /// Program: `nRHCrY7LELSFMT8xdkhStfsF8CkaP4c89aKg5EKrNmS`
    pub const DEVNET_REWARD_PROGRAM_ID: [u8; 32] = [
        11, 162, 150, 213, 165, 201, 245, 245, 172, 218, 10, 45, 246, 162, 230, 64,
        198, 53, 249, 69, 50, 206, 161, 34, 176, 216, 43, 211, 28, 250, 202, 109,
    ];

    /// Devnet token mint
    /// Mint: `DgxfophWMtGGHVQQ1tnk27beYW73E6MuWt4HgKj3GZBY`
    pub const DEVNET_TOKEN_MINT: [u8; 32] = [
        188, 136, 215, 4, 122, 226, 16, 113, 178, 156, 197, 89, 164, 137, 98, 181,
        192, 133, 48, 193, 98, 248, 102, 204, 163, 168, 244, 150, 139, 141, 81, 155,
    ];

    /// Live configuration for Solana devnet
    pub fn devnet(
        token_program_id: [u8; 32],
        reward_program_id: [u8; 32],
        token_mint: [u8; 32],
    ) -> Self {
        Self {
            mode: ChainMode::Live,
            rpc_url: "https://api.devnet.solana.com".to_string(),
            token_program_id,
            reward_program_id,
            token_mint,
            ..Default::default()
        }
    }

    /// Live configuration for devnet with the default deployed programs
    pub fn devnet_default() -> Self {
        Self::devnet(
            Self::DEVNET_TOKEN_PROGRAM_ID,
            Self::DEVNET_REWARD_PROGRAM_ID,
            Self::DEVNET_TOKEN_MINT,
        )
    }

    /// Live configuration for Solana mainnet
    pub fn mainnet(
        token_program_id: [u8; 32],
        reward_program_id: [u8; 32],
        token_mint: [u8; 32],
    ) -> Self {
        Self {
            mode: ChainMode::Live,
            rpc_url: "https://api.mainnet-beta.solana.com".to_string(),
            token_program_id,
            reward_program_id,
            token_mint,
            commitment: "finalized".to_string(),
        }
    }

    fn commitment_config(&self) -> CommitmentConfig {
        match self.commitment.as_str() {
            "finalized" => CommitmentConfig::finalized(),
            "confirmed" => CommitmentConfig::confirmed(),
            "processed" => CommitmentConfig::processed(),
            _ => CommitmentConfig::confirmed(),
        }
    }
}

/// First 8 bytes of SHA256("global:<instruction_name>") — the Anchor
/// instruction discriminator.
fn discriminator(name: &str) -> [u8; 8] {
    let mut hasher = Sha256::new();
    hasher.update(b"global:");
    hasher.update(name.as_bytes());
    let digest = hasher.finalize();
    let mut disc = [0u8; 8];
    disc.copy_from_slice(&digest[..8]);
    disc
}

/// Borsh-style string: 4-byte LE length prefix + utf8 bytes
fn encode_string(data: &mut Vec<u8>, s: &str) {
    data.extend_from_slice(&(s.len() as u32).to_le_bytes());
    data.extend_from_slice(s.as_bytes());
}

/// In-memory contract state for mock mode.
///
/// Enforces the same invariants the deployed programs do: allow-listed
/// mints, write-once completion records, monotonic activity ids.
#[derive(Debug)]
struct MockState {
    /// Token name reported by the liveness probe
    token_name: String,
    /// Base-unit balances per account
    balances: HashMap<AccountAddress, u64>,
    /// Student allow-list
    students: HashSet<AccountAddress>,
    /// Registry activities by on-chain id
    activities: HashMap<u64, OnChainActivity>,
    /// Completion records — the hard duplicate boundary
    completions: HashSet<(AccountAddress, u64)>,
    /// Monotonic activity id counter
    next_activity_id: u64,
    /// Transaction counter for generating mock signatures
    tx_counter: u64,
    /// Fail this many upcoming submissions with `Unavailable` (tests)
    fail_next: u32,
}

impl Default for MockState {
    fn default() -> Self {
        Self {
            token_name: "CampusCoin".to_string(),
            balances: HashMap::new(),
            students: HashSet::new(),
            activities: HashMap::new(),
            completions: HashSet::new(),
            next_activity_id: 0,
            tx_counter: 0,
            fail_next: 0,
        }
    }
}

impl MockState {
    fn take_injected_failure(&mut self) -> Result<()> {
        if self.fail_next > 0 {
            self.fail_next -= 1;
            return Err(ChainError::Unavailable("injected node failure".to_string()));
        }
        Ok(())
    }
}

/// Chain client for on-chain operations.
///
/// Cheap to clone: live RPC handles and mock state are shared across
/// clones, so the submitter task and read-side callers observe the same
/// chain.
#[derive(Clone)]
pub struct ChainClient {
    config: ChainConfig,
    /// Authority keypair for signing privileged transactions
    signer_keypair: Option<Arc<Keypair>>,
    /// Authority public key
    signer_pubkey: AccountAddress,
    /// RPC client (Live mode only)
    rpc_client: Option<Arc<RpcClient>>,
    /// Mock state (Mock mode only)
    mock_state: Arc<RwLock<MockState>>,
}

impl ChainClient {
    /// Create a read-only client (no signing key)
    pub fn new(config: ChainConfig, signer_pubkey: AccountAddress) -> Self {
        let rpc_client = Self::make_rpc(&config);
        Self {
            config,
            signer_keypair: None,
            signer_pubkey,
            rpc_client,
            mock_state: Arc::new(RwLock::new(MockState::default())),
        }
    }

    /// Create a client signing as the authority
    pub fn with_keypair(config: ChainConfig, keypair: Keypair) -> Self {
        let signer_pubkey = keypair.pubkey().to_bytes();
        let rpc_client = Self::make_rpc(&config);
        Self {
            config,
            signer_keypair: Some(Arc::new(keypair)),
            signer_pubkey,
            rpc_client,
            mock_state: Arc::new(RwLock::new(MockState::default())),
        }
    }

    /// Create a client from the authority's 32-byte ed25519 secret key
    pub fn with_secret_key(config: ChainConfig, secret: &[u8; 32]) -> Self {
        Self::with_keypair(config, keypair_from_secret(secret))
    }

    fn make_rpc(config: &ChainConfig) -> Option<Arc<RpcClient>> {
        if config.mode == ChainMode::Live {
            Some(Arc::new(RpcClient::new_with_commitment(
                config.rpc_url.clone(),
                config.commitment_config(),
            )))
        } else {
            None
        }
    }

    pub fn is_mock(&self) -> bool {
        self.config.mode == ChainMode::Mock
    }

    /// The authority's public key bytes
    pub fn authority_pubkey(&self) -> &AccountAddress {
        &self.signer_pubkey
    }

    fn token_program(&self) -> Pubkey {
        Pubkey::new_from_array(self.config.token_program_id)
    }

    fn reward_program(&self) -> Pubkey {
        Pubkey::new_from_array(self.config.reward_program_id)
    }

    fn mint_pubkey(&self) -> Pubkey {
        Pubkey::new_from_array(self.config.token_mint)
    }

    fn rpc(&self) -> Result<&Arc<RpcClient>> {
        self.rpc_client
            .as_ref()
            .ok_or_else(|| ChainError::Unavailable("RPC client not initialized".to_string()))
    }

    fn generate_mock_signature(state: &mut MockState) -> TransactionSignature {
        state.tx_counter += 1;
        let mut sig = [0u8; 64];
        sig[0..8].copy_from_slice(&state.tx_counter.to_le_bytes());
        sig[8..16].copy_from_slice(b"cmptxsig");
        sig
    }

    // ==================== PDA derivation ====================

    /// Token program config: ["config"]
    fn token_config_pda(&self) -> (Pubkey, u8) {
        Pubkey::find_program_address(&[b"config"], &self.token_program())
    }

    /// Mint authority: ["mint_authority"]
    fn mint_authority_pda(&self) -> (Pubkey, u8) {
        Pubkey::find_program_address(&[b"mint_authority"], &self.token_program())
    }

    /// Student allow-list membership: ["student", wallet]
    fn student_role_pda(&self, wallet: &AccountAddress) -> (Pubkey, u8) {
        Pubkey::find_program_address(&[b"student", wallet], &self.token_program())
    }

    /// Reward program config: ["config"]
    fn reward_config_pda(&self) -> (Pubkey, u8) {
        Pubkey::find_program_address(&[b"config"], &self.reward_program())
    }

    /// Registry activity: ["activity", id_le]
    fn activity_pda(&self, activity_id: u64) -> (Pubkey, u8) {
        Pubkey::find_program_address(
            &[b"activity", &activity_id.to_le_bytes()],
            &self.reward_program(),
        )
    }

    /// Completion record: ["completion", wallet, id_le]
    fn completion_pda(&self, wallet: &AccountAddress, activity_id: u64) -> (Pubkey, u8) {
        Pubkey::find_program_address(
            &[b"completion", wallet, &activity_id.to_le_bytes()],
            &self.reward_program(),
        )
    }

    // ==================== Transaction submission ====================

    async fn send_transaction(
        &self,
        instruction: Instruction,
        extra_signers: &[&Keypair],
    ) -> Result<TransactionSignature> {
        let rpc = self.rpc()?;
        let keypair: &Keypair = self
            .signer_keypair
            .as_deref()
            .ok_or(ChainError::NotAuthorized)?;

        let blockhash = rpc
            .get_latest_blockhash()
            .await
            .map_err(|e| ChainError::Unavailable(e.to_string()))?;

        let mut signers: Vec<&Keypair> = vec![keypair];
        signers.extend_from_slice(extra_signers);

        let tx = Transaction::new_signed_with_payer(
            &[instruction],
            Some(&keypair.pubkey()),
            &signers,
            blockhash,
        );

        let signature = rpc
            .send_and_confirm_transaction(&tx)
            .await
            .map_err(|e| classify_send_error(e.to_string()))?;

        info!("Transaction confirmed: {}", signature);

        let mut sig_bytes = [0u8; 64];
        sig_bytes.copy_from_slice(signature.as_ref());
        Ok(sig_bytes)
    }

    /// Fetch an account, distinguishing "missing" from "unreachable"
    async fn fetch_account(
        &self,
        pubkey: &Pubkey,
    ) -> Result<Option<solana_sdk::account::Account>> {
        let rpc = self.rpc()?;
        let response = rpc
            .get_account_with_commitment(pubkey, self.config.commitment_config())
            .await
            .map_err(|e| ChainError::Unavailable(e.to_string()))?;
        Ok(response.value)
    }

    // ==================== Token program ====================

    /// Token name — doubles as the liveness probe for the deployment
    pub async fn token_name(&self) -> Result<String> {
        if self.is_mock() {
            let state = self.mock_state.read().expect("chain lock poisoned");
            return Ok(state.token_name.clone());
        }

        let (config_pda, _) = self.token_config_pda();
        let account = self
            .fetch_account(&config_pda)
            .await?
            .ok_or_else(|| ChainError::Unavailable("token config account missing".to_string()))?;

        // Layout: discriminator (8) + admin (32) + mint (32) + name (borsh string)
        let data = &account.data;
        if data.len() < 8 + 32 + 32 + 4 {
            return Err(ChainError::Unavailable("token config too short".to_string()));
        }
        let name_start = 8 + 32 + 32;
        let len =
            u32::from_le_bytes(data[name_start..name_start + 4].try_into().expect("4 bytes"))
                as usize;
        let bytes = data
            .get(name_start + 4..name_start + 4 + len)
            .ok_or_else(|| ChainError::Unavailable("token config truncated".to_string()))?;
        Ok(String::from_utf8_lossy(bytes).into_owned())
    }

    /// Whether `address` is on the student allow-list
    pub async fn is_student(&self, address: &AccountAddress) -> Result<bool> {
        if self.is_mock() {
            let state = self.mock_state.read().expect("chain lock poisoned");
            return Ok(state.students.contains(address));
        }

        let (role_pda, _) = self.student_role_pda(address);
        Ok(self.fetch_account(&role_pda).await?.is_some())
    }

    /// On-chain token balance in base units
    pub async fn balance_of(&self, address: &AccountAddress) -> Result<u64> {
        if self.is_mock() {
            let mut state = self.mock_state.write().expect("chain lock poisoned");
            state.take_injected_failure()?;
            return Ok(state.balances.get(address).copied().unwrap_or(0));
        }

        let wallet = Pubkey::new_from_array(*address);
        let ata = get_associated_token_address(&wallet, &self.mint_pubkey());
        match self.fetch_account(&ata).await? {
            // SPL token account layout: mint (32) + owner (32) + amount (8) + ...
            Some(account) if account.data.len() >= 72 => {
                Ok(u64::from_le_bytes(account.data[64..72].try_into().expect("8 bytes")))
            }
            Some(_) => Err(ChainError::Unavailable("malformed token account".to_string())),
            None => Ok(0),
        }
    }

    /// Grant the student role. Reverts if the role is already granted.
    pub async fn add_student(&self, address: &AccountAddress) -> Result<TransactionSignature> {
        info!("Granting student role to {}", hex_encode(&address[..8]));

        if self.is_mock() {
            let mut state = self.mock_state.write().expect("chain lock poisoned");
            state.take_injected_failure()?;
            if !state.students.insert(*address) {
                return Err(ChainError::Reverted("student role already granted".to_string()));
            }
            return Ok(Self::generate_mock_signature(&mut state));
        }

        let (config_pda, _) = self.token_config_pda();
        let (role_pda, _) = self.student_role_pda(address);
        let admin = Pubkey::new_from_array(self.signer_pubkey);
        let wallet = Pubkey::new_from_array(*address);

        let instruction = Instruction {
            program_id: self.token_program(),
            accounts: vec![
                AccountMeta::new_readonly(config_pda, false),
                AccountMeta::new(admin, true),
                AccountMeta::new_readonly(wallet, false),
                AccountMeta::new(role_pda, false),
                AccountMeta::new_readonly(system_program::id(), false),
            ],
            data: discriminator("add_student").to_vec(),
        };

        self.send_transaction(instruction, &[]).await
    }

    /// Revoke the student role
    pub async fn remove_student(&self, address: &AccountAddress) -> Result<TransactionSignature> {
        info!("Revoking student role from {}", hex_encode(&address[..8]));

        if self.is_mock() {
            let mut state = self.mock_state.write().expect("chain lock poisoned");
            state.take_injected_failure()?;
            if !state.students.remove(address) {
                return Err(ChainError::NotStudent);
            }
            return Ok(Self::generate_mock_signature(&mut state));
        }

        let (config_pda, _) = self.token_config_pda();
        let (role_pda, _) = self.student_role_pda(address);
        let admin = Pubkey::new_from_array(self.signer_pubkey);
        let wallet = Pubkey::new_from_array(*address);

        let instruction = Instruction {
            program_id: self.token_program(),
            accounts: vec![
                AccountMeta::new_readonly(config_pda, false),
                AccountMeta::new(admin, true),
                AccountMeta::new_readonly(wallet, false),
                AccountMeta::new(role_pda, false),
            ],
            data: discriminator("remove_student").to_vec(),
        };

        self.send_transaction(instruction, &[]).await
    }

    /// Mint `base_units` to an allow-listed student wallet.
    ///
    /// The allow-list is enforced in the mint path by the program; a
    /// mint to a non-student reverts on-chain, and the mock mirrors
    /// that.
    pub async fn mint(
        &self,
        to: &AccountAddress,
        base_units: u64,
    ) -> Result<TransactionSignature> {
        info!("Minting {} base units to {}", base_units, hex_encode(&to[..8]));

        if self.is_mock() {
            let mut state = self.mock_state.write().expect("chain lock poisoned");
            state.take_injected_failure()?;
            if !state.students.contains(to) {
                return Err(ChainError::NotStudent);
            }
            let balance = state.balances.entry(*to).or_insert(0);
            *balance = balance.saturating_add(base_units);
            return Ok(Self::generate_mock_signature(&mut state));
        }

        let (config_pda, _) = self.token_config_pda();
        let (mint_authority, _) = self.mint_authority_pda();
        let (role_pda, _) = self.student_role_pda(to);
        let admin = Pubkey::new_from_array(self.signer_pubkey);
        let recipient = Pubkey::new_from_array(*to);
        let recipient_ata = get_associated_token_address(&recipient, &self.mint_pubkey());

        let mut data = discriminator("mint_reward").to_vec();
        data.extend_from_slice(&base_units.to_le_bytes());

        let instruction = Instruction {
            program_id: self.token_program(),
            accounts: vec![
                AccountMeta::new_readonly(config_pda, false),
                AccountMeta::new(admin, true),
                AccountMeta::new(self.mint_pubkey(), false),
                AccountMeta::new_readonly(mint_authority, false),
                AccountMeta::new_readonly(role_pda, false),
                AccountMeta::new_readonly(recipient, false),
                AccountMeta::new(recipient_ata, false),
                AccountMeta::new_readonly(spl_token_program_id(), false),
                AccountMeta::new_readonly(spl_associated_token_account::id(), false),
                AccountMeta::new_readonly(system_program::id(), false),
            ],
            data,
        };

        self.send_transaction(instruction, &[]).await
    }

    /// Burn `base_units` from the holder's own balance.
    ///
    /// Holder-signed; the authority co-signs as fee payer only.
    pub async fn burn(
        &self,
        owner_secret: &[u8; 32],
        base_units: u64,
    ) -> Result<TransactionSignature> {
        let owner = keypair_from_secret(owner_secret);
        let owner_address = owner.pubkey().to_bytes();
        info!("Burning {} base units from {}", base_units, hex_encode(&owner_address[..8]));

        if self.is_mock() {
            let mut state = self.mock_state.write().expect("chain lock poisoned");
            state.take_injected_failure()?;
            let balance = state.balances.entry(owner_address).or_insert(0);
            if *balance < base_units {
                return Err(ChainError::Reverted("burn exceeds balance".to_string()));
            }
            *balance -= base_units;
            return Ok(Self::generate_mock_signature(&mut state));
        }

        let owner_ata = get_associated_token_address(&owner.pubkey(), &self.mint_pubkey());

        let mut data = discriminator("burn").to_vec();
        data.extend_from_slice(&base_units.to_le_bytes());

        let instruction = Instruction {
            program_id: self.token_program(),
            accounts: vec![
                AccountMeta::new(owner.pubkey(), true),
                AccountMeta::new(self.mint_pubkey(), false),
                AccountMeta::new(owner_ata, false),
                AccountMeta::new_readonly(spl_token_program_id(), false),
            ],
            data,
        };

        self.send_transaction(instruction, &[&owner]).await
    }

    // ==================== Reward program ====================

    /// Create a registry activity. Returns the on-chain activity id.
    pub async fn create_activity(
        &self,
        name: &str,
        description: &str,
        reward_amount: u64,
    ) -> Result<(TransactionSignature, u64)> {
        info!("Creating registry activity '{}' (reward: {})", name, reward_amount);

        if self.is_mock() {
            let mut state = self.mock_state.write().expect("chain lock poisoned");
            state.take_injected_failure()?;
            let id = state.next_activity_id;
            state.next_activity_id += 1;
            state.activities.insert(
                id,
                OnChainActivity {
                    name: name.to_string(),
                    description: description.to_string(),
                    reward_amount,
                    is_active: true,
                },
            );
            return Ok((Self::generate_mock_signature(&mut state), id));
        }

        // The registry allocates ids from its config counter; read it
        // before submitting so the caller learns the assigned id.
        let activity_id = self.next_registry_id().await?;

        let (config_pda, _) = self.reward_config_pda();
        let (activity_pda, _) = self.activity_pda(activity_id);
        let admin = Pubkey::new_from_array(self.signer_pubkey);

        let mut data = discriminator("create_activity").to_vec();
        encode_string(&mut data, name);
        encode_string(&mut data, description);
        data.extend_from_slice(&reward_amount.to_le_bytes());

        let instruction = Instruction {
            program_id: self.reward_program(),
            accounts: vec![
                AccountMeta::new(config_pda, false),
                AccountMeta::new(admin, true),
                AccountMeta::new(activity_pda, false),
                AccountMeta::new_readonly(system_program::id(), false),
            ],
            data,
        };

        let sig = self.send_transaction(instruction, &[]).await?;
        Ok((sig, activity_id))
    }

    async fn next_registry_id(&self) -> Result<u64> {
        let (config_pda, _) = self.reward_config_pda();
        let account = self
            .fetch_account(&config_pda)
            .await?
            .ok_or_else(|| ChainError::Unavailable("reward config account missing".to_string()))?;
        // Layout: discriminator (8) + admin (32) + next_activity_id (8)
        if account.data.len() < 48 {
            return Err(ChainError::Unavailable("reward config too short".to_string()));
        }
        Ok(u64::from_le_bytes(account.data[40..48].try_into().expect("8 bytes")))
    }

    /// Update a registry activity's mutable fields
    pub async fn update_activity(
        &self,
        activity_id: u64,
        update: ActivityUpdate,
    ) -> Result<TransactionSignature> {
        if self.is_mock() {
            let mut state = self.mock_state.write().expect("chain lock poisoned");
            state.take_injected_failure()?;
            let activity = state
                .activities
                .get_mut(&activity_id)
                .ok_or(ChainError::ActivityNotFound(activity_id))?;
            if let Some(name) = update.name {
                activity.name = name;
            }
            if let Some(description) = update.description {
                activity.description = description;
            }
            if let Some(reward) = update.reward_amount {
                activity.reward_amount = reward;
            }
            if let Some(active) = update.is_active {
                activity.is_active = active;
            }
            return Ok(Self::generate_mock_signature(&mut state));
        }

        let (config_pda, _) = self.reward_config_pda();
        let (activity_pda, _) = self.activity_pda(activity_id);
        let admin = Pubkey::new_from_array(self.signer_pubkey);

        let mut data = discriminator("update_activity").to_vec();
        data.extend_from_slice(&activity_id.to_le_bytes());
        // Borsh Option encoding: 1-byte tag + payload
        match &update.name {
            Some(name) => {
                data.push(1);
                encode_string(&mut data, name);
            }
            None => data.push(0),
        }
        match &update.description {
            Some(description) => {
                data.push(1);
                encode_string(&mut data, description);
            }
            None => data.push(0),
        }
        match update.reward_amount {
            Some(reward) => {
                data.push(1);
                data.extend_from_slice(&reward.to_le_bytes());
            }
            None => data.push(0),
        }
        match update.is_active {
            Some(active) => {
                data.push(1);
                data.push(active as u8);
            }
            None => data.push(0),
        }

        let instruction = Instruction {
            program_id: self.reward_program(),
            accounts: vec![
                AccountMeta::new_readonly(config_pda, false),
                AccountMeta::new(admin, true),
                AccountMeta::new(activity_pda, false),
            ],
            data,
        };

        self.send_transaction(instruction, &[]).await
    }

    /// Read a registry activity
    pub async fn get_activity(&self, activity_id: u64) -> Result<Option<OnChainActivity>> {
        debug!("Fetching registry activity {}", activity_id);

        if self.is_mock() {
            let state = self.mock_state.read().expect("chain lock poisoned");
            return Ok(state.activities.get(&activity_id).cloned());
        }

        let (activity_pda, _) = self.activity_pda(activity_id);
        let Some(account) = self.fetch_account(&activity_pda).await? else {
            return Ok(None);
        };

        // Layout: discriminator (8) + id (8) + name (string) + description
        // (string) + reward_amount (8) + is_active (1)
        let data = &account.data;
        let mut offset = 8 + 8;
        let name = read_string(data, &mut offset)?;
        let description = read_string(data, &mut offset)?;
        if data.len() < offset + 9 {
            return Err(ChainError::Unavailable("activity account truncated".to_string()));
        }
        let reward_amount =
            u64::from_le_bytes(data[offset..offset + 8].try_into().expect("8 bytes"));
        let is_active = data[offset + 8] != 0;

        Ok(Some(OnChainActivity {
            name,
            description,
            reward_amount,
            is_active,
        }))
    }

    /// Mark an activity completed for a student wallet.
    ///
    /// Reverts on-chain if the wallet is not an allow-listed student, if
    /// the activity is inactive, or if the pair was already completed.
    /// This revert is the duplicate-prevention boundary that no
    /// off-chain caller can bypass.
    pub async fn complete_activity(
        &self,
        address: &AccountAddress,
        activity_id: u64,
    ) -> Result<TransactionSignature> {
        info!(
            "Recording completion of registry activity {} for {}",
            activity_id,
            hex_encode(&address[..8]),
        );

        if self.is_mock() {
            let mut state = self.mock_state.write().expect("chain lock poisoned");
            state.take_injected_failure()?;
            Self::mock_check_completion(&state, address, activity_id)?;
            state.completions.insert((*address, activity_id));
            return Ok(Self::generate_mock_signature(&mut state));
        }

        let instruction = self.complete_instruction(address, activity_id);
        self.send_transaction(instruction, &[]).await
    }

    fn mock_check_completion(
        state: &MockState,
        address: &AccountAddress,
        activity_id: u64,
    ) -> Result<()> {
        if !state.students.contains(address) {
            return Err(ChainError::NotStudent);
        }
        let activity = state
            .activities
            .get(&activity_id)
            .ok_or(ChainError::ActivityNotFound(activity_id))?;
        if !activity.is_active {
            return Err(ChainError::ActivityInactive(activity_id));
        }
        if state.completions.contains(&(*address, activity_id)) {
            return Err(ChainError::AlreadyCompleted { activity_id });
        }
        Ok(())
    }

    fn complete_instruction(&self, address: &AccountAddress, activity_id: u64) -> Instruction {
        let (config_pda, _) = self.reward_config_pda();
        let (activity_pda, _) = self.activity_pda(activity_id);
        let (role_pda, _) = self.student_role_pda(address);
        let (completion_pda, _) = self.completion_pda(address, activity_id);
        let admin = Pubkey::new_from_array(self.signer_pubkey);
        let wallet = Pubkey::new_from_array(*address);

        let mut data = discriminator("complete_activity").to_vec();
        data.extend_from_slice(&activity_id.to_le_bytes());

        Instruction {
            program_id: self.reward_program(),
            accounts: vec![
                AccountMeta::new_readonly(config_pda, false),
                AccountMeta::new(admin, true),
                AccountMeta::new_readonly(wallet, false),
                AccountMeta::new_readonly(role_pda, false),
                AccountMeta::new_readonly(activity_pda, false),
                AccountMeta::new(completion_pda, false),
                AccountMeta::new_readonly(system_program::id(), false),
            ],
            data,
        }
    }

    /// Batch completion: all-or-nothing for the whole list
    pub async fn batch_complete_activity(
        &self,
        addresses: &[AccountAddress],
        activity_id: u64,
    ) -> Result<TransactionSignature> {
        info!(
            "Recording batch completion of registry activity {} for {} students",
            activity_id,
            addresses.len(),
        );

        if self.is_mock() {
            let mut state = self.mock_state.write().expect("chain lock poisoned");
            state.take_injected_failure()?;
            for address in addresses {
                Self::mock_check_completion(&state, address, activity_id)?;
            }
            for address in addresses {
                state.completions.insert((*address, activity_id));
            }
            return Ok(Self::generate_mock_signature(&mut state));
        }

        let (config_pda, _) = self.reward_config_pda();
        let (activity_pda, _) = self.activity_pda(activity_id);
        let admin = Pubkey::new_from_array(self.signer_pubkey);

        let mut data = discriminator("batch_complete_activity").to_vec();
        data.extend_from_slice(&activity_id.to_le_bytes());
        data.extend_from_slice(&(addresses.len() as u32).to_le_bytes());
        for address in addresses {
            data.extend_from_slice(address);
        }

        let mut accounts = vec![
            AccountMeta::new_readonly(config_pda, false),
            AccountMeta::new(admin, true),
            AccountMeta::new_readonly(activity_pda, false),
            AccountMeta::new_readonly(system_program::id(), false),
        ];
        // Per student: wallet, student role, completion record
        for address in addresses {
            let wallet = Pubkey::new_from_array(*address);
            let (role_pda, _) = self.student_role_pda(address);
            let (completion_pda, _) = self.completion_pda(address, activity_id);
            accounts.push(AccountMeta::new_readonly(wallet, false));
            accounts.push(AccountMeta::new_readonly(role_pda, false));
            accounts.push(AccountMeta::new(completion_pda, false));
        }

        let instruction = Instruction {
            program_id: self.reward_program(),
            accounts,
            data,
        };

        self.send_transaction(instruction, &[]).await
    }

    /// Whether a completion record exists for (address, activity)
    pub async fn has_completed(
        &self,
        address: &AccountAddress,
        activity_id: u64,
    ) -> Result<bool> {
        if self.is_mock() {
            let state = self.mock_state.read().expect("chain lock poisoned");
            return Ok(state.completions.contains(&(*address, activity_id)));
        }

        let (completion_pda, _) = self.completion_pda(address, activity_id);
        Ok(self.fetch_account(&completion_pda).await?.is_some())
    }

    // ==================== Mock helpers ====================

    /// Overwrite a mock balance directly (tests)
    pub fn mock_set_balance(&self, address: &AccountAddress, base_units: u64) {
        let mut state = self.mock_state.write().expect("chain lock poisoned");
        state.balances.insert(*address, base_units);
    }

    /// Fail the next `n` submissions or balance reads with
    /// `Unavailable` (tests)
    pub fn fail_next_submissions(&self, n: u32) {
        let mut state = self.mock_state.write().expect("chain lock poisoned");
        state.fail_next = n;
    }
}

/// Expand a 32-byte ed25519 secret into a Solana keypair
fn keypair_from_secret(secret: &[u8; 32]) -> Keypair {
    let signing_key = ed25519_dalek::SigningKey::from_bytes(secret);
    let public_bytes = signing_key.verifying_key().to_bytes();

    let mut full_key = [0u8; 64];
    full_key[..32].copy_from_slice(secret);
    full_key[32..].copy_from_slice(&public_bytes);
    Keypair::try_from(full_key.as_ref()).expect("valid ed25519 keypair bytes")
}

/// SPL token program id
fn spl_token_program_id() -> Pubkey {
    use std::str::FromStr;
    Pubkey::from_str("TokenkegQfeZyiNwAJbNbGKPFXCWuBvf9Ss623VQ5DA").expect("valid program id")
}

/// A send failure with a program error in it is a revert; anything else
/// is the node being unreachable or slow.
fn classify_send_error(message: String) -> ChainError {
    if message.contains("custom program error")
        || message.contains("Error processing Instruction")
        || message.contains("insufficient funds")
    {
        ChainError::Reverted(message)
    } else {
        ChainError::Unavailable(message)
    }
}

fn read_string(data: &[u8], offset: &mut usize) -> Result<String> {
    let len_end = *offset + 4;
    if data.len() < len_end {
        return Err(ChainError::Unavailable("account data truncated".to_string()));
    }
    let len = u32::from_le_bytes(data[*offset..len_end].try_into().expect("4 bytes")) as usize;
    let end = len_end + len;
    if data.len() < end {
        return Err(ChainError::Unavailable("account data truncated".to_string()));
    }
    let s = String::from_utf8_lossy(&data[len_end..end]).into_owned();
    *offset = end;
    Ok(s)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mock_client() -> ChainClient {
        ChainClient::new(ChainConfig::mock(), [0u8; 32])
    }

    #[test]
    fn test_default_config_is_mock() {
        let config = ChainConfig::default();
        assert_eq!(config.mode, ChainMode::Mock);
        assert_eq!(config.commitment, "confirmed");
    }

    #[test]
    fn test_devnet_config() {
        let config = ChainConfig::devnet([1u8; 32], [2u8; 32], [3u8; 32]);
        assert_eq!(config.mode, ChainMode::Live);
        assert_eq!(config.token_program_id, [1u8; 32]);
        assert_eq!(config.reward_program_id, [2u8; 32]);
        assert!(config.rpc_url.contains("devnet"));
    }

    #[test]
    fn test_discriminator_is_stable() {
        assert_eq!(discriminator("mint_reward"), discriminator("mint_reward"));
        assert_ne!(discriminator("mint_reward"), discriminator("burn"));
    }

    #[tokio::test]
    async fn test_token_name_probe() {
        let client = mock_client();
        assert_eq!(client.token_name().await.unwrap(), "CampusCoin");
    }

    #[tokio::test]
    async fn test_student_role_lifecycle() {
        let client = mock_client();
        let student = [1u8; 32];

        assert!(!client.is_student(&student).await.unwrap());
        client.add_student(&student).await.unwrap();
        assert!(client.is_student(&student).await.unwrap());

        // Granting twice reverts, matching the on-chain init semantics
        assert!(matches!(
            client.add_student(&student).await,
            Err(ChainError::Reverted(_))
        ));

        client.remove_student(&student).await.unwrap();
        assert!(!client.is_student(&student).await.unwrap());
    }

    #[tokio::test]
    async fn test_mint_requires_student_role() {
        let client = mock_client();
        let outsider = [9u8; 32];

        assert!(matches!(
            client.mint(&outsider, 100).await,
            Err(ChainError::NotStudent)
        ));
        assert_eq!(client.balance_of(&outsider).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_mint_credits_balance() {
        let client = mock_client();
        let student = [1u8; 32];
        client.add_student(&student).await.unwrap();

        let sig = client.mint(&student, 50_000_000_000).await.unwrap();
        assert_ne!(sig, [0u8; 64]);
        assert_eq!(client.balance_of(&student).await.unwrap(), 50_000_000_000);

        client.mint(&student, 25_000_000_000).await.unwrap();
        assert_eq!(client.balance_of(&student).await.unwrap(), 75_000_000_000);
    }

    #[tokio::test]
    async fn test_burn_checks_balance() {
        let client = mock_client();
        let secret = [7u8; 32];
        let owner = ed25519_dalek::SigningKey::from_bytes(&secret)
            .verifying_key()
            .to_bytes();

        client.add_student(&owner).await.unwrap();
        client.mint(&owner, 100).await.unwrap();

        client.burn(&secret, 40).await.unwrap();
        assert_eq!(client.balance_of(&owner).await.unwrap(), 60);

        assert!(matches!(
            client.burn(&secret, 1_000).await,
            Err(ChainError::Reverted(_))
        ));
        assert_eq!(client.balance_of(&owner).await.unwrap(), 60);
    }

    #[tokio::test]
    async fn test_registry_activity_lifecycle() {
        let client = mock_client();

        let (_, id0) = client.create_activity("Assignment 1", "First assignment", 100).await.unwrap();
        let (_, id1) = client.create_activity("Assignment 2", "Second assignment", 200).await.unwrap();
        assert_eq!(id0, 0);
        assert_eq!(id1, 1);

        let activity = client.get_activity(id0).await.unwrap().unwrap();
        assert_eq!(activity.name, "Assignment 1");
        assert_eq!(activity.reward_amount, 100);
        assert!(activity.is_active);

        client
            .update_activity(
                id0,
                ActivityUpdate {
                    reward_amount: Some(150),
                    is_active: Some(false),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        let activity = client.get_activity(id0).await.unwrap().unwrap();
        assert_eq!(activity.reward_amount, 150);
        assert!(!activity.is_active);

        assert!(client.get_activity(99).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_complete_activity_rejects_duplicates() {
        let client = mock_client();
        let student = [1u8; 32];
        client.add_student(&student).await.unwrap();
        let (_, id) = client.create_activity("A", "", 100).await.unwrap();

        assert!(!client.has_completed(&student, id).await.unwrap());
        client.complete_activity(&student, id).await.unwrap();
        assert!(client.has_completed(&student, id).await.unwrap());

        assert!(matches!(
            client.complete_activity(&student, id).await,
            Err(ChainError::AlreadyCompleted { .. })
        ));
    }

    #[tokio::test]
    async fn test_complete_activity_requires_student_and_active() {
        let client = mock_client();
        let outsider = [9u8; 32];
        let (_, id) = client.create_activity("A", "", 100).await.unwrap();

        assert!(matches!(
            client.complete_activity(&outsider, id).await,
            Err(ChainError::NotStudent)
        ));

        let student = [1u8; 32];
        client.add_student(&student).await.unwrap();
        assert!(matches!(
            client.complete_activity(&student, 42).await,
            Err(ChainError::ActivityNotFound(42))
        ));

        client
            .update_activity(id, ActivityUpdate { is_active: Some(false), ..Default::default() })
            .await
            .unwrap();
        assert!(matches!(
            client.complete_activity(&student, id).await,
            Err(ChainError::ActivityInactive(_))
        ));
    }

    #[tokio::test]
    async fn test_batch_complete_is_all_or_nothing() {
        let client = mock_client();
        let s1 = [1u8; 32];
        let s2 = [2u8; 32];
        client.add_student(&s1).await.unwrap();
        client.add_student(&s2).await.unwrap();
        let (_, id) = client.create_activity("A", "", 100).await.unwrap();

        // s2 already completed — the whole batch must revert
        client.complete_activity(&s2, id).await.unwrap();
        assert!(matches!(
            client.batch_complete_activity(&[s1, s2], id).await,
            Err(ChainError::AlreadyCompleted { .. })
        ));
        assert!(!client.has_completed(&s1, id).await.unwrap());

        // Clean batch succeeds for everyone
        let (_, id2) = client.create_activity("B", "", 100).await.unwrap();
        client.batch_complete_activity(&[s1, s2], id2).await.unwrap();
        assert!(client.has_completed(&s1, id2).await.unwrap());
        assert!(client.has_completed(&s2, id2).await.unwrap());
    }

    #[tokio::test]
    async fn test_injected_failures_are_transient() {
        let client = mock_client();
        let student = [1u8; 32];
        client.add_student(&student).await.unwrap();

        client.fail_next_submissions(1);
        let err = client.mint(&student, 100).await.unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(client.balance_of(&student).await.unwrap(), 0);

        client.mint(&student, 100).await.unwrap();
        assert_eq!(client.balance_of(&student).await.unwrap(), 100);
    }

    #[test]
    fn test_error_classification() {
        assert!(matches!(
            classify_send_error("custom program error: 0x1771".to_string()),
            ChainError::Reverted(_)
        ));
        assert!(matches!(
            classify_send_error("connection refused".to_string()),
            ChainError::Unavailable(_)
        ));
    }
}
