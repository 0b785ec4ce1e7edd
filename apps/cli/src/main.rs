//! CampusCoin CLI
//!
//! Operator interface for the reward system: user and wallet
//! provisioning, activity administration, registration transitions,
//! settlement and reconciliation. Runs against the mock chain by
//! default; pass `--live` to talk to the deployed devnet programs.

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use tracing::info;

use campuscoin_chain::{spawn_authority_submitter, ChainClient, ChainConfig};
use campuscoin_core::format_base_units;
use campuscoin_keystore::{default_authority_keyfile, default_data_dir, load_or_generate_authority_key};
use campuscoin_ledger::Ledger;
use campuscoin_logging::LogLevel;
use campuscoin_registry::RegistrationService;
use campuscoin_settlement::SettlementService;
use campuscoin_wallet::WalletService;

/// CampusCoin - student activity rewards on Solana
#[derive(Parser)]
#[command(name = "campuscoin")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the ledger database
    #[arg(long, env = "CAMPUSCOIN_DB")]
    db: Option<PathBuf>,

    /// Path to the authority keyfile
    #[arg(long, env = "CAMPUSCOIN_KEYFILE")]
    keyfile: Option<PathBuf>,

    /// Use the live devnet deployment instead of the mock chain
    #[arg(long)]
    live: bool,

    /// Override the RPC endpoint (live mode)
    #[arg(long, env = "CAMPUSCOIN_RPC_URL")]
    rpc_url: Option<String>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Add a user to the ledger
    AddUser {
        /// User id
        id: String,
        /// Student code (omit for administrators)
        #[arg(long)]
        student_code: Option<String>,
        /// Full name
        #[arg(long, default_value = "")]
        name: String,
        /// Class name
        #[arg(long)]
        class: Option<String>,
    },

    /// Provision a wallet for a user (idempotent)
    ProvisionWallet {
        user_id: String,
    },

    /// Create an activity
    CreateActivity {
        name: String,
        #[arg(long, default_value = "")]
        description: String,
        /// Reward in whole tokens
        #[arg(long)]
        reward: u64,
        #[arg(long, default_value = "50")]
        max_participants: i64,
        /// Registration window in days from now
        #[arg(long, default_value = "30")]
        days: i64,
        /// CSV of allowed classes (omit for unrestricted)
        #[arg(long)]
        classes: Option<String>,
        /// Approve registrations automatically
        #[arg(long)]
        auto_approve: bool,
        /// Mirror the activity into the on-chain completion registry
        #[arg(long)]
        on_chain: bool,
    },

    /// List activities open for registration
    Activities,

    /// Register a student for an activity
    Register {
        student_code: String,
        activity_id: i64,
    },

    /// Approve a registration
    Approve {
        activity_id: i64,
        student_code: String,
    },

    /// Confirm participation and settle the reward
    Confirm {
        activity_id: i64,
        student_code: String,
        /// Evidence image URL
        #[arg(long)]
        evidence: Option<String>,
    },

    /// Show a wallet's balance
    Balance {
        user_id: String,
        /// Force a strict sync against the chain
        #[arg(long)]
        sync: bool,
    },

    /// Show a user's transaction history
    History {
        user_id: String,
    },

    /// Convert whole coins into training points
    Convert {
        user_id: String,
        coins: u64,
    },

    /// Report confirmed participations that never settled
    Reconcile,

    /// Probe the deployed token program
    Probe,
}

struct App {
    ledger: Ledger,
    registry: RegistrationService,
    wallets: WalletService,
    settlement: SettlementService,
    chain: ChainClient,
}

async fn build_app(cli: &Cli) -> Result<App> {
    let keyfile = cli.keyfile.clone().unwrap_or_else(default_authority_keyfile);
    let authority = load_or_generate_authority_key(&keyfile)
        .with_context(|| format!("loading authority key from {}", keyfile.display()))?;

    let mut config = if cli.live {
        ChainConfig::devnet_default()
    } else {
        ChainConfig::mock()
    };
    if let Some(url) = &cli.rpc_url {
        config.rpc_url = url.clone();
    }
    let chain = ChainClient::with_secret_key(config, authority.secret_bytes());

    let db = cli
        .db
        .clone()
        .unwrap_or_else(|| default_data_dir().join("campuscoin.db"));
    if let Some(parent) = db.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating {}", parent.display()))?;
    }
    let ledger = Ledger::open(&db).await.context("opening ledger")?;

    let submitter = spawn_authority_submitter(chain.clone(), 64);
    let registry = RegistrationService::new(ledger.clone());
    let wallets = WalletService::new(ledger.clone(), chain.clone());
    let settlement = SettlementService::new(ledger.clone(), chain.clone(), submitter);

    Ok(App { ledger, registry, wallets, settlement, chain })
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    campuscoin_logging::init(LogLevel::from_verbose(cli.verbose));

    let app = build_app(&cli).await?;

    match &cli.command {
        Commands::AddUser { id, student_code, name, class } => {
            let is_student = student_code.is_some();
            app.ledger
                .insert_user(id, student_code.as_deref(), name, class.as_deref(), is_student)
                .await?;
            println!("Added user {}", id);
        }

        Commands::ProvisionWallet { user_id } => {
            let wallet = app.wallets.provision_wallet(user_id).await?;
            println!("Wallet for {}: {}", user_id, wallet.address);
        }

        Commands::CreateActivity {
            name,
            description,
            reward,
            max_participants,
            days,
            classes,
            auto_approve,
            on_chain,
        } => {
            let now = Utc::now().timestamp();
            let end = now + days * 86_400;
            let id = app
                .ledger
                .insert_activity(
                    name,
                    description,
                    *reward as i64,
                    *max_participants,
                    now,
                    end,
                    classes.as_deref(),
                    *auto_approve,
                )
                .await?;
            println!("Created activity {} ({})", id, name);

            if *on_chain {
                let (_, registry_id) =
                    app.chain.create_activity(name, description, *reward).await?;
                app.ledger.set_chain_activity_id(id, registry_id as i64).await?;
                println!("Mirrored as registry activity {}", registry_id);
            }
        }

        Commands::Activities => {
            let activities = app.registry.available_activities().await?;
            if activities.is_empty() {
                println!("No open activities");
            }
            for a in activities {
                println!(
                    "#{} {} — {} tokens, {} slots{}{}",
                    a.id,
                    a.name,
                    a.reward_amount,
                    a.max_participants,
                    a.allowed_classes
                        .as_deref()
                        .map(|c| format!(", classes: {c}"))
                        .unwrap_or_default(),
                    if a.auto_approve { ", auto-approve" } else { "" },
                );
            }
        }

        Commands::Register { student_code, activity_id } => {
            let reg = app.registry.register(student_code, *activity_id).await?;
            if reg.is_approved {
                println!("Registered and approved (auto-approve)");
            } else {
                println!("Registered; waiting for approval");
            }
        }

        Commands::Approve { activity_id, student_code } => {
            app.registry.approve(*activity_id, student_code).await?;
            println!("Approved {} for activity {}", student_code, activity_id);
        }

        Commands::Confirm { activity_id, student_code, evidence } => {
            let confirmed = app
                .registry
                .confirm_participation(*activity_id, student_code, evidence.as_deref())
                .await?;
            info!(
                "Participation confirmed for {}; settling {} tokens",
                student_code, confirmed.reward_amount,
            );

            let result = app.settlement.settle_confirmed(&confirmed).await;
            if result.success {
                println!(
                    "{} (balance: {} tokens, tx: {})",
                    result.message,
                    result
                        .new_balance
                        .map(format_base_units)
                        .unwrap_or_else(|| "?".to_string()),
                    result.on_chain_ref.as_deref().map(|s| &s[..16]).unwrap_or("?"),
                );
            } else {
                bail!("{}", result.message);
            }
        }

        Commands::Balance { user_id, sync } => {
            let model = app.wallets.wallet_for_user(user_id).await?;
            let balance = if *sync {
                app.wallets.sync_balance(&model.address).await?
            } else {
                app.wallets.sync_balance_or_cached(&model.address).await?
            };
            println!("{}: {} tokens ({})", user_id, format_base_units(balance), model.address);
        }

        Commands::History { user_id } => {
            let rows = app.wallets.history_for_user(user_id).await?;
            if rows.is_empty() {
                println!("No transactions");
            }
            for row in rows {
                println!(
                    "{} {} {} — {}{}",
                    row.created_at,
                    row.transaction_type,
                    format_base_units(row.amount.unsigned_abs()),
                    row.description,
                    row.chain_ref
                        .as_deref()
                        .map(|r| format!(" (tx {})", &r[..16.min(r.len())]))
                        .unwrap_or_default(),
                );
            }
        }

        Commands::Convert { user_id, coins } => {
            let (balance, points) = app.wallets.convert_coins_to_points(user_id, *coins).await?;
            println!(
                "Converted {} coins; balance {} tokens, {} training points",
                coins,
                format_base_units(balance),
                points,
            );
        }

        Commands::Reconcile => {
            let unsettled = app.settlement.reconcile_unsettled().await?;
            if unsettled.is_empty() {
                println!("All confirmed participations are settled");
            } else {
                println!("{} confirmed participation(s) without a reward:", unsettled.len());
                for row in unsettled {
                    println!("  student {} activity {}", row.student_id, row.activity_id);
                }
            }
        }

        Commands::Probe => {
            let name = app.chain.token_name().await?;
            println!("Token program is live: {}", name);
        }
    }

    Ok(())
}
