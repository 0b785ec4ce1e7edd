use anchor_lang::prelude::*;
use anchor_lang::solana_program::{program::invoke_signed, system_instruction};

use campuscoin_token::StudentRole;

// Program ID will be replaced after first build with `anchor keys list`
declare_id!("nRHCrY7LELSFMT8xdkhStfsF8CkaP4c89aKg5EKrNmS");

/// One completion record per (wallet, activity). The record is a PDA
/// whose creation fails if it already exists, so a second completion
/// for the same pair reverts at the contract level — this boundary
/// cannot be bypassed by a buggy or compromised off-chain caller.
///
/// There is no `has_completed` instruction: existence of the completion
/// PDA is the query, readable by anyone without a transaction.
#[program]
pub mod campuscoin_reward {
    use super::*;

    /// Initialize the registry config. The deployer becomes the admin;
    /// activity ids are allocated from the config's monotonic counter.
    pub fn initialize(ctx: Context<Initialize>) -> Result<()> {
        let config = &mut ctx.accounts.config;
        config.admin = ctx.accounts.admin.key();
        config.next_activity_id = 0;
        Ok(())
    }

    /// Create a registry activity
    pub fn create_activity(
        ctx: Context<CreateActivity>,
        name: String,
        description: String,
        reward_amount: u64,
    ) -> Result<()> {
        require!(name.len() <= Activity::MAX_NAME_LEN, RewardError::FieldTooLong);
        require!(
            description.len() <= Activity::MAX_DESCRIPTION_LEN,
            RewardError::FieldTooLong,
        );

        let config = &mut ctx.accounts.config;
        let activity = &mut ctx.accounts.activity;

        activity.id = config.next_activity_id;
        activity.name = name;
        activity.description = description;
        activity.reward_amount = reward_amount;
        activity.is_active = true;

        config.next_activity_id += 1;

        emit!(ActivityCreated {
            activity_id: activity.id,
            reward_amount,
        });

        Ok(())
    }

    /// Update an activity's mutable fields; identity stays fixed
    pub fn update_activity(
        ctx: Context<UpdateActivity>,
        _activity_id: u64,
        name: Option<String>,
        description: Option<String>,
        reward_amount: Option<u64>,
        is_active: Option<bool>,
    ) -> Result<()> {
        let activity = &mut ctx.accounts.activity;

        if let Some(name) = name {
            require!(name.len() <= Activity::MAX_NAME_LEN, RewardError::FieldTooLong);
            activity.name = name;
        }
        if let Some(description) = description {
            require!(
                description.len() <= Activity::MAX_DESCRIPTION_LEN,
                RewardError::FieldTooLong,
            );
            activity.description = description;
        }
        if let Some(reward) = reward_amount {
            activity.reward_amount = reward;
        }
        if let Some(active) = is_active {
            activity.is_active = active;
        }

        Ok(())
    }

    /// Mark an activity completed for one student.
    ///
    /// Requires the student's allow-list PDA from the token program and
    /// an active activity. The completion record is `init`: if the pair
    /// was already completed, account creation fails and the whole
    /// transaction reverts.
    pub fn complete_activity(ctx: Context<CompleteActivity>, activity_id: u64) -> Result<()> {
        let completion = &mut ctx.accounts.completion;
        completion.wallet = ctx.accounts.student_wallet.key();
        completion.activity_id = activity_id;
        completion.completed_at = Clock::get()?.unix_timestamp;

        emit!(ActivityCompleted {
            wallet: completion.wallet,
            activity_id,
        });

        Ok(())
    }

    /// Mark an activity completed for a list of students, atomically.
    ///
    /// Remaining accounts carry one (wallet, student_role, completion)
    /// triple per student. Completion PDAs are created manually here;
    /// any pair that was already completed makes the whole batch revert.
    pub fn batch_complete_activity<'info>(
        ctx: Context<'_, '_, 'info, 'info, BatchCompleteActivity<'info>>,
        activity_id: u64,
        students: Vec<Pubkey>,
    ) -> Result<()> {
        require!(!students.is_empty(), RewardError::EmptyBatch);
        require!(
            ctx.remaining_accounts.len() == students.len() * 3,
            RewardError::MalformedBatch,
        );

        let rent = Rent::get()?;
        let now = Clock::get()?.unix_timestamp;
        let space = 8 + CompletionRecord::INIT_SPACE;
        let lamports = rent.minimum_balance(space);
        let id_bytes = activity_id.to_le_bytes();

        for (i, student) in students.iter().enumerate() {
            let wallet_info = &ctx.remaining_accounts[i * 3];
            let role_info = &ctx.remaining_accounts[i * 3 + 1];
            let completion_info = &ctx.remaining_accounts[i * 3 + 2];

            require_keys_eq!(wallet_info.key(), *student, RewardError::MalformedBatch);

            // Allow-list membership PDA of the token program
            let (expected_role, _) = Pubkey::find_program_address(
                &[b"student", student.as_ref()],
                &campuscoin_token::ID,
            );
            require_keys_eq!(role_info.key(), expected_role, RewardError::MalformedBatch);
            require!(!role_info.data_is_empty(), RewardError::NotStudent);

            let (expected_completion, bump) = Pubkey::find_program_address(
                &[b"completion", student.as_ref(), &id_bytes],
                &crate::ID,
            );
            require_keys_eq!(
                completion_info.key(),
                expected_completion,
                RewardError::MalformedBatch,
            );
            // An existing record means this pair was already rewarded
            require!(
                completion_info.data_is_empty() && completion_info.lamports() == 0,
                RewardError::AlreadyCompleted,
            );

            let seeds: &[&[u8]] =
                &[b"completion", student.as_ref(), &id_bytes, &[bump]];
            invoke_signed(
                &system_instruction::create_account(
                    &ctx.accounts.admin.key(),
                    &expected_completion,
                    lamports,
                    space as u64,
                    &crate::ID,
                ),
                &[
                    ctx.accounts.admin.to_account_info(),
                    completion_info.clone(),
                    ctx.accounts.system_program.to_account_info(),
                ],
                &[seeds],
            )?;

            let record = CompletionRecord {
                wallet: *student,
                activity_id,
                completed_at: now,
            };
            let mut data = completion_info.try_borrow_mut_data()?;
            data[..8].copy_from_slice(CompletionRecord::DISCRIMINATOR.as_ref());
            let mut cursor = &mut data[8..];
            record.serialize(&mut cursor)?;

            emit!(ActivityCompleted {
                wallet: *student,
                activity_id,
            });
        }

        Ok(())
    }
}

// ============================================================================
// Accounts (Context structs)
// ============================================================================

#[derive(Accounts)]
pub struct Initialize<'info> {
    #[account(
        init,
        payer = admin,
        space = 8 + RewardConfig::INIT_SPACE,
        seeds = [b"config"],
        bump,
    )]
    pub config: Account<'info, RewardConfig>,

    #[account(mut)]
    pub admin: Signer<'info>,

    pub system_program: Program<'info, System>,
}

#[derive(Accounts)]
pub struct CreateActivity<'info> {
    #[account(mut, seeds = [b"config"], bump, has_one = admin @ RewardError::Unauthorized)]
    pub config: Account<'info, RewardConfig>,

    #[account(mut)]
    pub admin: Signer<'info>,

    #[account(
        init,
        payer = admin,
        space = 8 + Activity::INIT_SPACE,
        seeds = [b"activity", &config.next_activity_id.to_le_bytes()],
        bump,
    )]
    pub activity: Account<'info, Activity>,

    pub system_program: Program<'info, System>,
}

#[derive(Accounts)]
#[instruction(activity_id: u64)]
pub struct UpdateActivity<'info> {
    #[account(seeds = [b"config"], bump, has_one = admin @ RewardError::Unauthorized)]
    pub config: Account<'info, RewardConfig>,

    #[account(mut)]
    pub admin: Signer<'info>,

    #[account(
        mut,
        seeds = [b"activity", &activity_id.to_le_bytes()],
        bump,
    )]
    pub activity: Account<'info, Activity>,
}

#[derive(Accounts)]
#[instruction(activity_id: u64)]
pub struct CompleteActivity<'info> {
    #[account(seeds = [b"config"], bump, has_one = admin @ RewardError::Unauthorized)]
    pub config: Account<'info, RewardConfig>,

    #[account(mut)]
    pub admin: Signer<'info>,

    /// CHECK: the rewarded wallet; only its key is read
    pub student_wallet: UncheckedAccount<'info>,

    /// Allow-list membership PDA owned by the token program
    #[account(
        seeds = [b"student", student_wallet.key().as_ref()],
        bump,
        seeds::program = campuscoin_token::ID,
    )]
    pub student_role: Account<'info, StudentRole>,

    #[account(
        seeds = [b"activity", &activity_id.to_le_bytes()],
        bump,
        constraint = activity.is_active @ RewardError::ActivityInactive,
    )]
    pub activity: Account<'info, Activity>,

    #[account(
        init,
        payer = admin,
        space = 8 + CompletionRecord::INIT_SPACE,
        seeds = [b"completion", student_wallet.key().as_ref(), &activity_id.to_le_bytes()],
        bump,
    )]
    pub completion: Account<'info, CompletionRecord>,

    pub system_program: Program<'info, System>,
}

#[derive(Accounts)]
#[instruction(activity_id: u64)]
pub struct BatchCompleteActivity<'info> {
    #[account(seeds = [b"config"], bump, has_one = admin @ RewardError::Unauthorized)]
    pub config: Account<'info, RewardConfig>,

    #[account(mut)]
    pub admin: Signer<'info>,

    #[account(
        seeds = [b"activity", &activity_id.to_le_bytes()],
        bump,
        constraint = activity.is_active @ RewardError::ActivityInactive,
    )]
    pub activity: Account<'info, Activity>,

    pub system_program: Program<'info, System>,
}

// ============================================================================
// Account Data
// ============================================================================

#[account]
#[derive(InitSpace)]
pub struct RewardConfig {
    pub admin: Pubkey,
    /// Monotonic activity id counter
    pub next_activity_id: u64,
}

#[account]
#[derive(InitSpace)]
pub struct Activity {
    pub id: u64,
    #[max_len(64)]
    pub name: String,
    #[max_len(256)]
    pub description: String,
    /// Reward in whole tokens, advertised for off-chain display
    pub reward_amount: u64,
    pub is_active: bool,
}

impl Activity {
    pub const MAX_NAME_LEN: usize = 64;
    pub const MAX_DESCRIPTION_LEN: usize = 256;
}

/// One record per (wallet, activity) — write-once by construction
#[account]
#[derive(InitSpace)]
pub struct CompletionRecord {
    pub wallet: Pubkey,
    pub activity_id: u64,
    pub completed_at: i64,
}

// ============================================================================
// Events
// ============================================================================

#[event]
pub struct ActivityCreated {
    pub activity_id: u64,
    pub reward_amount: u64,
}

#[event]
pub struct ActivityCompleted {
    pub wallet: Pubkey,
    pub activity_id: u64,
}

// ============================================================================
// Errors
// ============================================================================

#[error_code]
pub enum RewardError {
    #[msg("Only the admin may perform this action")]
    Unauthorized,
    #[msg("Address is not a registered student")]
    NotStudent,
    #[msg("Activity is inactive")]
    ActivityInactive,
    #[msg("Student already completed this activity")]
    AlreadyCompleted,
    #[msg("Batch accounts do not match the student list")]
    MalformedBatch,
    #[msg("Batch must contain at least one student")]
    EmptyBatch,
    #[msg("Name or description exceeds the maximum length")]
    FieldTooLong,
}
