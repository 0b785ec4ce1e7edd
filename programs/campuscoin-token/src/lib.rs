use anchor_lang::prelude::*;
use anchor_spl::{
    associated_token::AssociatedToken,
    token::{self, Mint, Token, TokenAccount},
};

// Program ID will be replaced after first build with `anchor keys list`
declare_id!("H7WDfeXqAZ3PGGojXVdRUFnTv8eQkqhPNJ4m2NyzRBXB");

#[program]
pub mod campuscoin_token {
    use super::*;

    /// Initialize the token config.
    ///
    /// Records the administrator and the SPL mint whose authority is the
    /// program's mint-authority PDA. The deployer becomes the admin.
    pub fn initialize(ctx: Context<Initialize>, name: String, symbol: String) -> Result<()> {
        require!(name.len() <= TokenConfig::MAX_NAME_LEN, TokenError::NameTooLong);
        require!(symbol.len() <= TokenConfig::MAX_SYMBOL_LEN, TokenError::NameTooLong);

        let config = &mut ctx.accounts.config;
        config.admin = ctx.accounts.admin.key();
        config.mint = ctx.accounts.mint.key();
        config.name = name;
        config.symbol = symbol;

        Ok(())
    }

    /// Grant the student role to a wallet.
    ///
    /// Membership is a PDA per wallet; granting twice fails because the
    /// account already exists.
    pub fn add_student(ctx: Context<AddStudent>) -> Result<()> {
        let role = &mut ctx.accounts.student_role;
        role.wallet = ctx.accounts.wallet.key();
        role.granted_at = Clock::get()?.unix_timestamp;

        emit!(StudentAdded {
            wallet: ctx.accounts.wallet.key(),
        });

        Ok(())
    }

    /// Revoke the student role. Closes the membership PDA.
    pub fn remove_student(ctx: Context<RemoveStudent>) -> Result<()> {
        emit!(StudentRemoved {
            wallet: ctx.accounts.wallet.key(),
        });
        Ok(())
    }

    /// Mint an activity reward to an allow-listed student.
    ///
    /// Only the admin may call this, and the recipient's StudentRole PDA
    /// is a required account: minting to a wallet that was never
    /// allow-listed reverts here, on-chain, regardless of what the
    /// off-chain caller believes.
    pub fn mint_reward(ctx: Context<MintReward>, amount: u64) -> Result<()> {
        require!(amount > 0, TokenError::ZeroAmount);

        let bump = ctx.bumps.mint_authority;
        let signer_seeds: &[&[u8]] = &[b"mint_authority", &[bump]];

        token::mint_to(
            CpiContext::new_with_signer(
                ctx.accounts.token_program.to_account_info(),
                token::MintTo {
                    mint: ctx.accounts.mint.to_account_info(),
                    to: ctx.accounts.recipient_token_account.to_account_info(),
                    authority: ctx.accounts.mint_authority.to_account_info(),
                },
                &[signer_seeds],
            ),
            amount,
        )?;

        emit!(RewardMinted {
            recipient: ctx.accounts.recipient.key(),
            amount,
        });

        Ok(())
    }

    /// Burn tokens from the holder's own balance. Holder-signed.
    pub fn burn(ctx: Context<BurnTokens>, amount: u64) -> Result<()> {
        require!(amount > 0, TokenError::ZeroAmount);

        token::burn(
            CpiContext::new(
                ctx.accounts.token_program.to_account_info(),
                token::Burn {
                    mint: ctx.accounts.mint.to_account_info(),
                    from: ctx.accounts.owner_token_account.to_account_info(),
                    authority: ctx.accounts.owner.to_account_info(),
                },
            ),
            amount,
        )?;

        emit!(TokensBurned {
            owner: ctx.accounts.owner.key(),
            amount,
        });

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
        space = 8 + TokenConfig::INIT_SPACE,
        seeds = [b"config"],
        bump,
    )]
    pub config: Account<'info, TokenConfig>,

    #[account(mut)]
    pub admin: Signer<'info>,

    /// The SPL mint; its mint authority must already be the program's
    /// mint-authority PDA
    #[account(
        constraint = mint.mint_authority == Some(mint_authority.key()).into()
            @ TokenError::WrongMintAuthority,
    )]
    pub mint: Account<'info, Mint>,

    /// CHECK: PDA used only as the mint-authority signer
    #[account(seeds = [b"mint_authority"], bump)]
    pub mint_authority: UncheckedAccount<'info>,

    pub system_program: Program<'info, System>,
}

#[derive(Accounts)]
pub struct AddStudent<'info> {
    #[account(seeds = [b"config"], bump, has_one = admin @ TokenError::Unauthorized)]
    pub config: Account<'info, TokenConfig>,

    #[account(mut)]
    pub admin: Signer<'info>,

    /// CHECK: wallet being granted the role; only its key is read
    pub wallet: UncheckedAccount<'info>,

    #[account(
        init,
        payer = admin,
        space = 8 + StudentRole::INIT_SPACE,
        seeds = [b"student", wallet.key().as_ref()],
        bump,
    )]
    pub student_role: Account<'info, StudentRole>,

    pub system_program: Program<'info, System>,
}

#[derive(Accounts)]
pub struct RemoveStudent<'info> {
    #[account(seeds = [b"config"], bump, has_one = admin @ TokenError::Unauthorized)]
    pub config: Account<'info, TokenConfig>,

    #[account(mut)]
    pub admin: Signer<'info>,

    /// CHECK: wallet losing the role; only its key is read
    pub wallet: UncheckedAccount<'info>,

    #[account(
        mut,
        close = admin,
        seeds = [b"student", wallet.key().as_ref()],
        bump,
    )]
    pub student_role: Account<'info, StudentRole>,
}

#[derive(Accounts)]
pub struct MintReward<'info> {
    #[account(seeds = [b"config"], bump, has_one = admin @ TokenError::Unauthorized)]
    pub config: Account<'info, TokenConfig>,

    #[account(mut)]
    pub admin: Signer<'info>,

    #[account(mut, address = config.mint)]
    pub mint: Account<'info, Mint>,

    /// CHECK: PDA signer for the mint CPI
    #[account(seeds = [b"mint_authority"], bump)]
    pub mint_authority: UncheckedAccount<'info>,

    /// Allow-list membership; absent account = mint reverts
    #[account(
        seeds = [b"student", recipient.key().as_ref()],
        bump,
    )]
    pub student_role: Account<'info, StudentRole>,

    /// CHECK: reward recipient; only its key is read
    pub recipient: UncheckedAccount<'info>,

    #[account(
        init_if_needed,
        payer = admin,
        associated_token::mint = mint,
        associated_token::authority = recipient,
    )]
    pub recipient_token_account: Account<'info, TokenAccount>,

    pub token_program: Program<'info, Token>,
    pub associated_token_program: Program<'info, AssociatedToken>,
    pub system_program: Program<'info, System>,
}

#[derive(Accounts)]
pub struct BurnTokens<'info> {
    #[account(mut)]
    pub owner: Signer<'info>,

    #[account(mut)]
    pub mint: Account<'info, Mint>,

    #[account(
        mut,
        associated_token::mint = mint,
        associated_token::authority = owner,
    )]
    pub owner_token_account: Account<'info, TokenAccount>,

    pub token_program: Program<'info, Token>,
}

// ============================================================================
// Account Data
// ============================================================================

#[account]
#[derive(InitSpace)]
pub struct TokenConfig {
    /// Administrator allowed to mint and manage the allow-list
    pub admin: Pubkey,
    /// SPL mint backing the token
    pub mint: Pubkey,
    #[max_len(32)]
    pub name: String,
    #[max_len(8)]
    pub symbol: String,
}

impl TokenConfig {
    pub const MAX_NAME_LEN: usize = 32;
    pub const MAX_SYMBOL_LEN: usize = 8;
}

/// Allow-list membership — one PDA per student wallet.
/// Existence of the account is the membership flag.
#[account]
#[derive(InitSpace)]
pub struct StudentRole {
    pub wallet: Pubkey,
    pub granted_at: i64,
}

// ============================================================================
// Events
// ============================================================================

#[event]
pub struct StudentAdded {
    pub wallet: Pubkey,
}

#[event]
pub struct StudentRemoved {
    pub wallet: Pubkey,
}

#[event]
pub struct RewardMinted {
    pub recipient: Pubkey,
    pub amount: u64,
}

#[event]
pub struct TokensBurned {
    pub owner: Pubkey,
    pub amount: u64,
}

// ============================================================================
// Errors
// ============================================================================

#[error_code]
pub enum TokenError {
    #[msg("Only the admin may perform this action")]
    Unauthorized,
    #[msg("Mint authority must be the program's mint-authority PDA")]
    WrongMintAuthority,
    #[msg("Name or symbol exceeds the maximum length")]
    NameTooLong,
    #[msg("Amount must be greater than zero")]
    ZeroAmount,
}
