//! Token unit scaling
//!
//! Reward amounts are expressed in whole tokens off-chain (activity
//! definitions, admin tooling) and in base units on-chain. The token is
//! declared with 9 decimals; every boundary crossing converts through
//! these two functions so the mint call and the balance display can
//! never disagree on the scaling factor.

use thiserror::Error;

/// Decimal places declared by the token mint
pub const TOKEN_DECIMALS: u8 = 9;

/// Base units per whole token (10^TOKEN_DECIMALS)
pub const BASE_UNITS_PER_TOKEN: u64 = 1_000_000_000;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitError {
    #[error("amount {0} whole tokens overflows base units")]
    Overflow(u64),
}

/// Convert whole tokens to base units
pub fn whole_to_base(whole: u64) -> Result<u64, UnitError> {
    whole
        .checked_mul(BASE_UNITS_PER_TOKEN)
        .ok_or(UnitError::Overflow(whole))
}

/// Convert base units to whole tokens, truncating any fractional part
pub fn base_to_whole(base: u64) -> u64 {
    base / BASE_UNITS_PER_TOKEN
}

/// Format base units as a decimal token amount for display
pub fn format_base_units(base: u64) -> String {
    let whole = base / BASE_UNITS_PER_TOKEN;
    let frac = base % BASE_UNITS_PER_TOKEN;
    if frac == 0 {
        format!("{}", whole)
    } else {
        let s = format!("{:09}", frac);
        format!("{}.{}", whole, s.trim_end_matches('0'))
    }
}
