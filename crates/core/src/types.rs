use serde::{Deserialize, Serialize};

/// 32-byte on-chain account address
pub type AccountAddress = [u8; 32];

/// 64-byte transaction signature (Solana format)
pub type TransactionSignature = [u8; 64];

/// Kind of audit log entry written to the local transaction log
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransactionKind {
    /// Tokens minted for a confirmed activity participation
    ActivityReward,
    /// Tokens burned in exchange for training points
    CoinConversion,
}

impl TransactionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionKind::ActivityReward => "activity-reward",
            TransactionKind::CoinConversion => "coin-conversion",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "activity-reward" => Some(TransactionKind::ActivityReward),
            "coin-conversion" => Some(TransactionKind::CoinConversion),
            _ => None,
        }
    }
}

impl std::fmt::Display for TransactionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
