//! Gateway-facing views of on-chain state

/// An activity as stored by the on-chain completion registry.
///
/// Indexed by an integer id allocated by the registry's own counter —
/// deliberately distinct from the off-chain ledger's activity id. The
/// ledger's `chain_activity_id` column maps between the two spaces.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OnChainActivity {
    pub name: String,
    pub description: String,
    /// Reward in whole tokens, as advertised by the registry
    pub reward_amount: u64,
    pub is_active: bool,
}

/// Arguments for updating a registry activity; `None` keeps the field
#[derive(Debug, Clone, Default)]
pub struct ActivityUpdate {
    pub name: Option<String>,
    pub description: Option<String>,
    pub reward_amount: Option<u64>,
    pub is_active: Option<bool>,
}
