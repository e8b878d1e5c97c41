//! RPC boundary to the external append-only ledger

pub mod rpc;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

pub use rpc::JsonRpcLedger;

/// Inclusion receipt for a ledger transaction.
#[derive(Debug, Clone, Serialize)]
pub struct LedgerReceipt {
    pub included: bool,
    pub block_ref: Option<String>,
    pub block_timestamp: Option<i64>,
    pub gas_used: Option<u64>,
}

/// Result of creating a campaign on the ledger. The ledger assigns its own
/// campaign id; local row ids never cross this boundary.
#[derive(Debug, Clone, Serialize)]
pub struct CampaignCommit {
    pub tx_ref: String,
    pub campaign_ledger_id: i64,
}

#[derive(Debug, Error)]
pub enum LedgerError {
    /// Node unreachable, contract uninitialized, or the call timed out.
    #[error("ledger unavailable: {0}")]
    Unavailable(String),

    /// The call reached the ledger and was reverted.
    #[error("ledger rejected the call: {0}")]
    Rejected(String),

    /// A read failed; the answer is unknown, not false.
    #[error("ledger query failed: {0}")]
    Query(String),
}

/// The five calls the core needs from the ledger. Implementations carry an
/// explicit per-call timeout and never retry internally: a blind retry of
/// `submit_vote` could commit the same vote twice, so retry policy stays
/// with the caller.
#[async_trait]
pub trait LedgerClient: Send + Sync {
    /// Commit a vote; the option is addressed by its ordinal position within
    /// the campaign, never by a local row id.
    async fn submit_vote(
        &self,
        campaign_ledger_id: i64,
        voter_id: i64,
        option_ordinal: i64,
        content_hash: &str,
    ) -> Result<String, LedgerError>;

    /// Inclusion receipt for a previously submitted transaction.
    async fn get_receipt(&self, tx_ref: &str) -> Result<Option<LedgerReceipt>, LedgerError>;

    /// Whether the ledger has recorded a vote by this voter.
    async fn has_voted(&self, campaign_ledger_id: i64, voter_id: i64) -> Result<bool, LedgerError>;

    /// Register a campaign; returns the ledger-assigned campaign id.
    async fn create_campaign(
        &self,
        title: &str,
        starts_at: i64,
        ends_at: i64,
    ) -> Result<CampaignCommit, LedgerError>;

    /// Best-effort campaign finalization on the ledger side.
    async fn finalize(&self, campaign_ledger_id: i64) -> Result<String, LedgerError>;
}
