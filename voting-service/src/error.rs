//! Typed error taxonomy for the voting core

use thiserror::Error;

use crate::ledger::LedgerError;

/// Errors surfaced to callers of the casting, consistency and finalization
/// services. Ledger failures during vote submission never appear here; they
/// are recorded as a `rejected` vote status instead.
#[derive(Debug, Error)]
pub enum VoteError {
    #[error("invalid vote request: {0}")]
    InvalidVoteRequest(String),

    #[error("voter {voter_id} has already voted in campaign {campaign_id}")]
    AlreadyVoted { voter_id: i64, campaign_id: i64 },

    #[error(
        "vote state for voter {voter_id} in campaign {campaign_id} diverges between the \
         local store and the ledger; manual reconciliation required"
    )]
    IntegrityConflict { voter_id: i64, campaign_id: i64 },

    #[error("invalid campaign transition: {0}")]
    InvalidTransition(String),

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Storage-layer errors. `Duplicate` is the race-condition signal from the
/// uniqueness constraint and is mapped to `AlreadyVoted` at the casting
/// boundary.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("vote already exists for this voter and campaign")]
    Duplicate,

    #[error("campaign {0} not found")]
    CampaignNotFound(i64),

    #[error("campaign is not open: {0}")]
    CampaignNotOpen(String),

    #[error("vote not found")]
    VoteNotFound,

    #[error("invalid record: {0}")]
    Invalid(String),

    #[error("malformed column value: {0}")]
    Decode(String),

    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
}
