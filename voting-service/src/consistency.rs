//! Cross-ledger consistency checking and receipt-based vote verification

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{error, warn};

use crate::audit::{AuditKind, AuditLog};
use crate::database::models::{CampaignRecord, VoteRecord};
use crate::database::Database;
use crate::error::VoteError;
use crate::ledger::LedgerClient;
use crate::metrics;

/// Outcome of comparing the local store against the ledger for one
/// (voter, campaign) pair. Derived on demand, logged for audit, never
/// persisted as authoritative state.
#[derive(Debug, Clone, Serialize)]
pub struct ConsistencyVerdict {
    pub voter_id: i64,
    pub campaign_id: i64,
    pub local_has_voted: bool,
    /// None means unknown: the campaign is not on the ledger yet, or the
    /// ledger query failed.
    pub remote_has_voted: Option<bool>,
    pub remote_error: Option<String>,
    pub consistent: bool,
    pub checked_at: DateTime<Utc>,
}

/// Receipt-backed verification of a single vote, looked up by content hash.
#[derive(Debug, Clone, Serialize)]
pub struct VoteVerification {
    pub verified: bool,
    pub campaign_id: Option<i64>,
    pub content_hash: String,
    pub ledger_tx: Option<String>,
    pub block_ref: Option<String>,
    pub block_timestamp: Option<i64>,
    pub gas_used: Option<u64>,
    pub message: String,
}

#[derive(Clone)]
pub struct ConsistencyChecker {
    db: Database,
    ledger: Arc<dyn LedgerClient>,
    audit: AuditLog,
}

impl ConsistencyChecker {
    pub fn new(db: Database, ledger: Arc<dyn LedgerClient>, audit: AuditLog) -> Self {
        Self { db, ledger, audit }
    }

    /// Compare both sources of truth for a voter. A failing ledger query
    /// degrades the remote side to unknown; the local store stays
    /// authoritative. A detected divergence is written to the audit trail
    /// exactly once, here, at the point of detection.
    pub async fn check(
        &self,
        voter_id: i64,
        campaign_id: i64,
    ) -> Result<ConsistencyVerdict, VoteError> {
        let campaign = CampaignRecord::get(self.db.pool(), campaign_id).await?;
        let local_has_voted =
            VoteRecord::exists_active(self.db.pool(), voter_id, campaign_id).await?;

        let (remote_has_voted, remote_error) = match campaign.ledger_campaign_id {
            None => (None, None),
            Some(ledger_id) => match self.ledger.has_voted(ledger_id, voter_id).await {
                Ok(answer) => (Some(answer), None),
                Err(e) => {
                    warn!(
                        "Ledger has-voted query failed for voter {} in campaign {}: {}",
                        voter_id, campaign_id, e
                    );
                    metrics::record_ledger_failure("has_voted");
                    (None, Some(e.to_string()))
                }
            },
        };

        let consistent = remote_has_voted.map_or(true, |remote| remote == local_has_voted);

        if !consistent {
            error!(
                "Vote state divergence for voter {} in campaign {}: local={}, ledger={:?}",
                voter_id, campaign_id, local_has_voted, remote_has_voted
            );
            metrics::record_integrity_conflict();
            self.audit
                .record(
                    AuditKind::IntegrityConflict,
                    Some(voter_id),
                    Some(campaign_id),
                    &format!(
                        "local={local_has_voted}, ledger={remote_has_voted:?}; \
                         manual reconciliation required"
                    ),
                )
                .await;
        }

        Ok(ConsistencyVerdict {
            voter_id,
            campaign_id,
            local_has_voted,
            remote_has_voted,
            remote_error,
            consistent,
            checked_at: Utc::now(),
        })
    }

    /// Verify a vote against the ledger using its content hash. Ledger
    /// failures surface in the verification message, never as transport
    /// errors.
    pub async fn verify_vote(&self, content_hash: &str) -> Result<VoteVerification, VoteError> {
        let vote = match VoteRecord::find_by_hash(self.db.pool(), content_hash).await? {
            Some(vote) => vote,
            None => {
                return Ok(VoteVerification {
                    verified: false,
                    campaign_id: None,
                    content_hash: content_hash.to_string(),
                    ledger_tx: None,
                    block_ref: None,
                    block_timestamp: None,
                    gas_used: None,
                    message: "vote not found".to_string(),
                });
            }
        };

        let mut verification = VoteVerification {
            verified: false,
            campaign_id: Some(vote.campaign_id),
            content_hash: content_hash.to_string(),
            ledger_tx: vote.ledger_tx.clone(),
            block_ref: None,
            block_timestamp: None,
            gas_used: None,
            message: String::new(),
        };

        let tx_ref = match &vote.ledger_tx {
            Some(tx_ref) => tx_ref,
            None => {
                verification.message = "vote is pending ledger confirmation".to_string();
                return Ok(verification);
            }
        };

        match self.ledger.get_receipt(tx_ref).await {
            Ok(Some(receipt)) if receipt.included => {
                verification.verified = true;
                verification.block_ref = receipt.block_ref;
                verification.block_timestamp = receipt.block_timestamp;
                verification.gas_used = receipt.gas_used;
                verification.message = "vote verified on the ledger".to_string();
            }
            Ok(_) => {
                verification.message = "transaction not found on the ledger".to_string();
            }
            Err(e) => {
                warn!("Receipt lookup failed for {}: {}", tx_ref, e);
                metrics::record_ledger_failure("get_receipt");
                verification.message = format!("verification failed: {e}");
            }
        }

        Ok(verification)
    }
}
