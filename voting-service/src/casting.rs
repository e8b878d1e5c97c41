//! Vote casting: validation, duplicate checks, guarded insert and ledger
//! submission.
//!
//! A single attempt moves `Validating -> Pending -> Submitting ->
//! Confirmed | Rejected`. Submission is one routine shared by both execution
//! modes; background mode merely observes it from a spawned task.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::Semaphore;
use tracing::{error, info, warn};

use crate::audit::{AuditKind, AuditLog};
use crate::consistency::ConsistencyChecker;
use crate::database::models::{CampaignRecord, NewVote, VoteRecord, VoteStatus};
use crate::database::Database;
use crate::error::{StoreError, VoteError};
use crate::hasher::vote_content_hash;
use crate::ledger::{LedgerClient, LedgerError};
use crate::metrics::{self, CastOutcome};

/// How the caller wants to observe ledger submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CastMode {
    /// Return the pending vote immediately; a spawned task records the
    /// ledger outcome.
    Background,
    /// Await the ledger outcome (bounded by the client timeout) so the
    /// caller receives a terminal status.
    Synchronous,
}

/// Caller-facing view of a vote attempt. Ledger failures appear in
/// `ledger_error` and the `rejected` status; they are never raised as
/// transport errors.
#[derive(Debug, Clone, Serialize)]
pub struct VoteReceipt {
    pub vote_id: i64,
    pub campaign_id: i64,
    pub voter_id: i64,
    pub option_id: i64,
    pub content_hash: String,
    pub status: VoteStatus,
    pub ledger_tx: Option<String>,
    pub ledger_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub confirmed_at: Option<DateTime<Utc>>,
}

/// Reporting status: a vote pending past the confirmation timeout is
/// indeterminate and must not read as confirmed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DisplayStatus {
    Pending,
    PendingStale,
    Confirmed,
    Rejected,
}

impl VoteReceipt {
    fn from_vote(vote: &VoteRecord) -> Self {
        Self {
            vote_id: vote.id,
            campaign_id: vote.campaign_id,
            voter_id: vote.voter_id,
            option_id: vote.option_id,
            content_hash: vote.content_hash.clone(),
            status: vote.status,
            ledger_tx: vote.ledger_tx.clone(),
            ledger_error: None,
            created_at: vote.created_at,
            confirmed_at: vote.confirmed_at,
        }
    }

    pub fn display_status(&self, now: DateTime<Utc>, stale_after: chrono::Duration) -> DisplayStatus {
        match self.status {
            VoteStatus::Confirmed => DisplayStatus::Confirmed,
            VoteStatus::Rejected => DisplayStatus::Rejected,
            VoteStatus::Pending if now - self.created_at >= stale_after => {
                DisplayStatus::PendingStale
            }
            VoteStatus::Pending => DisplayStatus::Pending,
        }
    }
}

#[derive(Clone)]
pub struct VoteCastingService {
    db: Database,
    ledger: Arc<dyn LedgerClient>,
    checker: ConsistencyChecker,
    audit: AuditLog,
    limiter: Arc<Semaphore>,
}

impl VoteCastingService {
    pub fn new(
        db: Database,
        ledger: Arc<dyn LedgerClient>,
        checker: ConsistencyChecker,
        audit: AuditLog,
        max_inflight_ledger_calls: usize,
    ) -> Self {
        Self {
            db,
            ledger,
            checker,
            audit,
            limiter: Arc::new(Semaphore::new(max_inflight_ledger_calls.max(1))),
        }
    }

    /// Cast a vote for `voter_id` in `campaign_id`. The voter seed comes from
    /// the identity layer and salts the content hash.
    pub async fn cast_vote(
        &self,
        campaign_id: i64,
        voter_id: i64,
        option_id: i64,
        voter_seed: &str,
        mode: CastMode,
    ) -> Result<VoteReceipt, VoteError> {
        // Validate the campaign, its window and the chosen option.
        let campaign = match CampaignRecord::get(self.db.pool(), campaign_id).await {
            Ok(campaign) => campaign,
            Err(StoreError::CampaignNotFound(id)) => {
                metrics::record_cast_outcome(CastOutcome::Invalid);
                return Err(VoteError::InvalidVoteRequest(format!(
                    "campaign {id} not found"
                )));
            }
            Err(e) => return Err(e.into()),
        };
        if !campaign.state.is_active() {
            metrics::record_cast_outcome(CastOutcome::Invalid);
            return Err(VoteError::InvalidVoteRequest(format!(
                "campaign {} is not open (state is {})",
                campaign_id,
                campaign.state.as_str()
            )));
        }
        let now = Utc::now();
        if now < campaign.starts_at || now >= campaign.ends_at {
            metrics::record_cast_outcome(CastOutcome::Invalid);
            return Err(VoteError::InvalidVoteRequest(format!(
                "campaign {campaign_id} is outside its voting window"
            )));
        }
        let options = CampaignRecord::options(self.db.pool(), campaign_id).await?;
        let option = match options.iter().find(|o| o.id == option_id) {
            Some(option) => option,
            None => {
                metrics::record_cast_outcome(CastOutcome::Invalid);
                return Err(VoteError::InvalidVoteRequest(format!(
                    "option {option_id} does not belong to campaign {campaign_id}"
                )));
            }
        };

        // Duplicate pre-check across both sources of truth. A divergence
        // outranks the duplicate answer: neither side can be trusted for
        // this voter until an operator reconciles them.
        let verdict = self.checker.check(voter_id, campaign_id).await?;
        if !verdict.consistent {
            metrics::record_cast_outcome(CastOutcome::Conflict);
            return Err(VoteError::IntegrityConflict {
                voter_id,
                campaign_id,
            });
        }
        if verdict.local_has_voted || verdict.remote_has_voted == Some(true) {
            metrics::record_cast_outcome(CastOutcome::AlreadyVoted);
            return Err(VoteError::AlreadyVoted {
                voter_id,
                campaign_id,
            });
        }

        // Persist the pending vote behind the uniqueness guard. Losing the
        // race to a concurrent attempt is the same outcome as having voted.
        let content_hash =
            vote_content_hash(campaign_id, voter_id, option_id, voter_seed, now.timestamp_millis());
        let new_vote = NewVote {
            voter_id,
            campaign_id,
            option_id,
            content_hash,
        };
        let vote = match VoteRecord::insert_pending(self.db.pool(), &new_vote).await {
            Ok(vote) => vote,
            Err(StoreError::Duplicate) => {
                metrics::record_cast_outcome(CastOutcome::AlreadyVoted);
                return Err(VoteError::AlreadyVoted {
                    voter_id,
                    campaign_id,
                });
            }
            Err(StoreError::CampaignNotOpen(msg)) => {
                metrics::record_cast_outcome(CastOutcome::Invalid);
                return Err(VoteError::InvalidVoteRequest(msg));
            }
            Err(e) => return Err(e.into()),
        };

        info!(
            "Vote {} pending for voter {} in campaign {}",
            vote.id, voter_id, campaign_id
        );
        self.audit
            .record(
                AuditKind::VoteCast,
                Some(voter_id),
                Some(campaign_id),
                &format!("vote {} recorded with hash {}", vote.id, vote.content_hash),
            )
            .await;

        let ledger_campaign_id = campaign.ledger_campaign_id;
        let option_ordinal = option.ordinal;

        match mode {
            CastMode::Synchronous => Ok(self
                .submit_and_record(vote, ledger_campaign_id, option_ordinal)
                .await),
            CastMode::Background => {
                let receipt = VoteReceipt::from_vote(&vote);
                let service = self.clone();
                tokio::spawn(async move {
                    service
                        .submit_and_record(vote, ledger_campaign_id, option_ordinal)
                        .await;
                });
                Ok(receipt)
            }
        }
    }

    /// Fast local has-voted answer; rejected attempts do not count.
    pub async fn has_voted(&self, voter_id: i64, campaign_id: i64) -> Result<bool, VoteError> {
        Ok(VoteRecord::exists_active(self.db.pool(), voter_id, campaign_id).await?)
    }

    /// Submit one pending vote to the ledger and record the outcome. Holds a
    /// semaphore permit for the duration of the RPC; no database transaction
    /// is open while waiting.
    async fn submit_and_record(
        &self,
        vote: VoteRecord,
        ledger_campaign_id: Option<i64>,
        option_ordinal: i64,
    ) -> VoteReceipt {
        let submit_result = match ledger_campaign_id {
            None => Err(LedgerError::Unavailable(
                "campaign is not registered on the ledger".to_string(),
            )),
            Some(ledger_id) => match self.limiter.clone().acquire_owned().await {
                Ok(_permit) => {
                    self.ledger
                        .submit_vote(ledger_id, vote.voter_id, option_ordinal, &vote.content_hash)
                        .await
                }
                Err(_) => Err(LedgerError::Unavailable(
                    "ledger submission pool closed".to_string(),
                )),
            },
        };

        let mut receipt = VoteReceipt::from_vote(&vote);

        match submit_result {
            Ok(tx_ref) => {
                info!("Vote {} committed to ledger: {}", vote.id, tx_ref);
                match VoteRecord::update_confirmation(
                    self.db.pool(),
                    vote.id,
                    Some(&tx_ref),
                    VoteStatus::Confirmed,
                )
                .await
                {
                    Ok(()) => {
                        receipt.status = VoteStatus::Confirmed;
                        receipt.confirmed_at = Some(Utc::now());
                    }
                    Err(e) => {
                        // The ledger write landed but the local row did not
                        // advance; the post-cast check below records the
                        // divergence.
                        error!(
                            "Vote {} confirmed on ledger but local update failed: {}",
                            vote.id, e
                        );
                    }
                }
                receipt.ledger_tx = Some(tx_ref.clone());
                metrics::record_cast_outcome(CastOutcome::Confirmed);
                self.audit
                    .record(
                        AuditKind::LedgerInteraction,
                        Some(vote.voter_id),
                        Some(vote.campaign_id),
                        &format!("vote {} committed, tx {}", vote.id, tx_ref),
                    )
                    .await;

                if let Err(e) = self.checker.check(vote.voter_id, vote.campaign_id).await {
                    warn!(
                        "Post-cast consistency check failed for vote {}: {}",
                        vote.id, e
                    );
                }
            }
            Err(e) => {
                warn!("Ledger submission failed for vote {}: {}", vote.id, e);
                metrics::record_cast_outcome(CastOutcome::Rejected);
                metrics::record_ledger_failure("submit_vote");
                self.audit
                    .record(
                        AuditKind::LedgerFailure,
                        Some(vote.voter_id),
                        Some(vote.campaign_id),
                        &format!("vote {} submission failed: {e}", vote.id),
                    )
                    .await;

                match VoteRecord::update_confirmation(
                    self.db.pool(),
                    vote.id,
                    None,
                    VoteStatus::Rejected,
                )
                .await
                {
                    Ok(()) => receipt.status = VoteStatus::Rejected,
                    Err(update_err) => {
                        error!("Failed to mark vote {} rejected: {}", vote.id, update_err)
                    }
                }
                receipt.ledger_error = Some(e.to_string());
            }
        }

        receipt
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn receipt(status: VoteStatus, age: Duration) -> VoteReceipt {
        let created_at = Utc::now() - age;
        VoteReceipt {
            vote_id: 1,
            campaign_id: 1,
            voter_id: 1,
            option_id: 1,
            content_hash: "abc".to_string(),
            status,
            ledger_tx: None,
            ledger_error: None,
            created_at,
            confirmed_at: None,
        }
    }

    #[test]
    fn fresh_pending_is_pending() {
        let r = receipt(VoteStatus::Pending, Duration::seconds(5));
        assert_eq!(
            r.display_status(Utc::now(), Duration::seconds(120)),
            DisplayStatus::Pending
        );
    }

    #[test]
    fn old_pending_is_stale_not_confirmed() {
        let r = receipt(VoteStatus::Pending, Duration::seconds(600));
        assert_eq!(
            r.display_status(Utc::now(), Duration::seconds(120)),
            DisplayStatus::PendingStale
        );
    }

    #[test]
    fn terminal_states_are_unaffected_by_age() {
        let confirmed = receipt(VoteStatus::Confirmed, Duration::seconds(600));
        assert_eq!(
            confirmed.display_status(Utc::now(), Duration::seconds(120)),
            DisplayStatus::Confirmed
        );
        let rejected = receipt(VoteStatus::Rejected, Duration::seconds(600));
        assert_eq!(
            rejected.display_status(Utc::now(), Duration::seconds(120)),
            DisplayStatus::Rejected
        );
    }
}
