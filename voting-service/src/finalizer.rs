//! Tally computation, winner resolution and campaign finalization

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};

use crate::audit::{AuditKind, AuditLog};
use crate::database::models::{CampaignRecord, OptionTally, VoteRecord};
use crate::database::Database;
use crate::error::{StoreError, VoteError};
use crate::ledger::LedgerClient;
use crate::metrics;

/// Frozen outcome of a campaign.
#[derive(Debug, Clone, Serialize)]
pub struct TallyResult {
    pub campaign_id: i64,
    pub counts: Vec<OptionTally>,
    pub total_votes: i64,
    /// More than one label on a tie; never arbitrarily narrowed to one.
    pub winners: Vec<String>,
    pub winning_votes: i64,
    pub tie: bool,
    pub finalize_tx: Option<String>,
    pub finalized_at: DateTime<Utc>,
}

/// Frozen result as read back for a closed campaign.
#[derive(Debug, Clone, Serialize)]
pub struct FrozenResult {
    pub campaign_id: i64,
    pub winners: Vec<String>,
    pub winning_votes: i64,
    pub tie: bool,
    pub finalize_tx: Option<String>,
    pub finalized_at: Option<DateTime<Utc>>,
}

/// All options sharing the maximum count win; a campaign with no confirmed
/// votes ties across its whole option set.
pub fn resolve_winners(counts: &[OptionTally]) -> (Vec<String>, i64, bool) {
    let max = counts.iter().map(|t| t.votes).max().unwrap_or(0);
    let winners: Vec<String> = counts
        .iter()
        .filter(|t| t.votes == max)
        .map(|t| t.label.clone())
        .collect();
    let tie = winners.len() > 1;
    (winners, max, tie)
}

#[derive(Clone)]
pub struct TallyFinalizer {
    db: Database,
    ledger: Arc<dyn LedgerClient>,
    audit: AuditLog,
}

impl TallyFinalizer {
    pub fn new(db: Database, ledger: Arc<dyn LedgerClient>, audit: AuditLog) -> Self {
        Self { db, ledger, audit }
    }

    /// Close an open campaign: compute the tally, resolve winners, attempt
    /// the ledger-side finalize and freeze the local result. The ledger call
    /// is best-effort; the local result is authoritative for display.
    pub async fn finalize(&self, campaign_id: i64) -> Result<TallyResult, VoteError> {
        let campaign = CampaignRecord::get(self.db.pool(), campaign_id).await?;
        if !campaign.state.is_active() {
            return Err(VoteError::InvalidTransition(format!(
                "only open campaigns can be finalized; campaign {} is {}",
                campaign_id,
                campaign.state.as_str()
            )));
        }

        let counts = VoteRecord::tally(self.db.pool(), campaign_id).await?;
        let total_votes: i64 = counts.iter().map(|t| t.votes).sum();
        let (winners, winning_votes, tie) = resolve_winners(&counts);

        info!(
            "Campaign {} tallied: {} total votes, winner(s) {:?} with {}{}",
            campaign_id,
            total_votes,
            winners,
            winning_votes,
            if tie { " (tie)" } else { "" }
        );

        let finalize_tx = match campaign.ledger_campaign_id {
            Some(ledger_id) => match self.ledger.finalize(ledger_id).await {
                Ok(tx_ref) => {
                    info!("Campaign {} finalized on ledger: {}", campaign_id, tx_ref);
                    self.audit
                        .record(
                            AuditKind::LedgerInteraction,
                            None,
                            Some(campaign_id),
                            &format!("ledger finalize, tx {tx_ref}"),
                        )
                        .await;
                    Some(tx_ref)
                }
                Err(e) => {
                    warn!(
                        "Ledger finalize failed for campaign {}, freezing locally: {}",
                        campaign_id, e
                    );
                    metrics::record_ledger_failure("finalize");
                    self.audit
                        .record(
                            AuditKind::LedgerFailure,
                            None,
                            Some(campaign_id),
                            &format!("ledger finalize failed: {e}"),
                        )
                        .await;
                    None
                }
            },
            None => {
                warn!(
                    "Campaign {} has no ledger id, finalizing locally only",
                    campaign_id
                );
                None
            }
        };

        let finalized_at = Utc::now();
        match CampaignRecord::close_with_result(
            self.db.pool(),
            campaign_id,
            &winners,
            winning_votes,
            finalize_tx.as_deref(),
            finalized_at,
        )
        .await
        {
            Ok(()) => {}
            Err(StoreError::CampaignNotOpen(msg)) => {
                return Err(VoteError::InvalidTransition(msg))
            }
            Err(e) => return Err(e.into()),
        }

        self.audit
            .record(
                AuditKind::CampaignFinalized,
                None,
                Some(campaign_id),
                &format!(
                    "winner(s) {:?} with {} of {} votes{}",
                    winners,
                    winning_votes,
                    total_votes,
                    if tie { ", tie" } else { "" }
                ),
            )
            .await;

        Ok(TallyResult {
            campaign_id,
            counts,
            total_votes,
            winners,
            winning_votes,
            tie,
            finalize_tx,
            finalized_at,
        })
    }

    /// Read the frozen result of a closed campaign. Historical and
    /// informational; tallies are never recomputed after closure.
    pub async fn results(&self, campaign_id: i64) -> Result<FrozenResult, VoteError> {
        let campaign = CampaignRecord::get(self.db.pool(), campaign_id).await?;
        let winners = match campaign.winning_options {
            Some(winners) if campaign.state.is_finalized() => winners,
            _ => {
                return Err(VoteError::InvalidTransition(format!(
                    "campaign {campaign_id} has no frozen result"
                )))
            }
        };

        let tie = winners.len() > 1;
        Ok(FrozenResult {
            campaign_id,
            winners,
            winning_votes: campaign.winning_votes.unwrap_or(0),
            tie,
            finalize_tx: campaign.ledger_finalize_tx,
            finalized_at: campaign.finalized_at,
        })
    }
}
