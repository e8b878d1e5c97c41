//! Committing a campaign to the external ledger

use std::sync::Arc;

use tracing::info;

use crate::audit::{AuditKind, AuditLog};
use crate::database::models::CampaignRecord;
use crate::database::Database;
use crate::error::VoteError;
use crate::ledger::{CampaignCommit, LedgerClient};

/// Register a campaign on the ledger and persist the ledger-assigned id and
/// commit transaction. The id is write-once; re-committing an already
/// committed campaign is refused. A campaign left uncommitted simply keeps
/// consistency checks local-only.
pub async fn commit_campaign(
    db: &Database,
    ledger: &Arc<dyn LedgerClient>,
    audit: &AuditLog,
    campaign_id: i64,
) -> Result<CampaignCommit, VoteError> {
    let campaign = CampaignRecord::get(db.pool(), campaign_id).await?;
    if campaign.ledger_campaign_id.is_some() {
        return Err(VoteError::InvalidTransition(format!(
            "campaign {campaign_id} is already committed to the ledger"
        )));
    }

    let commit = ledger
        .create_campaign(
            &campaign.title,
            campaign.starts_at.timestamp(),
            campaign.ends_at.timestamp(),
        )
        .await?;

    CampaignRecord::set_ledger_commit(
        db.pool(),
        campaign_id,
        commit.campaign_ledger_id,
        &commit.tx_ref,
    )
    .await?;

    info!(
        "Campaign {} committed to ledger as {} (tx {})",
        campaign_id, commit.campaign_ledger_id, commit.tx_ref
    );
    audit
        .record(
            AuditKind::CampaignCommitted,
            None,
            Some(campaign_id),
            &format!(
                "ledger id {}, tx {}",
                commit.campaign_ledger_id, commit.tx_ref
            ),
        )
        .await;

    Ok(commit)
}
