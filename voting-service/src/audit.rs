//! Persisted audit trail for vote and ledger events

use tracing::warn;

use crate::database::models::AuditEntry;
use crate::database::Database;
use crate::error::StoreError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditKind {
    VoteCast,
    LedgerInteraction,
    IntegrityConflict,
    LedgerFailure,
    CampaignCommitted,
    CampaignFinalized,
    Error,
}

impl AuditKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditKind::VoteCast => "vote_cast",
            AuditKind::LedgerInteraction => "ledger_interaction",
            AuditKind::IntegrityConflict => "integrity_conflict",
            AuditKind::LedgerFailure => "ledger_failure",
            AuditKind::CampaignCommitted => "campaign_committed",
            AuditKind::CampaignFinalized => "campaign_finalized",
            AuditKind::Error => "error",
        }
    }
}

/// Append-only audit log backed by the relational store. Writing an entry is
/// best-effort: an audit failure is reported but must never abort the
/// operation being audited.
#[derive(Clone)]
pub struct AuditLog {
    db: Database,
}

impl AuditLog {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub async fn record(
        &self,
        kind: AuditKind,
        voter_id: Option<i64>,
        campaign_id: Option<i64>,
        detail: &str,
    ) {
        if let Err(e) =
            AuditEntry::insert(self.db.pool(), kind.as_str(), voter_id, campaign_id, detail).await
        {
            warn!("Failed to write {} audit entry: {}", kind.as_str(), e);
        }
    }

    pub async fn count_kind(&self, kind: AuditKind) -> Result<i64, StoreError> {
        AuditEntry::count_kind(self.db.pool(), kind.as_str()).await
    }

    pub async fn recent(&self, limit: i64) -> Result<Vec<AuditEntry>, StoreError> {
        AuditEntry::recent(self.db.pool(), limit).await
    }
}
