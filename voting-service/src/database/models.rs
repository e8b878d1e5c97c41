use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Campaign lifecycle. The core only ever transitions `Open -> Closed`;
/// the remaining states belong to the administrative layer but round-trip
/// through storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CampaignState {
    Draft,
    Scheduled,
    Open,
    Suspended,
    Closed,
    Cancelled,
}

impl CampaignState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CampaignState::Draft => "draft",
            CampaignState::Scheduled => "scheduled",
            CampaignState::Open => "open",
            CampaignState::Suspended => "suspended",
            CampaignState::Closed => "closed",
            CampaignState::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "draft" => Some(CampaignState::Draft),
            "scheduled" => Some(CampaignState::Scheduled),
            "open" => Some(CampaignState::Open),
            "suspended" => Some(CampaignState::Suspended),
            "closed" => Some(CampaignState::Closed),
            "cancelled" => Some(CampaignState::Cancelled),
            _ => None,
        }
    }

    /// Accepting votes.
    pub fn is_active(&self) -> bool {
        matches!(self, CampaignState::Open)
    }

    /// Results are frozen; nothing may change anymore.
    pub fn is_finalized(&self) -> bool {
        matches!(self, CampaignState::Closed | CampaignState::Cancelled)
    }

    /// Option set may still be edited.
    pub fn is_editable(&self) -> bool {
        matches!(self, CampaignState::Draft | CampaignState::Scheduled)
    }
}

/// Confirmation state of a single vote attempt. `Rejected` rows are retained
/// as an audit trail but excluded from the has-voted predicate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VoteStatus {
    Pending,
    Confirmed,
    Rejected,
}

impl VoteStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            VoteStatus::Pending => "pending",
            VoteStatus::Confirmed => "confirmed",
            VoteStatus::Rejected => "rejected",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(VoteStatus::Pending),
            "confirmed" => Some(VoteStatus::Confirmed),
            "rejected" => Some(VoteStatus::Rejected),
            _ => None,
        }
    }
}

/// Campaign record in the database
#[derive(Debug, Clone, Serialize)]
pub struct CampaignRecord {
    pub id: i64,
    pub title: String,
    pub state: CampaignState,
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
    pub ledger_campaign_id: Option<i64>,
    pub ledger_commit_tx: Option<String>,
    pub ledger_finalize_tx: Option<String>,
    pub winning_options: Option<Vec<String>>, // JSON array column
    pub winning_votes: Option<i64>,
    pub finalized_at: Option<DateTime<Utc>>,
}

/// One option of a campaign. The ordinal, not the row id, is the key shared
/// with the ledger.
#[derive(Debug, Clone, Serialize)]
pub struct CampaignOption {
    pub id: i64,
    pub campaign_id: i64,
    pub label: String,
    pub ordinal: i64,
}

/// Input for seeding a campaign; ordinals are assigned from option order.
#[derive(Debug, Clone)]
pub struct NewCampaign {
    pub title: String,
    pub state: CampaignState,
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
    pub options: Vec<String>,
}

/// Vote record in the database
#[derive(Debug, Clone, Serialize)]
pub struct VoteRecord {
    pub id: i64,
    pub voter_id: i64,
    pub campaign_id: i64,
    pub option_id: i64,
    pub content_hash: String,
    pub ledger_tx: Option<String>,
    pub status: VoteStatus,
    pub created_at: DateTime<Utc>,
    pub confirmed_at: Option<DateTime<Utc>>,
}

/// Input for the guarded pending-vote insert.
#[derive(Debug, Clone)]
pub struct NewVote {
    pub voter_id: i64,
    pub campaign_id: i64,
    pub option_id: i64,
    pub content_hash: String,
}

/// Per-option aggregate produced by the tally query.
#[derive(Debug, Clone, Serialize)]
pub struct OptionTally {
    pub option_id: i64,
    pub ordinal: i64,
    pub label: String,
    pub votes: i64,
}

/// Persisted audit trail entry.
#[derive(Debug, Clone, Serialize)]
pub struct AuditEntry {
    pub id: i64,
    pub kind: String,
    pub voter_id: Option<i64>,
    pub campaign_id: Option<i64>,
    pub detail: String,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn campaign_state_round_trips() {
        for state in [
            CampaignState::Draft,
            CampaignState::Scheduled,
            CampaignState::Open,
            CampaignState::Suspended,
            CampaignState::Closed,
            CampaignState::Cancelled,
        ] {
            assert_eq!(CampaignState::parse(state.as_str()), Some(state));
        }
        assert_eq!(CampaignState::parse("bogus"), None);
    }

    #[test]
    fn lifecycle_predicates() {
        assert!(CampaignState::Open.is_active());
        assert!(!CampaignState::Suspended.is_active());
        assert!(CampaignState::Closed.is_finalized());
        assert!(CampaignState::Cancelled.is_finalized());
        assert!(CampaignState::Draft.is_editable());
        assert!(!CampaignState::Open.is_editable());
    }

    #[test]
    fn vote_status_round_trips() {
        for status in [VoteStatus::Pending, VoteStatus::Confirmed, VoteStatus::Rejected] {
            assert_eq!(VoteStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(VoteStatus::parse(""), None);
    }
}
