use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqlitePool, SqliteRow};
use sqlx::Row;
use tracing::debug;

use super::models::*;
use crate::error::StoreError;

fn is_unique_violation(err: &sqlx::Error) -> bool {
    err.as_database_error()
        .map(|db| matches!(db.kind(), sqlx::error::ErrorKind::UniqueViolation))
        .unwrap_or(false)
}

fn parse_ts(raw: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StoreError::Decode(format!("bad timestamp {raw:?}: {e}")))
}

fn parse_ts_opt(raw: Option<String>) -> Result<Option<DateTime<Utc>>, StoreError> {
    raw.as_deref().map(parse_ts).transpose()
}

/// Database operations for campaigns
impl CampaignRecord {
    /// Insert a campaign together with its option set; ordinals are assigned
    /// from option order. Campaign CRUD proper lives in the administrative
    /// layer; this exists for seeding and tests.
    pub async fn create(pool: &SqlitePool, new: &NewCampaign) -> Result<CampaignRecord, StoreError> {
        if new.options.len() < 2 {
            return Err(StoreError::Invalid(
                "a campaign needs at least two options".to_string(),
            ));
        }
        if new.starts_at >= new.ends_at {
            return Err(StoreError::Invalid(
                "campaign start must precede its end".to_string(),
            ));
        }

        debug!("Inserting campaign {:?}", new.title);

        let mut tx = pool.begin().await?;

        let result = sqlx::query(
            "INSERT INTO campaigns (title, state, starts_at, ends_at) VALUES (?, ?, ?, ?)",
        )
        .bind(&new.title)
        .bind(new.state.as_str())
        .bind(new.starts_at.to_rfc3339())
        .bind(new.ends_at.to_rfc3339())
        .execute(&mut *tx)
        .await?;
        let campaign_id = result.last_insert_rowid();

        for (ordinal, label) in new.options.iter().enumerate() {
            sqlx::query(
                "INSERT INTO campaign_options (campaign_id, label, ordinal) VALUES (?, ?, ?)",
            )
            .bind(campaign_id)
            .bind(label)
            .bind(ordinal as i64)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;

        Self::get(pool, campaign_id).await
    }

    pub async fn get(pool: &SqlitePool, id: i64) -> Result<CampaignRecord, StoreError> {
        let row = sqlx::query("SELECT * FROM campaigns WHERE id = ?")
            .bind(id)
            .fetch_optional(pool)
            .await?;

        match row {
            Some(row) => Self::from_row(&row),
            None => Err(StoreError::CampaignNotFound(id)),
        }
    }

    /// Option set ordered by ordinal.
    pub async fn options(
        pool: &SqlitePool,
        campaign_id: i64,
    ) -> Result<Vec<CampaignOption>, StoreError> {
        let rows = sqlx::query(
            "SELECT id, campaign_id, label, ordinal FROM campaign_options \
             WHERE campaign_id = ? ORDER BY ordinal",
        )
        .bind(campaign_id)
        .fetch_all(pool)
        .await?;

        let mut options = Vec::with_capacity(rows.len());
        for row in rows {
            options.push(CampaignOption {
                id: row.try_get("id")?,
                campaign_id: row.try_get("campaign_id")?,
                label: row.try_get("label")?,
                ordinal: row.try_get("ordinal")?,
            });
        }

        Ok(options)
    }

    /// Record the ledger-side identity of a campaign. Write-once: a campaign
    /// that already carries a ledger id is never overwritten.
    pub async fn set_ledger_commit(
        pool: &SqlitePool,
        id: i64,
        ledger_campaign_id: i64,
        commit_tx: &str,
    ) -> Result<(), StoreError> {
        let result = sqlx::query(
            "UPDATE campaigns SET ledger_campaign_id = ?, ledger_commit_tx = ? \
             WHERE id = ? AND ledger_campaign_id IS NULL",
        )
        .bind(ledger_campaign_id)
        .bind(commit_tx)
        .bind(id)
        .execute(pool)
        .await?;

        if result.rows_affected() == 0 {
            // Distinguish a missing campaign from one that is already committed.
            Self::get(pool, id).await?;
            return Err(StoreError::Invalid(format!(
                "campaign {id} already has a ledger id"
            )));
        }

        Ok(())
    }

    /// Freeze the campaign result. The state guard makes a second finalize a
    /// no-op at the storage level, reported as `CampaignNotOpen`.
    pub async fn close_with_result(
        pool: &SqlitePool,
        id: i64,
        winners: &[String],
        winning_votes: i64,
        finalize_tx: Option<&str>,
        finalized_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let winners_json = serde_json::to_string(winners)
            .map_err(|e| StoreError::Invalid(format!("unencodable winners: {e}")))?;

        let result = sqlx::query(
            "UPDATE campaigns SET state = ?, winning_options = ?, winning_votes = ?, \
             ledger_finalize_tx = ?, finalized_at = ? WHERE id = ? AND state = ?",
        )
        .bind(CampaignState::Closed.as_str())
        .bind(winners_json)
        .bind(winning_votes)
        .bind(finalize_tx)
        .bind(finalized_at.to_rfc3339())
        .bind(id)
        .bind(CampaignState::Open.as_str())
        .execute(pool)
        .await?;

        if result.rows_affected() == 0 {
            let campaign = Self::get(pool, id).await?;
            return Err(StoreError::CampaignNotOpen(format!(
                "state is {}",
                campaign.state.as_str()
            )));
        }

        Ok(())
    }

    fn from_row(row: &SqliteRow) -> Result<Self, StoreError> {
        let state_raw: String = row.try_get("state")?;
        let state = CampaignState::parse(&state_raw)
            .ok_or_else(|| StoreError::Decode(format!("unknown campaign state {state_raw:?}")))?;

        let winning_raw: Option<String> = row.try_get("winning_options")?;
        let winning_options = winning_raw
            .as_deref()
            .map(serde_json::from_str::<Vec<String>>)
            .transpose()
            .map_err(|e| StoreError::Decode(format!("bad winning options: {e}")))?;

        Ok(CampaignRecord {
            id: row.try_get("id")?,
            title: row.try_get("title")?,
            state,
            starts_at: parse_ts(&row.try_get::<String, _>("starts_at")?)?,
            ends_at: parse_ts(&row.try_get::<String, _>("ends_at")?)?,
            ledger_campaign_id: row.try_get("ledger_campaign_id")?,
            ledger_commit_tx: row.try_get("ledger_commit_tx")?,
            ledger_finalize_tx: row.try_get("ledger_finalize_tx")?,
            winning_options,
            winning_votes: row.try_get("winning_votes")?,
            finalized_at: parse_ts_opt(row.try_get("finalized_at")?)?,
        })
    }
}

/// Database operations for votes
impl VoteRecord {
    /// Guarded insert of a pending vote. Runs in a transaction that re-reads
    /// the campaign so a campaign closing between validation and insert is
    /// caught, and relies on the partial unique index over live votes as the
    /// single authoritative duplicate gate.
    pub async fn insert_pending(pool: &SqlitePool, new: &NewVote) -> Result<VoteRecord, StoreError> {
        debug!(
            "Inserting pending vote for voter {} in campaign {}",
            new.voter_id, new.campaign_id
        );

        let mut tx = pool.begin().await?;

        let campaign = sqlx::query("SELECT state, starts_at, ends_at FROM campaigns WHERE id = ?")
            .bind(new.campaign_id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or(StoreError::CampaignNotFound(new.campaign_id))?;

        let state_raw: String = campaign.try_get("state")?;
        let state = CampaignState::parse(&state_raw)
            .ok_or_else(|| StoreError::Decode(format!("unknown campaign state {state_raw:?}")))?;
        if !state.is_active() {
            return Err(StoreError::CampaignNotOpen(format!(
                "state is {}",
                state.as_str()
            )));
        }

        let starts_at = parse_ts(&campaign.try_get::<String, _>("starts_at")?)?;
        let ends_at = parse_ts(&campaign.try_get::<String, _>("ends_at")?)?;
        let now = Utc::now();
        if now < starts_at || now >= ends_at {
            return Err(StoreError::CampaignNotOpen(
                "outside the voting window".to_string(),
            ));
        }

        let result = sqlx::query(
            "INSERT INTO votes (voter_id, campaign_id, option_id, content_hash, status, created_at) \
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(new.voter_id)
        .bind(new.campaign_id)
        .bind(new.option_id)
        .bind(&new.content_hash)
        .bind(VoteStatus::Pending.as_str())
        .bind(now.to_rfc3339())
        .execute(&mut *tx)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                StoreError::Duplicate
            } else {
                StoreError::Sqlx(e)
            }
        })?;
        let id = result.last_insert_rowid();

        tx.commit().await?;

        Ok(VoteRecord {
            id,
            voter_id: new.voter_id,
            campaign_id: new.campaign_id,
            option_id: new.option_id,
            content_hash: new.content_hash.clone(),
            ledger_tx: None,
            status: VoteStatus::Pending,
            created_at: now,
            confirmed_at: None,
        })
    }

    /// The has-voted predicate: pending and confirmed rows count, rejected
    /// attempts do not.
    pub async fn exists_active(
        pool: &SqlitePool,
        voter_id: i64,
        campaign_id: i64,
    ) -> Result<bool, StoreError> {
        let exists: i64 = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM votes WHERE campaign_id = ? AND voter_id = ? \
             AND status IN ('pending', 'confirmed'))",
        )
        .bind(campaign_id)
        .bind(voter_id)
        .fetch_one(pool)
        .await?;

        Ok(exists != 0)
    }

    /// Record the outcome of a ledger submission. Idempotent: repeating a
    /// terminal state leaves the row, including its confirmation timestamp,
    /// unchanged.
    pub async fn update_confirmation(
        pool: &SqlitePool,
        vote_id: i64,
        ledger_tx: Option<&str>,
        status: VoteStatus,
    ) -> Result<(), StoreError> {
        debug!("Updating vote {} to {}", vote_id, status.as_str());

        let result = sqlx::query(
            "UPDATE votes SET status = ?, ledger_tx = COALESCE(?, ledger_tx), \
             confirmed_at = CASE WHEN ? = 'confirmed' AND confirmed_at IS NULL THEN ? \
             ELSE confirmed_at END \
             WHERE id = ?",
        )
        .bind(status.as_str())
        .bind(ledger_tx)
        .bind(status.as_str())
        .bind(Utc::now().to_rfc3339())
        .bind(vote_id)
        .execute(pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::VoteNotFound);
        }

        Ok(())
    }

    pub async fn get(pool: &SqlitePool, id: i64) -> Result<VoteRecord, StoreError> {
        let row = sqlx::query("SELECT * FROM votes WHERE id = ?")
            .bind(id)
            .fetch_optional(pool)
            .await?;

        match row {
            Some(row) => Self::from_row(&row),
            None => Err(StoreError::VoteNotFound),
        }
    }

    pub async fn find_by_hash(
        pool: &SqlitePool,
        content_hash: &str,
    ) -> Result<Option<VoteRecord>, StoreError> {
        let row = sqlx::query("SELECT * FROM votes WHERE content_hash = ?")
            .bind(content_hash)
            .fetch_optional(pool)
            .await?;

        row.map(|row| Self::from_row(&row)).transpose()
    }

    /// Per-option confirmed-vote counts, computed in one aggregation query.
    /// Every option appears, zeros included, ordered by ordinal.
    pub async fn tally(pool: &SqlitePool, campaign_id: i64) -> Result<Vec<OptionTally>, StoreError> {
        let rows = sqlx::query(
            "SELECT o.id AS option_id, o.ordinal AS ordinal, o.label AS label, \
             COUNT(v.id) AS votes \
             FROM campaign_options o \
             LEFT JOIN votes v ON v.option_id = o.id AND v.status = 'confirmed' \
             WHERE o.campaign_id = ? \
             GROUP BY o.id, o.ordinal, o.label \
             ORDER BY o.ordinal",
        )
        .bind(campaign_id)
        .fetch_all(pool)
        .await?;

        let mut tallies = Vec::with_capacity(rows.len());
        for row in rows {
            tallies.push(OptionTally {
                option_id: row.try_get("option_id")?,
                ordinal: row.try_get("ordinal")?,
                label: row.try_get("label")?,
                votes: row.try_get("votes")?,
            });
        }

        Ok(tallies)
    }

    fn from_row(row: &SqliteRow) -> Result<Self, StoreError> {
        let status_raw: String = row.try_get("status")?;
        let status = VoteStatus::parse(&status_raw)
            .ok_or_else(|| StoreError::Decode(format!("unknown vote status {status_raw:?}")))?;

        Ok(VoteRecord {
            id: row.try_get("id")?,
            voter_id: row.try_get("voter_id")?,
            campaign_id: row.try_get("campaign_id")?,
            option_id: row.try_get("option_id")?,
            content_hash: row.try_get("content_hash")?,
            ledger_tx: row.try_get("ledger_tx")?,
            status,
            created_at: parse_ts(&row.try_get::<String, _>("created_at")?)?,
            confirmed_at: parse_ts_opt(row.try_get("confirmed_at")?)?,
        })
    }
}

/// Database operations for the audit trail
impl AuditEntry {
    pub async fn insert(
        pool: &SqlitePool,
        kind: &str,
        voter_id: Option<i64>,
        campaign_id: Option<i64>,
        detail: &str,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO audit_log (kind, voter_id, campaign_id, detail, created_at) \
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(kind)
        .bind(voter_id)
        .bind(campaign_id)
        .bind(detail)
        .bind(Utc::now().to_rfc3339())
        .execute(pool)
        .await?;

        Ok(())
    }

    pub async fn count_kind(pool: &SqlitePool, kind: &str) -> Result<i64, StoreError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM audit_log WHERE kind = ?")
            .bind(kind)
            .fetch_one(pool)
            .await?;
        Ok(count)
    }

    pub async fn recent(pool: &SqlitePool, limit: i64) -> Result<Vec<AuditEntry>, StoreError> {
        let rows = sqlx::query("SELECT * FROM audit_log ORDER BY id DESC LIMIT ?")
            .bind(limit)
            .fetch_all(pool)
            .await?;

        let mut entries = Vec::with_capacity(rows.len());
        for row in rows {
            entries.push(AuditEntry {
                id: row.try_get("id")?,
                kind: row.try_get("kind")?,
                voter_id: row.try_get("voter_id")?,
                campaign_id: row.try_get("campaign_id")?,
                detail: row.try_get("detail")?,
                created_at: parse_ts(&row.try_get::<String, _>("created_at")?)?,
            });
        }

        Ok(entries)
    }
}
