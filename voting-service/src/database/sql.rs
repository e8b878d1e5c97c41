//! SQL statement constants for database operations

pub const CREATE_MIGRATIONS_TABLE_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS schema_migrations (
    version INTEGER PRIMARY KEY,
    applied_at TEXT NOT NULL,
    description TEXT NOT NULL
)
"#;

pub const CREATE_CAMPAIGNS_TABLE_SQL: &str = r#"
CREATE TABLE campaigns (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    title TEXT NOT NULL,
    state TEXT NOT NULL DEFAULT 'draft',
    starts_at TEXT NOT NULL,
    ends_at TEXT NOT NULL,
    ledger_campaign_id INTEGER,
    ledger_commit_tx TEXT,
    ledger_finalize_tx TEXT,
    winning_options TEXT, -- JSON array of labels
    winning_votes INTEGER,
    finalized_at TEXT
)
"#;

pub const CREATE_CAMPAIGN_OPTIONS_TABLE_SQL: &str = r#"
CREATE TABLE campaign_options (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    campaign_id INTEGER NOT NULL REFERENCES campaigns(id),
    label TEXT NOT NULL,
    ordinal INTEGER NOT NULL, -- ledger-side option key
    UNIQUE (campaign_id, ordinal)
)
"#;

pub const CREATE_VOTES_TABLE_SQL: &str = r#"
CREATE TABLE votes (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    voter_id INTEGER NOT NULL,
    campaign_id INTEGER NOT NULL REFERENCES campaigns(id),
    option_id INTEGER NOT NULL REFERENCES campaign_options(id),
    content_hash TEXT NOT NULL UNIQUE,
    ledger_tx TEXT,
    status TEXT NOT NULL DEFAULT 'pending',
    created_at TEXT NOT NULL,
    confirmed_at TEXT
)
"#;

pub const CREATE_AUDIT_LOG_TABLE_SQL: &str = r#"
CREATE TABLE audit_log (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    kind TEXT NOT NULL,
    voter_id INTEGER,
    campaign_id INTEGER,
    detail TEXT NOT NULL,
    created_at TEXT NOT NULL
)
"#;

pub const CREATE_DB_INDEXES: &[&str] = &[
    // Rejected rows are kept for audit and must not block a retry, so the
    // at-most-once guard only covers rows that are still live.
    "CREATE UNIQUE INDEX ux_votes_active ON votes(campaign_id, voter_id) \
     WHERE status IN ('pending', 'confirmed')",
    "CREATE INDEX idx_votes_campaign_status ON votes(campaign_id, status)",
    "CREATE INDEX idx_options_campaign ON campaign_options(campaign_id, ordinal)",
    "CREATE INDEX idx_audit_kind ON audit_log(kind, created_at)",
];
