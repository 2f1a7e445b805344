//! SQL migration definitions for the lead-generation database.
//!
//! Migrations are applied in order on database open. Each migration has a
//! version number and a batch of SQL statements.

/// A database migration with a version and SQL statements.
pub(crate) struct Migration {
    pub version: u32,
    pub description: &'static str,
    pub sql: &'static str,
}

/// All migrations, in ascending version order.
pub(crate) fn all_migrations() -> Vec<Migration> {
    vec![
        Migration {
            version: 1,
            description: "Initial schema: jobs, stage_outputs",
            sql: r#"
-- Schema version tracking
CREATE TABLE IF NOT EXISTS schema_migrations (
    version   INTEGER PRIMARY KEY,
    applied_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- One row per submitted job; terminal rows are never updated
CREATE TABLE IF NOT EXISTS jobs (
    id             TEXT PRIMARY KEY,
    industry       TEXT NOT NULL,
    location       TEXT NOT NULL,
    lead_limit     INTEGER NOT NULL,
    state          TEXT NOT NULL,
    current_stage  TEXT,
    created_at     TEXT NOT NULL,
    updated_at     TEXT NOT NULL,
    error_kind     TEXT,
    error_message  TEXT,
    result_locator TEXT,
    resumed_from   TEXT REFERENCES jobs(id)
);

CREATE INDEX IF NOT EXISTS idx_jobs_state ON jobs(state);
CREATE INDEX IF NOT EXISTS idx_jobs_created_at ON jobs(created_at);

-- Intermediate stage output (JSON), kept so delivery can be retried
CREATE TABLE IF NOT EXISTS stage_outputs (
    job_id     TEXT NOT NULL REFERENCES jobs(id) ON DELETE CASCADE,
    stage      TEXT NOT NULL,
    payload    TEXT NOT NULL,
    item_count INTEGER NOT NULL,
    created_at TEXT NOT NULL,
    PRIMARY KEY (job_id, stage)
);

INSERT INTO schema_migrations (version) VALUES (1);
"#,
        },
        Migration {
            version: 2,
            description: "Per-job destination worksheet",
            sql: r#"
ALTER TABLE jobs ADD COLUMN worksheet TEXT;

INSERT INTO schema_migrations (version) VALUES (2);
"#,
        },
    ]
}
