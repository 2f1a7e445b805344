//! Turso Embedded / libSQL storage layer.
//!
//! The [`Storage`] struct wraps a libSQL database holding job records and
//! the intermediate output of each pipeline stage.
//!
//! **Access rules:**
//! - Orchestrator: read-write (sole writer) via [`Storage::open`]
//! - Status-only consumers: read-only via [`Storage::open_readonly`]
//!
//! Every job state change is conditional on the row still being
//! `pending`/`running`; the returned `bool` reports whether it applied.

mod migrations;

use std::path::Path;

use chrono::{DateTime, SecondsFormat, Utc};
use libsql::{Connection, Database, Row, params};
use serde::Serialize;
use serde::de::DeserializeOwned;

use leadgen_shared::{
    Job, JobError, JobErrorKind, JobId, JobState, LeadGenError, LeadQuery, Result, Stage,
};

const JOB_COLUMNS: &str = "id, industry, location, lead_limit, state, current_stage, created_at, \
updated_at, error_kind, error_message, result_locator, resumed_from, worksheet";

/// Primary storage handle wrapping a libSQL database.
pub struct Storage {
    #[allow(dead_code)]
    db: Database,
    conn: Connection,
    readonly: bool,
}

fn db_err(e: impl std::fmt::Display) -> LeadGenError {
    LeadGenError::Storage(e.to_string())
}

fn timestamp(at: &DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn now() -> String {
    timestamp(&Utc::now())
}

impl Storage {
    /// Open or create a database at `path` in read-write mode.
    pub async fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| LeadGenError::io(parent, e))?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(db_err)?;
        let conn = db.connect().map_err(db_err)?;

        let storage = Self {
            db,
            conn,
            readonly: false,
        };
        storage.run_migrations().await?;
        Ok(storage)
    }

    /// Open an existing database at `path` in read-only mode.
    pub async fn open_readonly(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(LeadGenError::NotFound(format!(
                "database {} does not exist",
                path.display()
            )));
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(db_err)?;
        let conn = db.connect().map_err(db_err)?;

        Ok(Self {
            db,
            conn,
            readonly: true,
        })
    }

    /// Run pending schema migrations.
    async fn run_migrations(&self) -> Result<()> {
        let current_version = self.get_schema_version().await;

        for migration in migrations::all_migrations() {
            if migration.version > current_version {
                tracing::info!(
                    version = migration.version,
                    description = migration.description,
                    "applying migration"
                );
                self.conn
                    .execute_batch(migration.sql)
                    .await
                    .map_err(|e| {
                        LeadGenError::Storage(format!("migration v{} failed: {e}", migration.version))
                    })?;
            }
        }
        Ok(())
    }

    /// Get the current schema version, or 0 if no migrations have been applied.
    async fn get_schema_version(&self) -> u32 {
        let result = self
            .conn
            .query("SELECT MAX(version) FROM schema_migrations", params![])
            .await;

        match result {
            Ok(mut rows) => {
                if let Ok(Some(row)) = rows.next().await {
                    row.get::<u32>(0).unwrap_or(0)
                } else {
                    0
                }
            }
            Err(_) => 0, // Table doesn't exist yet
        }
    }

    /// Ensure we're in read-write mode before writing.
    fn check_writable(&self) -> Result<()> {
        if self.readonly {
            return Err(LeadGenError::Storage(
                "database is opened in read-only mode".into(),
            ));
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Job operations
    // -----------------------------------------------------------------------

    /// Insert a new job record.
    pub async fn insert_job(&self, job: &Job) -> Result<()> {
        self.check_writable()?;
        self.conn
            .execute(
                "INSERT INTO jobs (id, industry, location, lead_limit, state, current_stage,
                                   created_at, updated_at, error_kind, error_message,
                                   result_locator, resumed_from, worksheet)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
                params![
                    job.id.to_string(),
                    job.query.industry.as_str(),
                    job.query.location.as_str(),
                    i64::from(job.query.limit),
                    job.state.as_str(),
                    job.current_stage.map(|s| s.as_str()),
                    timestamp(&job.created_at),
                    timestamp(&job.updated_at),
                    job.error.as_ref().map(|e| e.kind.as_str()),
                    job.error.as_ref().map(|e| e.message.clone()),
                    job.result_locator.clone(),
                    job.resumed_from.as_ref().map(|id| id.to_string()),
                    job.worksheet.clone(),
                ],
            )
            .await
            .map_err(db_err)?;
        Ok(())
    }

    /// Get a job by ID.
    pub async fn get_job(&self, id: &JobId) -> Result<Option<Job>> {
        let mut rows = self
            .conn
            .query(
                &format!("SELECT {JOB_COLUMNS} FROM jobs WHERE id = ?1"),
                params![id.to_string()],
            )
            .await
            .map_err(db_err)?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(job_from_row(&row)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(db_err(e)),
        }
    }

    /// Most recent jobs, newest first.
    pub async fn list_jobs(&self, limit: u32) -> Result<Vec<Job>> {
        let mut rows = self
            .conn
            .query(
                &format!(
                    "SELECT {JOB_COLUMNS} FROM jobs ORDER BY created_at DESC, rowid DESC LIMIT ?1"
                ),
                params![i64::from(limit)],
            )
            .await
            .map_err(db_err)?;

        let mut jobs = Vec::new();
        while let Some(row) = rows.next().await.map_err(db_err)? {
            jobs.push(job_from_row(&row)?);
        }
        Ok(jobs)
    }

    /// Move a live job to `running` at `stage`.
    pub async fn enter_stage(&self, id: &JobId, stage: Stage) -> Result<bool> {
        self.check_writable()?;
        let changed = self
            .conn
            .execute(
                "UPDATE jobs SET state = 'running', current_stage = ?2, updated_at = ?3
                 WHERE id = ?1 AND state IN ('pending', 'running')",
                params![id.to_string(), stage.as_str(), now()],
            )
            .await
            .map_err(db_err)?;
        Ok(changed > 0)
    }

    /// Terminal success with the delivery locator.
    pub async fn mark_completed(&self, id: &JobId, result_locator: &str) -> Result<bool> {
        self.check_writable()?;
        let changed = self
            .conn
            .execute(
                "UPDATE jobs SET state = 'completed', current_stage = NULL, result_locator = ?2,
                                 updated_at = ?3
                 WHERE id = ?1 AND state IN ('pending', 'running')",
                params![id.to_string(), result_locator, now()],
            )
            .await
            .map_err(db_err)?;
        Ok(changed > 0)
    }

    /// Terminal failure. The current stage is kept for diagnostics.
    pub async fn mark_failed(&self, id: &JobId, error: &JobError) -> Result<bool> {
        self.check_writable()?;
        let changed = self
            .conn
            .execute(
                "UPDATE jobs SET state = 'failed', error_kind = ?2, error_message = ?3,
                                 updated_at = ?4
                 WHERE id = ?1 AND state IN ('pending', 'running')",
                params![
                    id.to_string(),
                    error.kind.as_str(),
                    error.message.as_str(),
                    now()
                ],
            )
            .await
            .map_err(db_err)?;
        Ok(changed > 0)
    }

    /// Fail every job a previous process left `pending`/`running`.
    pub async fn fail_interrupted_jobs(&self, error: &JobError) -> Result<u64> {
        self.check_writable()?;
        let changed = self
            .conn
            .execute(
                "UPDATE jobs SET state = 'failed', error_kind = ?1, error_message = ?2,
                                 updated_at = ?3
                 WHERE state IN ('pending', 'running')",
                params![error.kind.as_str(), error.message.as_str(), now()],
            )
            .await
            .map_err(db_err)?;
        if changed > 0 {
            tracing::warn!(jobs = changed, "failed jobs interrupted by restart");
        }
        Ok(changed)
    }

    // -----------------------------------------------------------------------
    // Stage output
    // -----------------------------------------------------------------------

    /// Store (or replace) the output list of `stage` for a job.
    pub async fn save_stage_output<T: Serialize>(
        &self,
        id: &JobId,
        stage: Stage,
        items: &[T],
    ) -> Result<()> {
        self.check_writable()?;
        let payload = serde_json::to_string(items)
            .map_err(|e| LeadGenError::parse(format!("failed to encode {stage} output: {e}")))?;

        self.conn
            .execute(
                "INSERT INTO stage_outputs (job_id, stage, payload, item_count, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(job_id, stage) DO UPDATE SET
                   payload = excluded.payload,
                   item_count = excluded.item_count,
                   created_at = excluded.created_at",
                params![
                    id.to_string(),
                    stage.as_str(),
                    payload,
                    items.len() as i64,
                    now()
                ],
            )
            .await
            .map_err(db_err)?;
        Ok(())
    }

    /// Output list of `stage` for a job, if that stage finished.
    pub async fn load_stage_output<T: DeserializeOwned>(
        &self,
        id: &JobId,
        stage: Stage,
    ) -> Result<Option<Vec<T>>> {
        let mut rows = self
            .conn
            .query(
                "SELECT payload FROM stage_outputs WHERE job_id = ?1 AND stage = ?2",
                params![id.to_string(), stage.as_str()],
            )
            .await
            .map_err(db_err)?;

        let Some(row) = rows.next().await.map_err(db_err)? else {
            return Ok(None);
        };
        let payload = row.get::<String>(0).map_err(db_err)?;
        let items = serde_json::from_str(&payload)
            .map_err(|e| LeadGenError::parse(format!("corrupt {stage} output for job {id}: {e}")))?;
        Ok(Some(items))
    }
}

fn job_from_row(row: &Row) -> Result<Job> {
    let text = |idx: i32| row.get::<String>(idx).map_err(db_err);
    let opt_text = |idx: i32| row.get::<Option<String>>(idx).map_err(db_err);
    let parse_time = |raw: String| {
        DateTime::parse_from_rfc3339(&raw)
            .map(|t| t.with_timezone(&Utc))
            .map_err(|e| LeadGenError::parse(format!("bad timestamp '{raw}': {e}")))
    };
    let parse_id = |raw: String| {
        raw.parse::<JobId>()
            .map_err(|e| LeadGenError::parse(format!("bad job id '{raw}': {e}")))
    };

    let limit = row.get::<i64>(3).map_err(db_err)?;
    let error = match (opt_text(8)?, opt_text(9)?) {
        (Some(kind), message) => Some(JobError::new(
            kind.parse::<JobErrorKind>()?,
            message.unwrap_or_default(),
        )),
        (None, _) => None,
    };

    Ok(Job {
        id: parse_id(text(0)?)?,
        query: LeadQuery {
            industry: text(1)?,
            location: text(2)?,
            limit: u32::try_from(limit).map_err(|e| LeadGenError::parse(e.to_string()))?,
        },
        state: text(4)?.parse::<JobState>()?,
        current_stage: opt_text(5)?.map(|s| s.parse::<Stage>()).transpose()?,
        created_at: parse_time(text(6)?)?,
        updated_at: parse_time(text(7)?)?,
        error,
        result_locator: opt_text(10)?,
        resumed_from: opt_text(11)?.map(parse_id).transpose()?,
        worksheet: opt_text(12)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::SubsecRound;
    use leadgen_shared::{BusinessRecord, CandidateSource, VerificationStatus, VerifiedLead};
    use uuid::Uuid;

    /// Create a temp file storage for testing.
    async fn test_storage() -> Storage {
        let tmp = std::env::temp_dir().join(format!("leadgen_test_{}.db", Uuid::new_v4()));
        Storage::open(&tmp).await.expect("open test db")
    }

    fn pending_job() -> Job {
        let now = Utc::now();
        Job {
            id: JobId::new(),
            query: LeadQuery::new("Plumbers", "Chicago, IL", Some(10)).unwrap(),
            state: JobState::Pending,
            current_stage: None,
            created_at: now,
            updated_at: now,
            error: None,
            result_locator: None,
            resumed_from: None,
            worksheet: None,
        }
    }

    fn lead(name: &str) -> VerifiedLead {
        VerifiedLead {
            business: BusinessRecord {
                name: name.into(),
                address: "1 Main St".into(),
                phone: Some("312-555-0101".into()),
                website: Some("https://joesplumbing.com".into()),
                rating: Some(4.7),
                review_count: Some(88),
            },
            email: Some("office@joesplumbing.com".into()),
            email_source: Some(CandidateSource::MailtoLink),
            verification_status: VerificationStatus::Verified,
        }
    }

    #[tokio::test]
    async fn open_and_migrate() {
        let storage = test_storage().await;
        assert_eq!(storage.get_schema_version().await, 2);
    }

    #[tokio::test]
    async fn idempotent_migration() {
        let tmp = std::env::temp_dir().join(format!("leadgen_test_{}.db", Uuid::new_v4()));
        let s1 = Storage::open(&tmp).await.expect("first open");
        drop(s1);
        let s2 = Storage::open(&tmp).await.expect("second open");
        assert_eq!(s2.get_schema_version().await, 2);
    }

    #[tokio::test]
    async fn job_round_trips() {
        let storage = test_storage().await;
        let job = pending_job();
        storage.insert_job(&job).await.expect("insert job");

        let found = storage.get_job(&job.id).await.unwrap().expect("job exists");
        assert_eq!(found.id, job.id);
        assert_eq!(found.query, job.query);
        assert_eq!(found.state, JobState::Pending);
        assert_eq!(found.current_stage, None);
        assert_eq!(found.created_at, job.created_at.trunc_subsecs(6));

        assert!(storage.get_job(&JobId::new()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn lifecycle_updates_until_terminal() {
        let storage = test_storage().await;
        let job = pending_job();
        storage.insert_job(&job).await.unwrap();

        assert!(storage.enter_stage(&job.id, Stage::Discovery).await.unwrap());
        let running = storage.get_job(&job.id).await.unwrap().unwrap();
        assert_eq!(running.state, JobState::Running);
        assert_eq!(running.current_stage, Some(Stage::Discovery));

        assert!(storage.enter_stage(&job.id, Stage::Delivery).await.unwrap());
        assert!(
            storage
                .mark_completed(&job.id, "https://docs.google.com/spreadsheets/d/abc/edit")
                .await
                .unwrap()
        );

        // Terminal rows are immutable.
        assert!(!storage.enter_stage(&job.id, Stage::Extraction).await.unwrap());
        let err = JobError::new(JobErrorKind::Aborted, "operator abort");
        assert!(!storage.mark_failed(&job.id, &err).await.unwrap());

        let done = storage.get_job(&job.id).await.unwrap().unwrap();
        assert_eq!(done.state, JobState::Completed);
        assert_eq!(done.current_stage, None);
        assert!(done.error.is_none());
        assert_eq!(
            done.result_locator.as_deref(),
            Some("https://docs.google.com/spreadsheets/d/abc/edit")
        );
    }

    #[tokio::test]
    async fn failure_is_recorded_with_kind() {
        let storage = test_storage().await;
        let job = pending_job();
        storage.insert_job(&job).await.unwrap();
        storage.enter_stage(&job.id, Stage::Delivery).await.unwrap();

        let err = JobError::new(JobErrorKind::DeliveryFailed, "Sheets API rejected the write");
        assert!(storage.mark_failed(&job.id, &err).await.unwrap());
        assert!(!storage.mark_completed(&job.id, "late").await.unwrap());

        let failed = storage.get_job(&job.id).await.unwrap().unwrap();
        assert_eq!(failed.state, JobState::Failed);
        assert_eq!(failed.error, Some(err));
        assert!(failed.result_locator.is_none());
    }

    #[tokio::test]
    async fn stage_output_round_trips_and_replaces() {
        let storage = test_storage().await;
        let job = pending_job();
        storage.insert_job(&job).await.unwrap();

        let missing: Option<Vec<VerifiedLead>> = storage
            .load_stage_output(&job.id, Stage::Verification)
            .await
            .unwrap();
        assert!(missing.is_none());

        storage
            .save_stage_output(&job.id, Stage::Verification, &[lead("A")])
            .await
            .unwrap();
        storage
            .save_stage_output(&job.id, Stage::Verification, &[lead("A"), lead("B")])
            .await
            .unwrap();

        let leads: Vec<VerifiedLead> = storage
            .load_stage_output(&job.id, Stage::Verification)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(leads.len(), 2);
        assert_eq!(leads[1], lead("B"));
    }

    #[tokio::test]
    async fn list_is_newest_first_and_bounded() {
        let storage = test_storage().await;
        let mut ids = Vec::new();
        for offset in 0..3 {
            let mut job = pending_job();
            job.created_at = Utc::now() + chrono::Duration::seconds(offset);
            storage.insert_job(&job).await.unwrap();
            ids.push(job.id);
        }

        let jobs = storage.list_jobs(2).await.unwrap();
        assert_eq!(jobs.len(), 2);
        assert_eq!(jobs[0].id, ids[2]);
        assert_eq!(jobs[1].id, ids[1]);
    }

    #[tokio::test]
    async fn interrupted_jobs_fail_on_recovery() {
        let storage = test_storage().await;
        let pending = pending_job();
        let running = pending_job();
        let done = pending_job();
        for job in [&pending, &running, &done] {
            storage.insert_job(job).await.unwrap();
        }
        storage.enter_stage(&running.id, Stage::Extraction).await.unwrap();
        storage.mark_completed(&done.id, "file:///tmp/leads.json").await.unwrap();

        let err = JobError::new(JobErrorKind::Internal, "interrupted by restart");
        assert_eq!(storage.fail_interrupted_jobs(&err).await.unwrap(), 2);

        let running = storage.get_job(&running.id).await.unwrap().unwrap();
        assert_eq!(running.state, JobState::Failed);
        assert_eq!(running.error.map(|e| e.kind), Some(JobErrorKind::Internal));
        let done = storage.get_job(&done.id).await.unwrap().unwrap();
        assert_eq!(done.state, JobState::Completed);
    }

    #[tokio::test]
    async fn resumed_from_is_persisted() {
        let storage = test_storage().await;
        let original = pending_job();
        storage.insert_job(&original).await.unwrap();

        let mut retry = pending_job();
        retry.resumed_from = Some(original.id.clone());
        storage.insert_job(&retry).await.unwrap();

        let found = storage.get_job(&retry.id).await.unwrap().unwrap();
        assert_eq!(found.resumed_from, Some(original.id));
    }

    #[tokio::test]
    async fn worksheet_is_persisted() {
        let storage = test_storage().await;
        let mut job = pending_job();
        job.worksheet = Some("Chicago Plumbers".into());
        storage.insert_job(&job).await.unwrap();

        let found = storage.get_job(&job.id).await.unwrap().unwrap();
        assert_eq!(found.worksheet.as_deref(), Some("Chicago Plumbers"));
        let plain = pending_job();
        storage.insert_job(&plain).await.unwrap();
        assert_eq!(storage.get_job(&plain.id).await.unwrap().unwrap().worksheet, None);
    }

    #[tokio::test]
    async fn readonly_rejects_writes() {
        let tmp = std::env::temp_dir().join(format!("leadgen_test_{}.db", Uuid::new_v4()));
        let rw = Storage::open(&tmp).await.unwrap();
        let job = pending_job();
        rw.insert_job(&job).await.unwrap();
        drop(rw);

        let ro = Storage::open_readonly(&tmp).await.unwrap();
        assert!(ro.get_job(&job.id).await.unwrap().is_some());
        let result = ro.insert_job(&pending_job()).await;
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("read-only"));
    }

    #[tokio::test]
    async fn readonly_requires_existing_database() {
        let tmp = std::env::temp_dir().join(format!("leadgen_missing_{}.db", Uuid::new_v4()));
        assert!(matches!(
            Storage::open_readonly(&tmp).await,
            Err(LeadGenError::NotFound(_))
        ));
    }
}
