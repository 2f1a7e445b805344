//! Job orchestrator: owns the job lifecycle and runs the four stages in order.
//!
//! Jobs move `pending → running → {completed | failed}`. Only the runner task
//! and [`JobOrchestrator::abort`] write job state, and every write is
//! conditional on the job still being live, so a result computed after an
//! abort or deadline is discarded instead of overwriting the terminal record.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, error, info, instrument, warn};

use leadgen_delivery::{DeliveryBatch, LeadDestination, deliver};
use leadgen_discovery::{MapSearchProvider, discover};
use leadgen_extraction::ContactExtractor;
use leadgen_shared::{
    AppConfig, BusinessRecord, DiscoverySettings, ExtractionResult, Job, JobError, JobErrorKind,
    JobId, JobState, JobStatusView, LeadGenError, LeadQuery, Result, Stage, VerifiedLead,
};
use leadgen_storage::Storage;
use leadgen_verification::Verifier;

/// Orchestrator tuning.
#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    /// Limit applied when a submission omits one.
    pub default_limit: u32,
    /// Deadline for one job, all stages included.
    pub job_timeout: Duration,
    pub discovery: DiscoverySettings,
}

impl From<&AppConfig> for OrchestratorSettings {
    fn from(config: &AppConfig) -> Self {
        Self {
            default_limit: config.defaults.limit,
            job_timeout: Duration::from_secs(config.defaults.job_timeout_secs.max(1)),
            discovery: DiscoverySettings::from(config),
        }
    }
}

/// The stage adapters one orchestrator drives.
pub struct Pipeline {
    pub provider: Arc<dyn MapSearchProvider>,
    pub extractor: ContactExtractor,
    pub verifier: Verifier,
    pub destination: Arc<dyn LeadDestination>,
}

/// What a spawned runner needs from the job record.
struct JobRun {
    id: JobId,
    query: LeadQuery,
    worksheet: Option<String>,
}

#[derive(Clone)]
pub struct JobOrchestrator {
    storage: Arc<Storage>,
    pipeline: Arc<Pipeline>,
    settings: Arc<OrchestratorSettings>,
}

/// Characters Google Sheets refuses in a tab name.
const WORKSHEET_FORBIDDEN: &[char] = &['[', ']', ':', '*', '?', '/', '\\'];
const WORKSHEET_MAX_CHARS: usize = 100;

/// Blank means "use the configured worksheet".
fn worksheet_name(raw: Option<&str>) -> Result<Option<String>> {
    let Some(name) = raw.map(str::trim).filter(|n| !n.is_empty()) else {
        return Ok(None);
    };
    if name.chars().count() > WORKSHEET_MAX_CHARS {
        return Err(LeadGenError::validation(format!(
            "worksheet name is longer than {WORKSHEET_MAX_CHARS} characters"
        )));
    }
    if name.contains(WORKSHEET_FORBIDDEN) {
        return Err(LeadGenError::validation(format!(
            "worksheet name '{name}' contains one of [ ] : * ? / \\"
        )));
    }
    Ok(Some(name.to_string()))
}

fn new_job(query: LeadQuery, worksheet: Option<String>, resumed_from: Option<JobId>) -> Job {
    let now = Utc::now();
    Job {
        id: JobId::new(),
        query,
        state: JobState::Pending,
        current_stage: None,
        created_at: now,
        updated_at: now,
        error: None,
        result_locator: None,
        resumed_from,
        worksheet,
    }
}

fn internal(e: LeadGenError) -> JobError {
    JobError::new(JobErrorKind::Internal, e.to_string())
}

/// Job error for a failed stage; keeps the inner message of the expected variant.
fn stage_error(kind: JobErrorKind, e: LeadGenError) -> JobError {
    let message = match e {
        LeadGenError::DiscoveryUnavailable(msg) | LeadGenError::DeliveryFailed(msg) => msg,
        other => other.to_string(),
    };
    JobError::new(kind, message)
}

impl JobOrchestrator {
    pub fn new(storage: Arc<Storage>, pipeline: Pipeline, settings: OrchestratorSettings) -> Self {
        Self {
            storage,
            pipeline: Arc::new(pipeline),
            settings: Arc::new(settings),
        }
    }

    // -----------------------------------------------------------------------
    // Caller-facing operations
    // -----------------------------------------------------------------------

    /// Validate a query, persist a `pending` job and schedule it.
    ///
    /// Validation errors are returned before any job exists.
    pub async fn submit(&self, industry: &str, location: &str, limit: Option<u32>) -> Result<JobId> {
        self.submit_to_worksheet(industry, location, limit, None).await
    }

    /// [`submit`](Self::submit), delivering to `worksheet` instead of the
    /// configured sheet/tab.
    pub async fn submit_to_worksheet(
        &self,
        industry: &str,
        location: &str,
        limit: Option<u32>,
        worksheet: Option<&str>,
    ) -> Result<JobId> {
        let query = LeadQuery::new(industry, location, limit.or(Some(self.settings.default_limit)))?;
        let job = new_job(query, worksheet_name(worksheet)?, None);
        self.storage.insert_job(&job).await?;

        info!(
            job_id = %job.id,
            phrase = %job.query.phrase(),
            limit = job.query.limit,
            worksheet = job.worksheet.as_deref(),
            "job submitted"
        );
        self.spawn(&job, Stage::Discovery);
        Ok(job.id)
    }

    /// Full job record.
    pub async fn job(&self, id: &JobId) -> Result<Job> {
        self.storage
            .get_job(id)
            .await?
            .ok_or_else(|| LeadGenError::NotFound(format!("job {id}")))
    }

    /// Caller-facing status. Read-only; safe to poll.
    pub async fn status(&self, id: &JobId) -> Result<JobStatusView> {
        Ok(self.job(id).await?.status_view())
    }

    /// Recent jobs, newest first.
    pub async fn list(&self, limit: u32) -> Result<Vec<Job>> {
        self.storage.list_jobs(limit).await
    }

    /// Operator abort. Terminal jobs are left untouched.
    pub async fn abort(&self, id: &JobId, reason: &str) -> Result<JobStatusView> {
        let reason = reason.trim();
        let message = if reason.is_empty() {
            "aborted by operator"
        } else {
            reason
        };
        let error = JobError::new(JobErrorKind::Aborted, message);
        if self.storage.mark_failed(id, &error).await? {
            warn!(job_id = %id, %message, "job aborted");
        }
        self.status(id).await
    }

    /// Verified leads persisted for a job; empty until Verification finished.
    pub async fn leads(&self, id: &JobId) -> Result<Vec<VerifiedLead>> {
        self.job(id).await?;
        Ok(self
            .storage
            .load_stage_output(id, Stage::Verification)
            .await?
            .unwrap_or_default())
    }

    /// Redeliver the leads of a job that failed in Delivery.
    ///
    /// Creates a new job seeded with the persisted leads that starts at the
    /// Delivery stage; the failed job stays as it is.
    pub async fn retry_delivery(&self, failed_id: &JobId) -> Result<JobId> {
        let failed = self.job(failed_id).await?;
        let delivery_failed = failed.state == JobState::Failed
            && failed
                .error
                .as_ref()
                .is_some_and(|e| e.kind == JobErrorKind::DeliveryFailed);
        if !delivery_failed {
            return Err(LeadGenError::validation(format!(
                "job {failed_id} is {} and did not fail in delivery",
                failed.state.as_str()
            )));
        }

        let leads: Vec<VerifiedLead> = self
            .storage
            .load_stage_output(failed_id, Stage::Verification)
            .await?
            .ok_or_else(|| {
                LeadGenError::validation(format!("job {failed_id} has no persisted leads"))
            })?;

        let job = new_job(failed.query, failed.worksheet, Some(failed_id.clone()));
        self.storage.insert_job(&job).await?;
        self.storage
            .save_stage_output(&job.id, Stage::Verification, &leads)
            .await?;

        info!(job_id = %job.id, resumed_from = %failed_id, leads = leads.len(), "delivery retry submitted");
        self.spawn(&job, Stage::Delivery);
        Ok(job.id)
    }

    /// Fail jobs a previous process left live. Call once at startup.
    pub async fn recover_interrupted(&self) -> Result<u64> {
        let error = JobError::new(JobErrorKind::Internal, "interrupted by restart");
        self.storage.fail_interrupted_jobs(&error).await
    }

    // -----------------------------------------------------------------------
    // Runner
    // -----------------------------------------------------------------------

    fn spawn(&self, job: &Job, start: Stage) {
        let this = self.clone();
        let run = JobRun {
            id: job.id.clone(),
            query: job.query.clone(),
            worksheet: job.worksheet.clone(),
        };
        tokio::spawn(async move { this.supervise(run, start).await });
    }

    /// Run the stages under the job deadline and record how they ended.
    async fn supervise(&self, run: JobRun, start: Stage) {
        let id = run.id.clone();
        let mut runner = {
            let this = self.clone();
            tokio::spawn(async move { this.run_stages(&run, start).await })
        };

        let failure = match tokio::time::timeout(self.settings.job_timeout, &mut runner).await {
            Ok(Ok(Ok(()))) => return,
            Ok(Ok(Err(job_error))) => job_error,
            Ok(Err(join_error)) => JobError::new(
                JobErrorKind::Internal,
                format!("pipeline task failed: {join_error}"),
            ),
            Err(_) => {
                runner.abort();
                JobError::new(
                    JobErrorKind::TimedOut,
                    format!(
                        "job exceeded its {}s deadline",
                        self.settings.job_timeout.as_secs()
                    ),
                )
            }
        };

        match self.storage.mark_failed(&id, &failure).await {
            Ok(true) => warn!(job_id = %id, error = %failure, "job failed"),
            Ok(false) => debug!(job_id = %id, error = %failure, "job already terminal, failure discarded"),
            Err(e) => error!(job_id = %id, error = %e, "could not record job failure"),
        }
    }

    #[instrument(skip_all, fields(job_id = %run.id, start = %start))]
    async fn run_stages(&self, run: &JobRun, start: Stage) -> std::result::Result<(), JobError> {
        let id = &run.id;
        let query = &run.query;
        let leads = if start == Stage::Delivery {
            self.storage
                .load_stage_output::<VerifiedLead>(id, Stage::Verification)
                .await
                .map_err(internal)?
                .ok_or_else(|| JobError::new(JobErrorKind::Internal, "seeded leads are missing"))?
        } else {
            match self.produce_leads(id, query).await? {
                Some(leads) => leads,
                None => return Ok(()),
            }
        };

        if !self.enter(id, Stage::Delivery).await? {
            return Ok(());
        }
        let batch = DeliveryBatch::new(id.clone(), query.clone(), leads)
            .with_worksheet(run.worksheet.clone());
        let locator = deliver(self.pipeline.destination.as_ref(), &batch)
            .await
            .map_err(|e| stage_error(JobErrorKind::DeliveryFailed, e))?;

        if self.storage.mark_completed(id, &locator).await.map_err(internal)? {
            info!(%locator, leads = batch.leads.len(), "job completed");
        } else {
            info!("job no longer live, delivery result discarded");
        }
        Ok(())
    }

    /// Discovery, Extraction and Verification. `None` when the job stopped being live.
    async fn produce_leads(
        &self,
        id: &JobId,
        query: &LeadQuery,
    ) -> std::result::Result<Option<Vec<VerifiedLead>>, JobError> {
        if !self.enter(id, Stage::Discovery).await? {
            return Ok(None);
        }
        let businesses: Vec<BusinessRecord> =
            discover(self.pipeline.provider.as_ref(), query, &self.settings.discovery)
                .await
                .map_err(|e| stage_error(JobErrorKind::DiscoveryUnavailable, e))?;
        self.save(id, Stage::Discovery, &businesses).await?;

        if !self.enter(id, Stage::Extraction).await? {
            return Ok(None);
        }
        let extracted: Vec<ExtractionResult> = self.pipeline.extractor.extract_all(&businesses).await;
        self.save(id, Stage::Extraction, &extracted).await?;

        if !self.enter(id, Stage::Verification).await? {
            return Ok(None);
        }
        let leads = self.pipeline.verifier.verify_all(&extracted).await;
        if leads.len() != businesses.len() {
            return Err(JobError::new(
                JobErrorKind::Internal,
                format!("{} businesses produced {} leads", businesses.len(), leads.len()),
            ));
        }
        self.save(id, Stage::Verification, &leads).await?;

        Ok(Some(leads))
    }

    async fn enter(&self, id: &JobId, stage: Stage) -> std::result::Result<bool, JobError> {
        let live = self.storage.enter_stage(id, stage).await.map_err(internal)?;
        if live {
            info!(%stage, "stage started");
        } else {
            info!(%stage, "job no longer live, stopping");
        }
        Ok(live)
    }

    async fn save<T: serde::Serialize>(
        &self,
        id: &JobId,
        stage: Stage,
        items: &[T],
    ) -> std::result::Result<(), JobError> {
        self.storage
            .save_stage_output(id, stage, items)
            .await
            .map_err(internal)
    }
}
