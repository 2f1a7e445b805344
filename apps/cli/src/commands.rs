//! CLI command definitions, routing, and tracing setup.

use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, eyre};
use indicatif::{ProgressBar, ProgressStyle};
use leadgen_core::{JobOrchestrator, build_orchestrator};
use leadgen_shared::{
    AppConfig, Job, JobErrorKind, JobId, JobState, VerificationStatus, VerifiedLead, init_config,
    load_config, load_config_from,
};
use leadgen_storage::Storage;
use tracing::{info, warn};

/// How often `run` and `retry-delivery` poll job status.
const POLL_INTERVAL: Duration = Duration::from_secs(2);

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// leadgen: find local businesses and their verified contact emails.
#[derive(Parser)]
#[command(
    name = "leadgen",
    version,
    about = "Turn an industry and a location into a verified lead list.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Config file to use instead of ~/.leadgen/leadgen.toml.
    #[arg(long, global = true, env = "LEADGEN_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Run one job in this process and wait for it to finish.
    Run {
        /// Kind of business, e.g. "Plumbers".
        industry: String,

        /// Where to search, e.g. "Chicago, IL".
        location: String,

        /// Number of leads to collect (5-100).
        #[arg(short, long)]
        limit: Option<u32>,

        /// Sheet/tab to write into (defaults to delivery.worksheet).
        #[arg(long)]
        sheet: Option<String>,
    },

    /// Start the HTTP API.
    Serve {
        /// Address to bind (defaults to server.bind from the config).
        #[arg(long)]
        bind: Option<String>,
    },

    /// Show the status of a job.
    Status {
        /// Job ID.
        id: String,
    },

    /// List recent jobs, newest first.
    Jobs {
        #[arg(short, long, default_value = "20")]
        limit: u32,
    },

    /// Print the verified leads of a job.
    Leads {
        /// Job ID.
        id: String,

        /// Print JSON instead of a table.
        #[arg(long)]
        json: bool,
    },

    /// Redeliver the leads of a job that failed in delivery.
    RetryDelivery {
        /// ID of the failed job.
        id: String,
    },

    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Initialize config file with defaults.
    Init,
    /// Show resolved configuration.
    Show,
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "leadgen=info",
        1 => "leadgen=debug,tower_http=debug",
        _ => "leadgen=trace,tower_http=trace",
    };

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .init();
        }
        LogFormat::Json => {
            fmt()
                .json()
                .with_env_filter(env_filter)
                .init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    let config_path = cli.config.as_deref();
    match cli.command {
        Command::Run {
            industry,
            location,
            limit,
            sheet,
        } => cmd_run(config_path, &industry, &location, limit, sheet.as_deref()).await,
        Command::Serve { bind } => cmd_serve(config_path, bind).await,
        Command::Status { id } => cmd_status(config_path, &id).await,
        Command::Jobs { limit } => cmd_jobs(config_path, limit).await,
        Command::Leads { id, json } => cmd_leads(config_path, &id, json).await,
        Command::RetryDelivery { id } => cmd_retry_delivery(config_path, &id).await,
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init().await,
            ConfigAction::Show => cmd_config_show(config_path).await,
        },
    }
}

fn resolve_config(path: Option<&Path>) -> Result<AppConfig> {
    Ok(match path {
        Some(p) => load_config_from(p)?,
        None => load_config()?,
    })
}

fn parse_job_id(raw: &str) -> Result<JobId> {
    raw.trim()
        .parse()
        .map_err(|e| eyre!("'{raw}' is not a job ID: {e}"))
}

async fn open_readonly(config: &AppConfig) -> Result<Storage> {
    Ok(Storage::open_readonly(Path::new(&config.defaults.database_path)).await?)
}

// ---------------------------------------------------------------------------
// Command handlers
// ---------------------------------------------------------------------------

async fn cmd_run(
    config_path: Option<&Path>,
    industry: &str,
    location: &str,
    limit: Option<u32>,
    sheet: Option<&str>,
) -> Result<()> {
    let config = resolve_config(config_path)?;
    let orchestrator = build_orchestrator(&config).await?;

    let id = orchestrator
        .submit_to_worksheet(industry, location, limit, sheet)
        .await?;
    info!(job_id = %id, industry, location, "job submitted");
    println!("Job {id} submitted");

    let job = follow(&orchestrator, &id).await?;
    report(&orchestrator, &job).await
}

async fn cmd_retry_delivery(config_path: Option<&Path>, raw_id: &str) -> Result<()> {
    let failed_id = parse_job_id(raw_id)?;
    let config = resolve_config(config_path)?;
    let orchestrator = build_orchestrator(&config).await?;

    let id = orchestrator.retry_delivery(&failed_id).await?;
    println!("Job {id} redelivers the leads of {failed_id}");

    let job = follow(&orchestrator, &id).await?;
    report(&orchestrator, &job).await
}

/// Poll status until the job is terminal. Ctrl-C aborts the job.
async fn follow(orchestrator: &JobOrchestrator, id: &JobId) -> Result<Job> {
    let spinner = spinner()?;
    let mut ticker = tokio::time::interval(POLL_INTERVAL);
    let interrupt = tokio::signal::ctrl_c();
    tokio::pin!(interrupt);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let job = orchestrator.job(id).await?;
                if job.state.is_terminal() {
                    spinner.finish_and_clear();
                    return Ok(job);
                }
                let stage = job.current_stage.map_or("queued", |s| s.as_str());
                spinner.set_message(format!("{} ({stage})", job.query.phrase()));
            }
            _ = &mut interrupt => {
                spinner.finish_and_clear();
                warn!(job_id = %id, "interrupted, aborting job");
                orchestrator.abort(id, "interrupted by operator").await?;
                return Err(eyre!("job {id} aborted"));
            }
        }
    }
}

fn spinner() -> Result<ProgressBar> {
    let spinner = ProgressBar::new_spinner();
    spinner.set_style(
        ProgressStyle::with_template("{spinner:.cyan} {msg} [{elapsed}]")?
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]),
    );
    spinner.enable_steady_tick(Duration::from_millis(80));
    Ok(spinner)
}

/// Print the outcome of a finished job; failed jobs exit non-zero.
async fn report(orchestrator: &JobOrchestrator, job: &Job) -> Result<()> {
    let leads = orchestrator.leads(&job.id).await?;

    println!();
    match job.state {
        JobState::Completed => {
            println!("  Leads delivered!");
            println!("  Job:      {}", job.id);
            println!("  Search:   {}", job.query.phrase());
            println!("  Leads:    {}", leads.len());
            print_breakdown(&leads);
            if let Some(locator) = &job.result_locator {
                println!("  Result:   {locator}");
            }
            println!();
            Ok(())
        }
        _ => {
            let (kind, message) = job
                .error
                .as_ref()
                .map_or(("Internal", "no error recorded"), |e| {
                    (e.kind.as_str(), e.message.as_str())
                });
            println!("  Job {} failed ({kind})", job.id);
            println!("  {message}");
            if job.error.as_ref().is_some_and(|e| e.kind == JobErrorKind::DeliveryFailed) {
                println!("  {} verified leads are kept.", leads.len());
                println!("  Retry with: leadgen retry-delivery {}", job.id);
            }
            println!();
            Err(eyre!("job {} failed", job.id))
        }
    }
}

fn print_breakdown(leads: &[VerifiedLead]) {
    for status in [
        VerificationStatus::Verified,
        VerificationStatus::CatchAll,
        VerificationStatus::Unverified,
        VerificationStatus::NoEmail,
    ] {
        let n = leads.iter().filter(|l| l.verification_status == status).count();
        if n > 0 {
            println!("    {:<11} {n}", status.as_str());
        }
    }
}

async fn cmd_serve(config_path: Option<&Path>, bind: Option<String>) -> Result<()> {
    let config = resolve_config(config_path)?;
    let orchestrator = build_orchestrator(&config).await?;
    let addr = bind.unwrap_or_else(|| config.server.bind.clone());

    println!("Serving on http://{addr}");
    leadgen_api::serve(orchestrator, &addr).await?;
    Ok(())
}

async fn cmd_status(config_path: Option<&Path>, raw_id: &str) -> Result<()> {
    let id = parse_job_id(raw_id)?;
    let config = resolve_config(config_path)?;
    let storage = open_readonly(&config).await?;

    let job = storage
        .get_job(&id)
        .await?
        .ok_or_else(|| eyre!("job {id} not found"))?;
    let view = job.status_view();

    println!("  Job:      {}", job.id);
    println!("  Search:   {} (limit {})", job.query.phrase(), job.query.limit);
    println!("  Status:   {}", view.status.as_str());
    if let Some(stage) = view.stage {
        println!("  Stage:    {stage}");
    }
    if let Some(locator) = &view.result_locator {
        println!("  Result:   {locator}");
    }
    if let Some(error) = &job.error {
        println!("  Error:    {error}");
    }
    if let Some(from) = &job.resumed_from {
        println!("  Resumes:  {from}");
    }
    println!("  Created:  {}", job.created_at.format("%Y-%m-%d %H:%M:%S"));
    println!("  Updated:  {}", job.updated_at.format("%Y-%m-%d %H:%M:%S"));
    Ok(())
}

async fn cmd_jobs(config_path: Option<&Path>, limit: u32) -> Result<()> {
    let config = resolve_config(config_path)?;
    let storage = open_readonly(&config).await?;
    let jobs = storage.list_jobs(limit).await?;

    if jobs.is_empty() {
        println!("No jobs yet.");
        return Ok(());
    }

    for job in &jobs {
        let detail = match (&job.state, &job.current_stage, &job.error) {
            (JobState::Running, Some(stage), _) => stage.as_str().to_string(),
            (JobState::Failed, _, Some(error)) => error.kind.as_str().to_string(),
            _ => String::new(),
        };
        println!(
            "{}  {}  {:<9} {:<20} {}",
            job.id,
            job.created_at.format("%Y-%m-%d %H:%M"),
            job.state.as_str(),
            detail,
            job.query.phrase()
        );
    }
    Ok(())
}

async fn cmd_leads(config_path: Option<&Path>, raw_id: &str, json: bool) -> Result<()> {
    let id = parse_job_id(raw_id)?;
    let config = resolve_config(config_path)?;
    let storage = open_readonly(&config).await?;

    if storage.get_job(&id).await?.is_none() {
        return Err(eyre!("job {id} not found"));
    }
    let leads: Vec<VerifiedLead> = storage
        .load_stage_output(&id, leadgen_shared::Stage::Verification)
        .await?
        .unwrap_or_default();

    if json {
        println!("{}", serde_json::to_string_pretty(&leads)?);
        return Ok(());
    }
    if leads.is_empty() {
        println!("Job {id} has no verified leads yet.");
        return Ok(());
    }
    for lead in &leads {
        println!(
            "{:<32} {:<36} {:<11} {}",
            lead.business.name,
            lead.email.as_deref().unwrap_or("-"),
            lead.verification_status.as_str(),
            lead.business.website().unwrap_or("-")
        );
    }
    Ok(())
}

async fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

async fn cmd_config_show(config_path: Option<&Path>) -> Result<()> {
    let config = resolve_config(config_path)?;
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn run_takes_positional_query_and_limit() {
        let cli = Cli::try_parse_from(["leadgen", "run", "Plumbers", "Chicago, IL", "--limit", "10"])
            .unwrap();
        match cli.command {
            Command::Run {
                industry,
                location,
                limit,
                sheet,
            } => {
                assert_eq!(industry, "Plumbers");
                assert_eq!(location, "Chicago, IL");
                assert_eq!(limit, Some(10));
                assert_eq!(sheet, None);
            }
            _ => panic!("expected run"),
        }
    }

    #[test]
    fn run_accepts_a_sheet_name() {
        let cli = Cli::try_parse_from(["leadgen", "run", "Dentists", "Austin, TX", "--sheet", "Austin"])
            .unwrap();
        match cli.command {
            Command::Run { sheet, limit, .. } => {
                assert_eq!(sheet.as_deref(), Some("Austin"));
                assert_eq!(limit, None);
            }
            _ => panic!("expected run"),
        }
    }

    #[test]
    fn global_flags_follow_subcommands() {
        let cli = Cli::try_parse_from(["leadgen", "jobs", "-vv", "--log-format", "json"]).unwrap();
        assert_eq!(cli.verbose, 2);
        assert!(matches!(cli.log_format, LogFormat::Json));
    }

    #[test]
    fn job_ids_must_be_uuids() {
        assert!(parse_job_id("not-a-job").is_err());
        let id = JobId::new();
        assert_eq!(parse_job_id(&format!(" {id} ")).unwrap(), id);
    }
}
