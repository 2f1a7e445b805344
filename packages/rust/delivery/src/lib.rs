//! Delivery stage: write the verified lead set to a tabular destination.
//!
//! This crate provides:
//! - [`DeliveryBatch`], the rows written for one job (title, header, leads)
//! - [`LeadDestination`], the destination seam
//! - [`GoogleSheetsDestination`] and [`LocalFileDestination`]

pub mod file;
pub mod sheets;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{info, instrument, warn};

use leadgen_fetcher::RateLimitedFetcher;
use leadgen_shared::{
    DeliverySettings, DestinationKind, JobId, LeadGenError, LeadQuery, Result, VerifiedLead,
};

pub use file::LocalFileDestination;
pub use sheets::{GoogleSheetsDestination, SHEETS_BASE_URL};

/// Fixed column order of every delivered row.
pub const COLUMNS: [&str; 6] = ["Name", "Website", "Email", "Phone", "Address", "Verified"];

/// Everything a destination needs to write one job's leads.
#[derive(Debug, Clone)]
pub struct DeliveryBatch {
    pub job_id: JobId,
    pub query: LeadQuery,
    pub leads: Vec<VerifiedLead>,
    /// Sheet/tab requested for this job; the destination default otherwise.
    pub worksheet: Option<String>,
    pub generated_at: DateTime<Utc>,
}

impl DeliveryBatch {
    pub fn new(job_id: JobId, query: LeadQuery, leads: Vec<VerifiedLead>) -> Self {
        Self {
            job_id,
            query,
            leads,
            worksheet: None,
            generated_at: Utc::now(),
        }
    }

    pub fn with_worksheet(mut self, worksheet: Option<String>) -> Self {
        self.worksheet = worksheet;
        self
    }

    /// `SEARCH: <industry> in <location> | <timestamp> | Found <n> leads`
    pub fn title(&self) -> String {
        format!(
            "SEARCH: {} | {} | Found {} leads",
            self.query.phrase(),
            self.generated_at.format("%Y-%m-%d %H:%M:%S"),
            self.leads.len()
        )
    }

    /// One data row per lead, in [`COLUMNS`] order.
    pub fn lead_rows(&self) -> Vec<[String; 6]> {
        self.leads.iter().map(lead_row).collect()
    }

    /// Title row, header row, then data rows; all padded to the column count.
    pub fn table(&self) -> Vec<Vec<String>> {
        let mut title = vec![String::new(); COLUMNS.len()];
        title[0] = self.title();

        let mut table = Vec::with_capacity(self.leads.len() + 2);
        table.push(title);
        table.push(COLUMNS.iter().map(|c| c.to_string()).collect());
        table.extend(self.lead_rows().into_iter().map(Vec::from));
        table
    }
}

fn lead_row(lead: &VerifiedLead) -> [String; 6] {
    let b = &lead.business;
    [
        b.name.clone(),
        b.website.clone().unwrap_or_default(),
        lead.email.clone().unwrap_or_default(),
        b.phone.clone().unwrap_or_default(),
        b.address.clone(),
        lead.verification_status.as_str().to_string(),
    ]
}

/// Tabular store the leads are written to.
#[async_trait]
pub trait LeadDestination: Send + Sync {
    fn name(&self) -> &str;

    /// Append the batch and return a locator for the written rows.
    async fn write(&self, batch: &DeliveryBatch) -> Result<String>;
}

/// Run the delivery stage. Every failure surfaces as [`LeadGenError::DeliveryFailed`].
#[instrument(skip_all, fields(job_id = %batch.job_id, destination = destination.name(), leads = batch.leads.len()))]
pub async fn deliver(destination: &dyn LeadDestination, batch: &DeliveryBatch) -> Result<String> {
    match destination.write(batch).await {
        Ok(locator) => {
            info!(%locator, "leads delivered");
            Ok(locator)
        }
        Err(e) => {
            warn!(error = %e, "delivery failed");
            Err(match e {
                LeadGenError::DeliveryFailed(_) => e,
                other => LeadGenError::DeliveryFailed(format!("{}: {other}", destination.name())),
            })
        }
    }
}

/// Build the configured destination. `token` is required for Sheets.
pub fn build_destination(
    settings: &DeliverySettings,
    fetcher: Arc<RateLimitedFetcher>,
    token: Option<String>,
) -> Result<Arc<dyn LeadDestination>> {
    match settings.destination {
        DestinationKind::Sheets => {
            let token = token.ok_or_else(|| {
                LeadGenError::config("Sheets destination requires an access token")
            })?;
            Ok(Arc::new(GoogleSheetsDestination::new(
                fetcher,
                &settings.spreadsheet_id,
                &settings.worksheet,
                token,
                settings.base_url.as_deref(),
            )?))
        }
        DestinationKind::File => Ok(Arc::new(LocalFileDestination::new(&settings.output_dir))),
    }
}
