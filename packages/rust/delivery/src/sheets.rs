//! Google Sheets `values:append` destination.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;
use url::Url;

use leadgen_fetcher::{RateLimitedFetcher, target_key};
use leadgen_shared::{LeadGenError, PolitenessConfig, Result};

use crate::{DeliveryBatch, LeadDestination};

pub const SHEETS_BASE_URL: &str = "https://sheets.googleapis.com";

const DOCS_BASE_URL: &str = "https://docs.google.com/spreadsheets/d";

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct AppendBody<'a> {
    major_dimension: &'static str,
    values: &'a [Vec<String>],
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AppendResponse {
    #[serde(default)]
    updates: Option<AppendUpdates>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AppendUpdates {
    #[serde(default)]
    updated_range: Option<String>,
    #[serde(default)]
    updated_rows: Option<u32>,
}

pub struct GoogleSheetsDestination {
    fetcher: Arc<RateLimitedFetcher>,
    base: Url,
    target: String,
    spreadsheet_id: String,
    worksheet: String,
    token: String,
}

impl GoogleSheetsDestination {
    pub fn new(
        fetcher: Arc<RateLimitedFetcher>,
        spreadsheet_id: &str,
        worksheet: &str,
        token: String,
        base_url: Option<&str>,
    ) -> Result<Self> {
        let spreadsheet_id = spreadsheet_id.trim();
        if spreadsheet_id.is_empty() {
            return Err(LeadGenError::config("spreadsheet_id is empty"));
        }
        let raw = base_url.unwrap_or(SHEETS_BASE_URL).trim_end_matches('/');
        let base = Url::parse(raw)
            .map_err(|e| LeadGenError::config(format!("invalid Sheets base URL {raw}: {e}")))?;

        Ok(Self {
            fetcher,
            target: target_key(&base),
            base,
            spreadsheet_id: spreadsheet_id.to_string(),
            worksheet: worksheet.to_string(),
            token,
        })
    }

    /// `{base}/v4/spreadsheets/{id}/values/{sheet}!A1:append`
    fn append_url(&self, worksheet: &str) -> Result<Url> {
        let range = format!("{worksheet}!A1:append");
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| LeadGenError::config("Sheets base URL cannot carry a path"))?
            .pop_if_empty()
            .extend([
                "v4",
                "spreadsheets",
                self.spreadsheet_id.as_str(),
                "values",
                range.as_str(),
            ]);
        Ok(url)
    }

    fn locator(&self, updated_range: Option<&str>) -> String {
        match updated_range {
            Some(range) => format!("{DOCS_BASE_URL}/{}/edit#range={range}", self.spreadsheet_id),
            None => format!("{DOCS_BASE_URL}/{}/edit", self.spreadsheet_id),
        }
    }
}

#[async_trait]
impl LeadDestination for GoogleSheetsDestination {
    fn name(&self) -> &str {
        "sheets"
    }

    async fn write(&self, batch: &DeliveryBatch) -> Result<String> {
        let worksheet = batch.worksheet.as_deref().unwrap_or(&self.worksheet);
        let table = batch.table();
        let body = AppendBody {
            major_dimension: "ROWS",
            values: &table,
        };

        let builder = self
            .fetcher
            .client()
            .post(self.append_url(worksheet)?)
            .query(&[("valueInputOption", "RAW"), ("insertDataOption", "INSERT_ROWS")])
            .bearer_auth(&self.token)
            .json(&body);

        let response = self
            .fetcher
            .send(&self.target, builder, &PolitenessConfig::none())
            .await
            .map_err(|e| LeadGenError::DeliveryFailed(format!("Sheets API unreachable: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let snippet: String = body.chars().take(300).collect();
            return Err(LeadGenError::DeliveryFailed(format!(
                "Sheets API rejected the write (HTTP {}): {snippet}",
                status.as_u16()
            )));
        }

        let parsed: AppendResponse = response.json().await.map_err(|e| {
            LeadGenError::DeliveryFailed(format!("Sheets API returned an unreadable response: {e}"))
        })?;
        let updates = parsed.updates.unwrap_or_default();
        debug!(
            spreadsheet = %self.spreadsheet_id,
            worksheet,
            range = ?updates.updated_range,
            rows = ?updates.updated_rows,
            "rows appended"
        );
        Ok(self.locator(updates.updated_range.as_deref()))
    }
}
