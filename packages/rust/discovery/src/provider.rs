//! Map-search provider seam.

use async_trait::async_trait;
use reqwest::Response;
use serde::de::DeserializeOwned;

use leadgen_shared::{BusinessRecord, FetchError, FetchErrorKind, LeadGenError, Result};

/// Longest provider error body kept in an error message.
const MAX_ERROR_BODY: usize = 300;

/// One discovery query, as seen by a provider.
#[derive(Debug, Clone)]
pub struct SearchRequest {
    /// Combined "industry in location" phrase.
    pub phrase: String,
    /// Total records wanted across all pages.
    pub limit: u32,
    pub page_size: u32,
}

/// Where the next page starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageCursor {
    /// Offset into a finished dataset.
    Offset { dataset_id: String, offset: u32 },
    /// Opaque token handed back by the provider.
    Token(String),
    /// A provider-side run that has been started but has not finished yet.
    /// Resuming from it polls the same run instead of starting another.
    Run { run_id: String },
}

/// One page of provider results.
#[derive(Debug, Clone, Default)]
pub struct ProviderPage {
    pub records: Vec<BusinessRecord>,
    /// `None` when the provider reports no further pages.
    pub next: Option<PageCursor>,
}

impl ProviderPage {
    /// No records yet; the work behind `run_id` is still in progress.
    pub fn pending(run_id: impl Into<String>) -> Self {
        Self {
            records: Vec::new(),
            next: Some(PageCursor::Run { run_id: run_id.into() }),
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(self.next, Some(PageCursor::Run { .. }))
    }
}

/// External map/business-search data source.
#[async_trait]
pub trait MapSearchProvider: Send + Sync {
    /// Short name used in logs and error messages.
    fn name(&self) -> &str;

    /// Fetch one page. `cursor` is `None` for the first page.
    async fn search_page(
        &self,
        request: &SearchRequest,
        cursor: Option<&PageCursor>,
    ) -> Result<ProviderPage>;
}

/// Decode a provider JSON response, turning non-success statuses into fetch errors.
pub(crate) async fn read_json<T: DeserializeOwned>(target: &str, response: Response) -> Result<T> {
    let status = response.status();
    if !status.is_success() {
        let mut body = response.text().await.unwrap_or_default();
        if body.len() > MAX_ERROR_BODY {
            let cut = (0..=MAX_ERROR_BODY)
                .rev()
                .find(|i| body.is_char_boundary(*i))
                .unwrap_or(0);
            body.truncate(cut);
        }
        return Err(FetchError::new(FetchErrorKind::Status(status.as_u16()), target, body).into());
    }

    response
        .json::<T>()
        .await
        .map_err(|e| LeadGenError::parse(format!("{target}: invalid response body: {e}")))
}

/// Trimmed, non-empty optional string.
pub(crate) fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
