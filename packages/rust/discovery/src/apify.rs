//! Apify Google Maps scraper actor.
//!
//! The first call starts an actor run and hands back a [`PageCursor::Run`];
//! each call with that cursor long-polls the same run. Once it succeeds,
//! every page is read from the run's dataset by offset.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use url::Url;

use leadgen_fetcher::{RateLimitedFetcher, target_key};
use leadgen_shared::{BusinessRecord, FetchErrorKind, LeadGenError, PolitenessConfig, Result};

use crate::provider::{MapSearchProvider, PageCursor, ProviderPage, SearchRequest, non_blank, read_json};

/// Public Apify API root.
pub const APIFY_BASE_URL: &str = "https://api.apify.com/v2";

/// Seconds the API holds a run-status request open.
const WAIT_FOR_FINISH_SECS: u32 = 60;

/// Headroom on top of the long-poll window for the response to arrive.
const POLL_SLACK_SECS: u64 = 15;

fn poll_timeout() -> Duration {
    Duration::from_secs(u64::from(WAIT_FOR_FINISH_SECS) + POLL_SLACK_SECS)
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ActorInput {
    search_strings_array: Vec<String>,
    max_crawled_places_per_search: u32,
    language: &'static str,
    include_web_results: bool,
    max_images: u32,
    max_reviews: u32,
    scrape_directories: bool,
}

#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    data: T,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RunData {
    id: String,
    status: String,
    default_dataset_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PlaceItem {
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    address: Option<String>,
    #[serde(default)]
    phone: Option<String>,
    #[serde(default)]
    website: Option<String>,
    #[serde(default)]
    total_score: Option<f64>,
    #[serde(default)]
    reviews_count: Option<u32>,
}

impl PlaceItem {
    fn into_record(self) -> Option<BusinessRecord> {
        let name = non_blank(self.title)?;
        Some(BusinessRecord {
            name,
            address: non_blank(self.address).unwrap_or_default(),
            phone: non_blank(self.phone),
            website: non_blank(self.website),
            rating: self.total_score,
            review_count: self.reviews_count,
        })
    }
}

pub struct ApifyPlacesProvider {
    fetcher: Arc<RateLimitedFetcher>,
    politeness: PolitenessConfig,
    base_url: String,
    target: String,
    token: String,
    actor_id: String,
}

impl ApifyPlacesProvider {
    pub fn new(
        fetcher: Arc<RateLimitedFetcher>,
        politeness: PolitenessConfig,
        token: String,
        actor_id: &str,
        base_url: Option<&str>,
    ) -> Result<Self> {
        let base_url = base_url.unwrap_or(APIFY_BASE_URL).trim_end_matches('/').to_string();
        let parsed = Url::parse(&base_url)
            .map_err(|e| LeadGenError::config(format!("invalid Apify base URL {base_url}: {e}")))?;

        Ok(Self {
            fetcher,
            politeness,
            target: target_key(&parsed),
            base_url,
            token,
            // The REST API addresses actors as `user~name`.
            actor_id: actor_id.replace('/', "~"),
        })
    }

    async fn start_run(&self, request: &SearchRequest) -> Result<RunData> {
        let input = ActorInput {
            search_strings_array: vec![request.phrase.clone()],
            max_crawled_places_per_search: request.limit,
            language: "en",
            include_web_results: false,
            max_images: 0,
            max_reviews: 0,
            scrape_directories: false,
        };

        let url = format!("{}/acts/{}/runs", self.base_url, self.actor_id);
        let builder = self
            .fetcher
            .client()
            .post(&url)
            .bearer_auth(&self.token)
            .json(&input);
        let response = self.fetcher.send(&self.target, builder, &self.politeness).await?;
        let run: ApiResponse<RunData> = read_json(&self.target, response).await?;
        Ok(run.data)
    }

    /// One long-poll of the run's status.
    ///
    /// The request carries its own timeout since the API holds it open for
    /// up to [`WAIT_FOR_FINISH_SECS`], well past the client default. A poll
    /// that still times out leaves the run pending; it never restarts it.
    async fn poll_run(&self, run_id: &str, request: &SearchRequest) -> Result<ProviderPage> {
        let url = format!(
            "{}/actor-runs/{run_id}?waitForFinish={WAIT_FOR_FINISH_SECS}",
            self.base_url
        );
        let builder = self
            .fetcher
            .client()
            .get(&url)
            .bearer_auth(&self.token)
            .timeout(poll_timeout());

        let response = match self.fetcher.send(&self.target, builder, &self.politeness).await {
            Ok(response) => response,
            Err(e) if e.kind == FetchErrorKind::Timeout => {
                debug!(run_id, "status poll timed out, run still pending");
                return Ok(ProviderPage::pending(run_id));
            }
            Err(e) => return Err(e.into()),
        };
        let run: ApiResponse<RunData> = read_json(&self.target, response).await?;

        match run.data.status.as_str() {
            "SUCCEEDED" => {
                info!(
                    run_id,
                    dataset_id = %run.data.default_dataset_id,
                    "run completed, reading dataset"
                );
                self.dataset_page(&run.data.default_dataset_id, 0, request).await
            }
            "FAILED" | "ABORTED" | "TIMED-OUT" => Err(LeadGenError::DiscoveryUnavailable(format!(
                "Apify run {run_id} ended with status {}",
                run.data.status
            ))),
            status => {
                debug!(run_id, status, "run still in progress");
                Ok(ProviderPage::pending(run_id))
            }
        }
    }

    async fn dataset_page(
        &self,
        dataset_id: &str,
        offset: u32,
        request: &SearchRequest,
    ) -> Result<ProviderPage> {
        let page_size = request.page_size.min(request.limit.saturating_sub(offset)).max(1);
        let url = format!(
            "{}/datasets/{dataset_id}/items?format=json&clean=true&offset={offset}&limit={page_size}",
            self.base_url
        );
        let builder = self.fetcher.client().get(&url).bearer_auth(&self.token);
        let response = self.fetcher.send(&self.target, builder, &self.politeness).await?;
        let items: Vec<PlaceItem> = read_json(&self.target, response).await?;

        let fetched = items.len() as u32;
        let records: Vec<BusinessRecord> =
            items.into_iter().filter_map(PlaceItem::into_record).collect();

        let next_offset = offset + fetched;
        let next = (fetched == page_size && next_offset < request.limit).then(|| PageCursor::Offset {
            dataset_id: dataset_id.to_string(),
            offset: next_offset,
        });

        debug!(dataset_id, offset, fetched, kept = records.len(), "dataset page read");
        Ok(ProviderPage { records, next })
    }
}

#[async_trait]
impl MapSearchProvider for ApifyPlacesProvider {
    fn name(&self) -> &str {
        "apify"
    }

    async fn search_page(
        &self,
        request: &SearchRequest,
        cursor: Option<&PageCursor>,
    ) -> Result<ProviderPage> {
        match cursor {
            None => {
                let run = self.start_run(request).await?;
                info!(run_id = %run.id, "Apify run started, waiting for completion");
                Ok(ProviderPage::pending(run.id))
            }
            Some(PageCursor::Run { run_id }) => self.poll_run(run_id, request).await,
            Some(PageCursor::Offset { dataset_id, offset }) => {
                self.dataset_page(dataset_id, *offset, request).await
            }
            Some(PageCursor::Token(_)) => Err(LeadGenError::validation(
                "Apify provider cannot resume from a page token",
            )),
        }
    }
}
