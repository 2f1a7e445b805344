//! Discovery stage: turn a lead query into an ordered, deduplicated list of
//! businesses from a map-search provider.
//!
//! Pages are requested sequentially; pacing between them is applied by the
//! provider through the shared rate-limited fetcher. A page that keeps failing
//! after the retry budget fails the whole stage with
//! [`LeadGenError::DiscoveryUnavailable`], as does a search that yields no
//! businesses at all.

mod apify;
mod places;
mod provider;

use std::collections::HashSet;

use tracing::{debug, info, instrument, warn};

use leadgen_shared::{BusinessRecord, DiscoverySettings, LeadGenError, LeadQuery, Result};

pub use apify::{APIFY_BASE_URL, ApifyPlacesProvider};
pub use places::{PLACES_BASE_URL, PlacesTextSearchProvider};
pub use provider::{MapSearchProvider, PageCursor, ProviderPage, SearchRequest};

/// Hard ceiling on pages read for one query.
const MAX_PAGES: u32 = 25;

/// Hard ceiling on polls of a provider-side run that has not finished.
const MAX_RUN_POLLS: u32 = 60;

// ---------------------------------------------------------------------------
// Main entry point
// ---------------------------------------------------------------------------

/// Collect up to `query.limit` unique businesses for the query.
#[instrument(skip_all, fields(phrase = %query.phrase(), limit = query.limit, provider = provider.name()))]
pub async fn discover(
    provider: &dyn MapSearchProvider,
    query: &LeadQuery,
    settings: &DiscoverySettings,
) -> Result<Vec<BusinessRecord>> {
    let limit = query.limit as usize;
    let request = SearchRequest {
        phrase: query.phrase(),
        limit: query.limit,
        page_size: settings.page_size,
    };

    let mut seen = HashSet::new();
    let mut records: Vec<BusinessRecord> = Vec::with_capacity(limit);
    let mut cursor: Option<PageCursor> = None;
    let mut pages = 0u32;
    let mut polls = 0u32;

    loop {
        let page = fetch_page_with_retry(provider, &request, cursor.as_ref(), settings).await?;
        if page.is_pending() {
            polls += 1;
            if polls > MAX_RUN_POLLS {
                return Err(LeadGenError::DiscoveryUnavailable(format!(
                    "{} run still pending after {MAX_RUN_POLLS} polls",
                    provider.name()
                )));
            }
            // Retries resume from this cursor, so a failed poll re-polls the
            // same run.
            cursor = page.next;
            continue;
        }
        pages += 1;

        for record in page.records {
            if records.len() >= limit {
                break;
            }
            if record.name.trim().is_empty() {
                continue;
            }
            if seen.insert(record.dedup_key()) {
                records.push(record);
            } else {
                debug!(name = %record.name, "duplicate business skipped");
            }
        }

        if records.len() >= limit {
            break;
        }
        match page.next {
            Some(next) if pages < MAX_PAGES => cursor = Some(next),
            Some(_) => {
                warn!(pages, "page ceiling reached before limit");
                break;
            }
            None => break,
        }
    }

    if records.is_empty() {
        return Err(LeadGenError::DiscoveryUnavailable(format!(
            "{} returned no businesses for \"{}\"",
            provider.name(),
            request.phrase
        )));
    }

    info!(found = records.len(), pages, "discovery complete");
    Ok(records)
}

/// One page, retried with exponential backoff.
async fn fetch_page_with_retry(
    provider: &dyn MapSearchProvider,
    request: &SearchRequest,
    cursor: Option<&PageCursor>,
    settings: &DiscoverySettings,
) -> Result<ProviderPage> {
    let attempts = settings.retry_attempts.max(1);
    let mut backoff = settings.retry_backoff;
    let mut last_error = None;

    for attempt in 1..=attempts {
        match provider.search_page(request, cursor).await {
            Ok(page) => return Ok(page),
            Err(e) => {
                warn!(attempt, attempts, error = %e, "provider request failed");
                last_error = Some(e);
                if attempt < attempts {
                    tokio::time::sleep(backoff).await;
                    backoff = backoff.saturating_mul(2);
                }
            }
        }
    }

    let reason = last_error.map_or_else(|| "no attempts made".to_string(), |e| e.to_string());
    Err(LeadGenError::DiscoveryUnavailable(format!(
        "{} unavailable after {attempts} attempts: {reason}",
        provider.name()
    )))
}
