//! Bounded contact-page crawl for one business website.

use std::time::Instant;

use tracing::debug;
use url::Url;

use leadgen_fetcher::{RateLimitedFetcher, target_key};
use leadgen_shared::{EmailCandidate, ExtractionSettings, FetchErrorKind};

use crate::scan::scan_page;

/// Parse a provider-supplied website into an absolute URL.
///
/// Adds `https://` when no scheme is given and drops trailing slashes.
pub fn normalize_website(website: &str) -> Option<Url> {
    let trimmed = website.trim().trim_end_matches('/');
    if trimmed.is_empty() {
        return None;
    }

    let lower = trimmed.to_ascii_lowercase();
    let with_scheme = if lower.starts_with("http://") || lower.starts_with("https://") {
        trimmed.to_string()
    } else {
        format!("https://{trimmed}")
    };

    let mut url = Url::parse(&with_scheme).ok()?;
    url.host_str()?;
    url.set_fragment(None);
    Some(url)
}

/// Homepage first, then each contact path resolved against the origin.
pub fn pages_to_visit(homepage: &Url, contact_paths: &[String], max_pages: usize) -> Vec<Url> {
    let mut pages = vec![homepage.clone()];
    for path in contact_paths {
        if pages.len() >= max_pages {
            break;
        }
        let Ok(url) = homepage.join(path) else {
            continue;
        };
        if !pages.iter().any(|p| same_page(p, &url)) {
            pages.push(url);
        }
    }
    pages
}

fn same_page(a: &Url, b: &Url) -> bool {
    a.host_str() == b.host_str()
        && a.port_or_known_default() == b.port_or_known_default()
        && a.path().trim_end_matches('/') == b.path().trim_end_matches('/')
}

fn is_contact_path(url: &Url) -> bool {
    let path = url.path().to_ascii_lowercase();
    path.contains("contact") || path.contains("get-in-touch")
}

/// Visit pages in order until one yields a candidate.
///
/// Per-page failures are absorbed; a block signal or refused target ends the
/// crawl for this site. The caller bounds total time.
pub async fn crawl_site(
    fetcher: &RateLimitedFetcher,
    homepage: &Url,
    settings: &ExtractionSettings,
) -> Vec<EmailCandidate> {
    let started = Instant::now();
    let pages = pages_to_visit(homepage, &settings.contact_paths, settings.max_pages);
    let domain = target_key(homepage);

    for (visited, url) in pages.iter().enumerate() {
        let body = match fetcher.fetch_text(url, &settings.politeness).await {
            Ok(body) => body,
            Err(e) if matches!(e.kind, FetchErrorKind::Blocked | FetchErrorKind::InvalidTarget) => {
                debug!(%domain, %url, error = %e, "site crawl stopped");
                return Vec::new();
            }
            Err(e) => {
                debug!(%domain, %url, error = %e, "page skipped");
                continue;
            }
        };

        let candidates = scan_page(&body, is_contact_path(url));
        if !candidates.is_empty() {
            debug!(
                %domain,
                %url,
                found = candidates.len(),
                pages = visited + 1,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "candidates found"
            );
            return candidates;
        }
    }

    debug!(%domain, pages = pages.len(), "no candidates on site");
    Vec::new()
}
