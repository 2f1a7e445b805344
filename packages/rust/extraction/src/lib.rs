//! Extraction stage: find contact email candidates on each business website.
//!
//! This crate provides:
//! - [`ContactExtractor`], the stage entry point (bounded worker pool, index-ordered join)
//! - [`scan`], mailto/text scanning of one HTML page
//! - [`site`], the bounded per-site crawl

pub mod scan;
pub mod site;

use std::sync::Arc;

use tokio::sync::Semaphore;
use tracing::{debug, info, instrument, warn};

use leadgen_fetcher::RateLimitedFetcher;
use leadgen_shared::{BusinessRecord, EmailCandidate, ExtractionResult, ExtractionSettings};

pub use scan::{decode_obfuscation, merge_candidates, scan_page};
pub use site::{crawl_site, normalize_website, pages_to_visit};

// ---------------------------------------------------------------------------
// ContactExtractor
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct ContactExtractor {
    fetcher: Arc<RateLimitedFetcher>,
    settings: Arc<ExtractionSettings>,
}

impl ContactExtractor {
    pub fn new(fetcher: Arc<RateLimitedFetcher>, settings: ExtractionSettings) -> Self {
        Self {
            fetcher,
            settings: Arc::new(settings),
        }
    }

    /// Map every business to its candidates, preserving input order.
    ///
    /// Sites are crawled on a bounded worker pool; results are joined back by
    /// index, never by completion order. Per-site failures and timeouts yield an
    /// empty candidate list.
    #[instrument(skip_all, fields(businesses = businesses.len(), concurrency = self.settings.concurrency))]
    pub async fn extract_all(&self, businesses: &[BusinessRecord]) -> Vec<ExtractionResult> {
        let semaphore = Arc::new(Semaphore::new(self.settings.concurrency.max(1)));
        let mut handles = Vec::with_capacity(businesses.len());

        for business in businesses {
            let extractor = self.clone();
            let sem = semaphore.clone();
            let business = business.clone();

            handles.push(tokio::spawn(async move {
                let Ok(_permit) = sem.acquire_owned().await else {
                    return Vec::new();
                };
                extractor.candidates_for(&business).await
            }));
        }

        let mut results = Vec::with_capacity(businesses.len());
        for (handle, business) in handles.into_iter().zip(businesses) {
            let candidates = match handle.await {
                Ok(candidates) => candidates,
                Err(e) => {
                    warn!(name = %business.name, error = %e, "extraction task failed");
                    Vec::new()
                }
            };
            results.push(ExtractionResult {
                business: business.clone(),
                candidates,
            });
        }

        let with_candidates = results.iter().filter(|r| !r.candidates.is_empty()).count();
        info!(
            total = results.len(),
            with_candidates, "extraction complete"
        );
        results
    }

    /// Candidates for one business; empty when it has no usable website.
    pub async fn candidates_for(&self, business: &BusinessRecord) -> Vec<EmailCandidate> {
        let Some(website) = business.website() else {
            debug!(name = %business.name, "no website");
            return Vec::new();
        };
        let Some(homepage) = normalize_website(website) else {
            debug!(name = %business.name, website, "unparseable website");
            return Vec::new();
        };

        match tokio::time::timeout(
            self.settings.site_timeout,
            crawl_site(&self.fetcher, &homepage, &self.settings),
        )
        .await
        {
            Ok(candidates) => candidates,
            Err(_) => {
                warn!(
                    name = %business.name,
                    url = %homepage,
                    timeout_secs = self.settings.site_timeout.as_secs(),
                    "site crawl timed out"
                );
                Vec::new()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use leadgen_shared::{CandidateSource, Confidence, FetcherSettings, PolitenessConfig};
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn settings(max_pages: usize, site_timeout: Duration) -> ExtractionSettings {
        ExtractionSettings {
            contact_paths: vec!["/contact".into(), "/about".into(), "/team".into()],
            max_pages,
            site_timeout,
            concurrency: 3,
            politeness: PolitenessConfig::none(),
        }
    }

    fn extractor(settings: ExtractionSettings) -> ContactExtractor {
        let fetcher_settings = FetcherSettings {
            user_agent: "leadgen-test".into(),
            request_timeout: Duration::from_secs(5),
            cooldown: Duration::from_secs(60),
            max_body_bytes: 1024 * 1024,
        };
        let fetcher = RateLimitedFetcher::new(fetcher_settings)
            .unwrap()
            .allow_private_targets();
        ContactExtractor::new(Arc::new(fetcher), settings)
    }

    fn business(name: &str, website: Option<String>) -> BusinessRecord {
        BusinessRecord {
            name: name.into(),
            address: format!("{name} street"),
            phone: None,
            website,
            rating: None,
            review_count: None,
        }
    }

    async fn page(server: &MockServer, route: &str, status: u16, body: &str) {
        Mock::given(method("GET"))
            .and(path(route))
            .respond_with(ResponseTemplate::new(status).set_body_string(body.to_string()))
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn homepage_mailto_stops_the_crawl() {
        let server = MockServer::start().await;
        page(
            &server,
            "/",
            200,
            r#"<a href="mailto:office@joesplumbing.com">Email</a>"#,
        )
        .await;
        Mock::given(path("/contact"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let found = extractor(settings(4, Duration::from_secs(10)))
            .candidates_for(&business("Joe's", Some(server.uri())))
            .await;
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].source, CandidateSource::MailtoLink);
    }

    #[tokio::test]
    async fn falls_back_to_contact_pages_in_order() {
        let server = MockServer::start().await;
        page(&server, "/", 200, "<p>Welcome to our bakery</p>").await;
        page(&server, "/contact", 404, "").await;
        page(&server, "/about", 200, "<p>Reach us: orders@sunrisebakery.com</p>").await;
        Mock::given(path("/team"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let found = extractor(settings(4, Duration::from_secs(10)))
            .candidates_for(&business("Sunrise", Some(format!("{}/", server.uri()))))
            .await;
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].address, "orders@sunrisebakery.com");
        assert_eq!(found[0].source, CandidateSource::PageScan);
        assert_eq!(found[0].confidence, Confidence::High);
    }

    #[tokio::test]
    async fn page_budget_is_respected() {
        let server = MockServer::start().await;
        page(&server, "/", 200, "<p>nothing</p>").await;
        page(&server, "/contact", 200, "<p>still nothing</p>").await;
        Mock::given(path("/about"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let found = extractor(settings(2, Duration::from_secs(10)))
            .candidates_for(&business("Quiet", Some(server.uri())))
            .await;
        assert!(found.is_empty());
    }

    #[tokio::test]
    async fn order_is_preserved_and_failures_are_empty() {
        let slow = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(r#"<a href="mailto:late@slowsite.com">x</a>"#)
                    .set_delay(Duration::from_secs(3)),
            )
            .mount(&slow)
            .await;

        let fast = MockServer::start().await;
        page(&fast, "/", 200, r#"<a href="mailto:hi@fastsite.com">x</a>"#).await;

        let broken = MockServer::start().await;
        page(&broken, "/", 500, "").await;
        page(&broken, "/contact", 500, "").await;
        page(&broken, "/about", 500, "").await;
        page(&broken, "/team", 500, "").await;

        let businesses = vec![
            business("Slow", Some(slow.uri())),
            business("No Site", None),
            business("Fast", Some(fast.uri())),
            business("Broken", Some(broken.uri())),
        ];

        let results = extractor(settings(4, Duration::from_millis(500)))
            .extract_all(&businesses)
            .await;

        let names: Vec<&str> = results.iter().map(|r| r.business.name.as_str()).collect();
        assert_eq!(names, ["Slow", "No Site", "Fast", "Broken"]);
        assert!(results[0].candidates.is_empty(), "timed-out site yields nothing");
        assert!(results[1].candidates.is_empty());
        assert_eq!(results[2].candidates[0].address, "hi@fastsite.com");
        assert!(results[3].candidates.is_empty());
    }

    #[tokio::test]
    async fn private_sites_are_refused_without_opt_in() {
        let fetcher = RateLimitedFetcher::new(FetcherSettings {
            user_agent: "leadgen-test".into(),
            request_timeout: Duration::from_secs(1),
            cooldown: Duration::from_secs(60),
            max_body_bytes: 1024,
        })
        .unwrap();
        let extractor = ContactExtractor::new(Arc::new(fetcher), settings(4, Duration::from_secs(5)));

        let found = extractor
            .candidates_for(&business("Router", Some("http://192.168.0.1".into())))
            .await;
        assert!(found.is_empty());
    }
}
