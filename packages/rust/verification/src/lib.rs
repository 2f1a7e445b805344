//! Verification stage: confirm or synthesize one email address per business.
//!
//! This crate provides:
//! - [`Verifier`], the stage entry point (bounded worker pool, index-ordered join)
//! - [`prober`], the [`MailboxProber`] seam and its SMTP implementation
//! - [`guess`], website-domain and guessed-address helpers

pub mod guess;
pub mod prober;

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, OnceCell, Semaphore};
use tracing::{debug, info, instrument, warn};

use leadgen_shared::{
    BusinessRecord, CandidateSource, ExtractionResult, VerificationSettings, VerificationStatus,
    VerifiedLead,
};

pub use guess::{catch_all_probe_address, guess_addresses, website_domain};
pub use prober::{MailboxProber, ProbeOutcome, SmtpParams, SmtpProber, rcpt_check};

/// Per-stage memo of catch-all results, one conclusive probe per domain.
#[derive(Default, Clone)]
struct CatchAllCache(Arc<Mutex<HashMap<String, Arc<OnceCell<bool>>>>>);

impl CatchAllCache {
    async fn cell(&self, domain: &str) -> Arc<OnceCell<bool>> {
        self.0
            .lock()
            .await
            .entry(domain.to_string())
            .or_default()
            .clone()
    }
}

// ---------------------------------------------------------------------------
// Verifier
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct Verifier {
    prober: Arc<dyn MailboxProber>,
    settings: Arc<VerificationSettings>,
}

impl Verifier {
    pub fn new(prober: Arc<dyn MailboxProber>, settings: VerificationSettings) -> Self {
        Self {
            prober,
            settings: Arc::new(settings),
        }
    }

    /// Classify every extraction result, preserving input order.
    ///
    /// Probe failures degrade a lead to `unverified`; nothing here fails the job.
    #[instrument(skip_all, fields(leads = results.len(), concurrency = self.settings.concurrency))]
    pub async fn verify_all(&self, results: &[ExtractionResult]) -> Vec<VerifiedLead> {
        let cache = CatchAllCache::default();
        let semaphore = Arc::new(Semaphore::new(self.settings.concurrency.max(1)));
        let mut handles = Vec::with_capacity(results.len());

        for result in results {
            let verifier = self.clone();
            let sem = semaphore.clone();
            let cache = cache.clone();
            let result = result.clone();

            handles.push(tokio::spawn(async move {
                let Ok(_permit) = sem.acquire_owned().await else {
                    return fallback_lead(&result);
                };
                verifier.verify_one(&result, &cache).await
            }));
        }

        let mut leads = Vec::with_capacity(results.len());
        for (handle, result) in handles.into_iter().zip(results) {
            let lead = match handle.await {
                Ok(lead) => lead,
                Err(e) => {
                    warn!(name = %result.business.name, error = %e, "verification task failed");
                    fallback_lead(result)
                }
            };
            leads.push(lead);
        }

        let count = |status: VerificationStatus| {
            leads
                .iter()
                .filter(|l| l.verification_status == status)
                .count()
        };
        info!(
            total = leads.len(),
            verified = count(VerificationStatus::Verified),
            catch_all = count(VerificationStatus::CatchAll),
            unverified = count(VerificationStatus::Unverified),
            no_email = count(VerificationStatus::NoEmail),
            "verification complete"
        );
        leads
    }

    async fn verify_one(&self, result: &ExtractionResult, cache: &CatchAllCache) -> VerifiedLead {
        let business = result.business.clone();

        if let Some(best) = result.best_candidate() {
            let address = best.address.clone();
            match self.prober.probe(&address).await {
                ProbeOutcome::Accepted => {
                    let domain = best.domain().unwrap_or_default();
                    return self.accepted(business, address, best.source, &domain, cache).await;
                }
                ProbeOutcome::Inconclusive(reason) | ProbeOutcome::Unreachable(reason) => {
                    debug!(name = %business.name, %address, %reason, "candidate unconfirmed");
                    return lead(business, address, best.source, VerificationStatus::Unverified);
                }
                ProbeOutcome::Rejected(reason) => {
                    debug!(name = %business.name, %address, %reason, "candidate rejected, guessing");
                }
            }
        }

        self.guess(business, cache).await
    }

    /// Probe `local@domain` guesses in configured order.
    async fn guess(&self, business: BusinessRecord, cache: &CatchAllCache) -> VerifiedLead {
        let Some(domain) = business.website().and_then(website_domain) else {
            return VerifiedLead::no_email(business);
        };

        // First address whose check could not conclude.
        let mut unconfirmed: Option<String> = None;
        for address in guess_addresses(&self.settings.local_parts, &domain) {
            match self.prober.probe(&address).await {
                ProbeOutcome::Accepted => {
                    let source = CandidateSource::PatternGuess;
                    return self.accepted(business, address, source, &domain, cache).await;
                }
                ProbeOutcome::Rejected(_) => {}
                ProbeOutcome::Inconclusive(_) => {
                    unconfirmed.get_or_insert(address);
                }
                ProbeOutcome::Unreachable(reason) => {
                    // Further guesses hit the same exchanger.
                    debug!(%domain, %reason, "mail server unreachable, guessing stopped");
                    unconfirmed.get_or_insert(address);
                    break;
                }
            }
        }

        match unconfirmed {
            Some(address) => lead(
                business,
                address,
                CandidateSource::PatternGuess,
                VerificationStatus::Unverified,
            ),
            None => VerifiedLead::no_email(business),
        }
    }

    async fn accepted(
        &self,
        business: BusinessRecord,
        address: String,
        source: CandidateSource,
        domain: &str,
        cache: &CatchAllCache,
    ) -> VerifiedLead {
        let status = match self.is_catch_all(domain, cache).await {
            Some(true) => VerificationStatus::CatchAll,
            Some(false) => VerificationStatus::Verified,
            // The mailbox answered but the domain could not be ruled out as
            // accept-all, so the address is not confirmed.
            None => VerificationStatus::Unverified,
        };
        lead(business, address, source, status)
    }

    /// `None` when the check could not conclude. Only conclusive answers are
    /// memoized; the next lead on the same domain checks again.
    async fn is_catch_all(&self, domain: &str, cache: &CatchAllCache) -> Option<bool> {
        if domain.is_empty() {
            return Some(false);
        }
        let cell = cache.cell(domain).await;
        let checked = cell
            .get_or_try_init(|| async {
                let address = catch_all_probe_address(&self.settings.catch_all_prefix, domain);
                match self.prober.probe(&address).await {
                    ProbeOutcome::Accepted => Ok(true),
                    ProbeOutcome::Rejected(_) => Ok(false),
                    ProbeOutcome::Inconclusive(reason) | ProbeOutcome::Unreachable(reason) => {
                        Err(reason)
                    }
                }
            })
            .await;

        match checked {
            Ok(catch_all) => {
                debug!(domain, catch_all = *catch_all, "catch-all check");
                Some(*catch_all)
            }
            Err(reason) => {
                warn!(domain, %reason, "catch-all check inconclusive");
                None
            }
        }
    }
}

fn lead(
    business: BusinessRecord,
    email: String,
    source: CandidateSource,
    status: VerificationStatus,
) -> VerifiedLead {
    VerifiedLead {
        business,
        email: Some(email),
        email_source: Some(source),
        verification_status: status,
    }
}

/// Lead used when a worker dies: keep whatever address extraction found.
fn fallback_lead(result: &ExtractionResult) -> VerifiedLead {
    match result.best_candidate() {
        Some(best) => lead(
            result.business.clone(),
            best.address.clone(),
            best.source,
            VerificationStatus::Unverified,
        ),
        None => VerifiedLead::no_email(result.business.clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Mutex as StdMutex;

    use async_trait::async_trait;
    use leadgen_shared::{CandidateSource, Confidence, EmailCandidate, PolitenessConfig};

    const PREFIX: &str = "zz-no-such-mailbox";

    /// Scripted prober; unknown addresses get `default`.
    struct FakeProber {
        outcomes: HashMap<String, ProbeOutcome>,
        catch_all: HashSet<String>,
        /// Domains whose catch-all check cannot connect.
        catch_all_down: HashSet<String>,
        default: ProbeOutcome,
        log: StdMutex<Vec<String>>,
    }

    impl FakeProber {
        fn new(default: ProbeOutcome) -> Self {
            Self {
                outcomes: HashMap::new(),
                catch_all: HashSet::new(),
                catch_all_down: HashSet::new(),
                default,
                log: StdMutex::new(Vec::new()),
            }
        }

        fn with(mut self, address: &str, outcome: ProbeOutcome) -> Self {
            self.outcomes.insert(address.into(), outcome);
            self
        }

        fn catch_all(mut self, domain: &str) -> Self {
            self.catch_all.insert(domain.into());
            self
        }

        fn catch_all_unreachable(mut self, domain: &str) -> Self {
            self.catch_all_down.insert(domain.into());
            self
        }

        fn probes(&self) -> Vec<String> {
            self.log.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl MailboxProber for FakeProber {
        async fn probe(&self, address: &str) -> ProbeOutcome {
            self.log.lock().unwrap().push(address.to_string());
            let domain = address.rsplit_once('@').map(|(_, d)| d).unwrap_or_default();
            if self.catch_all.contains(domain) {
                return ProbeOutcome::Accepted;
            }
            if address.starts_with(PREFIX) {
                if self.catch_all_down.contains(domain) {
                    return ProbeOutcome::Unreachable("connection reset".into());
                }
                return ProbeOutcome::Rejected("550 no such user".into());
            }
            self.outcomes
                .get(address)
                .cloned()
                .unwrap_or_else(|| self.default.clone())
        }
    }

    fn settings() -> VerificationSettings {
        VerificationSettings {
            local_parts: vec!["info".into(), "contact".into(), "hello".into(), "sales".into()],
            sender: "verify@check.local".into(),
            helo_name: "check.local".into(),
            smtp_port: 25,
            smtp_timeout: std::time::Duration::from_secs(1),
            concurrency: 3,
            catch_all_prefix: PREFIX.into(),
            politeness: PolitenessConfig::none(),
        }
    }

    fn result(name: &str, website: Option<&str>, candidates: &[(&str, CandidateSource)]) -> ExtractionResult {
        ExtractionResult {
            business: BusinessRecord {
                name: name.into(),
                address: format!("{name} street"),
                phone: None,
                website: website.map(String::from),
                rating: None,
                review_count: None,
            },
            candidates: candidates
                .iter()
                .map(|(address, source)| EmailCandidate {
                    address: address.to_string(),
                    source: *source,
                    confidence: Confidence::High,
                })
                .collect(),
        }
    }

    fn rejected() -> ProbeOutcome {
        ProbeOutcome::Rejected("550 no such user".into())
    }

    #[tokio::test]
    async fn accepted_candidate_is_verified() {
        let prober = Arc::new(FakeProber::new(rejected()).with("owner@joesplumbing.com", ProbeOutcome::Accepted));
        let verifier = Verifier::new(prober.clone(), settings());

        let leads = verifier
            .verify_all(&[result(
                "Joe's",
                Some("https://joesplumbing.com"),
                &[("owner@joesplumbing.com", CandidateSource::MailtoLink)],
            )])
            .await;

        assert_eq!(leads[0].verification_status, VerificationStatus::Verified);
        assert_eq!(leads[0].email.as_deref(), Some("owner@joesplumbing.com"));
        assert_eq!(leads[0].email_source, Some(CandidateSource::MailtoLink));
        // Candidate plus one catch-all probe.
        assert_eq!(prober.probes().len(), 2);
    }

    #[tokio::test]
    async fn catch_all_domain_is_never_verified_and_probed_once() {
        let prober = Arc::new(FakeProber::new(rejected()).catch_all("acmeroofing.net"));
        let verifier = Verifier::new(prober.clone(), VerificationSettings {
            concurrency: 1,
            ..settings()
        });

        let leads = verifier
            .verify_all(&[
                result("A", Some("acmeroofing.net"), &[("sales@acmeroofing.net", CandidateSource::PageScan)]),
                result("B", Some("acmeroofing.net"), &[("jobs@acmeroofing.net", CandidateSource::MailtoLink)]),
                result("C", Some("https://www.acmeroofing.net"), &[]),
            ])
            .await;

        for lead in &leads {
            assert_eq!(lead.verification_status, VerificationStatus::CatchAll);
        }
        assert_eq!(leads[2].email.as_deref(), Some("info@acmeroofing.net"));

        let catch_all_probes = prober
            .probes()
            .iter()
            .filter(|a| a.starts_with(PREFIX))
            .count();
        assert_eq!(catch_all_probes, 1);
    }

    #[tokio::test]
    async fn unreachable_catch_all_check_is_unverified_and_not_memoized() {
        let prober = Arc::new(FakeProber::new(ProbeOutcome::Accepted).catch_all_unreachable("flakymail.com"));
        let verifier = Verifier::new(prober.clone(), VerificationSettings {
            concurrency: 1,
            ..settings()
        });

        let leads = verifier
            .verify_all(&[
                result("A", Some("flakymail.com"), &[("sales@flakymail.com", CandidateSource::PageScan)]),
                result("B", Some("flakymail.com"), &[("jobs@flakymail.com", CandidateSource::MailtoLink)]),
            ])
            .await;

        for lead in &leads {
            assert_eq!(lead.verification_status, VerificationStatus::Unverified);
            assert!(lead.email.is_some());
        }
        // The failed check is retried for the second lead instead of cached.
        let catch_all_probes = prober
            .probes()
            .iter()
            .filter(|a| a.starts_with(PREFIX))
            .count();
        assert_eq!(catch_all_probes, 2);
    }

    #[tokio::test]
    async fn inconclusive_candidate_is_unverified() {
        let prober = Arc::new(FakeProber::new(rejected()).with(
            "hi@bakery.com",
            ProbeOutcome::Inconclusive("252 cannot verify".into()),
        ));
        let verifier = Verifier::new(prober, settings());

        let leads = verifier
            .verify_all(&[result("Bakery", Some("bakery.com"), &[("hi@bakery.com", CandidateSource::PageScan)])])
            .await;

        assert_eq!(leads[0].verification_status, VerificationStatus::Unverified);
        assert_eq!(leads[0].email.as_deref(), Some("hi@bakery.com"));
    }

    #[tokio::test]
    async fn best_candidate_is_probed_first() {
        let prober = Arc::new(FakeProber::new(ProbeOutcome::Accepted));
        let verifier = Verifier::new(prober.clone(), settings());

        verifier
            .verify_all(&[result(
                "Deli",
                Some("bestdeli.com"),
                &[
                    ("jobs@bestdeli.com", CandidateSource::PageScan),
                    ("orders@bestdeli.com", CandidateSource::MailtoLink),
                ],
            )])
            .await;

        assert_eq!(prober.probes()[0], "orders@bestdeli.com");
    }

    #[tokio::test]
    async fn rejected_candidate_falls_back_to_guesses() {
        let prober = Arc::new(FakeProber::new(rejected()).with("hello@greenclinic.org", ProbeOutcome::Accepted));
        let verifier = Verifier::new(prober.clone(), settings());

        let leads = verifier
            .verify_all(&[result(
                "Clinic",
                Some("http://www.greenclinic.org/home"),
                &[("old@greenclinic.org", CandidateSource::PageScan)],
            )])
            .await;

        assert_eq!(leads[0].verification_status, VerificationStatus::Verified);
        assert_eq!(leads[0].email.as_deref(), Some("hello@greenclinic.org"));
        assert_eq!(leads[0].email_source, Some(CandidateSource::PatternGuess));
        let probes = prober.probes();
        assert_eq!(
            &probes[..4],
            [
                "old@greenclinic.org",
                "info@greenclinic.org",
                "contact@greenclinic.org",
                "hello@greenclinic.org",
            ]
        );
        assert!(!probes.iter().any(|a| a == "sales@greenclinic.org"));
    }

    #[tokio::test]
    async fn every_guess_rejected_is_no_email() {
        let prober = Arc::new(FakeProber::new(rejected()));
        let verifier = Verifier::new(prober.clone(), settings());

        let leads = verifier.verify_all(&[result("Quiet", Some("quietshop.com"), &[])]).await;

        assert_eq!(leads[0].verification_status, VerificationStatus::NoEmail);
        assert!(leads[0].email.is_none());
        assert_eq!(prober.probes().len(), 4);
    }

    #[tokio::test]
    async fn no_website_and_no_candidate_never_probes() {
        let prober = Arc::new(FakeProber::new(ProbeOutcome::Accepted));
        let verifier = Verifier::new(prober.clone(), settings());

        let leads = verifier.verify_all(&[result("Cash Only", None, &[])]).await;

        assert_eq!(leads[0].verification_status, VerificationStatus::NoEmail);
        assert!(prober.probes().is_empty());
    }

    #[tokio::test]
    async fn smtp_outage_degrades_to_unverified() {
        let prober = Arc::new(FakeProber::new(ProbeOutcome::Unreachable("timed out".into())));
        let verifier = Verifier::new(prober.clone(), settings());

        let leads = verifier
            .verify_all(&[
                result("A", Some("a-plumbing.com"), &[("office@a-plumbing.com", CandidateSource::MailtoLink)]),
                result("B", Some("b-plumbing.com"), &[]),
                result("C", None, &[]),
            ])
            .await;

        assert_eq!(leads.len(), 3);
        assert_eq!(leads[0].verification_status, VerificationStatus::Unverified);
        assert_eq!(leads[0].email.as_deref(), Some("office@a-plumbing.com"));
        assert_eq!(leads[1].verification_status, VerificationStatus::Unverified);
        assert_eq!(leads[1].email.as_deref(), Some("info@b-plumbing.com"));
        assert_eq!(leads[2].verification_status, VerificationStatus::NoEmail);
        // One probe per lead that has somewhere to probe.
        assert_eq!(prober.probes().len(), 2);
    }

    #[tokio::test]
    async fn order_matches_input() {
        let prober = Arc::new(FakeProber::new(rejected()));
        let verifier = Verifier::new(prober, settings());

        let input: Vec<ExtractionResult> = (0..12)
            .map(|i| {
                let site = format!("shop{i}.com");
                result(&format!("Shop {i}"), Some(&site), &[])
            })
            .collect();
        let leads = verifier.verify_all(&input).await;

        let names: Vec<String> = leads.iter().map(|l| l.business.name.clone()).collect();
        let expected: Vec<String> = (0..12).map(|i| format!("Shop {i}")).collect();
        assert_eq!(names, expected);
    }
}
