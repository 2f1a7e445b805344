//! Politeness-aware HTTP fetcher shared by every stage.
//!
//! Each outbound call is paced against a per-target slot: the first call to a
//! target goes out immediately, every later one waits a jittered delay after
//! the previous reservation. Reservations are taken under one lock so
//! concurrent workers can never burst a target. A block signal (HTTP 429,
//! anti-automation challenge page, refused connection) suspends the target for
//! the configured cooldown and is reported as [`FetchErrorKind::Blocked`].

use std::collections::HashMap;
use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use rand::Rng;
use reqwest::redirect::Policy;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, warn};
use url::Url;

use leadgen_shared::{
    FetchError, FetchErrorKind, FetcherSettings, LeadGenError, PolitenessConfig, Result,
};

use crate::guard::{is_ssrf_target, target_key};

/// Result of a single outbound call.
pub type FetchResult<T> = std::result::Result<T, FetchError>;

/// Substrings that identify an anti-automation interstitial.
const CHALLENGE_MARKERS: &[&str] = &[
    "unusual traffic from your computer",
    "/cdn-cgi/challenge-platform",
    "cf-chl-",
    "captcha-delivery.com",
    "g-recaptcha\" data-callback=\"onblocked",
];

/// Redirect hops followed before giving up.
const MAX_REDIRECTS: usize = 5;

#[derive(Debug, Default)]
struct TargetState {
    /// Earliest instant the next call may start.
    next_slot: Option<Instant>,
    /// Calls are refused until this instant.
    blocked_until: Option<Instant>,
}

// ---------------------------------------------------------------------------
// RateLimitedFetcher
// ---------------------------------------------------------------------------

pub struct RateLimitedFetcher {
    client: Client,
    settings: FetcherSettings,
    targets: Mutex<HashMap<String, TargetState>>,
    /// Allow localhost/private IPs (for integration tests with mock servers).
    /// Shared with the client's redirect policy.
    allow_private: Arc<AtomicBool>,
}

impl RateLimitedFetcher {
    pub fn new(settings: FetcherSettings) -> Result<Self> {
        let allow_private = Arc::new(AtomicBool::new(false));
        let client = Client::builder()
            .user_agent(settings.user_agent.clone())
            .redirect(redirect_policy(Arc::clone(&allow_private)))
            .timeout(settings.request_timeout)
            .build()
            .map_err(|e| LeadGenError::config(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            settings,
            targets: Mutex::new(HashMap::new()),
            allow_private,
        })
    }

    /// Allow fetching localhost/private IPs (for integration tests).
    pub fn allow_private_targets(self) -> Self {
        self.allow_private.store(true, Ordering::Relaxed);
        self
    }

    /// Underlying client, for building provider/destination requests.
    ///
    /// Redirects it follows are held to the same target rules as
    /// [`check_target`](Self::check_target).
    pub fn client(&self) -> &Client {
        &self.client
    }

    /// Refuse non-HTTP schemes and private addresses before any I/O.
    pub fn check_target(&self, url: &Url) -> FetchResult<()> {
        if !self.allow_private.load(Ordering::Relaxed) && is_ssrf_target(url) {
            return Err(FetchError::new(
                FetchErrorKind::InvalidTarget,
                target_key(url),
                format!("refusing to fetch {url}"),
            ));
        }
        Ok(())
    }

    /// Wait for this target's next politeness slot.
    ///
    /// Fails fast with `Blocked` while the target is cooling down.
    pub async fn pace(&self, target: &str, politeness: &PolitenessConfig) -> FetchResult<()> {
        let wait = {
            let mut targets = self.targets.lock().await;
            let state = targets.entry(target.to_string()).or_default();
            let now = Instant::now();

            if let Some(until) = state.blocked_until {
                if until > now {
                    let remaining = until.saturating_duration_since(now).as_secs();
                    return Err(FetchError::blocked(
                        target,
                        format!("cooling down for another {remaining}s"),
                    ));
                }
                state.blocked_until = None;
            }

            let slot = match state.next_slot {
                Some(next) if next > now => next,
                _ => now,
            };
            state.next_slot = Some(slot + jitter(politeness));
            slot.saturating_duration_since(now)
        };

        if !wait.is_zero() {
            debug!(target, wait_ms = wait.as_millis() as u64, "politeness delay");
            tokio::time::sleep(wait).await;
        }
        Ok(())
    }

    /// Suspend further calls to `target` for the cooldown window.
    pub async fn mark_blocked(&self, target: &str) {
        let mut targets = self.targets.lock().await;
        let state = targets.entry(target.to_string()).or_default();
        state.blocked_until = Some(Instant::now() + self.settings.cooldown);
        warn!(
            target,
            cooldown_secs = self.settings.cooldown.as_secs(),
            "target signalled a block, suspending calls"
        );
    }

    #[cfg(test)]
    async fn is_blocked(&self, target: &str) -> bool {
        let targets = self.targets.lock().await;
        targets
            .get(target)
            .and_then(|s| s.blocked_until)
            .is_some_and(|until| until > Instant::now())
    }

    /// Pace, send, and classify transport failures and throttling.
    ///
    /// Any status other than 429 is returned to the caller untouched.
    pub async fn send(
        &self,
        target: &str,
        request: RequestBuilder,
        politeness: &PolitenessConfig,
    ) -> FetchResult<Response> {
        self.pace(target, politeness).await?;

        let response = match request.send().await {
            Ok(response) => response,
            Err(e) => return Err(self.classify_transport(target, &e).await),
        };

        if response.status() == StatusCode::TOO_MANY_REQUESTS {
            self.mark_blocked(target).await;
            return Err(FetchError::blocked(target, "HTTP 429"));
        }

        Ok(response)
    }

    /// GET a page and return its (size-capped) body as text.
    pub async fn fetch_text(&self, url: &Url, politeness: &PolitenessConfig) -> FetchResult<String> {
        self.check_target(url)?;
        let target = target_key(url);

        let response = self
            .send(&target, self.client.get(url.as_str()), politeness)
            .await?;
        let status = response.status();

        if !status.is_success()
            && status != StatusCode::FORBIDDEN
            && status != StatusCode::SERVICE_UNAVAILABLE
        {
            return Err(FetchError::new(
                FetchErrorKind::Status(status.as_u16()),
                &target,
                format!("{url}: HTTP {status}"),
            ));
        }

        let bytes = self.read_capped(&target, response).await?;
        let body = String::from_utf8_lossy(&bytes).into_owned();

        if is_challenge_page(&body) {
            self.mark_blocked(&target).await;
            return Err(FetchError::blocked(
                &target,
                format!("{url}: anti-automation challenge"),
            ));
        }

        if !status.is_success() {
            return Err(FetchError::new(
                FetchErrorKind::Status(status.as_u16()),
                &target,
                format!("{url}: HTTP {status}"),
            ));
        }

        Ok(body)
    }

    /// Read the body chunk by chunk, stopping once `max_body_bytes` is reached.
    async fn read_capped(&self, target: &str, mut response: Response) -> FetchResult<Vec<u8>> {
        let cap = self.settings.max_body_bytes;
        let mut body = Vec::with_capacity(cap.min(64 * 1024));

        loop {
            let chunk = match response.chunk().await {
                Ok(Some(chunk)) => chunk,
                Ok(None) => break,
                Err(e) => return Err(self.classify_transport(target, &e).await),
            };
            let room = cap - body.len();
            if chunk.len() >= room {
                body.extend_from_slice(&chunk[..room]);
                debug!(target, cap, "body truncated at size cap");
                break;
            }
            body.extend_from_slice(&chunk);
        }
        Ok(body)
    }

    async fn classify_transport(&self, target: &str, err: &reqwest::Error) -> FetchError {
        if err.is_redirect() {
            // The policy's reason lives in the source, not the top-level message.
            let message = match std::error::Error::source(err) {
                Some(reason) => format!("{err}: {reason}"),
                None => err.to_string(),
            };
            return FetchError::new(FetchErrorKind::InvalidTarget, target, message);
        }
        if err.is_timeout() {
            return FetchError::new(FetchErrorKind::Timeout, target, err.to_string());
        }
        if is_connection_refused(err) {
            self.mark_blocked(target).await;
            return FetchError::blocked(target, "connection refused");
        }
        FetchError::new(FetchErrorKind::Network, target, err.to_string())
    }
}

/// Follow at most [`MAX_REDIRECTS`] hops, never onto a refused target.
fn redirect_policy(allow_private: Arc<AtomicBool>) -> Policy {
    Policy::custom(move |attempt| {
        if attempt.previous().len() >= MAX_REDIRECTS {
            return attempt.error("too many redirects");
        }
        if !allow_private.load(Ordering::Relaxed) && is_ssrf_target(attempt.url()) {
            let refused = format!("refusing redirect to {}", attempt.url());
            return attempt.error(refused);
        }
        attempt.follow()
    })
}

/// Random delay within the politeness range.
fn jitter(politeness: &PolitenessConfig) -> Duration {
    let lo = politeness.min_delay.as_millis() as u64;
    let hi = politeness.max_delay.as_millis() as u64;
    if hi <= lo {
        return Duration::from_millis(lo);
    }
    Duration::from_millis(rand::thread_rng().gen_range(lo..=hi))
}

fn is_challenge_page(body: &str) -> bool {
    let lower = body.to_ascii_lowercase();
    CHALLENGE_MARKERS.iter().any(|m| lower.contains(m))
}

/// Walk the error chain looking for a refused TCP connection.
pub fn is_connection_refused(err: &(dyn std::error::Error + 'static)) -> bool {
    let mut current = Some(err);
    while let Some(e) = current {
        if let Some(io_err) = e.downcast_ref::<io::Error>() {
            if io_err.kind() == io::ErrorKind::ConnectionRefused {
                return true;
            }
        }
        current = e.source();
    }
    false
}
