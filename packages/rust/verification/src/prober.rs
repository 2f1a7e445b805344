//! SMTP mailbox probing: MX lookup, then a `RCPT TO` handshake without sending mail.

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use lettre::Address;
use lettre::transport::smtp::client::SmtpConnection;
use lettre::transport::smtp::commands::{Mail, Rcpt};
use lettre::transport::smtp::extension::ClientId;
use tokio::sync::Mutex;
use tracing::{debug, warn};
use trust_dns_resolver::TokioAsyncResolver;
use trust_dns_resolver::config::{ResolverConfig, ResolverOpts};
use trust_dns_resolver::error::ResolveErrorKind;

use leadgen_fetcher::{RateLimitedFetcher, is_connection_refused};
use leadgen_shared::{PolitenessConfig, VerificationSettings};

/// Result of probing one mailbox.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeOutcome {
    /// Server explicitly accepted the recipient.
    Accepted,
    /// Server permanently rejected the recipient, or the domain takes no mail.
    Rejected(String),
    /// Server answered but would not confirm this mailbox (252, 4xx).
    Inconclusive(String),
    /// The check itself could not run (DNS, connection, sender refused, blocked).
    Unreachable(String),
}

impl ProbeOutcome {
    pub fn is_accepted(&self) -> bool {
        matches!(self, Self::Accepted)
    }
}

/// Mailbox existence check.
#[async_trait]
pub trait MailboxProber: Send + Sync {
    async fn probe(&self, address: &str) -> ProbeOutcome;
}

// ---------------------------------------------------------------------------
// SmtpProber
// ---------------------------------------------------------------------------

/// Connection parameters for one blocking SMTP check.
#[derive(Debug, Clone)]
pub struct SmtpParams {
    pub host: String,
    pub port: u16,
    pub timeout: Duration,
    pub helo_name: String,
    pub sender: String,
}

/// Server-level failure from [`rcpt_check`].
#[derive(Debug, Clone)]
pub struct SmtpFailure {
    pub message: String,
    pub refused: bool,
}

pub struct SmtpProber {
    resolver: TokioAsyncResolver,
    fetcher: Arc<RateLimitedFetcher>,
    settings: VerificationSettings,
    /// Domain → lowest-preference exchanger (`None`: no MX records).
    mx_cache: Mutex<HashMap<String, Option<String>>>,
}

impl SmtpProber {
    pub fn new(fetcher: Arc<RateLimitedFetcher>, settings: VerificationSettings) -> Self {
        let mut opts = ResolverOpts::default();
        opts.timeout = settings.smtp_timeout;
        let resolver = TokioAsyncResolver::tokio(ResolverConfig::default(), opts);

        Self {
            resolver,
            fetcher,
            settings,
            mx_cache: Mutex::new(HashMap::new()),
        }
    }

    fn politeness(&self) -> &PolitenessConfig {
        &self.settings.politeness
    }

    /// Lowest-preference MX host for `domain`, cached.
    async fn mail_exchanger(&self, domain: &str) -> Result<Option<String>, String> {
        if let Some(cached) = self.mx_cache.lock().await.get(domain) {
            return Ok(cached.clone());
        }

        let exchanger = match self.resolver.mx_lookup(domain).await {
            Ok(lookup) => lookup
                .iter()
                .min_by_key(|mx| mx.preference())
                .map(|mx| mx.exchange().to_utf8().trim_end_matches('.').to_string())
                .filter(|host| !host.is_empty()),
            Err(e) => match e.kind() {
                ResolveErrorKind::NoRecordsFound { .. } => None,
                _ => return Err(format!("MX lookup failed for {domain}: {e}")),
            },
        };

        self.mx_cache
            .lock()
            .await
            .insert(domain.to_string(), exchanger.clone());
        Ok(exchanger)
    }
}

#[async_trait]
impl MailboxProber for SmtpProber {
    async fn probe(&self, address: &str) -> ProbeOutcome {
        let Some((_, domain)) = address.rsplit_once('@') else {
            return ProbeOutcome::Rejected(format!("not an address: {address}"));
        };
        let domain = domain.to_ascii_lowercase();

        let host = match self.mail_exchanger(&domain).await {
            Ok(Some(host)) => host,
            Ok(None) => return ProbeOutcome::Rejected(format!("{domain} has no MX records")),
            Err(message) => return ProbeOutcome::Unreachable(message),
        };

        let target = format!("smtp:{host}");
        if let Err(e) = self.fetcher.pace(&target, self.politeness()).await {
            return ProbeOutcome::Unreachable(e.to_string());
        }

        let params = SmtpParams {
            host: host.clone(),
            port: self.settings.smtp_port,
            timeout: self.settings.smtp_timeout,
            helo_name: self.settings.helo_name.clone(),
            sender: self.settings.sender.clone(),
        };
        let recipient = address.to_string();
        let joined = tokio::task::spawn_blocking(move || rcpt_check(&params, &recipient)).await;

        let outcome = match joined {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(failure)) => {
                if failure.refused {
                    self.fetcher.mark_blocked(&target).await;
                }
                ProbeOutcome::Unreachable(failure.message)
            }
            Err(e) => ProbeOutcome::Unreachable(format!("probe task failed: {e}")),
        };

        debug!(address, mx = %host, ?outcome, "mailbox probed");
        outcome
    }
}

/// Blocking `MAIL FROM` / `RCPT TO` exchange with one server.
///
/// 250 accepts, 252 and transient 4xx are inconclusive, permanent 5xx rejects.
pub fn rcpt_check(params: &SmtpParams, address: &str) -> Result<ProbeOutcome, SmtpFailure> {
    let recipient = match Address::from_str(address) {
        Ok(addr) => addr,
        Err(e) => return Ok(ProbeOutcome::Rejected(format!("invalid address: {e}"))),
    };
    let sender = Address::from_str(&params.sender).map_err(|e| SmtpFailure {
        message: format!("invalid sender {}: {e}", params.sender),
        refused: false,
    })?;

    let helo = ClientId::Domain(params.helo_name.clone());
    let mut conn = SmtpConnection::connect(
        (params.host.as_str(), params.port),
        Some(params.timeout),
        &helo,
        None,
        None,
    )
    .map_err(|e| SmtpFailure {
        refused: is_connection_refused(&e),
        message: format!("connect to {}:{} failed: {e}", params.host, params.port),
    })?;

    if let Err(e) = conn.command(Mail::new(Some(sender), vec![])) {
        conn.quit().ok();
        return Err(SmtpFailure {
            message: format!("MAIL FROM refused by {}: {e}", params.host),
            refused: false,
        });
    }

    let outcome = match conn.command(Rcpt::new(recipient, vec![])) {
        Ok(response) if response.code().to_string() == "252" => {
            ProbeOutcome::Inconclusive("252 cannot verify mailbox".into())
        }
        Ok(response) if response.is_positive() => ProbeOutcome::Accepted,
        Ok(response) => ProbeOutcome::Inconclusive(format!("unexpected reply {}", response.code())),
        Err(e) if e.is_permanent() => ProbeOutcome::Rejected(e.to_string()),
        Err(e) if e.is_transient() => ProbeOutcome::Inconclusive(e.to_string()),
        Err(e) => {
            warn!(host = %params.host, error = %e, "RCPT TO failed");
            conn.quit().ok();
            return Err(SmtpFailure {
                refused: false,
                message: format!("RCPT TO failed on {}: {e}", params.host),
            });
        }
    };

    conn.quit().ok();
    Ok(outcome)
}
