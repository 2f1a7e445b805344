//! Application configuration for the lead-generation service.
//!
//! User config lives at `~/.leadgen/leadgen.toml`.
//! CLI flags override config file values, which override defaults.
//! Credentials are never stored in the file; it names the environment
//! variables that hold them.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{LeadGenError, Result};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "leadgen.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".leadgen";

// ---------------------------------------------------------------------------
// Config structs (matching leadgen.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub defaults: DefaultsConfig,

    #[serde(default)]
    pub fetcher: FetcherConfig,

    #[serde(default)]
    pub discovery: DiscoveryConfig,

    #[serde(default)]
    pub extraction: ExtractionConfig,

    #[serde(default)]
    pub verification: VerificationConfig,

    #[serde(default)]
    pub delivery: DeliveryConfig,

    #[serde(default)]
    pub server: ServerConfig,
}

/// `[defaults]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DefaultsConfig {
    /// Lead limit applied when a submission omits one.
    #[serde(default = "default_limit")]
    pub limit: u32,

    /// libSQL database file holding jobs and stage output.
    #[serde(default = "default_database_path")]
    pub database_path: String,

    /// Overall deadline for one job, all stages included.
    #[serde(default = "default_job_timeout_secs")]
    pub job_timeout_secs: u64,
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            limit: default_limit(),
            database_path: default_database_path(),
            job_timeout_secs: default_job_timeout_secs(),
        }
    }
}

fn default_limit() -> u32 {
    crate::types::DEFAULT_LEAD_LIMIT
}
fn default_database_path() -> String {
    "var/leadgen.db".into()
}
fn default_job_timeout_secs() -> u64 {
    1800
}

/// `[fetcher]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetcherConfig {
    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// How long a target stays suspended after a block signal.
    #[serde(default = "default_cooldown_secs")]
    pub cooldown_secs: u64,

    /// Response bodies larger than this are truncated.
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
}

impl Default for FetcherConfig {
    fn default() -> Self {
        Self {
            user_agent: default_user_agent(),
            request_timeout_secs: default_request_timeout_secs(),
            cooldown_secs: default_cooldown_secs(),
            max_body_bytes: default_max_body_bytes(),
        }
    }
}

fn default_user_agent() -> String {
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0 Safari/537.36".into()
}
fn default_request_timeout_secs() -> u64 {
    10
}
fn default_cooldown_secs() -> u64 {
    30 * 60
}
fn default_max_body_bytes() -> usize {
    2 * 1024 * 1024
}

/// Which map-search provider backs the discovery stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiscoveryProviderKind {
    /// Apify Google Maps scraper actor.
    Apify,
    /// Google Places Text Search (v1).
    Places,
}

/// `[discovery]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveryConfig {
    #[serde(default = "default_provider")]
    pub provider: DiscoveryProviderKind,

    /// Name of the env var holding the provider API key.
    #[serde(default = "default_discovery_key_env")]
    pub api_key_env: String,

    /// Apify actor used when `provider = "apify"`.
    #[serde(default = "default_actor_id")]
    pub actor_id: String,

    #[serde(default = "default_page_size")]
    pub page_size: u32,

    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,

    /// Initial backoff; doubled after every failed attempt.
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,

    #[serde(default = "default_discovery_min_delay_ms")]
    pub min_delay_ms: u64,

    #[serde(default = "default_discovery_max_delay_ms")]
    pub max_delay_ms: u64,

    /// Override the provider endpoint (tests, proxies).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            api_key_env: default_discovery_key_env(),
            actor_id: default_actor_id(),
            page_size: default_page_size(),
            retry_attempts: default_retry_attempts(),
            retry_backoff_ms: default_retry_backoff_ms(),
            min_delay_ms: default_discovery_min_delay_ms(),
            max_delay_ms: default_discovery_max_delay_ms(),
            base_url: None,
        }
    }
}

fn default_provider() -> DiscoveryProviderKind {
    DiscoveryProviderKind::Apify
}
fn default_discovery_key_env() -> String {
    "APIFY_API_TOKEN".into()
}
fn default_actor_id() -> String {
    "compass/crawler-google-places".into()
}
fn default_page_size() -> u32 {
    20
}
fn default_retry_attempts() -> u32 {
    3
}
fn default_retry_backoff_ms() -> u64 {
    2000
}
fn default_discovery_min_delay_ms() -> u64 {
    5000
}
fn default_discovery_max_delay_ms() -> u64 {
    15000
}

/// `[extraction]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionConfig {
    /// Sub-pages tried, in order, after the homepage.
    #[serde(default = "default_contact_paths")]
    pub contact_paths: Vec<String>,

    /// Pages visited per site, homepage included.
    #[serde(default = "default_max_pages")]
    pub max_pages: usize,

    /// Total crawl time allowed per site.
    #[serde(default = "default_site_timeout_secs")]
    pub site_timeout_secs: u64,

    #[serde(default = "default_extraction_concurrency")]
    pub concurrency: usize,

    #[serde(default = "default_extraction_min_delay_ms")]
    pub min_delay_ms: u64,

    #[serde(default = "default_extraction_max_delay_ms")]
    pub max_delay_ms: u64,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            contact_paths: default_contact_paths(),
            max_pages: default_max_pages(),
            site_timeout_secs: default_site_timeout_secs(),
            concurrency: default_extraction_concurrency(),
            min_delay_ms: default_extraction_min_delay_ms(),
            max_delay_ms: default_extraction_max_delay_ms(),
        }
    }
}

fn default_contact_paths() -> Vec<String> {
    vec!["/contact".into(), "/about".into(), "/team".into()]
}
fn default_max_pages() -> usize {
    4
}
fn default_site_timeout_secs() -> u64 {
    30
}
fn default_extraction_concurrency() -> usize {
    5
}
fn default_extraction_min_delay_ms() -> u64 {
    500
}
fn default_extraction_max_delay_ms() -> u64 {
    1500
}

/// `[verification]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationConfig {
    /// Local parts guessed against the website domain, in order.
    #[serde(default = "default_local_parts")]
    pub local_parts: Vec<String>,

    /// Envelope sender used for `MAIL FROM`.
    #[serde(default = "default_sender")]
    pub sender: String,

    /// Name announced in the SMTP greeting.
    #[serde(default = "default_helo_name")]
    pub helo_name: String,

    #[serde(default = "default_smtp_port")]
    pub smtp_port: u16,

    #[serde(default = "default_smtp_timeout_secs")]
    pub smtp_timeout_secs: u64,

    #[serde(default = "default_verification_concurrency")]
    pub concurrency: usize,

    /// Prefix of the random local part used to detect catch-all domains.
    #[serde(default = "default_catch_all_prefix")]
    pub catch_all_prefix: String,

    #[serde(default = "default_verification_min_delay_ms")]
    pub min_delay_ms: u64,

    #[serde(default = "default_verification_max_delay_ms")]
    pub max_delay_ms: u64,
}

impl Default for VerificationConfig {
    fn default() -> Self {
        Self {
            local_parts: default_local_parts(),
            sender: default_sender(),
            helo_name: default_helo_name(),
            smtp_port: default_smtp_port(),
            smtp_timeout_secs: default_smtp_timeout_secs(),
            concurrency: default_verification_concurrency(),
            catch_all_prefix: default_catch_all_prefix(),
            min_delay_ms: default_verification_min_delay_ms(),
            max_delay_ms: default_verification_max_delay_ms(),
        }
    }
}

fn default_local_parts() -> Vec<String> {
    vec![
        "info".into(),
        "contact".into(),
        "hello".into(),
        "sales".into(),
    ]
}
fn default_sender() -> String {
    "verify@check.local".into()
}
fn default_helo_name() -> String {
    "check.local".into()
}
fn default_smtp_port() -> u16 {
    25
}
fn default_smtp_timeout_secs() -> u64 {
    10
}
fn default_verification_concurrency() -> usize {
    3
}
fn default_catch_all_prefix() -> String {
    "zz-no-such-mailbox".into()
}
fn default_verification_min_delay_ms() -> u64 {
    1000
}
fn default_verification_max_delay_ms() -> u64 {
    3000
}

/// Where delivered leads are written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DestinationKind {
    /// Google Sheets `values:append`.
    Sheets,
    /// JSON file under `output_dir`.
    File,
}

/// `[delivery]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryConfig {
    #[serde(default = "default_destination")]
    pub destination: DestinationKind,

    /// Target spreadsheet when `destination = "sheets"`.
    #[serde(default)]
    pub spreadsheet_id: String,

    #[serde(default = "default_worksheet")]
    pub worksheet: String,

    /// Name of the env var holding the Sheets OAuth access token.
    #[serde(default = "default_token_env")]
    pub token_env: String,

    /// Directory for the file destination.
    #[serde(default = "default_output_dir")]
    pub output_dir: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            destination: default_destination(),
            spreadsheet_id: String::new(),
            worksheet: default_worksheet(),
            token_env: default_token_env(),
            output_dir: default_output_dir(),
            base_url: None,
        }
    }
}

fn default_destination() -> DestinationKind {
    DestinationKind::Sheets
}
fn default_worksheet() -> String {
    "Sheet1".into()
}
fn default_token_env() -> String {
    "GOOGLE_SHEETS_TOKEN".into()
}
fn default_output_dir() -> String {
    "var/leads".into()
}

/// `[server]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:8080".into()
}

// ---------------------------------------------------------------------------
// Runtime settings (merged from config + CLI flags)
// ---------------------------------------------------------------------------

/// Randomized pause inserted before each call to the same target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PolitenessConfig {
    pub min_delay: Duration,
    pub max_delay: Duration,
}

impl PolitenessConfig {
    pub fn from_millis(min_ms: u64, max_ms: u64) -> Self {
        let (lo, hi) = if min_ms <= max_ms {
            (min_ms, max_ms)
        } else {
            (max_ms, min_ms)
        };
        Self {
            min_delay: Duration::from_millis(lo),
            max_delay: Duration::from_millis(hi),
        }
    }

    /// No delay at all. Used by tests.
    pub fn none() -> Self {
        Self::from_millis(0, 0)
    }
}

/// Runtime fetcher configuration.
#[derive(Debug, Clone)]
pub struct FetcherSettings {
    pub user_agent: String,
    pub request_timeout: Duration,
    pub cooldown: Duration,
    pub max_body_bytes: usize,
}

impl From<&AppConfig> for FetcherSettings {
    fn from(config: &AppConfig) -> Self {
        Self {
            user_agent: config.fetcher.user_agent.clone(),
            request_timeout: Duration::from_secs(config.fetcher.request_timeout_secs),
            cooldown: Duration::from_secs(config.fetcher.cooldown_secs),
            max_body_bytes: config.fetcher.max_body_bytes,
        }
    }
}

/// Runtime discovery configuration.
#[derive(Debug, Clone)]
pub struct DiscoverySettings {
    pub page_size: u32,
    pub retry_attempts: u32,
    pub retry_backoff: Duration,
    pub politeness: PolitenessConfig,
}

impl From<&AppConfig> for DiscoverySettings {
    fn from(config: &AppConfig) -> Self {
        let d = &config.discovery;
        Self {
            page_size: d.page_size.max(1),
            retry_attempts: d.retry_attempts.max(1),
            retry_backoff: Duration::from_millis(d.retry_backoff_ms),
            politeness: PolitenessConfig::from_millis(d.min_delay_ms, d.max_delay_ms),
        }
    }
}

/// Runtime extraction configuration.
#[derive(Debug, Clone)]
pub struct ExtractionSettings {
    pub contact_paths: Vec<String>,
    pub max_pages: usize,
    pub site_timeout: Duration,
    pub concurrency: usize,
    pub politeness: PolitenessConfig,
}

impl From<&AppConfig> for ExtractionSettings {
    fn from(config: &AppConfig) -> Self {
        let e = &config.extraction;
        Self {
            contact_paths: e.contact_paths.clone(),
            max_pages: e.max_pages.max(1),
            site_timeout: Duration::from_secs(e.site_timeout_secs),
            concurrency: e.concurrency.max(1),
            politeness: PolitenessConfig::from_millis(e.min_delay_ms, e.max_delay_ms),
        }
    }
}

/// Runtime verification configuration.
#[derive(Debug, Clone)]
pub struct VerificationSettings {
    pub local_parts: Vec<String>,
    pub sender: String,
    pub helo_name: String,
    pub smtp_port: u16,
    pub smtp_timeout: Duration,
    pub concurrency: usize,
    pub catch_all_prefix: String,
    pub politeness: PolitenessConfig,
}

impl From<&AppConfig> for VerificationSettings {
    fn from(config: &AppConfig) -> Self {
        let v = &config.verification;
        Self {
            local_parts: v.local_parts.clone(),
            sender: v.sender.clone(),
            helo_name: v.helo_name.clone(),
            smtp_port: v.smtp_port,
            smtp_timeout: Duration::from_secs(v.smtp_timeout_secs),
            concurrency: v.concurrency.max(1),
            catch_all_prefix: v.catch_all_prefix.clone(),
            politeness: PolitenessConfig::from_millis(v.min_delay_ms, v.max_delay_ms),
        }
    }
}

/// Delivery stage settings. Credentials are resolved separately.
#[derive(Debug, Clone)]
pub struct DeliverySettings {
    pub destination: DestinationKind,
    pub spreadsheet_id: String,
    pub worksheet: String,
    pub output_dir: PathBuf,
    pub base_url: Option<String>,
}

impl From<&AppConfig> for DeliverySettings {
    fn from(config: &AppConfig) -> Self {
        let d = &config.delivery;
        Self {
            destination: d.destination,
            spreadsheet_id: d.spreadsheet_id.trim().to_string(),
            worksheet: d.worksheet.clone(),
            output_dir: PathBuf::from(&d.output_dir),
            base_url: d.base_url.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.leadgen/`).
pub fn config_dir() -> Result<PathBuf> {
    let home =
        dirs::home_dir().ok_or_else(|| LeadGenError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.leadgen/leadgen.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the application config from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| LeadGenError::io(path, e))?;

    toml::from_str(&content)
        .map_err(|e| LeadGenError::config(format!("failed to parse {}: {e}", path.display())))
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| LeadGenError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| LeadGenError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| LeadGenError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}

/// Secrets the configured adapters need, resolved once at startup.
///
/// Deliberately not `Debug`.
#[derive(Clone)]
pub struct Credentials {
    pub discovery_key: String,
    /// Present only when delivering to Sheets.
    pub sheets_token: Option<String>,
}

impl Credentials {
    /// Read every credential from the environment variables named by the config.
    pub fn from_env(config: &AppConfig) -> Result<Self> {
        Self::resolve(config, |name| std::env::var(name).ok())
    }

    /// Resolve credentials through `lookup`, keyed by the configured variable names.
    pub fn resolve(config: &AppConfig, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let discovery_key = read_secret(&lookup, &config.discovery.api_key_env, "discovery API key")?;

        let sheets_token = match config.delivery.destination {
            DestinationKind::Sheets => {
                if config.delivery.spreadsheet_id.trim().is_empty() {
                    return Err(LeadGenError::config(
                        "delivery.spreadsheet_id must be set when destination = \"sheets\"",
                    ));
                }
                Some(read_secret(&lookup, &config.delivery.token_env, "Sheets access token")?)
            }
            DestinationKind::File => None,
        };

        Ok(Self {
            discovery_key,
            sheets_token,
        })
    }
}

fn read_secret(lookup: &impl Fn(&str) -> Option<String>, var_name: &str, what: &str) -> Result<String> {
    match lookup(var_name) {
        Some(val) if !val.trim().is_empty() => Ok(val),
        _ => Err(LeadGenError::config(format!(
            "{what} not found. Set the {var_name} environment variable."
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_serializes() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).expect("serialize default config");
        assert!(toml_str.contains("database_path"));
        assert!(toml_str.contains("APIFY_API_TOKEN"));
        assert!(toml_str.contains("compass/crawler-google-places"));
    }

    #[test]
    fn config_roundtrip() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).expect("serialize");
        let parsed: AppConfig = toml::from_str(&toml_str).expect("deserialize");
        assert_eq!(parsed.defaults.limit, 50);
        assert_eq!(parsed.fetcher.cooldown_secs, 1800);
        assert_eq!(parsed.verification.local_parts.len(), 4);
        assert_eq!(parsed.delivery.worksheet, "Sheet1");
    }

    #[test]
    fn partial_config_uses_defaults() {
        let toml_str = r#"
[discovery]
provider = "places"
api_key_env = "PLACES_KEY"

[delivery]
destination = "file"
output_dir = "/tmp/leads"
"#;
        let config: AppConfig = toml::from_str(toml_str).expect("parse");
        assert_eq!(config.discovery.provider, DiscoveryProviderKind::Places);
        assert_eq!(config.discovery.retry_attempts, 3);
        assert_eq!(config.delivery.destination, DestinationKind::File);
        assert_eq!(config.extraction.contact_paths[0], "/contact");
        assert_eq!(config.server.bind, "127.0.0.1:8080");
    }

    #[test]
    fn runtime_settings_from_app_config() {
        let app = AppConfig::default();

        let discovery = DiscoverySettings::from(&app);
        assert_eq!(discovery.retry_attempts, 3);
        assert_eq!(discovery.politeness.min_delay, Duration::from_secs(5));
        assert_eq!(discovery.politeness.max_delay, Duration::from_secs(15));

        let extraction = ExtractionSettings::from(&app);
        assert_eq!(extraction.concurrency, 5);
        assert_eq!(extraction.max_pages, 4);

        let verification = VerificationSettings::from(&app);
        assert_eq!(verification.concurrency, 3);
        assert_eq!(verification.smtp_port, 25);

        let fetcher = FetcherSettings::from(&app);
        assert_eq!(fetcher.cooldown, Duration::from_secs(1800));
    }

    #[test]
    fn politeness_orders_bounds() {
        let p = PolitenessConfig::from_millis(900, 100);
        assert_eq!(p.min_delay, Duration::from_millis(100));
        assert_eq!(p.max_delay, Duration::from_millis(900));
    }

    #[test]
    fn credential_validation() {
        let mut config = AppConfig::default();
        // Use a unique env var name to avoid interfering with other tests
        config.discovery.api_key_env = "LG_TEST_NONEXISTENT_KEY_12345".into();
        let err = Credentials::from_env(&config).err().unwrap();
        assert!(err.to_string().contains("LG_TEST_NONEXISTENT_KEY_12345"));
    }

    #[test]
    fn credentials_follow_the_configured_destination() {
        let mut config = AppConfig::default();
        config.discovery.api_key_env = "MAPS_KEY".into();
        config.delivery.token_env = "SHEETS_TOKEN".into();
        let lookup = |name: &str| match name {
            "MAPS_KEY" => Some("maps-secret".to_string()),
            "SHEETS_TOKEN" => Some("sheets-secret".to_string()),
            _ => None,
        };

        config.delivery.destination = DestinationKind::File;
        let file = Credentials::resolve(&config, lookup).unwrap();
        assert_eq!(file.discovery_key, "maps-secret");
        assert!(file.sheets_token.is_none());

        config.delivery.destination = DestinationKind::Sheets;
        config.delivery.spreadsheet_id = "  ".into();
        assert!(Credentials::resolve(&config, lookup).is_err());

        config.delivery.spreadsheet_id = "sheet-123".into();
        let sheets = Credentials::resolve(&config, lookup).unwrap();
        assert_eq!(sheets.sheets_token.as_deref(), Some("sheets-secret"));

        let blank = |_: &str| Some("   ".to_string());
        assert!(Credentials::resolve(&config, blank).is_err());
    }
}
