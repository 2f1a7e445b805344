//! Production wiring: build a [`JobOrchestrator`] from the app config.

use std::path::Path;
use std::sync::Arc;

use tracing::{info, warn};

use leadgen_delivery::build_destination;
use leadgen_discovery::{ApifyPlacesProvider, MapSearchProvider, PlacesTextSearchProvider};
use leadgen_extraction::ContactExtractor;
use leadgen_fetcher::RateLimitedFetcher;
use leadgen_shared::{
    AppConfig, Credentials, DeliverySettings, DiscoveryProviderKind, ExtractionSettings,
    FetcherSettings, PolitenessConfig, Result, VerificationSettings,
};
use leadgen_storage::Storage;
use leadgen_verification::{SmtpProber, Verifier};

use crate::orchestrator::{JobOrchestrator, OrchestratorSettings, Pipeline};

/// Read credentials from the environment, open storage and assemble every
/// stage adapter.
///
/// Jobs left live by a previous process are failed before this returns.
pub async fn build_orchestrator(config: &AppConfig) -> Result<JobOrchestrator> {
    let credentials = Credentials::from_env(config)?;
    build_orchestrator_with(config, credentials).await
}

/// [`build_orchestrator`] with credentials already resolved.
pub async fn build_orchestrator_with(
    config: &AppConfig,
    credentials: Credentials,
) -> Result<JobOrchestrator> {
    let fetcher = Arc::new(RateLimitedFetcher::new(FetcherSettings::from(config))?);
    let provider = build_provider(config, fetcher.clone(), credentials.discovery_key)?;

    let extractor = ContactExtractor::new(fetcher.clone(), ExtractionSettings::from(config));

    let verification = VerificationSettings::from(config);
    let prober = Arc::new(SmtpProber::new(fetcher.clone(), verification.clone()));
    let verifier = Verifier::new(prober, verification);

    let delivery = DeliverySettings::from(config);
    let destination = build_destination(&delivery, fetcher, credentials.sheets_token)?;

    let storage = Arc::new(Storage::open(Path::new(&config.defaults.database_path)).await?);

    let orchestrator = JobOrchestrator::new(
        storage,
        Pipeline {
            provider,
            extractor,
            verifier,
            destination,
        },
        OrchestratorSettings::from(config),
    );

    let recovered = orchestrator.recover_interrupted().await?;
    if recovered > 0 {
        warn!(recovered, "failed jobs interrupted by a previous shutdown");
    }
    info!(
        provider = ?config.discovery.provider,
        destination = ?config.delivery.destination,
        database = %config.defaults.database_path,
        "orchestrator ready"
    );
    Ok(orchestrator)
}

fn build_provider(
    config: &AppConfig,
    fetcher: Arc<RateLimitedFetcher>,
    key: String,
) -> Result<Arc<dyn MapSearchProvider>> {
    let d = &config.discovery;
    let politeness = PolitenessConfig::from_millis(d.min_delay_ms, d.max_delay_ms);

    Ok(match d.provider {
        DiscoveryProviderKind::Apify => Arc::new(ApifyPlacesProvider::new(
            fetcher,
            politeness,
            key,
            &d.actor_id,
            d.base_url.as_deref(),
        )?),
        DiscoveryProviderKind::Places => Arc::new(PlacesTextSearchProvider::new(
            fetcher,
            politeness,
            key,
            d.base_url.as_deref(),
        )?),
    })
}
