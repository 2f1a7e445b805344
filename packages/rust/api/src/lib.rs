//! HTTP submission and status interface.
//!
//! Thin JSON layer over [`JobOrchestrator`]; every handler is a single
//! orchestrator call, so status polling has no side effects.

pub mod error;
pub mod routes;

use std::time::Duration;

use axum::Router;
use axum::routing::{get, post};
use tower_http::cors::CorsLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use leadgen_core::JobOrchestrator;
use leadgen_shared::{LeadGenError, Result};

pub use error::ApiError;

/// Upper bound for one request; job work happens off the request path.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Clone)]
pub struct AppState {
    pub orchestrator: JobOrchestrator,
}

/// Build the application router.
pub fn router(orchestrator: JobOrchestrator) -> Router {
    Router::new()
        .route("/api/jobs", post(routes::submit_job).get(routes::list_jobs))
        .route("/api/jobs/:id", get(routes::job_status))
        .route("/api/jobs/:id/leads", get(routes::job_leads))
        .route("/api/jobs/:id/abort", post(routes::abort_job))
        .route("/api/jobs/:id/retry-delivery", post(routes::retry_delivery))
        .route("/health", get(routes::health))
        .layer(TimeoutLayer::new(REQUEST_TIMEOUT))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(AppState { orchestrator })
}

/// Bind `addr` and serve until Ctrl-C.
pub async fn serve(orchestrator: JobOrchestrator, addr: &str) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| LeadGenError::config(format!("cannot bind {addr}: {e}")))?;
    info!(%addr, "listening");

    axum::serve(listener, router(orchestrator))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutting down");
        })
        .await
        .map_err(|e| LeadGenError::io(addr, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use async_trait::async_trait;
    use axum::body::{Body, to_bytes};
    use axum::http::{Request, StatusCode};
    use serde_json::{Value, json};
    use tower::ServiceExt;

    use leadgen_core::{OrchestratorSettings, Pipeline};
    use leadgen_delivery::LocalFileDestination;
    use leadgen_discovery::{MapSearchProvider, PageCursor, ProviderPage, SearchRequest};
    use leadgen_extraction::ContactExtractor;
    use leadgen_fetcher::RateLimitedFetcher;
    use leadgen_shared::{
        AppConfig, BusinessRecord, DiscoverySettings, ExtractionSettings, FetcherSettings, JobId,
        PolitenessConfig, VerificationSettings,
    };
    use leadgen_storage::Storage;
    use leadgen_verification::{MailboxProber, ProbeOutcome, Verifier};

    /// One business without a website, so a job completes with no network.
    struct OneBusiness;

    #[async_trait]
    impl MapSearchProvider for OneBusiness {
        fn name(&self) -> &str {
            "one"
        }

        async fn search_page(
            &self,
            _request: &SearchRequest,
            _cursor: Option<&PageCursor>,
        ) -> Result<ProviderPage> {
            Ok(ProviderPage {
                records: vec![BusinessRecord {
                    name: "Corner Bakery".into(),
                    address: "1 Main St, Springfield".into(),
                    phone: None,
                    website: None,
                    rating: None,
                    review_count: None,
                }],
                next: None,
            })
        }
    }

    struct NeverProbed;

    #[async_trait]
    impl MailboxProber for NeverProbed {
        async fn probe(&self, _address: &str) -> ProbeOutcome {
            ProbeOutcome::Unreachable("not used".into())
        }
    }

    async fn app() -> (Router, JobOrchestrator) {
        let dir = std::env::temp_dir().join(format!("leadgen-api-{}", JobId::new()));
        let config = AppConfig::default();
        let storage = Arc::new(Storage::open(&dir.join("leadgen.db")).await.unwrap());
        let fetcher = Arc::new(RateLimitedFetcher::new(FetcherSettings::from(&config)).unwrap());

        let mut discovery = DiscoverySettings::from(&config);
        discovery.politeness = PolitenessConfig::none();
        let mut extraction = ExtractionSettings::from(&config);
        extraction.politeness = PolitenessConfig::none();
        let mut verification = VerificationSettings::from(&config);
        verification.politeness = PolitenessConfig::none();

        let orchestrator = JobOrchestrator::new(
            storage,
            Pipeline {
                provider: Arc::new(OneBusiness),
                extractor: ContactExtractor::new(fetcher, extraction),
                verifier: Verifier::new(Arc::new(NeverProbed), verification),
                destination: Arc::new(LocalFileDestination::new(&dir.join("leads"))),
            },
            OrchestratorSettings {
                default_limit: 50,
                job_timeout: Duration::from_secs(30),
                discovery,
            },
        );
        (router(orchestrator.clone()), orchestrator)
    }

    async fn call(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let request = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(body) => request
                .header("content-type", "application/json")
                .body(Body::from(body.to_string())),
            None => request.body(Body::empty()),
        }
        .unwrap();

        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, json)
    }

    async fn wait_terminal(app: &Router, id: &str) -> Value {
        for _ in 0..200 {
            let (_, body) = call(app, "GET", &format!("/api/jobs/{id}"), None).await;
            if body["status"] == "completed" || body["status"] == "failed" {
                return body;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        panic!("job {id} never finished");
    }

    #[tokio::test]
    async fn health_reports_healthy() {
        let (app, _) = app().await;
        let (status, body) = call(&app, "GET", "/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"status": "healthy"}));
    }

    #[tokio::test]
    async fn submission_is_accepted_and_pollable() {
        let (app, _) = app().await;
        let (status, body) = call(
            &app,
            "POST",
            "/api/jobs",
            Some(json!({"industry": "Bakeries", "location": "Springfield", "limit": 5})),
        )
        .await;
        assert_eq!(status, StatusCode::ACCEPTED);
        let id = body["jobId"].as_str().unwrap().to_string();

        let done = wait_terminal(&app, &id).await;
        assert_eq!(done["status"], "completed");
        assert!(done["resultLocator"].as_str().unwrap().starts_with("file://"));
        assert!(done.get("stage").is_none());

        let (status, leads) = call(&app, "GET", &format!("/api/jobs/{id}/leads"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(leads[0]["verificationStatus"], "no-email");

        let (_, listed) = call(&app, "GET", "/api/jobs", None).await;
        assert_eq!(listed.as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn missing_fields_are_unprocessable() {
        let (app, orchestrator) = app().await;
        let (status, body) = call(&app, "POST", "/api/jobs", Some(json!({"location": "Springfield"}))).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert!(body["error"].as_str().unwrap().contains("industry"));

        let (status, _) = call(
            &app,
            "POST",
            "/api/jobs",
            Some(json!({"industry": "Bakeries", "location": "Springfield", "limit": 1000})),
        )
        .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert!(orchestrator.list(10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn malformed_body_gets_an_error_object() {
        let (app, orchestrator) = app().await;
        let request = Request::builder()
            .method("POST")
            .uri("/api/jobs")
            .header("content-type", "application/json")
            .body(Body::from("{\"industry\": \"Bakeries\","))
            .unwrap();

        let response = app.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body: Value = serde_json::from_slice(&bytes).unwrap();
        assert!(!body["error"].as_str().unwrap().is_empty());

        let (status, body) = call(&app, "POST", "/api/jobs", Some(json!({"industry": 7}))).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert!(body["error"].is_string());
        assert!(orchestrator.list(10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn submission_can_name_a_worksheet() {
        let (app, orchestrator) = app().await;
        let (status, body) = call(
            &app,
            "POST",
            "/api/jobs",
            Some(json!({"industry": "Bakeries", "location": "Springfield", "sheet": "Springfield"})),
        )
        .await;
        assert_eq!(status, StatusCode::ACCEPTED);
        let id: JobId = body["jobId"].as_str().unwrap().parse().unwrap();
        assert_eq!(orchestrator.job(&id).await.unwrap().worksheet.as_deref(), Some("Springfield"));

        let (status, _) = call(
            &app,
            "POST",
            "/api/jobs",
            Some(json!({"industry": "Bakeries", "location": "Springfield", "worksheet": "a:b"})),
        )
        .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[tokio::test]
    async fn unknown_or_malformed_ids_are_not_found() {
        let (app, _) = app().await;
        let (status, _) = call(&app, "GET", &format!("/api/jobs/{}", JobId::new()), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let (status, _) = call(&app, "GET", "/api/jobs/not-a-job", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn retry_delivery_of_a_completed_job_conflicts() {
        let (app, orchestrator) = app().await;
        let id = orchestrator.submit("Bakeries", "Springfield", Some(5)).await.unwrap();
        wait_terminal(&app, &id.to_string()).await;

        let (status, body) = call(&app, "POST", &format!("/api/jobs/{id}/retry-delivery"), None).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert!(body["error"].as_str().unwrap().contains("did not fail in delivery"));
    }

    #[tokio::test]
    async fn abort_of_a_finished_job_leaves_it_unchanged() {
        let (app, orchestrator) = app().await;
        let id = orchestrator.submit("Bakeries", "Springfield", Some(5)).await.unwrap();
        wait_terminal(&app, &id.to_string()).await;

        let (status, body) = call(
            &app,
            "POST",
            &format!("/api/jobs/{id}/abort"),
            Some(json!({"reason": "too late"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "completed");
    }
}
