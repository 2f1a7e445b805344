//! Shared types, error model, and configuration for the lead-generation pipeline.
//!
//! This crate is the foundation depended on by all other leadgen crates.
//! It provides:
//! - [`LeadGenError`] and [`FetchError`], the unified error types
//! - Domain types ([`Job`], [`BusinessRecord`], [`EmailCandidate`], [`VerifiedLead`])
//! - Configuration ([`AppConfig`], per-stage runtime settings, config loading)

pub mod config;
pub mod error;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, Credentials, DefaultsConfig, DeliveryConfig, DeliverySettings, DestinationKind, DiscoveryConfig,
    DiscoveryProviderKind, DiscoverySettings, ExtractionConfig, ExtractionSettings,
    FetcherConfig, FetcherSettings, PolitenessConfig, ServerConfig, VerificationConfig,
    VerificationSettings, config_dir, config_file_path, init_config, load_config,
    load_config_from,
};
pub use error::{FetchError, FetchErrorKind, LeadGenError, Result};
pub use types::{
    BusinessRecord, CandidateSource, Confidence, DEFAULT_LEAD_LIMIT, EmailCandidate,
    ExtractionResult, Job, JobError, JobErrorKind, JobId, JobState, JobStatusView, LeadQuery,
    MAX_LEAD_LIMIT, MIN_LEAD_LIMIT, Stage, VerificationStatus, VerifiedLead,
};
