//! Job orchestration for the lead-generation pipeline.
//!
//! This crate ties together discovery, extraction, verification and delivery
//! into jobs with a persisted lifecycle (see [`JobOrchestrator`]), and builds
//! the production wiring from an [`AppConfig`](leadgen_shared::AppConfig).

pub mod orchestrator;
pub mod runtime;

pub use orchestrator::{JobOrchestrator, OrchestratorSettings, Pipeline};
pub use runtime::{build_orchestrator, build_orchestrator_with};
