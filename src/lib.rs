//! MediGuard Drift - deterministic health-drift detection and risk assessment
//!
//! Turns a user's history of daily check metrics into an auditable decision
//! about whether they need a professional review:
//! baseline estimation → drift detection → context correlation → risk scoring
//! → safety gate → recommendation synthesis.
//!
//! Every stage is a pure function of its inputs and the [`PipelineConfig`], so
//! identical inputs always yield byte-identical encoded results. I/O, retries
//! and text generation sit outside the pipeline behind the [`fetch`] and
//! [`explain`] boundaries.

pub mod baseline;
pub mod config;
pub mod context;
pub mod drift;
pub mod encoder;
pub mod error;
pub mod explain;
pub mod fetch;
pub mod normalizer;
pub mod pipeline;
pub mod recommend;
pub mod risk;
pub mod safety;
pub mod schema;
pub mod types;

// FFI bindings for C interop (always available for cdylib/staticlib builds)
pub mod ffi;

pub use baseline::BaselineEstimator;
pub use config::PipelineConfig;
pub use context::ContextCorrelator;
pub use drift::DriftDetector;
pub use encoder::{ResultEncoder, ResultEnvelope};
pub use error::{ExplainError, FetchError, InputValidationError};
pub use explain::{explain_with_fallback, Explainer, Explanation, RuleBasedExplainer};
pub use fetch::{FetchOutcome, RetryingSource, SnapshotSource};
pub use pipeline::{analyze, analyze_batch, analyze_fetched, DriftPipeline};
pub use risk::RiskScorer;
pub use safety::SafetyGate;
pub use schema::{Snapshot, SnapshotAdapter, SCHEMA_VERSION};
pub use types::AnalysisResult;

/// Library version recorded in every encoded result
pub const MEDIGUARD_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Producer name recorded in every encoded result
pub const PRODUCER_NAME: &str = "mediguard-drift";
