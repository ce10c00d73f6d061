//! Pipeline orchestration
//!
//! This module provides the public API for MediGuard Drift. It runs the
//! stages strictly in sequence for one user against one immutable snapshot:
//!
//! 1. BaselineEstimator - Establish or reuse the per-metric baseline
//! 2. DriftDetector - Compare the current sample to the baseline
//! 3. ContextCorrelator - Tag drift with possible lifestyle factors
//! 4. RiskScorer - Combine severity, velocity and consistency
//! 5. SafetyGate - Deterministic escalation decision
//! 6. RecommendationSynthesizer - Rank generic action templates
//!
//! Stage anomalies become markers in the result. Only input validation can
//! fail a run.

use crate::baseline::BaselineEstimator;
use crate::config::PipelineConfig;
use crate::context::{ContextCorrelation, ContextCorrelator};
use crate::drift::{DriftDetection, DriftDetector};
use crate::error::InputValidationError;
use crate::fetch::{FetchFailure, FetchOutcome};
use crate::recommend::{synthesize, RecommendationSynthesizer};
use crate::risk::RiskScorer;
use crate::safety::SafetyGate;
use crate::schema::Snapshot;
use crate::types::{
    AnalysisResult, AnalysisStatus, BaselineOutcome, BaselineSet, CareRecommendation,
    ContextFactor, DriftReport, FactorCorrelation, MetricSample, PipelineMarker, RiskAssessment,
    SafetyDecision,
};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use tracing::{debug, debug_span, warn};
use uuid::Uuid;

/// Uniform contract for a pipeline stage: a fixed input record in, a fixed
/// output record out, no side effects.
pub trait Stage<'a> {
    const NAME: &'static str;
    type Input;
    type Output;

    fn run(input: Self::Input, config: &PipelineConfig) -> Self::Output;
}

impl<'a> Stage<'a> for BaselineEstimator {
    const NAME: &'static str = "baseline_estimator";
    type Input = &'a Snapshot;
    type Output = BaselineOutcome;

    fn run(snapshot: &'a Snapshot, config: &PipelineConfig) -> BaselineOutcome {
        BaselineEstimator::resolve(
            snapshot.stored_baseline.as_ref(),
            snapshot.rebaseline,
            &snapshot.samples,
            config.baseline_min_samples,
        )
    }
}

impl<'a> Stage<'a> for DriftDetector {
    const NAME: &'static str = "drift_detector";
    type Input = (&'a [MetricSample], &'a BaselineSet);
    type Output = DriftDetection;

    fn run((history, baseline): Self::Input, config: &PipelineConfig) -> DriftDetection {
        DriftDetector::detect(history, baseline, config)
    }
}

impl<'a> Stage<'a> for ContextCorrelator {
    const NAME: &'static str = "context_correlator";
    type Input = (&'a [DriftReport], &'a ContextFactor);
    type Output = ContextCorrelation;

    fn run((reports, context): Self::Input, config: &PipelineConfig) -> ContextCorrelation {
        ContextCorrelator::correlate(reports, context, config)
    }
}

impl<'a> Stage<'a> for RiskScorer {
    const NAME: &'static str = "risk_scorer";
    /// Drift detection plus the number of checks in the history
    type Input = (&'a DriftDetection, usize);
    type Output = Option<RiskAssessment>;

    fn run((detection, checks): Self::Input, config: &PipelineConfig) -> Option<RiskAssessment> {
        RiskScorer::score(&detection.reports, &detection.windows, checks, config)
    }
}

impl<'a> Stage<'a> for SafetyGate {
    const NAME: &'static str = "safety_gate";
    type Input = (
        Option<&'a RiskAssessment>,
        &'a [DriftReport],
        &'a ContextFactor,
    );
    type Output = SafetyDecision;

    fn run((risk, reports, context): Self::Input, config: &PipelineConfig) -> SafetyDecision {
        SafetyGate::decide(risk, reports, context, config)
    }
}

impl<'a> Stage<'a> for RecommendationSynthesizer {
    const NAME: &'static str = "recommendation_synthesizer";
    type Input = (
        Option<&'a RiskAssessment>,
        &'a [FactorCorrelation],
        &'a SafetyDecision,
    );
    type Output = Vec<CareRecommendation>;

    fn run(
        (risk, correlations, decision): Self::Input,
        config: &PipelineConfig,
    ) -> Vec<CareRecommendation> {
        synthesize(risk, correlations, decision, config)
    }
}

/// Records the stages a run executed, in order
#[derive(Default)]
struct StageTrace {
    stages: Vec<String>,
}

impl StageTrace {
    fn run<'a, S: Stage<'a>>(&mut self, input: S::Input, config: &PipelineConfig) -> S::Output {
        debug!(stage = S::NAME, "running stage");
        self.stages.push(S::NAME.to_string());
        S::run(input, config)
    }
}

/// Deterministic id for a run over (user, as_of, sample count)
pub fn run_id(user_id: &str, as_of: DateTime<Utc>, sample_count: usize) -> Uuid {
    let name = format!("{}|{}|{}", user_id, as_of.to_rfc3339(), sample_count);
    Uuid::new_v5(&Uuid::NAMESPACE_OID, name.as_bytes())
}

/// Run the full pipeline for one snapshot.
///
/// # Returns
/// An `AnalysisResult` whose status is `complete`, `partial` or
/// `insufficient-data`. The only error is a malformed snapshot or config.
///
/// # Example
/// ```ignore
/// let snapshot = Snapshot::from_json(&json)?;
/// let result = analyze(&snapshot, &PipelineConfig::default())?;
/// if result.safety_decision.escalate { /* route to review */ }
/// ```
pub fn analyze(
    snapshot: &Snapshot,
    config: &PipelineConfig,
) -> Result<AnalysisResult, InputValidationError> {
    snapshot.validate(config)?;

    let _span = debug_span!("analyze", user_id = %snapshot.user_id).entered();
    let mut trace = StageTrace::default();
    let mut markers = Vec::new();

    let baseline = match trace.run::<BaselineEstimator>(snapshot, config) {
        BaselineOutcome::Established(set) => Some(set),
        BaselineOutcome::Insufficient(insufficient) => {
            warn!(
                required = insufficient.required,
                available = insufficient.available,
                "insufficient history for a baseline"
            );
            markers.push(PipelineMarker::InsufficientBaseline {
                metric: None,
                required: insufficient.required,
                available: insufficient.available,
            });
            None
        }
    };

    let (detection, correlation, risk) = match &baseline {
        Some(set) => {
            let detection =
                trace.run::<DriftDetector>((snapshot.samples.as_slice(), set), config);
            let correlation = trace.run::<ContextCorrelator>(
                (detection.reports.as_slice(), &snapshot.context),
                config,
            );
            let risk = trace.run::<RiskScorer>((&detection, snapshot.samples.len()), config);
            (detection, correlation, risk)
        }
        None => (
            DriftDetection::default(),
            ContextCorrelation::default(),
            None,
        ),
    };

    let decision = trace.run::<SafetyGate>(
        (risk.as_ref(), detection.reports.as_slice(), &snapshot.context),
        config,
    );
    let recommendations = trace.run::<RecommendationSynthesizer>(
        (risk.as_ref(), correlation.correlations.as_slice(), &decision),
        config,
    );

    markers.extend(detection.markers);
    markers.extend(correlation.marker);

    let status = if baseline.is_none() {
        AnalysisStatus::InsufficientData
    } else if markers.iter().any(PipelineMarker::is_degrading) {
        AnalysisStatus::Partial
    } else {
        AnalysisStatus::Complete
    };
    debug!(status = status.as_str(), escalate = decision.escalate, "analysis finished");

    Ok(AnalysisResult {
        run_id: run_id(&snapshot.user_id, snapshot.as_of, snapshot.samples.len()),
        user_id: snapshot.user_id.clone(),
        as_of: snapshot.as_of,
        status,
        baseline,
        drift_reports: detection.reports,
        correlations: correlation.correlations,
        risk_assessment: risk,
        safety_decision: decision,
        recommendations,
        markers,
        stages: trace.stages,
    })
}

/// Run the pipeline on whatever the fetch boundary produced.
///
/// A failed fetch still yields a result: status `partial`, a fetch marker and
/// a conservative safety decision.
pub fn analyze_fetched(
    outcome: FetchOutcome,
    config: &PipelineConfig,
) -> Result<AnalysisResult, InputValidationError> {
    match outcome {
        FetchOutcome::Resolved(snapshot) => analyze(&snapshot, config),
        FetchOutcome::Failed(failure) => {
            config.validate()?;
            Ok(fetch_failure_result(&failure, config))
        }
    }
}

fn fetch_failure_result(failure: &FetchFailure, config: &PipelineConfig) -> AnalysisResult {
    let _span = debug_span!("analyze", user_id = %failure.user_id).entered();
    warn!(error = %failure.error, "analyzing without data after fetch failure");

    let mut trace = StageTrace::default();
    let context = ContextFactor::default();
    let decision = trace.run::<SafetyGate>((None, &[][..], &context), config);
    let recommendations =
        trace.run::<RecommendationSynthesizer>((None, &[][..], &decision), config);

    AnalysisResult {
        run_id: run_id(&failure.user_id, failure.requested_at, 0),
        user_id: failure.user_id.clone(),
        as_of: failure.requested_at,
        status: AnalysisStatus::Partial,
        baseline: None,
        drift_reports: Vec::new(),
        correlations: Vec::new(),
        risk_assessment: None,
        safety_decision: decision,
        recommendations,
        markers: vec![failure.marker()],
        stages: trace.stages,
    }
}

/// Analyze many users on a rayon pool. Results are in input order.
///
/// Runs share no state, so the output matches the sequential build.
#[cfg(feature = "parallel")]
pub fn analyze_batch(
    snapshots: &[Snapshot],
    config: &PipelineConfig,
) -> Vec<Result<AnalysisResult, InputValidationError>> {
    use rayon::prelude::*;
    snapshots.par_iter().map(|s| analyze(s, config)).collect()
}

/// Analyze many users in sequence. Results are in input order.
#[cfg(not(feature = "parallel"))]
pub fn analyze_batch(
    snapshots: &[Snapshot],
    config: &PipelineConfig,
) -> Vec<Result<AnalysisResult, InputValidationError>> {
    snapshots.iter().map(|s| analyze(s, config)).collect()
}

/// Stateful processor that keeps each user's established baseline between
/// runs.
///
/// Use this when snapshots arrive incrementally and the caller does not
/// persist baselines itself.
#[derive(Debug, Clone, Default)]
pub struct DriftPipeline {
    config: PipelineConfig,
    baselines: BTreeMap<String, BaselineSet>,
}

impl DriftPipeline {
    /// Create a processor, rejecting an inconsistent config up front
    pub fn new(config: PipelineConfig) -> Result<Self, InputValidationError> {
        config.validate()?;
        Ok(Self {
            config,
            baselines: BTreeMap::new(),
        })
    }

    /// Create a processor with a specific baseline sample requirement
    pub fn with_baseline_min_samples(samples: usize) -> Result<Self, InputValidationError> {
        Self::new(PipelineConfig::with_baseline_min_samples(samples))
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn baseline(&self, user_id: &str) -> Option<&BaselineSet> {
        self.baselines.get(user_id)
    }

    /// Analyze a snapshot, reusing the kept baseline when the snapshot
    /// carries none and no re-baseline was requested
    pub fn process(&mut self, snapshot: &Snapshot) -> Result<AnalysisResult, InputValidationError> {
        let kept = self
            .baselines
            .get(&snapshot.user_id)
            .filter(|_| snapshot.stored_baseline.is_none() && !snapshot.rebaseline);

        let result = match kept {
            Some(baseline) => {
                let with_baseline = snapshot.clone().with_stored_baseline(baseline.clone());
                analyze(&with_baseline, &self.config)?
            }
            None => analyze(snapshot, &self.config)?,
        };

        if let Some(baseline) = &result.baseline {
            self.baselines
                .insert(result.user_id.clone(), baseline.clone());
        }
        Ok(result)
    }

    /// Forget a user's baseline so the next run establishes a fresh one
    pub fn reset_baseline(&mut self, user_id: &str) -> Option<BaselineSet> {
        self.baselines.remove(user_id)
    }

    /// Load baseline state from JSON
    pub fn load_baselines(&mut self, json: &str) -> Result<(), InputValidationError> {
        self.baselines = serde_json::from_str(json)?;
        Ok(())
    }

    /// Save baseline state to JSON
    pub fn save_baselines(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(&self.baselines)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FetchError;
    use crate::types::{ActivityType, SeverityTier, TrendDirection, UrgencyTier};
    use chrono::{Duration, TimeZone};

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 8, 0, 0).unwrap()
    }

    fn make_snapshot(user_id: &str, series: &[(&str, Vec<f64>)]) -> Snapshot {
        let len = series.iter().map(|(_, v)| v.len()).max().unwrap_or(0);
        let samples = (0..len)
            .map(|i| MetricSample {
                user_id: user_id.to_string(),
                activity_type: ActivityType::SitToStand,
                timestamp: start() + Duration::days(i as i64),
                metrics: series
                    .iter()
                    .filter_map(|(m, v)| v.get(i).map(|x| (m.to_string(), *x)))
                    .collect(),
            })
            .collect();
        Snapshot::new(
            user_id,
            start() + Duration::days(len as i64),
            samples,
            ContextFactor::default(),
        )
    }

    #[test]
    fn test_declining_stability_scenario() {
        let snapshot = make_snapshot(
            "user-1",
            &[("stability", vec![0.92, 0.90, 0.89, 0.87, 0.86, 0.85, 0.84])],
        );
        let config = PipelineConfig::with_baseline_min_samples(1);

        let result = analyze(&snapshot, &config).unwrap();

        let drift = result.drift_for("stability").unwrap();
        assert_eq!(drift.trend, TrendDirection::Declining);
        assert_eq!(drift.severity, SeverityTier::Moderate);
        assert!((drift.delta_pct + 8.7).abs() < 0.05);
        let risk = result.risk_assessment.as_ref().unwrap();
        assert_eq!(risk.urgency, UrgencyTier::Moderate);
        assert!(!result.safety_decision.escalate);
        assert_eq!(result.status, AnalysisStatus::Complete);
        assert_eq!(
            result.stages,
            vec![
                "baseline_estimator",
                "drift_detector",
                "context_correlator",
                "risk_scorer",
                "safety_gate",
                "recommendation_synthesizer"
            ]
        );
    }

    #[test]
    fn test_insufficient_history() {
        let snapshot = make_snapshot("user-1", &[("stability", vec![0.9, 0.9, 0.9])]);
        let result = analyze(&snapshot, &PipelineConfig::default()).unwrap();

        assert_eq!(result.status, AnalysisStatus::InsufficientData);
        assert!(result.baseline.is_none());
        assert!(result.drift_reports.is_empty());
        assert!(result.safety_decision.escalate);
        assert_eq!(
            result.markers,
            vec![PipelineMarker::InsufficientBaseline {
                metric: None,
                required: 5,
                available: 3
            }]
        );
        assert_eq!(
            result.stages,
            vec!["baseline_estimator", "safety_gate", "recommendation_synthesizer"]
        );
    }

    #[test]
    fn test_zero_baseline_is_partial() {
        let snapshot = make_snapshot(
            "user-1",
            &[
                ("stability", vec![0.9; 6]),
                ("tremor_free", vec![0.0, 0.0, 0.0, 0.0, 0.0, 0.2]),
            ],
        );
        let result = analyze(&snapshot, &PipelineConfig::default()).unwrap();

        assert_eq!(result.status, AnalysisStatus::Partial);
        assert!(result.markers.contains(&PipelineMarker::NoDriftComputable {
            metric: "tremor_free".to_string()
        }));
        assert!(result.drift_for("stability").is_some());
        assert!(result.drift_for("tremor_free").is_none());
    }

    #[test]
    fn test_invalid_input_is_the_only_error() {
        let snapshot = make_snapshot("user-1", &[("stability", vec![0.9, 1.5])]);
        assert!(matches!(
            analyze(&snapshot, &PipelineConfig::default()),
            Err(InputValidationError::MetricOutOfRange { .. })
        ));
    }

    #[test]
    fn test_run_id_is_deterministic() {
        let a = run_id("user-1", start(), 7);
        assert_eq!(a, run_id("user-1", start(), 7));
        assert_ne!(a, run_id("user-1", start(), 8));
        assert_ne!(a, run_id("user-2", start(), 7));
    }

    #[test]
    fn test_fetch_failure_is_partial_and_escalates() {
        let failure = FetchFailure {
            user_id: "user-1".to_string(),
            requested_at: start(),
            error: FetchError::Timeout {
                elapsed_ms: 5_000,
                limit_ms: 5_000,
            },
            attempts: 3,
            elapsed_ms: 15_600,
        };
        let result =
            analyze_fetched(FetchOutcome::Failed(failure), &PipelineConfig::default()).unwrap();

        assert_eq!(result.status, AnalysisStatus::Partial);
        assert!(result.safety_decision.escalate);
        assert_eq!(
            result.markers,
            vec![PipelineMarker::DataFetchTimeout {
                attempts: 3,
                elapsed_ms: 15_600
            }]
        );
    }

    #[test]
    fn test_batch_preserves_order() {
        let snapshots = vec![
            make_snapshot("a", &[("stability", vec![0.9; 6])]),
            make_snapshot("b", &[("stability", vec![0.9, 1.4])]),
            make_snapshot("c", &[("stability", vec![0.9; 2])]),
        ];
        let results = analyze_batch(&snapshots, &PipelineConfig::default());

        assert_eq!(results.len(), 3);
        assert_eq!(results[0].as_ref().unwrap().user_id, "a");
        assert!(results[1].is_err());
        assert_eq!(
            results[2].as_ref().unwrap().status,
            AnalysisStatus::InsufficientData
        );
    }

    #[test]
    fn test_drift_pipeline_keeps_baseline() {
        let mut pipeline = DriftPipeline::with_baseline_min_samples(5).unwrap();

        let first = make_snapshot("user-1", &[("stability", vec![0.9; 5])]);
        pipeline.process(&first).unwrap();
        assert_eq!(pipeline.baseline("user-1").unwrap().metric("stability").unwrap().mean, 0.9);

        // Later history alone would establish a different baseline
        let mut later = make_snapshot("user-1", &[("stability", vec![0.7; 5])]);
        later.as_of = later.as_of + Duration::days(30);
        let result = pipeline.process(&later).unwrap();

        let drift = result.drift_for("stability").unwrap();
        assert_eq!(drift.baseline_mean, 0.9);
        assert_eq!(drift.severity, SeverityTier::Major);

        let saved = pipeline.save_baselines().unwrap();
        let mut restored = DriftPipeline::default();
        restored.load_baselines(&saved).unwrap();
        assert_eq!(restored.baseline("user-1"), pipeline.baseline("user-1"));

        assert!(pipeline.reset_baseline("user-1").is_some());
        assert!(pipeline.baseline("user-1").is_none());
    }
}
