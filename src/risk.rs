//! Risk scoring
//!
//! The risk score sums one term per drift report:
//!
//! ```text
//! severity_weight × (1 + min(|velocity| / v_ref, 1)) × (floor + (1 − floor) × consistency)
//! ```
//!
//! and clamps the sum to [0, 10]. Each factor is non-decreasing in its input,
//! so the score is monotonic in severity, velocity and consistency. Minor
//! drift weighs zero by default, so flat metrics add nothing to the sum.

use crate::config::{PipelineConfig, ScoringConfig, MAX_RISK_SCORE};
use crate::types::{DriftReport, RiskAssessment, RiskContribution, SeverityTier};
use std::collections::BTreeMap;
use tracing::debug;

/// Velocity multiplier in [1, 2]
pub fn velocity_weight(velocity_pct: f64, config: &ScoringConfig) -> f64 {
    1.0 + (velocity_pct.abs() / config.velocity_reference_pct).min(1.0)
}

/// Consistency multiplier in [floor, 1]
pub fn consistency_weight(consistency: f64, config: &ScoringConfig) -> f64 {
    let floor = config.consistency_floor;
    floor + (1.0 - floor) * consistency.clamp(0.0, 1.0)
}

/// One metric's term of the risk sum
pub fn risk_contribution(
    severity: SeverityTier,
    velocity_pct: f64,
    consistency: f64,
    config: &ScoringConfig,
) -> f64 {
    config.severity_weights.weight(severity)
        * velocity_weight(velocity_pct, config)
        * consistency_weight(consistency, config)
}

fn contribution_for(report: &DriftReport, config: &ScoringConfig) -> RiskContribution {
    let severity_weight = config.severity_weights.weight(report.severity);
    let velocity_weight = velocity_weight(report.velocity, config);
    let consistency_weight = consistency_weight(report.consistency, config);

    RiskContribution {
        report: report.clone(),
        severity_weight,
        velocity_weight,
        consistency_weight,
        contribution: severity_weight * velocity_weight * consistency_weight,
    }
}

/// Composite risk scorer
pub struct RiskScorer;

impl RiskScorer {
    /// Score every drift report.
    ///
    /// `windows` holds each metric's recent values and `checks` is the number
    /// of samples in the history; both only feed confidence and acceleration.
    /// Returns None when there is nothing to score.
    pub fn score(
        reports: &[DriftReport],
        windows: &BTreeMap<String, Vec<f64>>,
        checks: usize,
        config: &PipelineConfig,
    ) -> Option<RiskAssessment> {
        if reports.is_empty() {
            return None;
        }

        let scoring = &config.scoring;
        let mut contributing: Vec<RiskContribution> =
            reports.iter().map(|r| contribution_for(r, scoring)).collect();

        contributing.sort_by(|a, b| {
            b.contribution
                .total_cmp(&a.contribution)
                .then_with(|| a.report.metric.cmp(&b.report.metric))
        });

        let total: f64 = contributing.iter().map(|c| c.contribution).sum();
        let score = total.clamp(0.0, MAX_RISK_SCORE);

        let dominant = &contributing[0].report;
        let accelerating = windows
            .get(&dominant.metric)
            .map(|w| is_accelerating(w, dominant.baseline_mean))
            .unwrap_or(false);

        let urgency = config.urgency_thresholds.classify(score);
        debug!(
            score,
            urgency = urgency.as_str(),
            dominant = %dominant.metric,
            "risk scored"
        );

        Some(RiskAssessment {
            score,
            urgency,
            trend_velocity: dominant.velocity,
            consistency: dominant.consistency,
            confidence: confidence(checks, dominant, scoring),
            accelerating,
            contributing,
        })
    }
}

/// 0.4 data quantity + 0.3 consistency + 0.3 trend clarity, in [0, 1]
fn confidence(checks: usize, dominant: &DriftReport, config: &ScoringConfig) -> f64 {
    let quantity = (checks as f64 / config.confidence_saturation_checks as f64).min(1.0);
    let clarity = (dominant.velocity.abs() / config.velocity_reference_pct).min(1.0);
    (0.4 * quantity + 0.3 * dominant.consistency.clamp(0.0, 1.0) + 0.3 * clarity).clamp(0.0, 1.0)
}

/// Second half of the window sits further from the baseline than the first
fn is_accelerating(window: &[f64], mean: f64) -> bool {
    if window.len() < 4 {
        return false;
    }
    let mid = window.len() / 2;
    let deviation =
        |half: &[f64]| half.iter().map(|v| (v - mean).abs()).sum::<f64>() / half.len() as f64;
    deviation(&window[mid..]) > deviation(&window[..mid])
}
