//! Pipeline configuration
//!
//! Every numeric threshold the pipeline uses lives here, with defaults. Partial
//! JSON files are accepted: missing fields take their default values.

use crate::context::default_correlation_weights;
use crate::error::InputValidationError;
use crate::types::{SeverityTier, UrgencyTier};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Default number of samples needed before a baseline exists
pub const DEFAULT_BASELINE_MIN_SAMPLES: usize = 5;

/// Default number of most recent checks used for trend analysis
pub const DEFAULT_TREND_WINDOW: usize = 7;

/// Upper bound of the risk score
pub const MAX_RISK_SCORE: f64 = 10.0;

/// Lower bounds of each severity tier on |delta_pct|. `major` is exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SeverityThresholds {
    pub minor: f64,
    pub moderate: f64,
    pub major: f64,
}

impl Default for SeverityThresholds {
    fn default() -> Self {
        Self {
            minor: 0.0,
            moderate: 5.0,
            major: 15.0,
        }
    }
}

impl SeverityThresholds {
    /// Classify an absolute percentage delta
    pub fn classify(&self, delta_pct: f64) -> SeverityTier {
        let magnitude = delta_pct.abs();
        if magnitude > self.major {
            SeverityTier::Major
        } else if magnitude >= self.moderate {
            SeverityTier::Moderate
        } else {
            SeverityTier::Minor
        }
    }
}

/// Lower bounds of each urgency tier on the risk score. `critical` is exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UrgencyThresholds {
    pub low: f64,
    pub moderate: f64,
    pub high: f64,
    pub critical: f64,
}

impl Default for UrgencyThresholds {
    fn default() -> Self {
        Self {
            low: 0.0,
            moderate: 3.0,
            high: 6.0,
            critical: 8.5,
        }
    }
}

impl UrgencyThresholds {
    pub fn classify(&self, score: f64) -> UrgencyTier {
        if score > self.critical {
            UrgencyTier::Critical
        } else if score >= self.high {
            UrgencyTier::High
        } else if score >= self.moderate {
            UrgencyTier::Moderate
        } else {
            UrgencyTier::Low
        }
    }
}

/// Per-tier multiplier in the risk sum.
///
/// Minor drift sits inside a user's normal variation and weighs nothing by
/// default, so the score tracks drift rather than the number of metrics.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SeverityWeights {
    pub minor: f64,
    pub moderate: f64,
    pub major: f64,
}

impl Default for SeverityWeights {
    fn default() -> Self {
        Self {
            minor: 0.0,
            moderate: 2.5,
            major: 5.0,
        }
    }
}

impl SeverityWeights {
    pub fn weight(&self, tier: SeverityTier) -> f64 {
        match tier {
            SeverityTier::Minor => self.minor,
            SeverityTier::Moderate => self.moderate,
            SeverityTier::Major => self.major,
        }
    }
}

/// Risk scorer constants
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringConfig {
    pub severity_weights: SeverityWeights,
    /// Velocity (percent of baseline per check) at which the velocity weight saturates
    pub velocity_reference_pct: f64,
    /// Consistency weight when consistency is zero
    pub consistency_floor: f64,
    /// Checks at which data quantity stops adding confidence
    pub confidence_saturation_checks: usize,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            severity_weights: SeverityWeights::default(),
            velocity_reference_pct: 5.0,
            consistency_floor: 0.5,
            confidence_saturation_checks: 14,
        }
    }
}

/// Trend classification constants
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrendConfig {
    /// Minimum fraction of window steps in one direction
    pub consistency: f64,
    /// Minimum number of consecutive checks moving in that direction
    pub min_run: usize,
    /// Steps below `noise_z` baseline deviations count as flat
    pub noise_z: f64,
}

impl Default for TrendConfig {
    fn default() -> Self {
        Self {
            consistency: 0.75,
            min_run: 3,
            noise_z: 0.25,
        }
    }
}

/// Safety gate constants
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SafetyConfig {
    /// Concurrent major-severity metrics that force escalation
    pub major_concurrency_limit: usize,
    /// Escalate when symptoms are reported alongside moderate-or-worse drift
    pub escalate_on_symptoms_with_drift: bool,
}

impl Default for SafetyConfig {
    fn default() -> Self {
        Self {
            major_concurrency_limit: 2,
            escalate_on_symptoms_with_drift: true,
        }
    }
}

/// Retry policy applied at the data-fetch boundary, never inside the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub multiplier: f64,
    pub max_backoff_ms: u64,
    /// Per-attempt timeout
    pub timeout_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff_ms: 200,
            multiplier: 2.0,
            max_backoff_ms: 2_000,
            timeout_ms: 5_000,
        }
    }
}

impl RetryPolicy {
    /// Delay before attempt `attempt + 1`, where `attempt` starts at 1
    pub fn backoff_ms(&self, attempt: u32) -> u64 {
        let exponent = attempt.saturating_sub(1) as i32;
        let delay = self.initial_backoff_ms as f64 * self.multiplier.powi(exponent);
        if delay.is_finite() {
            (delay as u64).min(self.max_backoff_ms)
        } else {
            self.max_backoff_ms
        }
    }
}

/// Every tunable of the pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub baseline_min_samples: usize,
    pub trend_window: usize,
    pub severity_thresholds: SeverityThresholds,
    pub urgency_thresholds: UrgencyThresholds,
    pub red_flag_keywords: Vec<String>,
    /// Correlation rule key to weight (0-1)
    pub correlation_weights: BTreeMap<String, f64>,
    pub scoring: ScoringConfig,
    pub trend: TrendConfig,
    pub safety: SafetyConfig,
    pub max_recommendations: usize,
    pub retry: RetryPolicy,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            baseline_min_samples: DEFAULT_BASELINE_MIN_SAMPLES,
            trend_window: DEFAULT_TREND_WINDOW,
            severity_thresholds: SeverityThresholds::default(),
            urgency_thresholds: UrgencyThresholds::default(),
            red_flag_keywords: default_red_flag_keywords(),
            correlation_weights: default_correlation_weights(),
            scoring: ScoringConfig::default(),
            trend: TrendConfig::default(),
            safety: SafetyConfig::default(),
            max_recommendations: 4,
            retry: RetryPolicy::default(),
        }
    }
}

fn default_red_flag_keywords() -> Vec<String> {
    [
        "fall",
        "fell",
        "fainted",
        "chest pain",
        "severe pain",
        "shortness of breath",
        "numbness",
        "confusion",
    ]
    .iter()
    .map(|k| k.to_string())
    .collect()
}

impl PipelineConfig {
    /// Create a config with a specific baseline sample requirement
    pub fn with_baseline_min_samples(samples: usize) -> Self {
        Self {
            baseline_min_samples: samples,
            ..Self::default()
        }
    }

    /// Load configuration from JSON
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Serialize configuration to JSON
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Weight for a correlation rule, zero when the rule is disabled
    pub fn correlation_weight(&self, rule: &str) -> f64 {
        self.correlation_weights.get(rule).copied().unwrap_or(0.0)
    }

    /// Reject configurations that would break ordering or monotonicity
    pub fn validate(&self) -> Result<(), InputValidationError> {
        let invalid = |msg: String| Err(InputValidationError::InvalidConfig(msg));

        if self.baseline_min_samples == 0 {
            return invalid("baseline_min_samples must be at least 1".to_string());
        }
        if self.trend_window < 2 {
            return invalid("trend_window must be at least 2".to_string());
        }

        let s = &self.severity_thresholds;
        if !ordered_non_negative(&[s.minor, s.moderate, s.major]) {
            return invalid(format!(
                "severity_thresholds must be finite, non-negative and ascending, got {:?}",
                s
            ));
        }

        let u = &self.urgency_thresholds;
        if !ordered_non_negative(&[u.low, u.moderate, u.high, u.critical])
            || u.critical > MAX_RISK_SCORE
        {
            return invalid(format!(
                "urgency_thresholds must be ascending within [0, 10], got {:?}",
                u
            ));
        }

        let w = &self.scoring.severity_weights;
        if !ordered_non_negative(&[w.minor, w.moderate, w.major]) {
            return invalid(format!(
                "severity_weights must be finite, non-negative and ascending, got {:?}",
                w
            ));
        }
        if !(self.scoring.velocity_reference_pct.is_finite()
            && self.scoring.velocity_reference_pct > 0.0)
        {
            return invalid("velocity_reference_pct must be positive".to_string());
        }
        if !(0.0..=1.0).contains(&self.scoring.consistency_floor) {
            return invalid("consistency_floor must be within [0, 1]".to_string());
        }
        if self.scoring.confidence_saturation_checks == 0 {
            return invalid("confidence_saturation_checks must be at least 1".to_string());
        }

        if !(self.trend.consistency > 0.5 && self.trend.consistency <= 1.0) {
            return invalid("trend.consistency must be within (0.5, 1]".to_string());
        }
        if self.trend.min_run < 2 {
            return invalid("trend.min_run must be at least 2".to_string());
        }
        if !(self.trend.noise_z.is_finite() && self.trend.noise_z >= 0.0) {
            return invalid("trend.noise_z must be finite and non-negative".to_string());
        }

        for (rule, weight) in &self.correlation_weights {
            if !(weight.is_finite() && (0.0..=1.0).contains(weight)) {
                return invalid(format!(
                    "correlation weight for {} must be within [0, 1], got {}",
                    rule, weight
                ));
            }
        }
        if self.red_flag_keywords.iter().any(|k| k.trim().is_empty()) {
            return invalid("red_flag_keywords must not contain empty keywords".to_string());
        }
        if self.max_recommendations == 0 {
            return invalid("max_recommendations must be at least 1".to_string());
        }
        if self.safety.major_concurrency_limit == 0 {
            return invalid("major_concurrency_limit must be at least 1".to_string());
        }

        if self.retry.max_attempts == 0 {
            return invalid("retry.max_attempts must be at least 1".to_string());
        }
        if !(self.retry.multiplier.is_finite() && self.retry.multiplier >= 1.0) {
            return invalid("retry.multiplier must be at least 1".to_string());
        }

        Ok(())
    }
}

fn ordered_non_negative(values: &[f64]) -> bool {
    values.iter().all(|v| v.is_finite() && *v >= 0.0) && values.windows(2).all(|w| w[0] <= w[1])
}
