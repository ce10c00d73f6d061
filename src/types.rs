//! Core types for the MediGuard Drift pipeline
//!
//! This module defines the records that flow between stages: metric samples,
//! baselines, drift reports, context correlations, risk assessments, safety
//! decisions, care recommendations and the final analysis result.
//!
//! Records are immutable once produced. Every map is a `BTreeMap` so that the
//! serialized form of a result depends only on its contents.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Guided activity a metric sample was captured during
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityType {
    SitToStand,
    ShortWalk,
    SteadyHands,
    /// Any activity not in the fixed catalog
    #[serde(untagged)]
    Other(String),
}

impl ActivityType {
    pub fn as_str(&self) -> &str {
        match self {
            ActivityType::SitToStand => "sit_to_stand",
            ActivityType::ShortWalk => "short_walk",
            ActivityType::SteadyHands => "steady_hands",
            ActivityType::Other(name) => name.as_str(),
        }
    }
}

/// One recorded check: metric name to normalized value in [0, 1]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSample {
    pub user_id: String,
    pub activity_type: ActivityType,
    pub timestamp: DateTime<Utc>,
    pub metrics: BTreeMap<String, f64>,
}

impl MetricSample {
    pub fn value(&self, metric: &str) -> Option<f64> {
        self.metrics.get(metric).copied()
    }
}

/// Reference statistics for one metric
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MetricBaseline {
    pub mean: f64,
    /// Population standard deviation
    pub stdev: f64,
    pub sample_count: u32,
}

/// Per-user baseline over every metric with enough samples
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BaselineSet {
    pub user_id: String,
    pub computed_at: DateTime<Utc>,
    /// Number of samples the baseline window spans
    pub sample_count: u32,
    pub metrics: BTreeMap<String, MetricBaseline>,
}

impl BaselineSet {
    pub fn metric(&self, name: &str) -> Option<&MetricBaseline> {
        self.metrics.get(name)
    }
}

/// Explicit marker for a history too short to establish a baseline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InsufficientBaseline {
    pub required: usize,
    pub available: usize,
}

/// Result of baseline estimation: a first-class state, not an error
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum BaselineOutcome {
    Established(BaselineSet),
    Insufficient(InsufficientBaseline),
}

/// Direction of a metric across the recent window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrendDirection {
    Declining,
    Stable,
    Improving,
}

impl TrendDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            TrendDirection::Declining => "declining",
            TrendDirection::Stable => "stable",
            TrendDirection::Improving => "improving",
        }
    }
}

/// Coarse bucket for drift magnitude. Ordered from least to most severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SeverityTier {
    Minor,
    Moderate,
    Major,
}

impl SeverityTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            SeverityTier::Minor => "minor",
            SeverityTier::Moderate => "moderate",
            SeverityTier::Major => "major",
        }
    }
}

/// Drift of one metric's current value against its baseline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DriftReport {
    pub metric: String,
    pub current: f64,
    pub baseline_mean: f64,
    pub baseline_stdev: f64,
    /// (current - mean) / mean * 100
    pub delta_pct: f64,
    /// None when the baseline stdev is zero
    pub z_score: Option<f64>,
    pub trend: TrendDirection,
    pub severity: SeverityTier,
    /// Least-squares slope over the window, percent of baseline mean per check
    pub velocity: f64,
    /// Fraction of window steps moving with the overall trend (0-1)
    pub consistency: f64,
    /// Number of checks in the trend window
    pub window_len: usize,
}

/// Output of the drift detector for one metric
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum DriftOutcome {
    Drift(DriftReport),
    /// Baseline mean is zero, so a relative delta does not exist
    NoDriftComputable { metric: String, current: f64 },
}

/// Self-reported stress level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StressLevel {
    Low,
    #[default]
    Medium,
    High,
}

/// Self-reported workload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Workload {
    Light,
    #[default]
    Moderate,
    Heavy,
}

/// Self-reported activity level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityLevel {
    Sedentary,
    LightlyActive,
    #[default]
    ModeratelyActive,
    VeryActive,
}

/// Lifestyle context for one user
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContextFactor {
    /// Average sleep per night (hours)
    pub sleep_hours: f64,
    pub stress_level: StressLevel,
    pub workload: Workload,
    pub activity_level: ActivityLevel,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub medical_summary: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub known_conditions: Option<String>,
    pub reported_symptoms: Vec<String>,
}

impl Default for ContextFactor {
    fn default() -> Self {
        Self {
            sleep_hours: 7.0,
            stress_level: StressLevel::default(),
            workload: Workload::default(),
            activity_level: ActivityLevel::default(),
            notes: None,
            medical_summary: None,
            known_conditions: None,
            reported_symptoms: Vec::new(),
        }
    }
}

impl ContextFactor {
    /// Every free-text field, in a fixed order. Only scanned for red-flag keywords.
    pub fn free_text(&self) -> impl Iterator<Item = &str> {
        self.notes
            .as_deref()
            .into_iter()
            .chain(self.medical_summary.as_deref())
            .chain(self.known_conditions.as_deref())
            .chain(self.reported_symptoms.iter().map(String::as_str))
    }

    pub fn has_reported_symptoms(&self) -> bool {
        self.reported_symptoms.iter().any(|s| !s.trim().is_empty())
    }
}

/// Lifestyle factor family. Declaration order is the tie-break priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContextKind {
    Sleep,
    Stress,
    Workload,
    ActivityLevel,
}

impl ContextKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContextKind::Sleep => "sleep",
            ContextKind::Stress => "stress",
            ContextKind::Workload => "workload",
            ContextKind::ActivityLevel => "activity_level",
        }
    }
}

/// A possible contributing factor, never a cause
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FactorCorrelation {
    pub factor: ContextKind,
    /// Key of the rule that matched (e.g. "sleep_short")
    pub rule: String,
    pub weight: f64,
    pub hypothesis: String,
    /// Drifting metrics the hypothesis may relate to
    pub related_metrics: Vec<String>,
}

/// Urgency bucket for a risk score. Ordered from least to most urgent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UrgencyTier {
    Low,
    Moderate,
    High,
    Critical,
}

impl UrgencyTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            UrgencyTier::Low => "low",
            UrgencyTier::Moderate => "moderate",
            UrgencyTier::High => "high",
            UrgencyTier::Critical => "critical",
        }
    }
}

/// One metric's share of the risk score
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskContribution {
    pub report: DriftReport,
    pub severity_weight: f64,
    pub velocity_weight: f64,
    pub consistency_weight: f64,
    pub contribution: f64,
}

/// Composite risk over all drifting metrics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskAssessment {
    /// Clamped to [0, 10]
    pub score: f64,
    pub urgency: UrgencyTier,
    /// Velocity of the dominant contributor (percent of baseline per check)
    pub trend_velocity: f64,
    /// Consistency of the dominant contributor (0-1)
    pub consistency: f64,
    /// Confidence in the assessment (0-1)
    pub confidence: f64,
    /// Dominant contributor deviates more in the second half of the window
    pub accelerating: bool,
    /// Ordered by contribution, then metric name
    pub contributing: Vec<RiskContribution>,
}

/// A safety rule that fired
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "rule", rename_all = "snake_case")]
pub enum SafetyRule {
    CriticalUrgency,
    ConcurrentMajorDrift { metrics: Vec<String> },
    RedFlagKeyword { keyword: String },
    SymptomsWithDrift,
    InsufficientConfidence,
}

/// How soon an escalation should be acted on
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EscalationPriority {
    None,
    Routine,
    Prompt,
}

/// Deterministic escalation decision. Always produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SafetyDecision {
    pub escalate: bool,
    pub rationale: String,
    pub red_flags: Vec<String>,
    pub triggered_rules: Vec<SafetyRule>,
    pub priority: EscalationPriority,
}

/// Fixed catalog of generic action templates
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionTemplate {
    ProfessionalReview,
    SleepHygiene,
    StressReduction,
    WorkloadPacing,
    MobilityExercise,
    ContinuedMonitoring,
}

impl ActionTemplate {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionTemplate::ProfessionalReview => "professional_review",
            ActionTemplate::SleepHygiene => "sleep_hygiene",
            ActionTemplate::StressReduction => "stress_reduction",
            ActionTemplate::WorkloadPacing => "workload_pacing",
            ActionTemplate::MobilityExercise => "mobility_exercise",
            ActionTemplate::ContinuedMonitoring => "continued_monitoring",
        }
    }
}

/// One ranked (action, rationale) pair
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CareRecommendation {
    /// 1-based position in the ranked list
    pub rank: u32,
    pub template: ActionTemplate,
    pub action: String,
    pub rationale: String,
    pub weight: f64,
}

/// Top-level completion status of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AnalysisStatus {
    Complete,
    Partial,
    InsufficientData,
}

impl AnalysisStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnalysisStatus::Complete => "complete",
            AnalysisStatus::Partial => "partial",
            AnalysisStatus::InsufficientData => "insufficient-data",
        }
    }
}

/// Non-fatal anomaly recorded during a run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "marker", rename_all = "snake_case")]
pub enum PipelineMarker {
    /// `metric` is None when the whole history is too short
    InsufficientBaseline {
        metric: Option<String>,
        required: usize,
        available: usize,
    },
    NoDriftComputable { metric: String },
    MissingCurrentMetric { metric: String },
    AmbiguousContext {
        tied: Vec<ContextKind>,
        chosen: ContextKind,
    },
    DataFetchTimeout { attempts: u32, elapsed_ms: u64 },
    DataFetchFailed { attempts: u32, reason: String },
}

impl PipelineMarker {
    /// Whether the marker means some stage ran on degraded input
    pub fn is_degrading(&self) -> bool {
        !matches!(self, PipelineMarker::AmbiguousContext { .. })
    }
}

/// Final record of one pipeline run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    /// Deterministic id derived from (user, as_of, sample count)
    pub run_id: Uuid,
    pub user_id: String,
    pub as_of: DateTime<Utc>,
    pub status: AnalysisStatus,
    pub baseline: Option<BaselineSet>,
    pub drift_reports: Vec<DriftReport>,
    pub correlations: Vec<FactorCorrelation>,
    pub risk_assessment: Option<RiskAssessment>,
    pub safety_decision: SafetyDecision,
    pub recommendations: Vec<CareRecommendation>,
    pub markers: Vec<PipelineMarker>,
    /// Stage names in execution order
    pub stages: Vec<String>,
}

impl AnalysisResult {
    pub fn drift_for(&self, metric: &str) -> Option<&DriftReport> {
        self.drift_reports.iter().find(|r| r.metric == metric)
    }
}
