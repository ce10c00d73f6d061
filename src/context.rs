//! Context correlation
//!
//! A fixed rule table maps lifestyle factor states to correlation weights and
//! hypotheses. Every hypothesis is phrased as a possible contributing factor.
//! Output is ranked by weight; ties are broken by factor priority
//! (sleep, stress, workload, activity level).

use crate::config::PipelineConfig;
use crate::types::{
    ActivityLevel, ContextFactor, ContextKind, DriftReport, FactorCorrelation, PipelineMarker,
    SeverityTier, StressLevel, TrendDirection, Workload,
};
use std::collections::BTreeMap;
use tracing::debug;

pub const SLEEP_SHORT: &str = "sleep_short";
pub const SLEEP_REDUCED: &str = "sleep_reduced";
pub const SLEEP_LONG: &str = "sleep_long";
pub const STRESS_HIGH: &str = "stress_high";
pub const STRESS_MEDIUM: &str = "stress_medium";
pub const WORKLOAD_HEAVY: &str = "workload_heavy";
pub const WORKLOAD_MODERATE: &str = "workload_moderate";
pub const ACTIVITY_SEDENTARY: &str = "activity_sedentary";
pub const ACTIVITY_LIGHT: &str = "activity_light";
pub const ACTIVITY_VERY_ACTIVE: &str = "activity_very_active";

/// Sleep below this many hours is short
const SHORT_SLEEP_HOURS: f64 = 6.0;
/// Sleep below this many hours is reduced
const REDUCED_SLEEP_HOURS: f64 = 7.0;
/// Sleep above this many hours is long
const LONG_SLEEP_HOURS: f64 = 9.0;

/// Default weight for every correlation rule
pub fn default_correlation_weights() -> BTreeMap<String, f64> {
    [
        (SLEEP_SHORT, 0.8),
        (SLEEP_REDUCED, 0.5),
        (SLEEP_LONG, 0.3),
        (STRESS_HIGH, 0.7),
        (STRESS_MEDIUM, 0.35),
        (WORKLOAD_HEAVY, 0.6),
        (WORKLOAD_MODERATE, 0.2),
        (ACTIVITY_SEDENTARY, 0.6),
        (ACTIVITY_LIGHT, 0.3),
        (ACTIVITY_VERY_ACTIVE, 0.25),
    ]
    .iter()
    .map(|(rule, weight)| (rule.to_string(), *weight))
    .collect()
}

/// A rule that matched the current context
struct RuleMatch {
    factor: ContextKind,
    rule: &'static str,
    hypothesis: String,
}

fn sleep_rule(hours: f64) -> Option<RuleMatch> {
    let (rule, hypothesis) = if hours < SHORT_SLEEP_HOURS {
        (
            SLEEP_SHORT,
            format!(
                "Sleeping {:.1} h per night may reduce balance and movement speed",
                hours
            ),
        )
    } else if hours < REDUCED_SLEEP_HOURS {
        (
            SLEEP_REDUCED,
            format!(
                "Slightly reduced sleep ({:.1} h) may contribute to lower stability",
                hours
            ),
        )
    } else if hours > LONG_SLEEP_HOURS {
        (
            SLEEP_LONG,
            format!(
                "Unusually long sleep ({:.1} h) may accompany fatigue that slows movement",
                hours
            ),
        )
    } else {
        return None;
    };
    Some(RuleMatch {
        factor: ContextKind::Sleep,
        rule,
        hypothesis,
    })
}

fn stress_rule(level: StressLevel) -> Option<RuleMatch> {
    let (rule, hypothesis) = match level {
        StressLevel::High => (
            STRESS_HIGH,
            "High stress may affect fine motor control and steadiness",
        ),
        StressLevel::Medium => (
            STRESS_MEDIUM,
            "Moderate stress may contribute to small changes in steadiness",
        ),
        StressLevel::Low => return None,
    };
    Some(RuleMatch {
        factor: ContextKind::Stress,
        rule,
        hypothesis: hypothesis.to_string(),
    })
}

fn workload_rule(workload: Workload) -> Option<RuleMatch> {
    let (rule, hypothesis) = match workload {
        Workload::Heavy => (
            WORKLOAD_HEAVY,
            "A heavy workload may leave less energy for physical tasks",
        ),
        Workload::Moderate => (
            WORKLOAD_MODERATE,
            "Workload may contribute to day-to-day variation in performance",
        ),
        Workload::Light => return None,
    };
    Some(RuleMatch {
        factor: ContextKind::Workload,
        rule,
        hypothesis: hypothesis.to_string(),
    })
}

fn activity_rule(level: ActivityLevel) -> Option<RuleMatch> {
    let (rule, hypothesis) = match level {
        ActivityLevel::Sedentary => (
            ACTIVITY_SEDENTARY,
            "Low daily activity may reduce mobility and walking speed",
        ),
        ActivityLevel::LightlyActive => (
            ACTIVITY_LIGHT,
            "Limited daily activity may contribute to reduced mobility",
        ),
        ActivityLevel::VeryActive => (
            ACTIVITY_VERY_ACTIVE,
            "High activity may cause short-term fatigue that affects stability",
        ),
        ActivityLevel::ModeratelyActive => return None,
    };
    Some(RuleMatch {
        factor: ContextKind::ActivityLevel,
        rule,
        hypothesis: hypothesis.to_string(),
    })
}

/// Ranked correlations plus a marker when the top rank is tied
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ContextCorrelation {
    pub correlations: Vec<FactorCorrelation>,
    pub marker: Option<PipelineMarker>,
}

impl ContextCorrelation {
    /// Highest-ranked factor, if any
    pub fn top(&self) -> Option<&FactorCorrelation> {
        self.correlations.first()
    }
}

/// Deterministic rule-table correlator
pub struct ContextCorrelator;

impl ContextCorrelator {
    /// Tag drifting metrics with plausible lifestyle factors.
    ///
    /// Nothing is emitted when no metric is drifting. A rule with weight zero
    /// (or missing from the config) is disabled.
    pub fn correlate(
        reports: &[DriftReport],
        context: &ContextFactor,
        config: &PipelineConfig,
    ) -> ContextCorrelation {
        let related: Vec<String> = reports
            .iter()
            .filter(|r| is_drifting(r))
            .map(|r| r.metric.clone())
            .collect();

        if related.is_empty() {
            debug!("no drifting metrics, skipping correlation");
            return ContextCorrelation::default();
        }

        let mut correlations: Vec<FactorCorrelation> = [
            sleep_rule(context.sleep_hours),
            stress_rule(context.stress_level),
            workload_rule(context.workload),
            activity_rule(context.activity_level),
        ]
        .into_iter()
        .flatten()
        .filter_map(|m| {
            let weight = config.correlation_weight(m.rule);
            (weight > 0.0).then(|| FactorCorrelation {
                factor: m.factor,
                rule: m.rule.to_string(),
                weight,
                hypothesis: m.hypothesis,
                related_metrics: related.clone(),
            })
        })
        .collect();

        correlations.sort_by(|a, b| {
            b.weight
                .total_cmp(&a.weight)
                .then_with(|| a.factor.cmp(&b.factor))
        });

        let marker = tie_marker(&correlations);
        if let Some(PipelineMarker::AmbiguousContext { tied, chosen }) = &marker {
            debug!(?tied, ?chosen, "top context factors tied, resolved by priority");
        }

        ContextCorrelation {
            correlations,
            marker,
        }
    }
}

/// Moderate-or-worse severity, or a declining trend
fn is_drifting(report: &DriftReport) -> bool {
    report.severity >= SeverityTier::Moderate || report.trend == TrendDirection::Declining
}

fn tie_marker(ranked: &[FactorCorrelation]) -> Option<PipelineMarker> {
    let top = ranked.first()?;
    let tied: Vec<ContextKind> = ranked
        .iter()
        .take_while(|c| c.weight == top.weight)
        .map(|c| c.factor)
        .collect();

    (tied.len() > 1).then(|| PipelineMarker::AmbiguousContext {
        tied,
        chosen: top.factor,
    })
}
