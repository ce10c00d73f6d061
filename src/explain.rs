//! Explanation port
//!
//! Turns a finished [`AnalysisResult`] into user-facing text. Explainers only
//! ever see the result by shared reference, so nothing they produce can feed
//! back into the decision. A generative explainer plugs in behind
//! [`Explainer`]; [`RuleBasedExplainer`] is the deterministic default and the
//! fallback when another explainer fails.

use crate::error::ExplainError;
use crate::types::{
    AnalysisResult, AnalysisStatus, DriftReport, EscalationPriority, PipelineMarker,
    TrendDirection,
};
use serde::{Deserialize, Serialize};
use tracing::warn;

pub const DISCLAIMER: &str = "This is not a medical diagnosis. It describes changes in your own \
measurements and suggests when a professional review may help.";

/// Number of metrics named in a summary
const SUMMARY_METRICS: usize = 3;

/// User-facing rendering of a result
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Explanation {
    pub summary: String,
    pub safety_message: String,
    pub next_steps: Vec<String>,
    pub disclaimer: String,
    /// Name of the explainer that produced this text
    pub source: String,
}

impl Explanation {
    fn check(self) -> Result<Self, ExplainError> {
        if self.summary.trim().is_empty() || self.safety_message.trim().is_empty() {
            return Err(ExplainError::InvalidOutput(
                "summary and safety message are required".to_string(),
            ));
        }
        Ok(self)
    }
}

/// Anything that can render a result as text
pub trait Explainer {
    fn name(&self) -> &str;

    fn explain(&self, result: &AnalysisResult) -> Result<Explanation, ExplainError>;
}

/// Deterministic template-based explainer
#[derive(Debug, Clone, Copy, Default)]
pub struct RuleBasedExplainer;

impl RuleBasedExplainer {
    fn render(&self, result: &AnalysisResult) -> Explanation {
        Explanation {
            summary: summary(result),
            safety_message: safety_message(result),
            next_steps: result
                .recommendations
                .iter()
                .map(|r| r.action.clone())
                .collect(),
            disclaimer: DISCLAIMER.to_string(),
            source: self.name().to_string(),
        }
    }
}

impl Explainer for RuleBasedExplainer {
    fn name(&self) -> &str {
        "rule_based"
    }

    fn explain(&self, result: &AnalysisResult) -> Result<Explanation, ExplainError> {
        Ok(self.render(result))
    }
}

/// Explain with `primary`, falling back to the rule-based explainer when it
/// fails or returns unusable text. Always returns an explanation.
pub fn explain_with_fallback(primary: &dyn Explainer, result: &AnalysisResult) -> Explanation {
    match primary.explain(result).and_then(Explanation::check) {
        Ok(explanation) => explanation,
        Err(e) => {
            warn!(explainer = primary.name(), error = %e, "explainer failed, using rule-based text");
            RuleBasedExplainer.render(result)
        }
    }
}

fn summary(result: &AnalysisResult) -> String {
    if result.status == AnalysisStatus::InsufficientData {
        let counts = result.markers.iter().find_map(|m| match m {
            PipelineMarker::InsufficientBaseline {
                metric: None,
                required,
                available,
            } => Some((*required, *available)),
            _ => None,
        });
        return match counts {
            Some((required, available)) => format!(
                "Not enough checks yet to set your personal baseline ({} of {}).",
                available, required
            ),
            None => "Not enough checks yet to set your personal baseline.".to_string(),
        };
    }

    if result.drift_reports.is_empty() {
        return "No recent measurements could be compared with your baseline.".to_string();
    }

    let mut reports: Vec<&DriftReport> = result.drift_reports.iter().collect();
    reports.sort_by(|a, b| {
        b.delta_pct
            .abs()
            .total_cmp(&a.delta_pct.abs())
            .then_with(|| a.metric.cmp(&b.metric))
    });

    let sentences: Vec<String> = reports
        .iter()
        .take(SUMMARY_METRICS)
        .map(|r| describe(r))
        .collect();
    sentences.join(" ")
}

fn describe(report: &DriftReport) -> String {
    let name = report.metric.replace('_', " ");
    let direction = if report.delta_pct < 0.0 {
        "below"
    } else {
        "above"
    };
    let trend = match report.trend {
        TrendDirection::Declining => " and has been declining",
        TrendDirection::Improving => " and has been improving",
        TrendDirection::Stable => "",
    };
    if report.delta_pct.abs() < 0.05 {
        format!("Your {} is in line with your baseline{}.", name, trend)
    } else {
        format!(
            "Your {} is {:.1}% {} your baseline{}.",
            name,
            report.delta_pct.abs(),
            direction,
            trend
        )
    }
}

fn safety_message(result: &AnalysisResult) -> String {
    let decision = &result.safety_decision;
    if !decision.escalate {
        return "Nothing in these results calls for a professional review right now. \
Keep completing your daily checks."
            .to_string();
    }
    match decision.priority {
        EscalationPriority::Prompt => "Some of your results have changed a lot. Please arrange a \
review with a healthcare professional soon."
            .to_string(),
        _ => "We suggest sharing these results with a healthcare professional at your next \
opportunity."
            .to_string(),
    }
}
