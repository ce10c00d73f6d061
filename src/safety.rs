//! Safety gate
//!
//! Escalation rules, evaluated in order:
//! 1. urgency is critical
//! 2. at least `major_concurrency_limit` metrics at major severity
//! 3. a red-flag keyword in any free-text context field
//! 4. reported symptoms alongside moderate-or-worse drift
//!
//! When no rule fires but the gate has nothing it can classify (no risk
//! assessment, no drift reports), it escalates with "insufficient confidence".
//! A decision is always returned.

use crate::config::PipelineConfig;
use crate::types::{
    ContextFactor, DriftReport, EscalationPriority, RiskAssessment, SafetyDecision, SafetyRule,
    SeverityTier, UrgencyTier,
};
use tracing::info;

pub const INSUFFICIENT_CONFIDENCE: &str = "insufficient confidence";

/// Word endings accepted on a keyword's last token
const INFLECTIONS: [&str; 5] = ["s", "es", "ed", "en", "ing"];

/// Deterministic escalation gate
pub struct SafetyGate;

impl SafetyGate {
    pub fn decide(
        risk: Option<&RiskAssessment>,
        reports: &[DriftReport],
        context: &ContextFactor,
        config: &PipelineConfig,
    ) -> SafetyDecision {
        let mut rules = Vec::new();
        let mut reasons = Vec::new();

        if let Some(risk) = risk {
            if risk.urgency == UrgencyTier::Critical {
                rules.push(SafetyRule::CriticalUrgency);
                reasons.push(format!("risk score {:.1} is critical", risk.score));
            }
        }

        let majors: Vec<String> = reports
            .iter()
            .filter(|r| r.severity == SeverityTier::Major)
            .map(|r| r.metric.clone())
            .collect();
        if majors.len() >= config.safety.major_concurrency_limit {
            reasons.push(format!(
                "{} metrics at major severity ({})",
                majors.len(),
                majors.join(", ")
            ));
            rules.push(SafetyRule::ConcurrentMajorDrift { metrics: majors });
        }

        let red_flags = scan_red_flags(context, &config.red_flag_keywords);
        if !red_flags.is_empty() {
            reasons.push(format!("red-flag keyword reported: {}", red_flags.join(", ")));
            rules.extend(
                red_flags
                    .iter()
                    .map(|k| SafetyRule::RedFlagKeyword { keyword: k.clone() }),
            );
        }

        if config.safety.escalate_on_symptoms_with_drift
            && context.has_reported_symptoms()
            && reports.iter().any(|r| r.severity >= SeverityTier::Moderate)
        {
            rules.push(SafetyRule::SymptomsWithDrift);
            reasons.push("symptoms reported alongside measurable drift".to_string());
        }

        let confident =
            risk.map(|r| r.score.is_finite()).unwrap_or(false) && !reports.is_empty();

        let (escalate, rationale) = if !rules.is_empty() {
            (true, reasons.join("; "))
        } else if !confident {
            rules.push(SafetyRule::InsufficientConfidence);
            (true, INSUFFICIENT_CONFIDENCE.to_string())
        } else {
            let urgency = risk.map(|r| r.urgency.as_str()).unwrap_or("low");
            (false, format!("no escalation criteria met (urgency {})", urgency))
        };

        let priority = if !escalate {
            EscalationPriority::None
        } else if reports
            .iter()
            .any(|r| r.delta_pct.abs() > config.severity_thresholds.major)
        {
            EscalationPriority::Prompt
        } else {
            EscalationPriority::Routine
        };

        if escalate {
            info!(?priority, rationale = %rationale, "escalating for professional review");
        }

        SafetyDecision {
            escalate,
            rationale,
            red_flags,
            triggered_rules: rules,
            priority,
        }
    }
}

/// Keywords found in the context's free text, in configuration order
pub fn scan_red_flags(context: &ContextFactor, keywords: &[String]) -> Vec<String> {
    let texts: Vec<Vec<String>> = context.free_text().map(tokenize).collect();

    keywords
        .iter()
        .filter(|keyword| {
            let needle = tokenize(keyword);
            !needle.is_empty() && texts.iter().any(|hay| contains_phrase(hay, &needle))
        })
        .cloned()
        .collect()
}

fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
        .collect()
}

fn contains_phrase(hay: &[String], needle: &[String]) -> bool {
    hay.windows(needle.len()).any(|window| {
        window
            .iter()
            .zip(needle)
            .enumerate()
            .all(|(i, (word, kw))| {
                word == kw || (i == needle.len() - 1 && is_inflection_of(word, kw))
            })
    })
}

fn is_inflection_of(word: &str, keyword: &str) -> bool {
    word.strip_prefix(keyword)
        .map(|rest| INFLECTIONS.contains(&rest))
        .unwrap_or(false)
}
