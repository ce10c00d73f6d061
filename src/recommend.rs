//! Recommendation synthesis
//!
//! Maps the safety decision and the ranked context factors onto a fixed
//! catalog of generic action templates. No free-form text is generated.

use crate::config::PipelineConfig;
use crate::context::ACTIVITY_VERY_ACTIVE;
use crate::types::{
    ActionTemplate, CareRecommendation, ContextKind, FactorCorrelation, RiskAssessment,
    SafetyDecision, UrgencyTier,
};

impl ActionTemplate {
    /// Fixed action text for the template
    pub fn action(&self) -> &'static str {
        match self {
            ActionTemplate::ProfessionalReview => {
                "Share these results with a healthcare professional for review"
            }
            ActionTemplate::SleepHygiene => {
                "Keep a consistent sleep schedule and aim for 7 to 9 hours per night"
            }
            ActionTemplate::StressReduction => {
                "Set aside a few minutes each day for a relaxation practice such as slow breathing"
            }
            ActionTemplate::WorkloadPacing => {
                "Pace demanding tasks and plan short recovery breaks"
            }
            ActionTemplate::MobilityExercise => {
                "Add gentle daily movement such as a short walk or sit-to-stand practice"
            }
            ActionTemplate::ContinuedMonitoring => {
                "Keep completing daily checks so changes can be tracked"
            }
        }
    }
}

fn template_for(correlation: &FactorCorrelation) -> ActionTemplate {
    match correlation.factor {
        ContextKind::Sleep => ActionTemplate::SleepHygiene,
        ContextKind::Stress => ActionTemplate::StressReduction,
        ContextKind::Workload => ActionTemplate::WorkloadPacing,
        ContextKind::ActivityLevel if correlation.rule == ACTIVITY_VERY_ACTIVE => {
            ActionTemplate::WorkloadPacing
        }
        ContextKind::ActivityLevel => ActionTemplate::MobilityExercise,
    }
}

/// Recommendation stage; see [`synthesize`]
pub struct RecommendationSynthesizer;

/// Rank action templates for one analysis.
///
/// Professional review comes first whenever the gate escalates or urgency is
/// high or worse. Factor templates follow in correlation order, and continued
/// monitoring closes the list. The list is capped at `max_recommendations`.
pub fn synthesize(
    risk: Option<&RiskAssessment>,
    correlations: &[FactorCorrelation],
    decision: &SafetyDecision,
    config: &PipelineConfig,
) -> Vec<CareRecommendation> {
    let mut picked: Vec<(ActionTemplate, String, f64)> = Vec::new();

    let urgent = risk
        .map(|r| r.urgency >= UrgencyTier::High)
        .unwrap_or(false);
    if decision.escalate || urgent {
        let rationale = if decision.escalate {
            decision.rationale.clone()
        } else {
            "risk urgency is high".to_string()
        };
        picked.push((ActionTemplate::ProfessionalReview, rationale, 1.0));
    }

    for correlation in correlations {
        let template = template_for(correlation);
        if picked.iter().all(|(t, _, _)| *t != template) {
            picked.push((template, correlation.hypothesis.clone(), correlation.weight));
        }
    }

    picked.push((
        ActionTemplate::ContinuedMonitoring,
        "Regular checks keep the comparison with your baseline current".to_string(),
        0.0,
    ));

    picked
        .into_iter()
        .take(config.max_recommendations)
        .enumerate()
        .map(|(i, (template, rationale, weight))| CareRecommendation {
            rank: i as u32 + 1,
            template,
            action: template.action().to_string(),
            rationale,
            weight,
        })
        .collect()
}
