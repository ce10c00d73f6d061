//! Score normalization
//!
//! This module turns raw health-check scores into pipeline metric samples.
//! - Percent scores (0-100) divided by 100
//! - Every value clamped to [0, 1]
//! - Non-finite values dropped and flagged

use crate::types::{ActivityType, MetricSample};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Scale a raw check reports its scores on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScoreScale {
    /// 0-100
    #[default]
    Percent,
    /// 0-1
    Unit,
}

/// One health check as captured upstream, before normalization
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawCheck {
    pub user_id: String,
    pub activity_type: ActivityType,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub scale: ScoreScale,
    pub scores: BTreeMap<String, f64>,
}

/// Something the normalizer had to change
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "flag", rename_all = "snake_case")]
pub enum NormalizationFlag {
    /// Value fell outside the scale and was clamped
    Clamped { metric: String, raw: f64 },
    /// NaN or infinite value, dropped
    NonFinite { metric: String },
}

/// A normalized sample and what it took to get there
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedCheck {
    pub sample: MetricSample,
    pub flags: Vec<NormalizationFlag>,
}

/// Normalizer for raw checks
pub struct MetricNormalizer;

impl MetricNormalizer {
    pub fn normalize_check(raw: &RawCheck) -> NormalizedCheck {
        let mut flags = Vec::new();
        let mut metrics = BTreeMap::new();

        for (metric, &value) in &raw.scores {
            if !value.is_finite() {
                flags.push(NormalizationFlag::NonFinite {
                    metric: metric.clone(),
                });
                continue;
            }

            let scaled = match raw.scale {
                ScoreScale::Percent => value / 100.0,
                ScoreScale::Unit => value,
            };
            let clamped = scaled.clamp(0.0, 1.0);
            if clamped != scaled {
                flags.push(NormalizationFlag::Clamped {
                    metric: metric.clone(),
                    raw: value,
                });
            }
            metrics.insert(metric.clone(), clamped);
        }

        NormalizedCheck {
            sample: MetricSample {
                user_id: raw.user_id.clone(),
                activity_type: raw.activity_type.clone(),
                timestamp: raw.timestamp,
                metrics,
            },
            flags,
        }
    }

    /// Normalize a batch, sorted by timestamp (stable for equal timestamps)
    pub fn normalize_all(raw: &[RawCheck]) -> Vec<NormalizedCheck> {
        let mut checks: Vec<NormalizedCheck> = raw.iter().map(Self::normalize_check).collect();
        checks.sort_by_key(|c| c.sample.timestamp);
        checks
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn make_raw(scale: ScoreScale, scores: &[(&str, f64)]) -> RawCheck {
        RawCheck {
            user_id: "user-1".to_string(),
            activity_type: ActivityType::SteadyHands,
            timestamp: Utc.with_ymd_and_hms(2024, 3, 1, 8, 0, 0).unwrap(),
            scale,
            scores: scores.iter().map(|(k, v)| (k.to_string(), *v)).collect(),
        }
    }

    #[test]
    fn test_percent_scores() {
        let raw = make_raw(ScoreScale::Percent, &[("stability", 92.0), ("movement_speed", 45.5)]);
        let check = MetricNormalizer::normalize_check(&raw);

        assert!((check.sample.value("stability").unwrap() - 0.92).abs() < 1e-12);
        assert!((check.sample.value("movement_speed").unwrap() - 0.455).abs() < 1e-12);
        assert!(check.flags.is_empty());
    }

    #[test]
    fn test_out_of_range_is_clamped_and_flagged() {
        let raw = make_raw(ScoreScale::Unit, &[("stability", 1.3), ("smoothness", -0.2)]);
        let check = MetricNormalizer::normalize_check(&raw);

        assert_eq!(check.sample.value("stability"), Some(1.0));
        assert_eq!(check.sample.value("smoothness"), Some(0.0));
        assert_eq!(check.flags.len(), 2);
        assert!(check.flags.contains(&NormalizationFlag::Clamped {
            metric: "stability".to_string(),
            raw: 1.3
        }));
    }

    #[test]
    fn test_non_finite_is_dropped() {
        let raw = make_raw(ScoreScale::Percent, &[("stability", f64::NAN), ("speed", 50.0)]);
        let check = MetricNormalizer::normalize_check(&raw);

        assert_eq!(check.sample.value("stability"), None);
        assert_eq!(check.sample.value("speed"), Some(0.5));
        assert_eq!(
            check.flags,
            vec![NormalizationFlag::NonFinite {
                metric: "stability".to_string()
            }]
        );
    }

    #[test]
    fn test_scale_defaults_to_percent() {
        let raw: RawCheck = serde_json::from_str(
            r#"{"user_id":"u","activity_type":"short_walk","timestamp":"2024-03-01T08:00:00Z","scores":{"walk_stability":80}}"#,
        )
        .unwrap();
        assert_eq!(raw.scale, ScoreScale::Percent);
        let check = MetricNormalizer::normalize_check(&raw);
        assert_eq!(check.sample.value("walk_stability"), Some(0.8));
    }

    #[test]
    fn test_normalize_all_sorts_chronologically() {
        let mut later = make_raw(ScoreScale::Percent, &[("stability", 80.0)]);
        later.timestamp = later.timestamp + chrono::Duration::days(1);
        let earlier = make_raw(ScoreScale::Percent, &[("stability", 90.0)]);

        let checks = MetricNormalizer::normalize_all(&[later, earlier]);
        assert_eq!(checks[0].sample.value("stability"), Some(0.9));
        assert_eq!(checks[1].sample.value("stability"), Some(0.8));
    }
}
