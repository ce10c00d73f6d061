//! Snapshot record and validation

use crate::config::PipelineConfig;
use crate::error::InputValidationError;
use crate::types::{BaselineSet, ContextFactor, MetricSample};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Schema version string for snapshot payloads
pub const SCHEMA_VERSION: &str = "mediguard.snapshot.v1";

fn default_schema_version() -> String {
    SCHEMA_VERSION.to_string()
}

/// Immutable per-request input for one pipeline run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    #[serde(default = "default_schema_version")]
    pub schema_version: String,
    pub user_id: String,
    /// Instant the snapshot was taken
    pub as_of: DateTime<Utc>,
    /// Ascending by timestamp; the last sample is the current one
    pub samples: Vec<MetricSample>,
    #[serde(default)]
    pub context: ContextFactor,
    /// Previously established baseline, reused unless `rebaseline` is set
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stored_baseline: Option<BaselineSet>,
    /// Explicit request to recompute the baseline from `samples`
    #[serde(default)]
    pub rebaseline: bool,
}

impl Snapshot {
    pub fn new(
        user_id: impl Into<String>,
        as_of: DateTime<Utc>,
        samples: Vec<MetricSample>,
        context: ContextFactor,
    ) -> Self {
        Self {
            schema_version: SCHEMA_VERSION.to_string(),
            user_id: user_id.into(),
            as_of,
            samples,
            context,
            stored_baseline: None,
            rebaseline: false,
        }
    }

    pub fn with_stored_baseline(mut self, baseline: BaselineSet) -> Self {
        self.stored_baseline = Some(baseline);
        self
    }

    pub fn with_rebaseline(mut self, rebaseline: bool) -> Self {
        self.rebaseline = rebaseline;
        self
    }

    pub fn from_json(json: &str) -> Result<Self, InputValidationError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// The most recent sample, if any
    pub fn current(&self) -> Option<&MetricSample> {
        self.samples.last()
    }

    /// Reject anything no stage should ever see
    pub fn validate(&self, config: &PipelineConfig) -> Result<(), InputValidationError> {
        config.validate()?;

        if self.schema_version != SCHEMA_VERSION {
            return Err(InputValidationError::SchemaVersion {
                expected: SCHEMA_VERSION.to_string(),
                actual: self.schema_version.clone(),
            });
        }

        if self.user_id.trim().is_empty() {
            return Err(InputValidationError::MissingUserId);
        }

        for (index, sample) in self.samples.iter().enumerate() {
            if sample.user_id != self.user_id {
                return Err(InputValidationError::ForeignSample {
                    index,
                    expected: self.user_id.clone(),
                    actual: sample.user_id.clone(),
                });
            }

            if index > 0 && sample.timestamp < self.samples[index - 1].timestamp {
                return Err(InputValidationError::UnorderedSamples { index });
            }

            if sample.timestamp > self.as_of {
                return Err(InputValidationError::SampleAfterAsOf {
                    index,
                    timestamp: sample.timestamp.to_rfc3339(),
                    as_of: self.as_of.to_rfc3339(),
                });
            }

            for (metric, &value) in &sample.metrics {
                if metric.trim().is_empty() {
                    return Err(InputValidationError::EmptyMetricName { index });
                }
                if !(value.is_finite() && (0.0..=1.0).contains(&value)) {
                    return Err(InputValidationError::MetricOutOfRange {
                        index,
                        metric: metric.clone(),
                        value,
                    });
                }
            }
        }

        let sleep = self.context.sleep_hours;
        if !(sleep.is_finite() && (0.0..=24.0).contains(&sleep)) {
            return Err(InputValidationError::SleepHoursOutOfRange(sleep));
        }

        if let Some(baseline) = &self.stored_baseline {
            validate_stored_baseline(baseline, &self.user_id)?;
        }

        Ok(())
    }
}

fn validate_stored_baseline(
    baseline: &BaselineSet,
    user_id: &str,
) -> Result<(), InputValidationError> {
    let invalid = |metric: &str, reason: String| InputValidationError::InvalidStoredBaseline {
        metric: metric.to_string(),
        reason,
    };

    if baseline.user_id != user_id {
        return Err(invalid(
            "*",
            format!("belongs to user {}", baseline.user_id),
        ));
    }

    for (metric, stats) in &baseline.metrics {
        if !(stats.mean.is_finite() && (0.0..=1.0).contains(&stats.mean)) {
            return Err(invalid(metric, format!("mean {} outside [0, 1]", stats.mean)));
        }
        if !(stats.stdev.is_finite() && stats.stdev >= 0.0) {
            return Err(invalid(
                metric,
                format!("stdev {} must be finite and non-negative", stats.stdev),
            ));
        }
        if stats.sample_count == 0 {
            return Err(invalid(metric, "sample_count is zero".to_string()));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ActivityType, MetricBaseline};
    use chrono::{Duration, TimeZone};

    fn make_sample(day: i64, value: f64) -> MetricSample {
        MetricSample {
            user_id: "user-1".to_string(),
            activity_type: ActivityType::SitToStand,
            timestamp: Utc.with_ymd_and_hms(2024, 3, 1, 8, 0, 0).unwrap() + Duration::days(day),
            metrics: [("movement_speed".to_string(), value)].into_iter().collect(),
        }
    }

    fn make_snapshot(samples: Vec<MetricSample>) -> Snapshot {
        Snapshot::new(
            "user-1",
            Utc.with_ymd_and_hms(2024, 3, 10, 0, 0, 0).unwrap(),
            samples,
            ContextFactor::default(),
        )
    }

    #[test]
    fn test_valid_snapshot() {
        let snapshot = make_snapshot(vec![make_sample(0, 0.8), make_sample(1, 0.7)]);
        assert!(snapshot.validate(&PipelineConfig::default()).is_ok());
        assert_eq!(snapshot.current().unwrap().value("movement_speed"), Some(0.7));
    }

    #[test]
    fn test_metric_out_of_range() {
        let snapshot = make_snapshot(vec![make_sample(0, 0.8), make_sample(1, 1.2)]);
        assert_eq!(
            snapshot.validate(&PipelineConfig::default()),
            Err(InputValidationError::MetricOutOfRange {
                index: 1,
                metric: "movement_speed".to_string(),
                value: 1.2
            })
        );
    }

    #[test]
    fn test_unordered_samples() {
        let snapshot = make_snapshot(vec![make_sample(2, 0.8), make_sample(1, 0.7)]);
        assert_eq!(
            snapshot.validate(&PipelineConfig::default()),
            Err(InputValidationError::UnorderedSamples { index: 1 })
        );
    }

    #[test]
    fn test_foreign_sample() {
        let mut other = make_sample(1, 0.7);
        other.user_id = "user-2".to_string();
        let snapshot = make_snapshot(vec![make_sample(0, 0.8), other]);
        assert!(matches!(
            snapshot.validate(&PipelineConfig::default()),
            Err(InputValidationError::ForeignSample { index: 1, .. })
        ));
    }

    #[test]
    fn test_schema_version_and_user() {
        let mut snapshot = make_snapshot(vec![]);
        snapshot.schema_version = "mediguard.snapshot.v0".to_string();
        assert!(matches!(
            snapshot.validate(&PipelineConfig::default()),
            Err(InputValidationError::SchemaVersion { .. })
        ));

        let mut snapshot = make_snapshot(vec![]);
        snapshot.user_id = "  ".to_string();
        assert_eq!(
            snapshot.validate(&PipelineConfig::default()),
            Err(InputValidationError::MissingUserId)
        );
    }

    #[test]
    fn test_sleep_hours_range() {
        let mut snapshot = make_snapshot(vec![make_sample(0, 0.8)]);
        snapshot.context.sleep_hours = 30.0;
        assert_eq!(
            snapshot.validate(&PipelineConfig::default()),
            Err(InputValidationError::SleepHoursOutOfRange(30.0))
        );
    }

    #[test]
    fn test_invalid_stored_baseline() {
        let baseline = BaselineSet {
            user_id: "user-1".to_string(),
            computed_at: Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).unwrap(),
            sample_count: 5,
            metrics: [(
                "movement_speed".to_string(),
                MetricBaseline {
                    mean: 0.8,
                    stdev: -0.1,
                    sample_count: 5,
                },
            )]
            .into_iter()
            .collect(),
        };
        let snapshot = make_snapshot(vec![make_sample(0, 0.8)]).with_stored_baseline(baseline);
        assert!(matches!(
            snapshot.validate(&PipelineConfig::default()),
            Err(InputValidationError::InvalidStoredBaseline { .. })
        ));
    }

    #[test]
    fn test_sample_after_as_of_is_rejected() {
        let mut snapshot = make_snapshot(vec![make_sample(0, 0.8), make_sample(1, 0.7)]);
        snapshot.as_of = snapshot.samples[0].timestamp;
        assert!(matches!(
            snapshot.validate(&PipelineConfig::default()),
            Err(InputValidationError::SampleAfterAsOf { index: 1, .. })
        ));

        // A sample taken exactly at the snapshot instant is the current one
        snapshot.as_of = snapshot.samples[1].timestamp;
        assert!(snapshot.validate(&PipelineConfig::default()).is_ok());
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let snapshot = make_snapshot(vec![make_sample(0, 0.8)]);
        let config = PipelineConfig::with_baseline_min_samples(0);
        assert!(matches!(
            snapshot.validate(&config),
            Err(InputValidationError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_json_defaults() {
        let json = r#"{
            "user_id": "user-1",
            "as_of": "2024-03-10T00:00:00Z",
            "samples": []
        }"#;
        let snapshot = Snapshot::from_json(json).unwrap();
        assert_eq!(snapshot.schema_version, SCHEMA_VERSION);
        assert_eq!(snapshot.context, ContextFactor::default());
        assert!(!snapshot.rebaseline);
        assert!(snapshot.stored_baseline.is_none());
    }
}
