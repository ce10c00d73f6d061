//! Adapters that build snapshots from wire payloads and raw checks

use crate::error::InputValidationError;
use crate::normalizer::{MetricNormalizer, NormalizationFlag, RawCheck};
use crate::schema::snapshot::Snapshot;
use crate::types::{ContextFactor, MetricSample};
use chrono::{DateTime, Utc};

/// Adapter for snapshot payloads
pub struct SnapshotAdapter;

impl SnapshotAdapter {
    /// Parse a snapshot JSON document
    pub fn parse_snapshot(json: &str) -> Result<Snapshot, InputValidationError> {
        Snapshot::from_json(json)
    }

    /// Parse NDJSON (newline-delimited JSON) containing MetricSamples
    pub fn parse_samples_ndjson(ndjson: &str) -> Result<Vec<MetricSample>, InputValidationError> {
        let mut samples = Vec::new();
        for (line_num, line) in ndjson.lines().enumerate() {
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            match serde_json::from_str::<MetricSample>(trimmed) {
                Ok(sample) => samples.push(sample),
                Err(e) => {
                    return Err(InputValidationError::Json(format!(
                        "Failed to parse line {}: {}",
                        line_num + 1,
                        e
                    )));
                }
            }
        }
        Ok(samples)
    }

    /// Build a snapshot from raw checks, normalizing and ordering them.
    ///
    /// Returns the normalization flags alongside so callers can surface what
    /// was clamped or dropped at ingest.
    pub fn from_checks(
        user_id: &str,
        as_of: DateTime<Utc>,
        checks: &[RawCheck],
        context: ContextFactor,
    ) -> (Snapshot, Vec<NormalizationFlag>) {
        let mut flags = Vec::new();
        let samples = MetricNormalizer::normalize_all(checks)
            .into_iter()
            .map(|check| {
                flags.extend(check.flags);
                check.sample
            })
            .collect();

        (Snapshot::new(user_id, as_of, samples, context), flags)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PipelineConfig;
    use crate::normalizer::ScoreScale;
    use crate::types::ActivityType;
    use chrono::TimeZone;

    #[test]
    fn test_parse_ndjson() {
        let ndjson = r#"{"user_id":"u1","activity_type":"sit_to_stand","timestamp":"2024-03-01T08:00:00Z","metrics":{"movement_speed":0.8}}

{"user_id":"u1","activity_type":"steady_hands","timestamp":"2024-03-02T08:00:00Z","metrics":{"steady_stability":0.9}}"#;

        let samples = SnapshotAdapter::parse_samples_ndjson(ndjson).unwrap();
        assert_eq!(samples.len(), 2);
        assert_eq!(samples[1].activity_type, ActivityType::SteadyHands);
    }

    #[test]
    fn test_parse_ndjson_reports_line() {
        let ndjson = "{\"user_id\":\"u1\"}\n";
        match SnapshotAdapter::parse_samples_ndjson(ndjson) {
            Err(InputValidationError::Json(msg)) => assert!(msg.contains("line 1")),
            other => panic!("expected json error, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_snapshot_rejects_garbage() {
        assert!(matches!(
            SnapshotAdapter::parse_snapshot("not json"),
            Err(InputValidationError::Json(_))
        ));
    }

    #[test]
    fn test_from_checks() {
        let start = Utc.with_ymd_and_hms(2024, 3, 1, 8, 0, 0).unwrap();
        let checks: Vec<RawCheck> = [(1, 88.0), (0, 92.0), (2, 140.0)]
            .iter()
            .map(|(day, score)| RawCheck {
                user_id: "u1".to_string(),
                activity_type: ActivityType::ShortWalk,
                timestamp: start + chrono::Duration::days(*day),
                scale: ScoreScale::Percent,
                scores: [("walk_stability".to_string(), *score)].into_iter().collect(),
            })
            .collect();

        let (snapshot, flags) = SnapshotAdapter::from_checks(
            "u1",
            start + chrono::Duration::days(3),
            &checks,
            ContextFactor::default(),
        );

        let values: Vec<f64> = snapshot
            .samples
            .iter()
            .filter_map(|s| s.value("walk_stability"))
            .collect();
        assert_eq!(values, vec![0.92, 0.88, 1.0]);
        assert_eq!(flags.len(), 1);
        assert!(snapshot.validate(&PipelineConfig::default()).is_ok());
    }
}
