//! Result encoding
//!
//! This module wraps an [`AnalysisResult`] in a versioned envelope and encodes
//! it to JSON. Nothing time- or instance-dependent is added, so identical
//! results always encode to identical bytes.

use crate::types::AnalysisResult;
use crate::{MEDIGUARD_VERSION, PRODUCER_NAME};
use serde::{Deserialize, Serialize};

/// Schema version of the encoded result
pub const RESULT_SCHEMA_VERSION: &str = "mediguard.result.v1";

/// Producer metadata
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Producer {
    pub name: String,
    pub version: String,
}

/// Envelope written for audit history and downstream collaborators
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultEnvelope {
    pub schema_version: String,
    pub producer: Producer,
    pub result: AnalysisResult,
}

/// Encoder for analysis results
pub struct ResultEncoder;

impl ResultEncoder {
    pub fn encode(result: &AnalysisResult) -> ResultEnvelope {
        ResultEnvelope {
            schema_version: RESULT_SCHEMA_VERSION.to_string(),
            producer: Producer {
                name: PRODUCER_NAME.to_string(),
                version: MEDIGUARD_VERSION.to_string(),
            },
            result: result.clone(),
        }
    }

    /// Encode to compact JSON
    pub fn encode_to_json(result: &AnalysisResult) -> Result<String, serde_json::Error> {
        serde_json::to_string(&Self::encode(result))
    }

    /// Encode to indented JSON
    pub fn encode_pretty(result: &AnalysisResult) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(&Self::encode(result))
    }

    /// Decode a previously encoded envelope
    pub fn decode(json: &str) -> Result<ResultEnvelope, serde_json::Error> {
        serde_json::from_str(json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PipelineConfig;
    use crate::pipeline::analyze;
    use crate::schema::Snapshot;
    use crate::types::{ActivityType, ContextFactor, MetricSample};
    use chrono::{Duration, TimeZone, Utc};

    fn make_result() -> AnalysisResult {
        let start = Utc.with_ymd_and_hms(2024, 3, 1, 8, 0, 0).unwrap();
        let samples = [0.81, 0.80, 0.82, 0.79, 0.80, 0.74, 0.72]
            .iter()
            .enumerate()
            .map(|(i, v)| MetricSample {
                user_id: "user-1".to_string(),
                activity_type: ActivityType::ShortWalk,
                timestamp: start + Duration::days(i as i64),
                metrics: [("walk_stability".to_string(), *v)].into_iter().collect(),
            })
            .collect();
        let snapshot = Snapshot::new(
            "user-1",
            start + Duration::days(7),
            samples,
            ContextFactor::default(),
        );
        analyze(&snapshot, &PipelineConfig::default()).unwrap()
    }

    #[test]
    fn test_envelope_fields() {
        let json = ResultEncoder::encode_to_json(&make_result()).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();

        assert_eq!(value["schema_version"], RESULT_SCHEMA_VERSION);
        assert_eq!(value["producer"]["name"], "mediguard-drift");
        assert_eq!(value["result"]["user_id"], "user-1");
        assert_eq!(value["result"]["status"], "complete");
    }

    #[test]
    fn test_encoding_is_byte_identical() {
        let a = ResultEncoder::encode_to_json(&make_result()).unwrap();
        let b = ResultEncoder::encode_to_json(&make_result()).unwrap();
        assert_eq!(a, b);
        assert_eq!(
            ResultEncoder::encode_pretty(&make_result()).unwrap(),
            ResultEncoder::encode_pretty(&make_result()).unwrap()
        );
    }

    #[test]
    fn test_decode() {
        let result = make_result();
        let pretty = ResultEncoder::encode_pretty(&result).unwrap();
        let decoded = ResultEncoder::decode(&pretty).unwrap();
        assert_eq!(decoded.result.run_id, result.run_id);
        assert_eq!(decoded.result.status, result.status);
    }
}
