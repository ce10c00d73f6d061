//! Baseline estimation
//!
//! A user's baseline is the mean and standard deviation of each metric over
//! their first K chronological checks. It is computed once and reused until a
//! caller explicitly asks for a re-baseline; it never drifts with new data.

use crate::types::{
    BaselineOutcome, BaselineSet, InsufficientBaseline, MetricBaseline, MetricSample,
};
use std::collections::BTreeMap;
use tracing::debug;

/// Estimator for per-metric reference statistics
pub struct BaselineEstimator;

impl BaselineEstimator {
    /// Establish a baseline from the first `min_samples` samples of `history`.
    ///
    /// `history` must be in ascending timestamp order. A metric missing from
    /// any of those samples is left out of the set rather than estimated from
    /// fewer values.
    pub fn establish(history: &[MetricSample], min_samples: usize) -> BaselineOutcome {
        if min_samples == 0 || history.len() < min_samples {
            debug!(
                required = min_samples,
                available = history.len(),
                "baseline history too short"
            );
            return BaselineOutcome::Insufficient(InsufficientBaseline {
                required: min_samples,
                available: history.len(),
            });
        }

        let window = &history[..min_samples];

        let mut values: BTreeMap<&str, Vec<f64>> = BTreeMap::new();
        for sample in window {
            for (metric, value) in &sample.metrics {
                values.entry(metric.as_str()).or_default().push(*value);
            }
        }

        let metrics = values
            .into_iter()
            .filter(|(_, v)| v.len() == min_samples)
            .filter_map(|(metric, v)| summarize(&v).map(|b| (metric.to_string(), b)))
            .collect();

        // Non-empty because history.len() >= min_samples >= 1
        let last = &window[window.len() - 1];

        BaselineOutcome::Established(BaselineSet {
            user_id: last.user_id.clone(),
            computed_at: last.timestamp,
            sample_count: min_samples as u32,
            metrics,
        })
    }

    /// Reuse a stored baseline unless a re-baseline was requested
    pub fn resolve(
        stored: Option<&BaselineSet>,
        rebaseline: bool,
        history: &[MetricSample],
        min_samples: usize,
    ) -> BaselineOutcome {
        match stored {
            Some(baseline) if !rebaseline => BaselineOutcome::Established(baseline.clone()),
            _ => Self::establish(history, min_samples),
        }
    }
}

/// Mean and population standard deviation of a non-empty slice
fn summarize(values: &[f64]) -> Option<MetricBaseline> {
    let first = *values.first()?;

    // Exact path for constant series so downstream deltas are exactly zero
    if values.iter().all(|v| *v == first) {
        return Some(MetricBaseline {
            mean: first,
            stdev: 0.0,
            sample_count: values.len() as u32,
        });
    }

    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;

    Some(MetricBaseline {
        mean,
        stdev: variance.sqrt(),
        sample_count: values.len() as u32,
    })
}

impl BaselineSet {
    /// Load a stored baseline from JSON
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Serialize a baseline to JSON
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}
