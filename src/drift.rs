//! Drift detection
//!
//! This module compares each metric's current value against its baseline and
//! classifies the recent window:
//! - Percentage delta and z-score against the baseline
//! - Severity tier from the percentage delta
//! - Trend direction, slope and consistency over the last N checks

use crate::config::{PipelineConfig, TrendConfig};
use crate::types::{
    BaselineSet, DriftOutcome, DriftReport, MetricBaseline, MetricSample, PipelineMarker,
    TrendDirection,
};
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// Direction of a single step between consecutive checks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Step {
    Up,
    Down,
    Flat,
}

/// Shape of a metric over its recent window
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WindowStats {
    /// Number of checks in the window
    pub len: usize,
    pub trend: TrendDirection,
    /// Least-squares slope in metric units per check
    pub slope: f64,
    /// Fraction of steps moving with the sign of the slope (0-1)
    pub consistency: f64,
}

impl WindowStats {
    /// Analyze a chronological window of values.
    ///
    /// With a positive `stdev`, steps smaller than `noise_z * stdev` are flat.
    /// With a zero `stdev` only the sign of each step is compared.
    pub fn from_values(values: &[f64], stdev: f64, config: &TrendConfig) -> Self {
        let noise_floor = if stdev > 0.0 {
            config.noise_z * stdev
        } else {
            0.0
        };

        let steps: Vec<Step> = values
            .windows(2)
            .map(|w| {
                let delta = w[1] - w[0];
                if delta > noise_floor {
                    Step::Up
                } else if delta < -noise_floor {
                    Step::Down
                } else {
                    Step::Flat
                }
            })
            .collect();

        let slope = least_squares_slope(values);

        Self {
            len: values.len(),
            trend: classify_trend(&steps, config),
            slope,
            consistency: consistency(&steps, slope),
        }
    }
}

/// Declining or improving needs enough of the window moving one way, including
/// an unbroken run of at least `min_run` checks. Anything else is stable.
fn classify_trend(steps: &[Step], config: &TrendConfig) -> TrendDirection {
    if steps.is_empty() || steps.len() + 1 < config.min_run {
        return TrendDirection::Stable;
    }

    let total = steps.len() as f64;
    for (direction, trend) in [
        (Step::Down, TrendDirection::Declining),
        (Step::Up, TrendDirection::Improving),
    ] {
        let count = steps.iter().filter(|s| **s == direction).count();
        let run_checks = longest_run(steps, direction) + 1;
        if count as f64 / total >= config.consistency && run_checks >= config.min_run {
            return trend;
        }
    }

    TrendDirection::Stable
}

fn longest_run(steps: &[Step], direction: Step) -> usize {
    let mut longest = 0;
    let mut current = 0;
    for step in steps {
        if *step == direction {
            current += 1;
            longest = longest.max(current);
        } else {
            current = 0;
        }
    }
    longest
}

fn consistency(steps: &[Step], slope: f64) -> f64 {
    let direction = if slope > 0.0 {
        Step::Up
    } else if slope < 0.0 {
        Step::Down
    } else {
        return 0.0;
    };
    if steps.is_empty() {
        return 0.0;
    }
    steps.iter().filter(|s| **s == direction).count() as f64 / steps.len() as f64
}

/// Ordinary least-squares slope against the check index
pub fn least_squares_slope(values: &[f64]) -> f64 {
    let n = values.len();
    if n < 2 {
        return 0.0;
    }
    let x_mean = (n - 1) as f64 / 2.0;
    let y_mean = values.iter().sum::<f64>() / n as f64;

    let (num, den) = values
        .iter()
        .enumerate()
        .fold((0.0, 0.0), |(num, den), (i, y)| {
            let dx = i as f64 - x_mean;
            (num + dx * (y - y_mean), den + dx * dx)
        });

    if den == 0.0 {
        0.0
    } else {
        num / den
    }
}

/// Compare the last value of `series` against `baseline`.
///
/// `series` is the metric's chronological history; its last element is the
/// current value. The trend window is the last `trend_window` elements.
pub fn compute_drift(
    metric: &str,
    series: &[f64],
    baseline: &MetricBaseline,
    config: &PipelineConfig,
) -> Option<DriftOutcome> {
    let current = *series.last()?;

    if baseline.mean == 0.0 {
        return Some(DriftOutcome::NoDriftComputable {
            metric: metric.to_string(),
            current,
        });
    }

    let delta_pct = (current - baseline.mean) / baseline.mean * 100.0;
    let z_score = if baseline.stdev > 0.0 {
        Some((current - baseline.mean) / baseline.stdev)
    } else {
        None
    };

    let window = recent_window(series, config.trend_window);
    let stats = WindowStats::from_values(window, baseline.stdev, &config.trend);

    Some(DriftOutcome::Drift(DriftReport {
        metric: metric.to_string(),
        current,
        baseline_mean: baseline.mean,
        baseline_stdev: baseline.stdev,
        delta_pct,
        z_score,
        trend: stats.trend,
        severity: config.severity_thresholds.classify(delta_pct),
        velocity: stats.slope / baseline.mean * 100.0,
        consistency: stats.consistency,
        window_len: stats.len,
    }))
}

/// Last `size` elements of a series
pub fn recent_window(series: &[f64], size: usize) -> &[f64] {
    &series[series.len().saturating_sub(size)..]
}

/// Chronological values of one metric, skipping samples without it
pub fn metric_series(history: &[MetricSample], metric: &str) -> Vec<f64> {
    history.iter().filter_map(|s| s.value(metric)).collect()
}

/// Everything the drift stage produces for one user
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DriftDetection {
    pub reports: Vec<DriftReport>,
    /// Recent window per metric with a report, for the risk scorer
    pub windows: BTreeMap<String, Vec<f64>>,
    pub markers: Vec<PipelineMarker>,
}

/// Drift detector over every baselined metric
pub struct DriftDetector;

impl DriftDetector {
    /// Detect drift for the most recent sample of `history`
    pub fn detect(
        history: &[MetricSample],
        baseline: &BaselineSet,
        config: &PipelineConfig,
    ) -> DriftDetection {
        let mut detection = DriftDetection::default();
        let latest = history.last();

        for (metric, metric_baseline) in &baseline.metrics {
            if latest.and_then(|s| s.value(metric)).is_none() {
                warn!(metric = %metric, "latest sample has no value for baselined metric");
                detection.markers.push(PipelineMarker::MissingCurrentMetric {
                    metric: metric.clone(),
                });
                continue;
            }

            let series = metric_series(history, metric);
            match compute_drift(metric, &series, metric_baseline, config) {
                Some(DriftOutcome::Drift(report)) => {
                    debug!(
                        metric = %metric,
                        delta_pct = report.delta_pct,
                        severity = report.severity.as_str(),
                        trend = report.trend.as_str(),
                        "drift computed"
                    );
                    detection.windows.insert(
                        metric.clone(),
                        recent_window(&series, config.trend_window).to_vec(),
                    );
                    detection.reports.push(report);
                }
                Some(DriftOutcome::NoDriftComputable { .. }) => {
                    warn!(metric = %metric, "baseline mean is zero, drift not computable");
                    detection.markers.push(PipelineMarker::NoDriftComputable {
                        metric: metric.clone(),
                    });
                }
                None => {}
            }
        }

        // Metrics observed now but never baselined
        if let Some(latest) = latest {
            for metric in latest.metrics.keys() {
                if baseline.metric(metric).is_none() {
                    detection.markers.push(PipelineMarker::InsufficientBaseline {
                        metric: Some(metric.clone()),
                        required: config.baseline_min_samples,
                        available: metric_series(history, metric).len(),
                    });
                }
            }
        }

        detection
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ActivityType, SeverityTier};
    use chrono::{Duration, TimeZone, Utc};

    fn baseline(mean: f64, stdev: f64) -> MetricBaseline {
        MetricBaseline {
            mean,
            stdev,
            sample_count: 5,
        }
    }

    fn report(outcome: Option<DriftOutcome>) -> DriftReport {
        match outcome {
            Some(DriftOutcome::Drift(report)) => report,
            other => panic!("expected drift report, got {:?}", other),
        }
    }

    #[test]
    fn test_constant_history_has_zero_delta() {
        let config = PipelineConfig::default();
        let r = report(compute_drift("stability", &[0.8; 7], &baseline(0.8, 0.0), &config));

        assert_eq!(r.delta_pct, 0.0);
        assert_eq!(r.severity, SeverityTier::Minor);
        assert_eq!(r.trend, TrendDirection::Stable);
        assert_eq!(r.z_score, None);
        assert_eq!(r.velocity, 0.0);
        assert_eq!(r.consistency, 0.0);
    }

    #[test]
    fn test_zero_mean_is_not_computable() {
        let config = PipelineConfig::default();
        let outcome = compute_drift("tremor", &[0.0, 0.0, 0.1], &baseline(0.0, 0.0), &config);
        assert_eq!(
            outcome,
            Some(DriftOutcome::NoDriftComputable {
                metric: "tremor".to_string(),
                current: 0.1
            })
        );
    }

    #[test]
    fn test_declining_scenario() {
        let config = PipelineConfig::default();
        let series = [0.92, 0.90, 0.89, 0.87, 0.86, 0.85, 0.84];
        let r = report(compute_drift("stability", &series, &baseline(0.92, 0.0), &config));

        assert!((r.delta_pct - (-8.6957)).abs() < 0.01);
        assert_eq!(r.severity, SeverityTier::Moderate);
        assert_eq!(r.trend, TrendDirection::Declining);
        assert_eq!(r.consistency, 1.0);
        assert!(r.velocity < 0.0);
        assert_eq!(r.window_len, 7);
    }

    #[test]
    fn test_z_score_uses_stdev() {
        let config = PipelineConfig::default();
        let r = report(compute_drift("speed", &[0.5, 0.6], &baseline(0.5, 0.05), &config));
        assert!((r.z_score.unwrap() - 2.0).abs() < 1e-9);
        assert!((r.delta_pct - 20.0).abs() < 1e-9);
        assert_eq!(r.severity, SeverityTier::Major);
    }

    #[test]
    fn test_mostly_improving_window() {
        let config = TrendConfig::default();
        // 7 steps up out of 8, with a single dip
        let values = [0.50, 0.52, 0.54, 0.56, 0.55, 0.57, 0.59, 0.61, 0.63];
        let stats = WindowStats::from_values(&values, 0.0, &config);
        assert_eq!(stats.trend, TrendDirection::Improving);
        assert!((stats.consistency - 7.0 / 8.0).abs() < 1e-9);
    }

    #[test]
    fn test_mixed_window_is_stable() {
        let config = TrendConfig::default();
        let values = [0.50, 0.55, 0.50, 0.55, 0.50, 0.55, 0.50];
        let stats = WindowStats::from_values(&values, 0.0, &config);
        assert_eq!(stats.trend, TrendDirection::Stable);
    }

    #[test]
    fn test_short_window_is_stable() {
        let config = TrendConfig::default();
        let stats = WindowStats::from_values(&[0.9, 0.8], 0.0, &config);
        assert_eq!(stats.trend, TrendDirection::Stable);
    }

    #[test]
    fn test_run_shorter_than_minimum_is_stable() {
        let config = TrendConfig {
            min_run: 4,
            ..TrendConfig::default()
        };
        // Three of four steps down, but the longest run spans three checks
        let values = [0.9, 0.8, 0.7, 0.75, 0.65];
        let stats = WindowStats::from_values(&values, 0.0, &config);
        assert_eq!(stats.trend, TrendDirection::Stable);
    }

    #[test]
    fn test_noise_floor_flattens_small_steps() {
        let config = TrendConfig::default();
        let values = [0.800, 0.799, 0.798, 0.797, 0.796];
        // Sign-only comparison sees a monotonic decline
        let strict = WindowStats::from_values(&values, 0.0, &config);
        assert_eq!(strict.trend, TrendDirection::Declining);
        // With stdev 0.05 the floor is 0.0125, so every step is noise
        let filtered = WindowStats::from_values(&values, 0.05, &config);
        assert_eq!(filtered.trend, TrendDirection::Stable);
    }

    #[test]
    fn test_least_squares_slope() {
        assert_eq!(least_squares_slope(&[]), 0.0);
        assert_eq!(least_squares_slope(&[0.4]), 0.0);
        assert!((least_squares_slope(&[0.1, 0.2, 0.3, 0.4]) - 0.1).abs() < 1e-12);
        let slope = least_squares_slope(&[0.92, 0.90, 0.89, 0.87, 0.86, 0.85, 0.84]);
        assert!((slope - (-0.37 / 28.0)).abs() < 1e-9);
    }

    #[test]
    fn test_window_uses_most_recent_checks() {
        assert_eq!(recent_window(&[1.0, 2.0, 3.0, 4.0], 2), &[3.0, 4.0]);
        assert_eq!(recent_window(&[1.0, 2.0], 7), &[1.0, 2.0]);
    }

    fn sample(day: i64, metrics: &[(&str, f64)]) -> MetricSample {
        MetricSample {
            user_id: "user-1".to_string(),
            activity_type: ActivityType::SitToStand,
            timestamp: Utc.with_ymd_and_hms(2024, 3, 1, 8, 0, 0).unwrap() + Duration::days(day),
            metrics: metrics.iter().map(|(k, v)| (k.to_string(), *v)).collect(),
        }
    }

    #[test]
    fn test_detector_markers() {
        let history = vec![
            sample(0, &[("stability", 0.9), ("speed", 0.7), ("tremor", 0.0)]),
            sample(1, &[("stability", 0.9), ("tremor", 0.0), ("smoothness", 0.6)]),
        ];
        let set = BaselineSet {
            user_id: "user-1".to_string(),
            computed_at: history[0].timestamp,
            sample_count: 1,
            metrics: [
                ("stability".to_string(), baseline(0.9, 0.0)),
                ("speed".to_string(), baseline(0.7, 0.0)),
                ("tremor".to_string(), baseline(0.0, 0.0)),
            ]
            .into_iter()
            .collect(),
        };

        let detection =
            DriftDetector::detect(&history, &set, &PipelineConfig::with_baseline_min_samples(1));

        assert_eq!(detection.reports.len(), 1);
        assert_eq!(detection.reports[0].metric, "stability");
        assert_eq!(detection.windows["stability"], vec![0.9, 0.9]);
        assert!(detection.markers.contains(&PipelineMarker::MissingCurrentMetric {
            metric: "speed".to_string()
        }));
        assert!(detection.markers.contains(&PipelineMarker::NoDriftComputable {
            metric: "tremor".to_string()
        }));
        assert!(detection.markers.contains(&PipelineMarker::InsufficientBaseline {
            metric: Some("smoothness".to_string()),
            required: 1,
            available: 1,
        }));
    }
}
