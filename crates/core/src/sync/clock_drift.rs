//! Clock drift rate estimation for linked streams
//!
//! The EWMA offset on a link tracks *where* the visual clock sits relative to
//! the audio clock. This estimator tracks how fast that offset is moving, by
//! fitting a least-squares line through (producer time, observed skew)
//! samples. The slope in ms/ms scaled to parts per million is the drift rate.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Maximum number of observations to keep for drift estimation
const MAX_OBSERVATIONS: usize = 100;

/// Minimum observations required before drift can be estimated
const MIN_OBSERVATIONS: usize = 8;

/// Default drift threshold above which correction is recommended (PPM)
const DEFAULT_THRESHOLD_PPM: f64 = 500.0;

/// One skew sample taken when a pair matched or a correction was applied
#[derive(Debug, Clone, Copy)]
pub struct SkewObservation {
    /// Audio producer timestamp (ms)
    pub producer_ms: f64,
    /// Raw visual-minus-audio timestamp difference (ms)
    pub skew_ms: f64,
}

/// Recommended action based on drift analysis
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DriftAction {
    /// Drift is minimal
    None,
    /// Within acceptable range but trending
    Monitor,
    /// Drift exceeds threshold, offset corrections will keep coming
    Adjust,
    /// Significant drift but the fit is poor (erratic producer clocks)
    Investigate,
}

/// Drift estimate for a link
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DriftEstimate {
    /// Drift in parts per million
    /// Positive = visual clock runs faster than audio
    pub drift_ppm: f64,
    /// Number of samples used in estimation
    pub sample_count: usize,
    /// Confidence in the estimate (0.0 to 1.0), from the regression R²
    pub confidence: f64,
    pub recommended_action: DriftAction,
}

/// Least-squares drift rate estimator for one link
#[derive(Debug)]
pub struct DriftRateEstimator {
    observations: VecDeque<SkewObservation>,
    threshold_ppm: f64,
}

impl Default for DriftRateEstimator {
    fn default() -> Self {
        Self::with_threshold(DEFAULT_THRESHOLD_PPM)
    }
}

impl DriftRateEstimator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create with a custom drift threshold in PPM
    pub fn with_threshold(threshold_ppm: f64) -> Self {
        Self {
            observations: VecDeque::with_capacity(MAX_OBSERVATIONS),
            threshold_ppm,
        }
    }

    pub fn add_observation(&mut self, producer_ms: f64, skew_ms: f64) {
        if self.observations.len() >= MAX_OBSERVATIONS {
            self.observations.pop_front();
        }
        self.observations.push_back(SkewObservation {
            producer_ms,
            skew_ms,
        });
    }

    /// Estimate the drift rate
    ///
    /// Returns `None` until enough observations exist or when all samples
    /// share the same producer time.
    pub fn estimate(&self) -> Option<DriftEstimate> {
        if self.observations.len() < MIN_OBSERVATIONS {
            return None;
        }

        let first_x = self.observations.front()?.producer_ms;

        let mut sum_x = 0.0f64;
        let mut sum_y = 0.0f64;
        let mut sum_xy = 0.0f64;
        let mut sum_xx = 0.0f64;
        let mut sum_yy = 0.0f64;
        let n = self.observations.len() as f64;

        for obs in &self.observations {
            let x = obs.producer_ms - first_x;
            let y = obs.skew_ms;
            sum_x += x;
            sum_y += y;
            sum_xy += x * y;
            sum_xx += x * x;
            sum_yy += y * y;
        }

        // y = mx + b
        let denom = n * sum_xx - sum_x * sum_x;
        if denom.abs() < 1e-10 {
            return None;
        }
        let slope = (n * sum_xy - sum_x * sum_y) / denom;
        let drift_ppm = slope * 1_000_000.0;

        let mean_x = sum_x / n;
        let mean_y = sum_y / n;
        let ss_tot = sum_yy - n * mean_y * mean_y;
        let ss_reg = slope * (sum_xy - n * mean_x * mean_y);
        let r_squared = if ss_tot.abs() > 1e-10 {
            (ss_reg / ss_tot).clamp(0.0, 1.0)
        } else {
            1.0 // Constant skew: a flat line fits exactly
        };
        let confidence = r_squared.sqrt();

        let action = if drift_ppm.abs() < self.threshold_ppm / 2.0 {
            DriftAction::None
        } else if confidence < 0.5 {
            DriftAction::Investigate
        } else if drift_ppm.abs() < self.threshold_ppm {
            DriftAction::Monitor
        } else {
            DriftAction::Adjust
        };

        Some(DriftEstimate {
            drift_ppm,
            sample_count: self.observations.len(),
            confidence,
            recommended_action: action,
        })
    }

    pub fn observation_count(&self) -> usize {
        self.observations.len()
    }

    pub fn can_estimate(&self) -> bool {
        self.observations.len() >= MIN_OBSERVATIONS
    }

    pub fn reset(&mut self) {
        self.observations.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insufficient_observations() {
        let mut estimator = DriftRateEstimator::new();
        for i in 0..5 {
            estimator.add_observation(i as f64 * 1000.0, 10.0);
        }
        assert!(!estimator.can_estimate());
        assert!(estimator.estimate().is_none());
    }

    #[test]
    fn test_constant_skew_is_no_drift() {
        let mut estimator = DriftRateEstimator::new();
        for i in 0..20 {
            estimator.add_observation(i as f64 * 1000.0, 12.0);
        }
        let estimate = estimator.estimate().unwrap();
        assert!(estimate.drift_ppm.abs() < 1.0, "drift_ppm: {}", estimate.drift_ppm);
        assert_eq!(estimate.confidence, 1.0);
        assert_eq!(estimate.recommended_action, DriftAction::None);
    }

    #[test]
    fn test_positive_drift() {
        let mut estimator = DriftRateEstimator::with_threshold(500.0);
        // Visual clock gains 2ms every second: 2000 PPM
        for i in 0..20 {
            let t = i as f64 * 1000.0;
            estimator.add_observation(t, 5.0 + t * 0.002);
        }
        let estimate = estimator.estimate().unwrap();
        assert!(
            (estimate.drift_ppm - 2000.0).abs() < 1.0,
            "drift_ppm: {}",
            estimate.drift_ppm
        );
        assert!(estimate.confidence > 0.99);
        assert_eq!(estimate.recommended_action, DriftAction::Adjust);
    }

    #[test]
    fn test_erratic_drift_needs_investigation() {
        let mut estimator = DriftRateEstimator::with_threshold(100.0);
        // Large alternating skews with a weak upward trend
        for i in 0..20 {
            let t = i as f64 * 1000.0;
            let noise = if i % 2 == 0 { 80.0 } else { -80.0 };
            estimator.add_observation(t, t * 0.0005 + noise);
        }
        let estimate = estimator.estimate().unwrap();
        assert!(estimate.confidence < 0.5, "confidence: {}", estimate.confidence);
        assert_eq!(estimate.recommended_action, DriftAction::Investigate);
    }

    #[test]
    fn test_same_producer_time_is_degenerate() {
        let mut estimator = DriftRateEstimator::new();
        for i in 0..10 {
            estimator.add_observation(1000.0, i as f64);
        }
        assert!(estimator.estimate().is_none());
    }

    #[test]
    fn test_max_observations_and_reset() {
        let mut estimator = DriftRateEstimator::new();
        for i in 0..150 {
            estimator.add_observation(i as f64, 0.0);
        }
        assert_eq!(estimator.observation_count(), MAX_OBSERVATIONS);

        estimator.reset();
        assert_eq!(estimator.observation_count(), 0);
        assert!(!estimator.can_estimate());
    }
}
