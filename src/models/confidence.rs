//! Confidence score and prediction bounds from inter-model dispersion
//!
//! This is a heuristic calibration, not a statistical interval. Downstream
//! consumers display these numbers verbatim, so the formulas are fixed:
//!
//! - `cv = std_dev / (|mean| + EPSILON)`
//! - `confidence = 1 / (1 + cv)`, or [`ZERO_MEAN_CONFIDENCE`] when `mean == 0`
//! - `margin = std_dev * (2 - confidence) * Z_SCORE`
//! - bounds are `mean ± margin`, or `mean ± 10% |mean|` without a dispersion sample

use serde::{Deserialize, Serialize};

/// Guards the coefficient of variation against a zero mean
pub const EPSILON: f64 = 1e-6;

/// Confidence reported when the mean is exactly zero
pub const ZERO_MEAN_CONFIDENCE: f64 = 0.85;

/// Two-sided 95% normal quantile used to widen the margin
pub const Z_SCORE: f64 = 1.96;

/// Relative half-width of the bounds when only one output is available
pub const FALLBACK_MARGIN_RATIO: f64 = 0.1;

/// Confidence and bounds derived from one set of model outputs
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ConfidenceEstimate {
    pub mean: f64,
    pub std_dev: f64,
    pub confidence: f64,
    pub lower_bound: f64,
    pub upper_bound: f64,
}

impl ConfidenceEstimate {
    /// Every field finite and confidence inside (0, 1]
    pub fn is_representable(&self) -> bool {
        [self.mean, self.std_dev, self.lower_bound, self.upper_bound]
            .iter()
            .all(|v| v.is_finite())
            && self.confidence > 0.0
            && self.confidence <= 1.0
    }
}

/// Mean and population standard deviation. `None` for an empty slice.
///
/// Finite inputs always give finite results, even when the plain sums would
/// overflow.
pub fn mean_and_std(values: &[f64]) -> Option<(f64, f64)> {
    if values.is_empty() {
        return None;
    }

    let (mean, std_dev) = raw_moments(values);
    if mean.is_finite() && std_dev.is_finite() {
        return Some((mean, std_dev));
    }

    // rescale into [-1, 1] so neither sum can overflow
    let scale = values.iter().fold(0.0_f64, |m, v| m.max(v.abs()));
    let scaled: Vec<f64> = values.iter().map(|v| v / scale).collect();
    let (mean, std_dev) = raw_moments(&scaled);
    Some((mean * scale, std_dev * scale))
}

fn raw_moments(values: &[f64]) -> (f64, f64) {
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    (mean, variance.sqrt())
}

/// Confidence score for a given mean and dispersion
pub fn confidence_score(mean: f64, std_dev: f64) -> f64 {
    if mean == 0.0 {
        return ZERO_MEAN_CONFIDENCE;
    }
    let cv = std_dev / (mean.abs() + EPSILON);
    1.0 / (1.0 + cv)
}

/// Estimate confidence and bounds from successful model outputs.
///
/// Returns `None` when there are no outputs; callers treat that as a
/// failed prediction, never as a zero.
pub fn estimate(values: &[f64]) -> Option<ConfidenceEstimate> {
    let (mean, std_dev) = mean_and_std(values)?;
    let confidence = confidence_score(mean, std_dev);

    let margin = if values.len() < 2 {
        FALLBACK_MARGIN_RATIO * mean.abs()
    } else {
        std_dev * (2.0 - confidence) * Z_SCORE
    };

    Some(ConfidenceEstimate {
        mean,
        std_dev,
        confidence,
        lower_bound: mean - margin,
        upper_bound: mean + margin,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_identical_outputs_full_confidence() {
        let est = estimate(&[250.0, 250.0, 250.0]).unwrap();
        assert_eq!(est.std_dev, 0.0);
        assert_eq!(est.confidence, 1.0);
        assert_eq!(est.lower_bound, 250.0);
        assert_eq!(est.upper_bound, 250.0);
    }

    #[test]
    fn test_zero_mean_uses_fallback() {
        let est = estimate(&[0.0, 0.0, 0.0]).unwrap();
        assert_eq!(est.confidence, ZERO_MEAN_CONFIDENCE);
        assert!(!est.confidence.is_nan());
        assert_eq!(est.lower_bound, 0.0);
        assert_eq!(est.upper_bound, 0.0);
    }

    #[test]
    fn test_symmetric_zero_mean_still_bounded() {
        let est = estimate(&[-10.0, 10.0]).unwrap();
        assert_eq!(est.confidence, ZERO_MEAN_CONFIDENCE);
        let margin = 10.0 * (2.0 - ZERO_MEAN_CONFIDENCE) * Z_SCORE;
        assert!((est.upper_bound - margin).abs() < 1e-9);
        assert!((est.lower_bound + margin).abs() < 1e-9);
    }

    #[test]
    fn test_known_dispersion() {
        // mean 200, population std sqrt(20000/3)
        let est = estimate(&[100.0, 200.0, 300.0]).unwrap();
        let std = (20000.0f64 / 3.0).sqrt();
        let cv = std / (200.0 + EPSILON);
        let confidence = 1.0 / (1.0 + cv);
        let margin = std * (2.0 - confidence) * Z_SCORE;

        assert!((est.mean - 200.0).abs() < 1e-9);
        assert!((est.confidence - confidence).abs() < 1e-12);
        assert!((est.lower_bound - (200.0 - margin)).abs() < 1e-9);
        assert!((est.upper_bound - (200.0 + margin)).abs() < 1e-9);
    }

    #[test]
    fn test_single_output_ten_percent_bounds() {
        let est = estimate(&[-50.0]).unwrap();
        assert_eq!(est.confidence, 1.0);
        assert!((est.lower_bound - -55.0).abs() < 1e-9);
        assert!((est.upper_bound - -45.0).abs() < 1e-9);
    }

    #[test]
    fn test_huge_identical_outputs_do_not_overflow() {
        let est = estimate(&[1.7e308, 1.7e308]).unwrap();
        assert_eq!(est.mean, 1.7e308);
        assert_eq!(est.std_dev, 0.0);
        assert_eq!(est.confidence, 1.0);
        assert_eq!(est.lower_bound, 1.7e308);
        assert_eq!(est.upper_bound, 1.7e308);
        assert!(est.is_representable());
    }

    #[test]
    fn test_huge_spread_moments_stay_finite() {
        let (mean, std_dev) = mean_and_std(&[f64::MAX, -f64::MAX]).unwrap();
        assert_eq!(mean, 0.0);
        assert_eq!(std_dev, f64::MAX);

        // the margin itself no longer fits in an f64
        let est = estimate(&[f64::MAX, -f64::MAX]).unwrap();
        assert!(!est.is_representable());
    }

    #[test]
    fn test_empty_is_none() {
        assert!(estimate(&[]).is_none());
    }

    proptest! {
        #[test]
        fn bounds_contain_mean_and_confidence_in_range(
            values in prop::collection::vec(-1.0e6f64..1.0e6, 1..12),
        ) {
            let est = estimate(&values).unwrap();
            prop_assert!(est.confidence > 0.0);
            prop_assert!(est.confidence <= 1.0);
            prop_assert!(est.lower_bound <= est.mean);
            prop_assert!(est.mean <= est.upper_bound);
        }

        #[test]
        fn moments_finite_for_any_finite_input(
            values in prop::collection::vec(prop::num::f64::NORMAL, 1..12),
        ) {
            let (mean, std_dev) = mean_and_std(&values).unwrap();
            prop_assert!(mean.is_finite());
            prop_assert!(std_dev.is_finite());
        }
    }
}
