//! Robust location and scale estimators used for frame statistics,
//! normalization and weighting.
//!
//! All estimators accumulate in f64 regardless of the sample type. The
//! two-sided variants split the sample set at the location estimate and
//! return separate dispersions for the low and high halves.

use num_traits::Float;
use serde::{Deserialize, Serialize};

use crate::consts::EPSILON;

/// Two-sided dispersion estimate: samples at or below the location
/// contribute to `low`, samples above it to `high`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TwoSided {
    pub low: f64,
    pub high: f64,
}

impl TwoSided {
    pub fn mean(&self) -> f64 {
        0.5 * (self.low + self.high)
    }

    /// Pick one side: `low` for samples at or below the location.
    pub fn side(&self, sample_below: bool) -> f64 {
        if sample_below { self.low } else { self.high }
    }
}

/// Scale estimator selection. Ratios of scales are what the normalizers
/// consume, so no consistency constants are applied.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ScaleEstimator {
    AvgAbsDev,
    Mad,
    #[default]
    BiweightMidvariance,
}

impl std::fmt::Display for ScaleEstimator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ScaleEstimator::AvgAbsDev => write!(f, "Average absolute deviation from the median"),
            ScaleEstimator::Mad => write!(f, "Median absolute deviation from the median (MAD)"),
            ScaleEstimator::BiweightMidvariance => write!(f, "Biweight midvariance"),
        }
    }
}

/// Median of a mutable sample buffer. Even counts average the two middle
/// order statistics. Uses `select_nth_unstable` for O(n).
pub fn median_of<T: Float>(values: &mut [T]) -> T {
    let n = values.len();
    if n == 0 {
        return T::zero();
    }
    if n == 1 {
        return values[0];
    }
    let mid = n / 2;
    let upper = *values
        .select_nth_unstable_by(mid, |a, b| a.partial_cmp(b).unwrap())
        .1;
    if n % 2 == 1 {
        upper
    } else {
        let lower = values[..mid]
            .iter()
            .copied()
            .fold(T::neg_infinity(), T::max);
        (lower + upper) / T::from(2).unwrap()
    }
}

pub fn median(values: &mut [f64]) -> f64 {
    median_of(values)
}

/// Median of f32 samples, widened to f64. The two middle values of an
/// even count are averaged in f64 so downstream statistics do not pick
/// up an extra rounding step.
pub fn median_f32(values: &mut [f32]) -> f64 {
    let n = values.len();
    if n == 0 {
        return 0.0;
    }
    if n == 1 {
        return values[0] as f64;
    }
    let mid = n / 2;
    let upper = *values
        .select_nth_unstable_by(mid, |a, b| a.partial_cmp(b).unwrap())
        .1 as f64;
    if n % 2 == 1 {
        upper
    } else {
        let lower = values[..mid]
            .iter()
            .copied()
            .fold(f32::NEG_INFINITY, f32::max) as f64;
        0.5 * (lower + upper)
    }
}

pub fn mean_f32(values: &[f32]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().map(|&v| v as f64).sum::<f64>() / values.len() as f64
}

/// Two-sided average absolute deviation from `location`.
pub fn avg_abs_dev_two_sided(values: &[f32], location: f64) -> TwoSided {
    let mut sum_low = 0.0;
    let mut n_low = 0usize;
    let mut sum_high = 0.0;
    let mut n_high = 0usize;
    for &v in values {
        let v = v as f64;
        if v <= location {
            sum_low += location - v;
            n_low += 1;
        } else {
            sum_high += v - location;
            n_high += 1;
        }
    }
    TwoSided {
        low: if n_low > 0 { sum_low / n_low as f64 } else { 0.0 },
        high: if n_high > 0 { sum_high / n_high as f64 } else { 0.0 },
    }
}

/// Two-sided median absolute deviation from `location`.
pub fn mad_two_sided(values: &[f32], location: f64) -> TwoSided {
    let mut dev_low: Vec<f64> = Vec::new();
    let mut dev_high: Vec<f64> = Vec::new();
    for &v in values {
        let v = v as f64;
        if v <= location {
            dev_low.push(location - v);
        } else {
            dev_high.push(v - location);
        }
    }
    TwoSided {
        low: median(&mut dev_low),
        high: median(&mut dev_high),
    }
}

/// Square root of the biweight midvariance over one side of the sample set.
///
/// Deviations are Tukey-weighted with u = (x - location) / (9 * MAD); samples
/// with |u| >= 1 get zero weight. Falls back to the side MAD when everything
/// is zero-weighted.
fn bwmv_side(side_values: &[f64], location: f64, side_mad: f64) -> f64 {
    let n = side_values.len();
    if n == 0 {
        return 0.0;
    }
    if side_mad < EPSILON {
        return 0.0;
    }
    let mut num = 0.0;
    let mut den = 0.0;
    for &v in side_values {
        let d = v - location;
        let u = d / (9.0 * side_mad);
        if u.abs() < 1.0 {
            let t = 1.0 - u * u;
            num += d * d * t.powi(4);
            den += t * (1.0 - 5.0 * u * u);
        }
    }
    if den.abs() < EPSILON {
        return side_mad;
    }
    (n as f64 * num / (den * den)).max(0.0).sqrt()
}

/// Two-sided square-rooted biweight midvariance.
pub fn bwmv_two_sided(values: &[f32], location: f64) -> TwoSided {
    let mad = mad_two_sided(values, location);
    let low: Vec<f64> = values
        .iter()
        .map(|&v| v as f64)
        .filter(|&v| v <= location)
        .collect();
    let high: Vec<f64> = values
        .iter()
        .map(|&v| v as f64)
        .filter(|&v| v > location)
        .collect();
    TwoSided {
        low: bwmv_side(&low, location, mad.low),
        high: bwmv_side(&high, location, mad.high),
    }
}

/// Dispatch on the configured estimator.
pub fn two_sided_scale(estimator: ScaleEstimator, values: &[f32], location: f64) -> TwoSided {
    match estimator {
        ScaleEstimator::AvgAbsDev => avg_abs_dev_two_sided(values, location),
        ScaleEstimator::Mad => mad_two_sided(values, location),
        ScaleEstimator::BiweightMidvariance => bwmv_two_sided(values, location),
    }
}

/// Symmetric dispersion of `values` around `location` with the configured
/// estimator. Used by the clipping algorithms, where one pooled scale
/// serves both sides.
pub fn dispersion(estimator: ScaleEstimator, values: &[f64], location: f64) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    match estimator {
        ScaleEstimator::AvgAbsDev => {
            values.iter().map(|v| (v - location).abs()).sum::<f64>() / values.len() as f64
        }
        ScaleEstimator::Mad => {
            let mut devs: Vec<f64> = values.iter().map(|v| (v - location).abs()).collect();
            median(&mut devs)
        }
        ScaleEstimator::BiweightMidvariance => {
            let mad = dispersion(ScaleEstimator::Mad, values, location);
            bwmv_side(values, location, mad)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn median_odd_even() {
        assert_eq!(median(&mut [3.0, 1.0, 2.0]), 2.0);
        assert_eq!(median(&mut [4.0, 1.0, 3.0, 2.0]), 2.5);
        assert_eq!(median(&mut []), 0.0);
    }

    #[test]
    fn avg_dev_splits_sides() {
        // location 0.5; low side deviations {0.5, 0.0}, high side {0.5}
        let s = avg_abs_dev_two_sided(&[0.0, 0.5, 1.0], 0.5);
        assert!((s.low - 0.25).abs() < 1e-12);
        assert!((s.high - 0.5).abs() < 1e-12);
    }

    #[test]
    fn bwmv_of_constant_is_zero() {
        let s = bwmv_two_sided(&[0.3; 10], 0.3);
        assert_eq!(s.low, 0.0);
        assert_eq!(s.high, 0.0);
    }
}
