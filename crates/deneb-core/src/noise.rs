//! Gaussian noise estimation on image channels.
//!
//! Two estimators are implemented: iterative k-sigma clipping on the finest
//! wavelet layer, and the multiresolution-support refinement on top of it.
//! Both return the estimated standard deviation together with the fraction
//! of samples that contributed to it.

use ndarray::Array2;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::consts::{B3_NOISE_LAYER0, EPSILON};
use crate::wavelet;

/// Noise standard deviations of the first a-trous B3 detail layers for
/// unit-variance Gaussian input. Layer 0 dominates the estimate; deeper
/// layers shape the multiresolution support.
const LAYER_SIGMA: [f64; 4] = [0.8907, 0.2007, 0.0856, 0.0413];

const MAX_ITERATIONS: usize = 10;
const CONVERGENCE: f64 = 1e-4;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum NoiseEstimator {
    KSigma,
    #[default]
    Mrs,
    /// Accepted for configuration compatibility; evaluated as MRS. The
    /// star-photometry estimator needs catalog data this library does not
    /// consume.
    NStar,
}

impl std::fmt::Display for NoiseEstimator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NoiseEstimator::KSigma => write!(f, "K-sigma"),
            NoiseEstimator::Mrs => write!(f, "MRS"),
            NoiseEstimator::NStar => write!(f, "N-star"),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct NoiseEstimate {
    pub sigma: f64,
    /// Fraction of samples classified as noise and used for the estimate.
    pub fraction: f64,
}

fn stddev(values: impl Iterator<Item = f64> + Clone, n: usize) -> f64 {
    if n == 0 {
        return 0.0;
    }
    let mean = values.clone().sum::<f64>() / n as f64;
    let var = values.map(|v| (v - mean) * (v - mean)).sum::<f64>() / n as f64;
    var.sqrt()
}

/// Iterative 3-sigma clipped standard deviation of the finest wavelet
/// layer, corrected for the layer's Gaussian response.
pub fn ksigma_noise(channel: &Array2<f32>) -> NoiseEstimate {
    let layer = wavelet::finest_layer(channel);
    let total = layer.len();
    if total == 0 {
        return NoiseEstimate { sigma: 0.0, fraction: 0.0 };
    }

    let mut sigma = stddev(layer.iter().map(|&v| v as f64), total);
    let mut kept = total;
    for _ in 0..MAX_ITERATIONS {
        if sigma < EPSILON {
            break;
        }
        let limit = 3.0 * sigma;
        let clipped: Vec<f64> = layer
            .iter()
            .map(|&v| v as f64)
            .filter(|v| v.abs() <= limit)
            .collect();
        if clipped.is_empty() {
            break;
        }
        let next = stddev(clipped.iter().copied(), clipped.len());
        let converged = (sigma - next).abs() <= CONVERGENCE * sigma;
        sigma = next;
        kept = clipped.len();
        if converged {
            break;
        }
    }

    NoiseEstimate {
        sigma: sigma / B3_NOISE_LAYER0,
        fraction: kept as f64 / total as f64,
    }
}

/// Multiresolution-support noise estimate.
///
/// A sample belongs to the support of significant structures when any of
/// the first detail layers exceeds 3 sigma at that layer's scale. The noise
/// standard deviation is re-estimated from layer 0 restricted to samples
/// outside the support, iterating until stable.
///
/// Returns `None` when fewer than `min_fraction` of the samples are
/// classified as noise; callers fall back to the k-sigma estimate.
pub fn mrs_noise(channel: &Array2<f32>, min_fraction: f64) -> Option<NoiseEstimate> {
    let total = channel.len();
    if total == 0 {
        return None;
    }
    let (layers, _) = wavelet::decompose(channel, LAYER_SIGMA.len());
    let planes: Vec<&[f32]> = layers
        .iter()
        .map(|l| l.as_slice().expect("detail layers are contiguous"))
        .collect();

    let mut sigma = ksigma_noise(channel).sigma;
    let mut fraction = 0.0;
    for iteration in 0..MAX_ITERATIONS {
        if sigma < EPSILON {
            break;
        }
        let mut sum = 0.0f64;
        let mut sum2 = 0.0f64;
        let mut n = 0usize;
        for idx in 0..total {
            let significant = planes
                .iter()
                .zip(LAYER_SIGMA.iter())
                .any(|(plane, &ls)| (plane[idx] as f64).abs() > 3.0 * sigma * ls);
            if !significant {
                let w = planes[0][idx] as f64;
                sum += w;
                sum2 += w * w;
                n += 1;
            }
        }
        fraction = n as f64 / total as f64;
        if n < 2 {
            break;
        }
        let mean = sum / n as f64;
        let next = ((sum2 / n as f64 - mean * mean).max(0.0)).sqrt() / B3_NOISE_LAYER0;
        let converged = (sigma - next).abs() <= CONVERGENCE * sigma;
        sigma = next;
        if converged {
            debug!(iteration, sigma, fraction, "MRS noise converged");
            break;
        }
    }

    if fraction < min_fraction || sigma < EPSILON {
        return None;
    }
    Some(NoiseEstimate { sigma, fraction })
}

/// Estimate noise with the configured algorithm, falling back to k-sigma
/// when the MRS support covers too little of the image.
pub fn estimate_noise(
    estimator: NoiseEstimator,
    channel: &Array2<f32>,
    mrs_min_fraction: f64,
) -> NoiseEstimate {
    match estimator {
        NoiseEstimator::KSigma => ksigma_noise(channel),
        NoiseEstimator::Mrs | NoiseEstimator::NStar => {
            match mrs_noise(channel, mrs_min_fraction) {
                Some(estimate) => estimate,
                None => {
                    debug!("MRS support too small, falling back to k-sigma");
                    ksigma_noise(channel)
                }
            }
        }
    }
}
