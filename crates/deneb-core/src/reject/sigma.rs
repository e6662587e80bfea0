//! The sigma clipping family: plain, Winsorized, and averaged.

use super::{live_mean_stddev, live_median, AlgoOutcome, StackItem};
use crate::config::RejectionParams;
use crate::consts::{EPSILON, MAX_CLIP_ITERATIONS};
use crate::stats::{self, ScaleEstimator};

/// Iterated sigma clipping around the median of the survivors, with the
/// configured dispersion estimator.
///
/// When the dispersion collapses to zero while deviating samples remain
/// (most of the stack sits exactly at the median), those deviants are the
/// outliers and are rejected directly.
pub(crate) fn apply_sigma(
    live: &mut [StackItem],
    params: &RejectionParams,
    scale: ScaleEstimator,
) -> AlgoOutcome {
    if live.len() < 3 {
        return AlgoOutcome {
            degenerate: true,
            slope: None,
        };
    }
    for _ in 0..MAX_CLIP_ITERATIONS {
        let values: Vec<f64> = live
            .iter()
            .filter(|s| !s.is_rejected())
            .map(|s| s.value as f64)
            .collect();
        if values.len() < 3 {
            break;
        }
        let mut sorted = values.clone();
        let m = stats::median(&mut sorted);
        let sigma = stats::dispersion(scale, &values, m);

        let (lo, hi) = if sigma < EPSILON {
            (m - EPSILON, m + EPSILON)
        } else {
            (m - params.sigma_low * sigma, m + params.sigma_high * sigma)
        };
        let mut changed = false;
        for item in live.iter_mut().filter(|s| !s.is_rejected()) {
            let v = item.value as f64;
            if params.clip_low && v < lo {
                item.set_reject_low();
                changed = true;
            } else if params.clip_high && v > hi {
                item.set_reject_high();
                changed = true;
            }
        }
        if !changed {
            break;
        }
    }
    AlgoOutcome::default()
}

/// Winsorized sigma clipping: a first pass replaces far outliers by the
/// median in a working copy; statistics then come from the winsorized
/// values while the rejection test applies to the original samples.
pub(crate) fn apply_winsorized(live: &mut [StackItem], params: &RejectionParams) -> AlgoOutcome {
    let n = live.len();
    if n < 3 {
        return AlgoOutcome {
            degenerate: true,
            slope: None,
        };
    }

    let m = live_median(live);
    let (_, sigma0, _) = live_mean_stddev(live);
    let cutoff = params.winsorization_cutoff * sigma0;
    let working: Vec<f64> = live
        .iter()
        .map(|s| {
            let v = s.value as f64;
            if sigma0 > EPSILON && (v - m).abs() > cutoff {
                m
            } else {
                v
            }
        })
        .collect();

    for _ in 0..MAX_CLIP_ITERATIONS {
        let mut sum = 0.0f64;
        let mut count = 0usize;
        for (item, &w) in live.iter().zip(working.iter()) {
            if !item.is_rejected() {
                sum += w;
                count += 1;
            }
        }
        if count < 3 {
            break;
        }
        let mean = sum / count as f64;
        let mut var = 0.0f64;
        for (item, &w) in live.iter().zip(working.iter()) {
            if !item.is_rejected() {
                let d = w - mean;
                var += d * d;
            }
        }
        let sigma = (var / count as f64).sqrt();
        if sigma < EPSILON {
            break;
        }
        let lo = mean - params.sigma_low * sigma;
        let hi = mean + params.sigma_high * sigma;
        let mut changed = false;
        for item in live.iter_mut().filter(|s| !s.is_rejected()) {
            let v = item.value as f64;
            if params.clip_low && v < lo {
                item.set_reject_low();
                changed = true;
            } else if params.clip_high && v > hi {
                item.set_reject_high();
                changed = true;
            }
        }
        if !changed {
            break;
        }
    }
    AlgoOutcome::default()
}

/// Averaged sigma clipping: a Poisson-like noise model with the gain
/// estimated from the cross-frame variance of this stack.
pub(crate) fn apply_averaged(live: &mut [StackItem], params: &RejectionParams) -> AlgoOutcome {
    if live.len() < 3 {
        return AlgoOutcome {
            degenerate: true,
            slope: None,
        };
    }
    let m0 = live_median(live);
    let (mean0, sigma0, _) = live_mean_stddev(live);
    let var0 = sigma0 * sigma0;
    if var0 < EPSILON {
        // Zero cross-frame variance: nothing to reject.
        return AlgoOutcome::default();
    }
    let signal = m0.max(mean0);
    if signal < EPSILON {
        return AlgoOutcome {
            degenerate: true,
            slope: None,
        };
    }
    let gain = signal / var0;

    for _ in 0..MAX_CLIP_ITERATIONS {
        let (mean, _, n) = live_mean_stddev(live);
        if n < 3 {
            break;
        }
        let m = live_median(live);
        let sigma = (m.max(mean) / gain).max(0.0).sqrt();
        if sigma < EPSILON {
            break;
        }
        let lo = m - params.sigma_low * sigma;
        let hi = m + params.sigma_high * sigma;
        let mut changed = false;
        for item in live.iter_mut().filter(|s| !s.is_rejected()) {
            let v = item.value as f64;
            if params.clip_low && v < lo {
                item.set_reject_low();
                changed = true;
            } else if params.clip_high && v > hi {
                item.set_reject_high();
                changed = true;
            }
        }
        if !changed {
            break;
        }
    }
    AlgoOutcome::default()
}
