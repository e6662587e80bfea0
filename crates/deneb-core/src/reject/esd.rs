//! Generalized extreme Studentized deviate rejection (Rosner's test).

use statrs::distribution::{ContinuousCDF, StudentsT};

use super::{AlgoOutcome, StackItem};
use crate::config::RejectionParams;
use crate::consts::EPSILON;

/// Critical value for the i-th test (0-based) of Rosner's procedure with
/// `n` samples at significance `alpha`.
fn critical(n: usize, i: usize, alpha: f64) -> Option<f64> {
    let remaining = n - i;
    if remaining < 4 {
        return None;
    }
    let df = (remaining - 2) as f64;
    let p = 1.0 - alpha / (2.0 * remaining as f64);
    let t = StudentsT::new(0.0, 1.0, df).ok()?.inverse_cdf(p);
    let num = (remaining - 1) as f64 * t;
    let den = ((df + t * t) * remaining as f64).sqrt();
    Some(num / den)
}

pub(crate) fn apply(live: &mut [StackItem], params: &RejectionParams) -> AlgoOutcome {
    let n = live.len();
    if n < 4 {
        return AlgoOutcome {
            degenerate: true,
            slope: None,
        };
    }
    let max_outliers = ((params.esd_outliers * n as f64).floor() as usize).min(n - 3);
    if max_outliers == 0 {
        return AlgoOutcome::default();
    }

    // Candidate extrema removed so far, with the side each came from.
    let mut work: Vec<(f64, usize)> = live
        .iter()
        .enumerate()
        .map(|(i, s)| (s.value as f64, i))
        .collect();
    let mut removed: Vec<(usize, bool)> = Vec::with_capacity(max_outliers);
    let mut last_significant: Option<usize> = None;

    for i in 0..max_outliers {
        let k = work.len();
        if k < 4 {
            break;
        }
        let mean = work.iter().map(|&(v, _)| v).sum::<f64>() / k as f64;
        let var = work
            .iter()
            .map(|&(v, _)| (v - mean) * (v - mean))
            .sum::<f64>()
            / (k - 1) as f64;
        let sd = var.sqrt();
        if sd < EPSILON {
            break;
        }

        // Most extreme deviate among the sides rejection is enabled for.
        let mut best: Option<(usize, f64, bool)> = None;
        for (pos, &(v, _)) in work.iter().enumerate() {
            let is_low = v < mean;
            if is_low && !params.clip_low {
                continue;
            }
            if !is_low && !params.clip_high {
                continue;
            }
            let dev = (v - mean).abs();
            if best.map(|(_, d, _)| dev > d).unwrap_or(true) {
                best = Some((pos, dev, is_low));
            }
        }
        let Some((pos, dev, is_low)) = best else {
            break;
        };

        let Some(mut lambda) = critical(n, i, params.esd_alpha) else {
            break;
        };
        if is_low {
            lambda *= params.esd_low_relaxation;
        }
        if dev / sd > lambda {
            last_significant = Some(i);
        }

        let (_, stack_idx) = work.swap_remove(pos);
        removed.push((stack_idx, is_low));
    }

    if let Some(count) = last_significant {
        for &(stack_idx, is_low) in removed.iter().take(count + 1) {
            if is_low {
                live[stack_idx].set_reject_low();
            } else {
                live[stack_idx].set_reject_high();
            }
        }
    }
    AlgoOutcome::default()
}
