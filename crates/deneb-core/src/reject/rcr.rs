//! Robust Chauvenet rejection.
//!
//! Iterates a robust location (median) and scale (scaled MAD), rejecting
//! the worst deviator while the expected count of such deviations under a
//! Gaussian model falls below the configured limit.

use statrs::function::erf::erfc;

use super::{AlgoOutcome, StackItem};
use crate::config::RejectionParams;
use crate::consts::{EPSILON, MAX_CLIP_ITERATIONS};
use crate::stats;

/// MAD to Gaussian sigma consistency factor.
const MAD_SIGMA: f64 = 1.4826;

const SQRT_2: f64 = std::f64::consts::SQRT_2;

pub(crate) fn apply(live: &mut [StackItem], params: &RejectionParams) -> AlgoOutcome {
    if live.len() < 3 {
        return AlgoOutcome {
            degenerate: true,
            slope: None,
        };
    }

    for _ in 0..MAX_CLIP_ITERATIONS {
        let survivors: Vec<usize> = (0..live.len())
            .filter(|&i| !live[i].is_rejected())
            .collect();
        let k = survivors.len();
        if k < 3 {
            break;
        }
        let mut values: Vec<f64> = survivors.iter().map(|&i| live[i].value as f64).collect();
        let loc = stats::median(&mut values);
        let mut devs: Vec<f64> = survivors
            .iter()
            .map(|&i| (live[i].value as f64 - loc).abs())
            .collect();
        let scale = MAD_SIGMA * stats::median(&mut devs);
        if scale < EPSILON {
            break;
        }

        // Worst deviator among the enabled sides.
        let mut worst: Option<(usize, f64, bool)> = None;
        for &i in &survivors {
            let v = live[i].value as f64;
            let is_low = v < loc;
            if is_low && !params.clip_low {
                continue;
            }
            if !is_low && !params.clip_high {
                continue;
            }
            let dev = (v - loc).abs();
            if worst.map(|(_, d, _)| dev > d).unwrap_or(true) {
                worst = Some((i, dev, is_low));
            }
        }
        let Some((idx, dev, is_low)) = worst else {
            break;
        };

        // Chauvenet criterion with a robust scale.
        if k as f64 * erfc(dev / (SQRT_2 * scale)) < params.rcr_limit {
            if is_low {
                live[idx].set_reject_low();
            } else {
                live[idx].set_reject_high();
            }
        } else {
            break;
        }
    }
    AlgoOutcome::default()
}
