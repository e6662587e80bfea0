//! CCD noise model clipping: per-sample expected deviation from gain,
//! read noise and scale (sensitivity) noise.

use super::{live_median, AlgoOutcome, StackItem};
use crate::config::RejectionParams;
use crate::consts::{EPSILON, MAX_CLIP_ITERATIONS};

fn model_sigma(v: f64, params: &RejectionParams) -> f64 {
    let gain = params.ccd_gain;
    let rn = params.ccd_read_noise;
    let sn = params.ccd_scale_noise;
    let shot = (v.max(0.0) * gain + rn * rn) / (gain * gain);
    let scale = sn * v;
    (shot + scale * scale).max(0.0).sqrt()
}

pub(crate) fn apply(live: &mut [StackItem], params: &RejectionParams) -> AlgoOutcome {
    if live.len() < 3 {
        return AlgoOutcome {
            degenerate: true,
            slope: None,
        };
    }
    for _ in 0..MAX_CLIP_ITERATIONS {
        let survivors = live.iter().filter(|s| !s.is_rejected()).count();
        if survivors < 3 {
            break;
        }
        let m = live_median(live);
        let mut changed = false;
        for item in live.iter_mut().filter(|s| !s.is_rejected()) {
            let v = item.value as f64;
            let sigma = model_sigma(v, params);
            if sigma < EPSILON {
                continue;
            }
            if params.clip_low && m - v > params.sigma_low * sigma {
                item.set_reject_low();
                changed = true;
            } else if params.clip_high && v - m > params.sigma_high * sigma {
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
