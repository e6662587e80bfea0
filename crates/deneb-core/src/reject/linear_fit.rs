//! Linear fit clipping.
//!
//! The survivors' sorted values are fitted against their ranks with a
//! least-absolute-deviation line; samples whose residual exceeds the
//! configured multiples of the residual MAD are rejected, and the fit is
//! repeated until stable.

use super::{AlgoOutcome, StackItem};
use crate::config::RejectionParams;
use crate::consts::{EPSILON, MAX_CLIP_ITERATIONS};
use crate::stats;

/// Least-absolute-deviation line through (xs, ys).
///
/// The classic bracketing scheme: start from the least-squares slope,
/// bracket the root of the LAD gradient sign sum, then bisect. The
/// intercept for any slope is the median of the residuals.
fn lad_fit(xs: &[f64], ys: &[f64]) -> (f64, f64) {
    let n = xs.len();
    debug_assert!(n >= 2);
    let nf = n as f64;
    let sx: f64 = xs.iter().sum();
    let sy: f64 = ys.iter().sum();
    let sxx: f64 = xs.iter().map(|x| x * x).sum();
    let sxy: f64 = xs.iter().zip(ys).map(|(x, y)| x * y).sum();
    let det = nf * sxx - sx * sx;
    if det.abs() < EPSILON {
        return (0.0, sy / nf);
    }
    let a_ls = (nf * sxy - sx * sy) / det;
    let b_ls = (sy - a_ls * sx) / nf;

    let chi: f64 = xs
        .iter()
        .zip(ys)
        .map(|(x, y)| {
            let r = y - (a_ls * x + b_ls);
            r * r
        })
        .sum();
    let sig_a = (chi / det).max(0.0).sqrt().max(EPSILON);

    let grad = |a: f64| -> f64 {
        let mut resid: Vec<f64> = xs.iter().zip(ys).map(|(x, y)| y - a * x).collect();
        let b = stats::median(&mut resid);
        xs.iter()
            .zip(ys)
            .map(|(x, y)| {
                let r = y - (a * x + b);
                if r > EPSILON {
                    *x
                } else if r < -EPSILON {
                    -x
                } else {
                    0.0
                }
            })
            .sum()
    };

    // grad is nonincreasing in a; bracket a sign change around a_ls.
    let mut a1 = a_ls;
    let mut f1 = grad(a1);
    if f1.abs() < EPSILON {
        let mut resid: Vec<f64> = xs.iter().zip(ys).map(|(x, y)| y - a1 * x).collect();
        return (a1, stats::median(&mut resid));
    }
    let mut step = sig_a;
    let mut a2 = a1;
    let mut f2 = f1;
    for _ in 0..64 {
        a2 = if f1 > 0.0 { a1 + step } else { a1 - step };
        f2 = grad(a2);
        if f1 * f2 <= 0.0 {
            break;
        }
        a1 = a2;
        f1 = f2;
        step *= 2.0;
    }
    if f1 * f2 > 0.0 {
        // No bracket found; fall back to least squares.
        return (a_ls, b_ls);
    }

    let (mut lo, mut hi) = if a1 < a2 { (a1, a2) } else { (a2, a1) };
    for _ in 0..60 {
        let mid = 0.5 * (lo + hi);
        let fm = grad(mid);
        if fm > 0.0 {
            lo = mid;
        } else {
            hi = mid;
        }
        if hi - lo < 1e-12 {
            break;
        }
    }
    let a = 0.5 * (lo + hi);
    let mut resid: Vec<f64> = xs.iter().zip(ys).map(|(x, y)| y - a * x).collect();
    (a, stats::median(&mut resid))
}

pub(crate) fn apply(live: &mut [StackItem], params: &RejectionParams) -> AlgoOutcome {
    let total = live.len();
    if total < 5 {
        return AlgoOutcome {
            degenerate: true,
            slope: None,
        };
    }

    let mut slope = 0.0f64;
    for _ in 0..MAX_CLIP_ITERATIONS {
        // Survivors keep ascending value order within the live slice, so
        // their rank is their position in this collection.
        let survivors: Vec<usize> = (0..live.len())
            .filter(|&i| !live[i].is_rejected())
            .collect();
        let k = survivors.len();
        if k < 5 {
            break;
        }
        let xs: Vec<f64> = (0..k).map(|i| i as f64).collect();
        let ys: Vec<f64> = survivors.iter().map(|&i| live[i].value as f64).collect();
        let (a, b) = lad_fit(&xs, &ys);
        slope = a;

        let residuals: Vec<f64> = xs
            .iter()
            .zip(ys.iter())
            .map(|(x, y)| y - (a * x + b))
            .collect();
        let mut abs_resid: Vec<f64> = residuals.iter().map(|r| r.abs()).collect();
        let s = stats::median(&mut abs_resid);

        // A vanishing residual MAD means most of the stack sits exactly on
        // the fitted line; anything off it is the outlier.
        let (lo_bound, hi_bound) = if s < EPSILON {
            (-EPSILON, EPSILON)
        } else {
            (-params.lfit_low * s, params.lfit_high * s)
        };
        let mut changed = false;
        for (pos, &i) in survivors.iter().enumerate() {
            let r = residuals[pos];
            if params.clip_low && r < lo_bound {
                live[i].set_reject_low();
                changed = true;
            } else if params.clip_high && r > hi_bound {
                live[i].set_reject_high();
                changed = true;
            }
        }
        if !changed {
            break;
        }
    }

    // Drift across the whole stack in normalized units, clamped to the
    // map range.
    let drift = (slope.abs() * (total - 1) as f64).min(1.0) as f32;
    AlgoOutcome {
        degenerate: false,
        slope: Some(drift),
    }
}
