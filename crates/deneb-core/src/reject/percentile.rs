//! Percentile clipping: single-pass rejection relative to the stack
//! median.

use super::{live_median, AlgoOutcome, StackItem};
use crate::config::RejectionParams;
use crate::consts::EPSILON;

pub(crate) fn apply(live: &mut [StackItem], params: &RejectionParams) -> AlgoOutcome {
    if live.len() < 3 {
        return AlgoOutcome {
            degenerate: true,
            slope: None,
        };
    }
    let m = live_median(live);
    if m < EPSILON {
        // Relative distances are undefined at zero median.
        return AlgoOutcome {
            degenerate: true,
            slope: None,
        };
    }
    for item in live.iter_mut() {
        let v = item.value as f64;
        if params.clip_low && (m - v) / m > params.pc_low {
            item.set_reject_low();
        } else if params.clip_high && (v - m) / m > params.pc_high {
            item.set_reject_high();
        }
    }
    AlgoOutcome::default()
}
