//! Min/max clipping: unconditional rejection of the lowest and highest
//! samples.

use super::{AlgoOutcome, StackItem};
use crate::config::RejectionParams;

pub(crate) fn apply(live: &mut [StackItem], params: &RejectionParams) -> AlgoOutcome {
    let n = live.len();
    let k_low = if params.clip_low {
        params.min_max_low as usize
    } else {
        0
    };
    let k_high = if params.clip_high {
        params.min_max_high as usize
    } else {
        0
    };

    if k_low + k_high >= n {
        return AlgoOutcome {
            degenerate: true,
            slope: None,
        };
    }

    // The live slice is already in ascending value order.
    for item in live[..k_low].iter_mut() {
        item.set_reject_low();
    }
    for item in live[n - k_high..].iter_mut() {
        item.set_reject_high();
    }
    AlgoOutcome::default()
}
