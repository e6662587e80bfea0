//! Pixel stack rejection.
//!
//! All algorithms share one envelope: sort the stack by normalized value,
//! apply range rejection, run the statistical algorithm over the remaining
//! samples, then partition so survivors come first in ascending order.
//! Flags are a pure function of the stack contents; thread scheduling can
//! never change them.

pub mod ccd;
pub mod esd;
pub mod linear_fit;
pub mod minmax;
pub mod percentile;
pub mod rcr;
pub mod sigma;

use crate::config::{RangeConfig, Rejection, RejectionParams};
use crate::stats::ScaleEstimator;

const INDEX_MASK: u32 = 0x0FFF_FFFF;
const REJECT_LOW: u32 = 1 << 28;
const REJECT_HIGH: u32 = 1 << 29;
const RANGE_LOW: u32 = 1 << 30;
const RANGE_HIGH: u32 = 1 << 31;

/// One sample of a pixel stack: 12 bytes.
///
/// `value` is the current post-normalization sample; `raw` preserves the
/// post-pedestal, pre-normalization sample for output renormalization.
/// The frame index and the four rejection flags share the packed word.
#[derive(Clone, Copy, Debug, Default)]
pub struct StackItem {
    pub value: f32,
    pub raw: f32,
    bits: u32,
}

impl StackItem {
    #[inline]
    pub fn new(value: f32, raw: f32, index: usize) -> Self {
        let value = if value.is_finite() { value } else { 0.0 };
        let raw = if raw.is_finite() { raw } else { 0.0 };
        Self {
            value,
            raw,
            bits: index as u32 & INDEX_MASK,
        }
    }

    #[inline]
    pub fn index(&self) -> usize {
        (self.bits & INDEX_MASK) as usize
    }

    #[inline]
    pub fn reject_low(&self) -> bool {
        self.bits & REJECT_LOW != 0
    }

    #[inline]
    pub fn reject_high(&self) -> bool {
        self.bits & REJECT_HIGH != 0
    }

    #[inline]
    pub fn range_low(&self) -> bool {
        self.bits & RANGE_LOW != 0
    }

    #[inline]
    pub fn range_high(&self) -> bool {
        self.bits & RANGE_HIGH != 0
    }

    #[inline]
    pub fn set_reject_low(&mut self) {
        self.bits |= REJECT_LOW;
    }

    #[inline]
    pub fn set_reject_high(&mut self) {
        self.bits |= REJECT_HIGH;
    }

    #[inline]
    pub fn set_range_low(&mut self) {
        self.bits |= RANGE_LOW;
    }

    #[inline]
    pub fn set_range_high(&mut self) {
        self.bits |= RANGE_HIGH;
    }

    #[inline]
    pub fn is_statistically_rejected(&self) -> bool {
        self.bits & (REJECT_LOW | REJECT_HIGH) != 0
    }

    #[inline]
    pub fn is_range_rejected(&self) -> bool {
        self.bits & (RANGE_LOW | RANGE_HIGH) != 0
    }

    #[inline]
    pub fn is_rejected(&self) -> bool {
        self.bits & (REJECT_LOW | REJECT_HIGH | RANGE_LOW | RANGE_HIGH) != 0
    }
}

/// Parameters shared by one rejection pass.
pub struct RejectContext<'a> {
    pub method: Rejection,
    pub params: &'a RejectionParams,
    pub range: &'a RangeConfig,
    /// Dispersion estimator for the sigma clipping family.
    pub scale: ScaleEstimator,
}

/// Result of rejecting one stack.
#[derive(Clone, Copy, Debug, Default)]
pub struct StackVerdict {
    /// Length of the surviving prefix after partitioning.
    pub kept: usize,
    /// The algorithm could not run (too few samples, vanishing statistics,
    /// or nothing survived); the combiner falls back to the stack median.
    pub degenerate: bool,
    /// Absolute fitted drift across the stack, linear fit only.
    pub slope: Option<f32>,
}

/// Outcome of one statistical algorithm over the live slice.
#[derive(Clone, Copy, Debug, Default)]
pub(crate) struct AlgoOutcome {
    pub degenerate: bool,
    pub slope: Option<f32>,
}

fn cmp_value(a: &StackItem, b: &StackItem) -> std::cmp::Ordering {
    a.value
        .partial_cmp(&b.value)
        .unwrap_or(std::cmp::Ordering::Equal)
        .then(a.index().cmp(&b.index()))
}

/// Run the full rejection envelope over one stack.
pub fn reject_stack(stack: &mut [StackItem], ctx: &RejectContext) -> StackVerdict {
    // 1. Ascending value order; index breaks ties so the order (and thus
    //    every downstream decision) is a pure function of the samples.
    stack.sort_unstable_by(cmp_value);

    // 2. Range rejection. The stack is sorted, so range-rejected samples
    //    form a low prefix and a high suffix around the live region.
    //    The low bound itself is rejected (a zero bound kills black
    //    pixels); the high bound itself survives.
    let mut lo = 0;
    let mut hi = stack.len();
    if ctx.range.clip_low {
        while lo < hi && stack[lo].value as f64 <= ctx.range.low {
            stack[lo].set_range_low();
            lo += 1;
        }
    }
    if ctx.range.clip_high {
        while hi > lo && stack[hi - 1].value as f64 > ctx.range.high {
            stack[hi - 1].set_range_high();
            hi -= 1;
        }
    }

    // 3. Statistical rejection over the live region.
    let live = &mut stack[lo..hi];
    let outcome = match ctx.method {
        Rejection::None => AlgoOutcome::default(),
        Rejection::MinMax => minmax::apply(live, ctx.params),
        Rejection::Percentile => percentile::apply(live, ctx.params),
        Rejection::Sigma => sigma::apply_sigma(live, ctx.params, ctx.scale),
        Rejection::WinsorizedSigma => sigma::apply_winsorized(live, ctx.params),
        Rejection::AveragedSigma => sigma::apply_averaged(live, ctx.params),
        Rejection::LinearFit => linear_fit::apply(live, ctx.params),
        Rejection::CcdNoise => ccd::apply(live, ctx.params),
        Rejection::Esd => esd::apply(live, ctx.params),
        Rejection::Rcr => rcr::apply(live, ctx.params),
    };

    finalize(stack, outcome)
}

/// Partition survivors first (ascending), rejected last.
pub fn finalize(stack: &mut [StackItem], outcome: AlgoOutcome) -> StackVerdict {
    stack.sort_unstable_by(|a, b| {
        a.is_rejected()
            .cmp(&b.is_rejected())
            .then_with(|| cmp_value(a, b))
    });
    let kept = stack.iter().take_while(|s| !s.is_rejected()).count();
    StackVerdict {
        kept,
        degenerate: outcome.degenerate || kept == 0,
        slope: outcome.slope,
    }
}

/// Mean and population standard deviation of the unrejected samples.
pub(crate) fn live_mean_stddev(live: &[StackItem]) -> (f64, f64, usize) {
    let mut sum = 0.0f64;
    let mut n = 0usize;
    for s in live.iter().filter(|s| !s.is_rejected()) {
        sum += s.value as f64;
        n += 1;
    }
    if n == 0 {
        return (0.0, 0.0, 0);
    }
    let mean = sum / n as f64;
    let mut var = 0.0f64;
    for s in live.iter().filter(|s| !s.is_rejected()) {
        let d = s.value as f64 - mean;
        var += d * d;
    }
    (mean, (var / n as f64).sqrt(), n)
}

/// Median of the unrejected samples. The live slice is value-ordered with
/// rejected samples interspersed, so collect then select.
pub(crate) fn live_median(live: &[StackItem]) -> f64 {
    let mut values: Vec<f64> = live
        .iter()
        .filter(|s| !s.is_rejected())
        .map(|s| s.value as f64)
        .collect();
    crate::stats::median(&mut values)
}
