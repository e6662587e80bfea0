use deneb_core::config::{RangeConfig, Rejection, RejectionParams};
use deneb_core::reject::{reject_stack, RejectContext, StackItem};
use deneb_core::stats::ScaleEstimator;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn stack_of(values: &[f32]) -> Vec<StackItem> {
    values
        .iter()
        .enumerate()
        .map(|(i, &v)| StackItem::new(v, v, i))
        .collect()
}

fn no_range() -> RangeConfig {
    RangeConfig {
        clip_low: false,
        low: 0.0,
        clip_high: false,
        high: 1.0,
        report: false,
        map: true,
    }
}

fn ctx<'a>(
    method: Rejection,
    params: &'a RejectionParams,
    range: &'a RangeConfig,
) -> RejectContext<'a> {
    RejectContext {
        method,
        params,
        range,
        scale: ScaleEstimator::Mad,
    }
}

fn count_flags(stack: &[StackItem]) -> (usize, usize, usize, usize) {
    let mut low = 0;
    let mut high = 0;
    let mut range_low = 0;
    let mut range_high = 0;
    for s in stack {
        if s.reject_low() {
            low += 1;
        }
        if s.reject_high() {
            high += 1;
        }
        if s.range_low() {
            range_low += 1;
        }
        if s.range_high() {
            range_high += 1;
        }
    }
    (low, high, range_low, range_high)
}

fn survivors(stack: &[StackItem]) -> usize {
    stack.iter().filter(|s| !s.is_rejected()).count()
}

const ALL_METHODS: [Rejection; 10] = [
    Rejection::None,
    Rejection::MinMax,
    Rejection::Percentile,
    Rejection::Sigma,
    Rejection::WinsorizedSigma,
    Rejection::AveragedSigma,
    Rejection::LinearFit,
    Rejection::CcdNoise,
    Rejection::Esd,
    Rejection::Rcr,
];

// ---------------------------------------------------------------------------
// Universal invariants
// ---------------------------------------------------------------------------

#[test]
fn flag_partition_accounts_for_every_sample() {
    let values = [0.02, 0.11, 0.12, 0.10, 0.13, 0.95, 0.12, 0.11];
    let params = RejectionParams::default();
    let range = RangeConfig {
        clip_low: true,
        low: 0.05,
        clip_high: true,
        high: 0.9,
        report: false,
        map: true,
    };
    for method in ALL_METHODS {
        let mut stack = stack_of(&values);
        let verdict = reject_stack(&mut stack, &ctx(method, &params, &range));
        let (low, high, range_low, range_high) = count_flags(&stack);
        assert_eq!(
            survivors(&stack) + low + high + range_low + range_high,
            values.len(),
            "accounting broken for {method:?}"
        );
        assert_eq!(verdict.kept, survivors(&stack), "kept mismatch for {method:?}");
    }
}

#[test]
fn survivors_prefix_is_sorted_ascending() {
    let values = [0.5, 0.1, 0.9, 0.3, 0.7, 0.2];
    let params = RejectionParams::default();
    let range = no_range();
    for method in ALL_METHODS {
        let mut stack = stack_of(&values);
        let verdict = reject_stack(&mut stack, &ctx(method, &params, &range));
        for pair in stack[..verdict.kept].windows(2) {
            assert!(pair[0].value <= pair[1].value, "order broken for {method:?}");
        }
        for item in &stack[verdict.kept..] {
            assert!(item.is_rejected(), "partition broken for {method:?}");
        }
    }
}

#[test]
fn identical_samples_survive_every_statistical_method() {
    let values = [0.25f32; 8];
    let params = RejectionParams::default();
    let range = no_range();
    for method in [
        Rejection::Sigma,
        Rejection::WinsorizedSigma,
        Rejection::AveragedSigma,
        Rejection::LinearFit,
        Rejection::Esd,
        Rejection::Rcr,
    ] {
        let mut stack = stack_of(&values);
        let verdict = reject_stack(&mut stack, &ctx(method, &params, &range));
        assert_eq!(verdict.kept, 8, "{method:?} rejected identical samples");
        assert!(!verdict.degenerate, "{method:?} degenerate on identical samples");
    }
}

// ---------------------------------------------------------------------------
// Sigma clipping: one hot sample among five
// ---------------------------------------------------------------------------

#[test]
fn sigma_clip_rejects_single_outlier() {
    let mut stack = stack_of(&[0.10, 0.10, 0.10, 0.10, 0.50]);
    let params = RejectionParams {
        sigma_high: 3.0,
        ..Default::default()
    };
    let range = no_range();
    let verdict = reject_stack(&mut stack, &ctx(Rejection::Sigma, &params, &range));
    assert_eq!(verdict.kept, 4);
    let rejected = stack.iter().find(|s| s.reject_high()).unwrap();
    assert_eq!(rejected.index(), 4);
    let mean: f64 = stack[..verdict.kept]
        .iter()
        .map(|s| s.value as f64)
        .sum::<f64>()
        / verdict.kept as f64;
    assert!((mean - 0.10).abs() < 1e-6);
}

#[test]
fn sigma_clip_one_sided_suppression() {
    let values = [0.0, 0.48, 0.5, 0.5, 0.52, 1.0];
    let range = no_range();

    let params_high_only = RejectionParams {
        clip_low: false,
        sigma_low: 1.0,
        sigma_high: 1.0,
        ..Default::default()
    };
    let mut stack = stack_of(&values);
    reject_stack(&mut stack, &ctx(Rejection::Sigma, &params_high_only, &range));
    let (low, high, _, _) = count_flags(&stack);
    assert_eq!(low, 0);
    assert!(high > 0);

    let params_low_only = RejectionParams {
        clip_high: false,
        sigma_low: 1.0,
        sigma_high: 1.0,
        ..Default::default()
    };
    let mut stack = stack_of(&values);
    reject_stack(&mut stack, &ctx(Rejection::Sigma, &params_low_only, &range));
    let (low, high, _, _) = count_flags(&stack);
    assert!(low > 0);
    assert_eq!(high, 0);
}

// ---------------------------------------------------------------------------
// Range rejection at fixed bounds
// ---------------------------------------------------------------------------

#[test]
fn range_rejection_counts() {
    // The low bound itself is rejected; the high bound itself survives.
    let mut stack = stack_of(&[0.0, 0.5, 0.98, 1.0]);
    let params = RejectionParams::default();
    let range = RangeConfig {
        clip_low: true,
        low: 0.0,
        clip_high: true,
        high: 0.98,
        report: false,
        map: true,
    };
    let verdict = reject_stack(&mut stack, &ctx(Rejection::None, &params, &range));
    let (_, _, range_low, range_high) = count_flags(&stack);
    assert_eq!(range_low, 1);
    assert_eq!(range_high, 1);
    assert_eq!(verdict.kept, 2);
}

// ---------------------------------------------------------------------------
// Min/max clipping
// ---------------------------------------------------------------------------

#[test]
fn minmax_rejects_extremes() {
    let mut stack = stack_of(&[0.4, 0.1, 0.5, 0.9, 0.45]);
    let params = RejectionParams {
        min_max_low: 1,
        min_max_high: 1,
        ..Default::default()
    };
    let range = no_range();
    let verdict = reject_stack(&mut stack, &ctx(Rejection::MinMax, &params, &range));
    assert_eq!(verdict.kept, 3);
    assert!(stack.iter().any(|s| s.reject_low() && s.index() == 1));
    assert!(stack.iter().any(|s| s.reject_high() && s.index() == 3));
}

#[test]
fn minmax_with_too_few_frames_is_degenerate() {
    let mut stack = stack_of(&[0.1, 0.2, 0.3]);
    let params = RejectionParams {
        min_max_low: 2,
        min_max_high: 2,
        ..Default::default()
    };
    let range = no_range();
    let verdict = reject_stack(&mut stack, &ctx(Rejection::MinMax, &params, &range));
    assert!(verdict.degenerate);
    assert_eq!(verdict.kept, 3, "degenerate min/max must leave the stack intact");
}

// ---------------------------------------------------------------------------
// Percentile clipping
// ---------------------------------------------------------------------------

#[test]
fn percentile_rejects_relative_to_median() {
    // median = 0.5; low threshold 0.2 rejects v <= 0.4 - eps,
    // high threshold 0.1 rejects v >= 0.55 + eps.
    let mut stack = stack_of(&[0.30, 0.50, 0.50, 0.50, 0.60]);
    let params = RejectionParams {
        pc_low: 0.2,
        pc_high: 0.1,
        ..Default::default()
    };
    let range = no_range();
    let verdict = reject_stack(&mut stack, &ctx(Rejection::Percentile, &params, &range));
    assert_eq!(verdict.kept, 3);
    let (low, high, _, _) = count_flags(&stack);
    assert_eq!((low, high), (1, 1));
}

// ---------------------------------------------------------------------------
// Linear fit clipping
// ---------------------------------------------------------------------------

#[test]
fn linear_fit_keeps_linear_stack_and_reports_slope() {
    // Exactly representable linear ramp: residuals vanish, nothing
    // rejected, and the reported drift is slope * (n - 1).
    let values: Vec<f32> = (0..8).map(|i| 0.25 + i as f32 / 128.0).collect();
    let mut stack = stack_of(&values);
    let params = RejectionParams::default();
    let range = no_range();
    let verdict = reject_stack(&mut stack, &ctx(Rejection::LinearFit, &params, &range));
    assert_eq!(verdict.kept, 8);
    let slope = verdict.slope.expect("linear fit reports a slope");
    assert!((slope as f64 - 7.0 / 128.0).abs() < 1e-4, "slope {slope}");
}

#[test]
fn linear_fit_rejects_departure_from_trend() {
    let mut values: Vec<f32> = (0..9).map(|i| 0.25 + i as f32 / 128.0).collect();
    values.push(0.9);
    let mut stack = stack_of(&values);
    let params = RejectionParams::default();
    let range = no_range();
    let verdict = reject_stack(&mut stack, &ctx(Rejection::LinearFit, &params, &range));
    assert_eq!(verdict.kept, 9);
    assert!(stack.iter().any(|s| s.reject_high() && s.index() == 9));
}

// ---------------------------------------------------------------------------
// CCD noise model
// ---------------------------------------------------------------------------

#[test]
fn ccd_clip_uses_the_noise_model() {
    // High gain: the Poisson sigma at 0.2-0.3 is around 1.5e-3, so the
    // 0.1 excursion is far outside 3 sigma while 1e-4 wiggles are inside.
    let mut stack = stack_of(&[0.2, 0.2001, 0.1999, 0.2, 0.3]);
    let params = RejectionParams {
        ccd_gain: 100000.0,
        ccd_read_noise: 0.0,
        ccd_scale_noise: 0.0,
        sigma_low: 3.0,
        sigma_high: 3.0,
        ..Default::default()
    };
    let range = no_range();
    reject_stack(&mut stack, &ctx(Rejection::CcdNoise, &params, &range));
    let (_, high, _, _) = count_flags(&stack);
    assert!(high >= 1);
    assert!(stack.iter().any(|s| s.reject_high() && s.index() == 4));
}

// ---------------------------------------------------------------------------
// Generalized ESD
// ---------------------------------------------------------------------------

#[test]
fn esd_rejects_gross_outliers() {
    let values = [0.50, 0.51, 0.49, 0.50, 0.52, 0.48, 0.50, 0.51, 0.49, 0.95];
    let mut stack = stack_of(&values);
    let params = RejectionParams {
        esd_outliers: 0.3,
        esd_alpha: 0.05,
        ..Default::default()
    };
    let range = no_range();
    let verdict = reject_stack(&mut stack, &ctx(Rejection::Esd, &params, &range));
    assert!(stack.iter().any(|s| s.reject_high() && s.index() == 9));
    assert_eq!(verdict.kept, 9);
}

#[test]
fn esd_clean_data_survives() {
    let values = [0.50, 0.51, 0.49, 0.50, 0.52, 0.48, 0.50, 0.51];
    let mut stack = stack_of(&values);
    let params = RejectionParams::default();
    let range = no_range();
    let verdict = reject_stack(&mut stack, &ctx(Rejection::Esd, &params, &range));
    assert_eq!(verdict.kept, 8);
}

// ---------------------------------------------------------------------------
// Robust Chauvenet
// ---------------------------------------------------------------------------

#[test]
fn rcr_rejects_improbable_sample() {
    let values = [0.50, 0.505, 0.495, 0.50, 0.51, 0.49, 0.50, 0.90];
    let mut stack = stack_of(&values);
    let params = RejectionParams {
        rcr_limit: 0.1,
        ..Default::default()
    };
    let range = no_range();
    let verdict = reject_stack(&mut stack, &ctx(Rejection::Rcr, &params, &range));
    assert!(stack.iter().any(|s| s.reject_high() && s.index() == 7));
    assert_eq!(verdict.kept, 7);
}

// ---------------------------------------------------------------------------
// Degeneracy
// ---------------------------------------------------------------------------

#[test]
fn statistical_methods_degenerate_below_minimum_frames() {
    let params = RejectionParams::default();
    let range = no_range();
    for method in [
        Rejection::Percentile,
        Rejection::Sigma,
        Rejection::WinsorizedSigma,
        Rejection::AveragedSigma,
        Rejection::LinearFit,
        Rejection::CcdNoise,
        Rejection::Esd,
        Rejection::Rcr,
    ] {
        let mut stack = stack_of(&[0.3, 0.7]);
        let verdict = reject_stack(&mut stack, &ctx(method, &params, &range));
        assert!(verdict.degenerate, "{method:?} must degenerate on 2 samples");
        assert_eq!(verdict.kept, 2);
    }
}

#[test]
fn all_range_rejected_is_degenerate() {
    let mut stack = stack_of(&[0.99, 0.99, 1.0]);
    let params = RejectionParams::default();
    let range = RangeConfig {
        clip_low: false,
        low: 0.0,
        clip_high: true,
        high: 0.98,
        report: false,
        map: true,
    };
    let verdict = reject_stack(&mut stack, &ctx(Rejection::None, &params, &range));
    assert_eq!(verdict.kept, 0);
    assert!(verdict.degenerate);
}
