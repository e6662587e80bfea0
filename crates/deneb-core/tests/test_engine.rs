mod common;

use common::{base_config, engine_from, flat_source, mono_source, run};
use deneb_core::config::{Combination, Normalization, RangeConfig, Rejection, Roi, WeightMode};
use deneb_core::engine::{CancelFlag, IntegrationEngine};
use deneb_core::error::DenebError;

// ---------------------------------------------------------------------------
// Determinism scenario: three offset gradients, additive normalization
// ---------------------------------------------------------------------------

#[test]
fn three_gradient_frames_average_to_middle() {
    // Frames (x+y)/16, +0.01, +0.02; additive output normalization
    // anchored at the middle frame; mean combination, no rejection.
    let sources = vec![
        mono_source(4, 4, |x, y| (x + y) as f32 / 16.0),
        mono_source(4, 4, |x, y| (x + y) as f32 / 16.0 + 0.01),
        mono_source(4, 4, |x, y| (x + y) as f32 / 16.0 + 0.02),
    ];
    let mut config = base_config();
    config.output_normalization = Normalization::Additive;
    config.reference_frame = Some(1);
    let output = run(&engine_from(sources, config));

    let image = output.image.as_ref().unwrap();
    for y in 0..4 {
        for x in 0..4 {
            let expected = (x + y) as f64 / 16.0 + 0.01;
            let got = image[[0, y, x]];
            assert!(
                (got - expected).abs() < 1e-6,
                "pixel ({x}, {y}): got {got}, expected {expected}"
            );
        }
    }
    assert_eq!(output.totals.degenerate_stacks, 0);
}

// ---------------------------------------------------------------------------
// Single frame passes through unchanged
// ---------------------------------------------------------------------------

#[test]
fn single_frame_identity_under_rejection() {
    for rejection in [
        Rejection::None,
        Rejection::Sigma,
        Rejection::LinearFit,
        Rejection::Esd,
        Rejection::Rcr,
    ] {
        let sources = vec![mono_source(6, 5, |x, y| (x * 5 + y) as f32 / 64.0 + 0.1)];
        let mut config = base_config();
        config.rejection = rejection;
        let output = run(&engine_from(sources, config));
        let image = output.image.as_ref().unwrap();
        for y in 0..5 {
            for x in 0..6 {
                let expected = ((x * 5 + y) as f32 / 64.0 + 0.1) as f64;
                assert!(
                    (image[[0, y, x]] - expected).abs() < 1e-7,
                    "{rejection:?} altered pixel ({x}, {y})"
                );
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Identical frames: no rejection, output equals the input
// ---------------------------------------------------------------------------

#[test]
fn identical_frames_reject_nothing() {
    for rejection in [
        Rejection::Sigma,
        Rejection::LinearFit,
        Rejection::Esd,
        Rejection::Rcr,
    ] {
        let sources: Vec<_> = (0..6)
            .map(|_| mono_source(8, 8, |x, y| 0.2 + (x + y) as f32 / 100.0))
            .collect();
        let mut config = base_config();
        config.rejection = rejection;
        let output = run(&engine_from(sources, config));

        for frame in &output.frames {
            assert_eq!(frame.rejected_low, vec![0], "{rejection:?}");
            assert_eq!(frame.rejected_high, vec![0], "{rejection:?}");
        }
        let image = output.image.as_ref().unwrap();
        for y in 0..8 {
            for x in 0..8 {
                let expected = (0.2 + (x + y) as f32 / 100.0) as f64;
                assert!((image[[0, y, x]] - expected).abs() < 1e-7);
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Thread count invariance
// ---------------------------------------------------------------------------

fn noisy_sources() -> Vec<deneb_core::io::memory::MemorySource> {
    (0..6)
        .map(|f| {
            mono_source(32, 32, move |x, y| {
                // Deterministic pseudo-noise around a gradient.
                let base = (x + y) as f32 / 128.0 + 0.2;
                let wiggle = ((x * 31 + y * 17 + f * 7) % 101) as f32 / 101.0;
                base + 0.01 * (wiggle - 0.5)
            })
        })
        .collect()
}

#[test]
fn thread_count_does_not_change_results() {
    let reference_output = {
        let mut config = base_config();
        config.rejection = Rejection::Sigma;
        config.memory.file_threads = 1;
        config.memory.buffer_threads = 1;
        run(&engine_from(noisy_sources(), config))
    };
    let reference_image = reference_output.image.as_ref().unwrap();

    for threads in [2, 4, 8] {
        let mut config = base_config();
        config.rejection = Rejection::Sigma;
        config.memory.file_threads = threads;
        config.memory.buffer_threads = threads.min(4);
        let output = run(&engine_from(noisy_sources(), config));
        let image = output.image.as_ref().unwrap();

        assert_eq!(image.shape(), reference_image.shape());
        for (a, b) in image.iter().zip(reference_image.iter()) {
            assert_eq!(a.to_bits(), b.to_bits(), "pixel differs with {threads} threads");
        }
        for (a, b) in output.frames.iter().zip(reference_output.frames.iter()) {
            assert_eq!(a.rejected_low, b.rejected_low);
            assert_eq!(a.rejected_high, b.rejected_high);
        }
        assert_eq!(
            output.totals.degenerate_stacks,
            reference_output.totals.degenerate_stacks
        );
    }
}

// ---------------------------------------------------------------------------
// Min/max degeneracy: rejecting more than the stack holds
// ---------------------------------------------------------------------------

#[test]
fn minmax_overreach_collapses_to_median() {
    let sources = vec![
        flat_source(4, 4, 0.1),
        flat_source(4, 4, 0.2),
        flat_source(4, 4, 0.3),
    ];
    let mut config = base_config();
    config.rejection = Rejection::MinMax;
    config.rejection_params.min_max_low = 2;
    config.rejection_params.min_max_high = 2;
    let output = run(&engine_from(sources, config));

    assert_eq!(output.totals.degenerate_stacks, 16);
    let image = output.image.as_ref().unwrap();
    for v in image.iter() {
        assert!((v - 0.2).abs() < 1e-7, "expected the stack median, got {v}");
    }
}

// ---------------------------------------------------------------------------
// Range rejection accounting
// ---------------------------------------------------------------------------

#[test]
fn range_rejection_totals_and_maps() {
    // The 0.0 frame falls at the low bound (rejected), the 1.0 frame
    // beyond the high bound; the 0.98 frame sits on the high bound and
    // survives alongside 0.5.
    let sources = vec![
        flat_source(4, 4, 0.0),
        flat_source(4, 4, 0.5),
        flat_source(4, 4, 0.98),
        flat_source(4, 4, 1.0),
    ];
    let mut config = base_config();
    config.range = RangeConfig {
        clip_low: true,
        low: 0.0,
        clip_high: true,
        high: 0.98,
        report: false,
        map: true,
    };
    let output = run(&engine_from(sources, config));

    assert_eq!(output.totals.range_rejected_low, vec![16]);
    assert_eq!(output.totals.range_rejected_high, vec![16]);
    // report=false keeps range rejection out of the per-frame counts.
    for frame in &output.frames {
        assert_eq!(frame.rejected_low, vec![0]);
        assert_eq!(frame.rejected_high, vec![0]);
    }
    let image = output.image.as_ref().unwrap();
    for v in image.iter() {
        assert!((v - 0.74).abs() < 1e-6);
    }
    let low = output.rejection_low.as_ref().unwrap();
    let high = output.rejection_high.as_ref().unwrap();
    for v in low.iter() {
        assert!((v - 0.25).abs() < 1e-6);
    }
    for v in high.iter() {
        assert!((v - 0.25).abs() < 1e-6);
    }
}

#[test]
fn report_flag_moves_range_rejection_into_counts() {
    let sources = vec![flat_source(4, 4, 0.0), flat_source(4, 4, 0.5)];
    let mut config = base_config();
    config.range = RangeConfig {
        clip_low: true,
        low: 0.0,
        clip_high: false,
        high: 1.0,
        report: true,
        map: false,
    };
    let output = run(&engine_from(sources, config));

    assert_eq!(output.frames[0].rejected_low, vec![16]);
    assert_eq!(output.frames[1].rejected_low, vec![0]);
    // map=false keeps the rejection maps clean.
    let low = output.rejection_low.as_ref().unwrap();
    assert!(low.iter().all(|&v| v == 0.0));
}

// ---------------------------------------------------------------------------
// Weighted combination
// ---------------------------------------------------------------------------

#[test]
fn keyword_weights_bias_the_mean() {
    let sources = vec![
        flat_source(4, 4, 0.2).with_keyword("WEIGHT", 3.0),
        flat_source(4, 4, 0.6).with_keyword("WEIGHT", 1.0),
    ];
    let mut config = base_config();
    config.weights.mode = WeightMode::Keyword;
    config.weights.keyword = Some("WEIGHT".into());
    let output = run(&engine_from(sources, config));

    let image = output.image.as_ref().unwrap();
    for v in image.iter() {
        assert!((v - 0.3).abs() < 1e-7, "weighted mean wrong: {v}");
    }
    assert_eq!(output.frames[0].weight, vec![3.0]);
    assert_eq!(output.frames[1].weight, vec![1.0]);
}

#[test]
fn missing_weight_keyword_fails_the_run() {
    let sources = vec![
        (
            deneb_core::file::FrameItem::new("a.dfc"),
            Box::new(flat_source(4, 4, 0.2)) as Box<dyn deneb_core::io::ImageSource>,
        ),
        (
            deneb_core::file::FrameItem::new("b.dfc"),
            Box::new(flat_source(4, 4, 0.6)) as Box<dyn deneb_core::io::ImageSource>,
        ),
    ];
    let mut config = base_config();
    config.weights.mode = WeightMode::Keyword;
    config.weights.keyword = Some("NOPE".into());
    let err = IntegrationEngine::from_sources(sources, config).unwrap_err();
    assert!(matches!(err, DenebError::MissingKeyword { .. }));
}

// ---------------------------------------------------------------------------
// Median / min / max combinations
// ---------------------------------------------------------------------------

#[test]
fn median_min_max_combinations() {
    let values = [0.1f32, 0.4, 0.5, 0.8];
    let build = || -> Vec<_> { values.iter().map(|&v| flat_source(3, 3, v)).collect() };

    let mut config = base_config();
    config.combination = Combination::Median;
    let out = run(&engine_from(build(), config.clone()));
    for v in out.image.as_ref().unwrap().iter() {
        // Weighted median with equal weights resolves to the lower middle.
        assert!((v - 0.4).abs() < 1e-7);
    }

    config.combination = Combination::Minimum;
    let out = run(&engine_from(build(), config.clone()));
    for v in out.image.as_ref().unwrap().iter() {
        assert!((v - 0.1).abs() < 1e-7);
    }

    config.combination = Combination::Maximum;
    let out = run(&engine_from(build(), config));
    for v in out.image.as_ref().unwrap().iter() {
        assert!((v - 0.8).abs() < 1e-7);
    }
}

// ---------------------------------------------------------------------------
// Out-of-range policy
// ---------------------------------------------------------------------------

#[test]
fn out_of_range_rescales_or_truncates() {
    let build = || vec![mono_source(2, 1, |x, _| if x == 0 { 0.5 } else { 2.0 })];

    let mut config = base_config();
    config.output.truncate_on_out_of_range = false;
    let out = run(&engine_from(build(), config.clone()));
    let image = out.image.as_ref().unwrap();
    assert!((image[[0, 0, 0]] - 0.25).abs() < 1e-7);
    assert!((image[[0, 0, 1]] - 1.0).abs() < 1e-7);
    assert!((out.totals.output_range_high - 2.0).abs() < 1e-6);

    config.output.truncate_on_out_of_range = true;
    let out = run(&engine_from(build(), config));
    let image = out.image.as_ref().unwrap();
    assert!((image[[0, 0, 0]] - 0.5).abs() < 1e-7);
    assert!((image[[0, 0, 1]] - 1.0).abs() < 1e-7);
}

// ---------------------------------------------------------------------------
// Region of interest
// ---------------------------------------------------------------------------

#[test]
fn roi_limits_the_integrated_area() {
    let sources = vec![mono_source(8, 8, |x, y| (y * 8 + x) as f32 / 64.0)];
    let mut config = base_config();
    config.roi = Some(Roi {
        x0: 2,
        y0: 3,
        x1: 6,
        y1: 7,
    });
    let output = run(&engine_from(sources, config));
    assert_eq!((output.width, output.height), (4, 4));
    let image = output.image.as_ref().unwrap();
    for y in 0..4 {
        for x in 0..4 {
            let expected = ((y + 3) * 8 + (x + 2)) as f64 / 64.0;
            assert!((image[[0, y, x]] - expected).abs() < 1e-7);
        }
    }
}

// ---------------------------------------------------------------------------
// Cancellation and output toggles
// ---------------------------------------------------------------------------

#[test]
fn cancelled_run_returns_cancelled() {
    let engine = engine_from(vec![flat_source(4, 4, 0.5)], base_config());
    let cancel = CancelFlag::new();
    cancel.cancel();
    assert!(matches!(engine.run(&cancel), Err(DenebError::Cancelled)));
}

#[test]
fn disabled_outputs_are_absent() {
    let mut config = base_config();
    config.output.rejection_maps = false;
    config.output.integrated_image = false;
    let output = run(&engine_from(vec![flat_source(4, 4, 0.5)], config));
    assert!(output.image.is_none());
    assert!(output.rejection_low.is_none());
    assert!(output.rejection_high.is_none());
    assert!(output.slope_map.is_none());
}

#[test]
fn slope_map_appears_with_linear_fit() {
    // Exactly representable ramp of frame levels: drift = 5/64.
    let sources: Vec<_> = (0..6)
        .map(|i| flat_source(4, 4, 0.25 + i as f32 / 64.0))
        .collect();
    let mut config = base_config();
    config.rejection = Rejection::LinearFit;
    let output = run(&engine_from(sources, config));
    let slope = output.slope_map.as_ref().expect("slope map present");
    for &v in slope.iter() {
        assert!((v as f64 - 5.0 / 64.0).abs() < 1e-4, "slope sample {v}");
    }
}

// ---------------------------------------------------------------------------
// Incompatible inputs
// ---------------------------------------------------------------------------

#[test]
fn mismatched_geometry_is_rejected() {
    let sources = vec![
        (
            deneb_core::file::FrameItem::new("a.dfc"),
            Box::new(flat_source(4, 4, 0.2)) as Box<dyn deneb_core::io::ImageSource>,
        ),
        (
            deneb_core::file::FrameItem::new("b.dfc"),
            Box::new(flat_source(5, 4, 0.2)) as Box<dyn deneb_core::io::ImageSource>,
        ),
    ];
    let err = IntegrationEngine::from_sources(sources, base_config()).unwrap_err();
    assert!(matches!(err, DenebError::IncompatibleGeometry { .. }));
}
