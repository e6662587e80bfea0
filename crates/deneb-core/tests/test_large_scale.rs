mod common;

use common::{base_config, engine_from, flat_source, mono_source, run};
use deneb_core::config::{LargeScaleSide, Rejection};

// ---------------------------------------------------------------------------
// Band-level large-scale rejection growth
// ---------------------------------------------------------------------------

/// One frame carries a 3x3 bright block in a 16x16 field of six frames.
/// Sigma clipping rejects the block; large-scale expansion with two
/// protected layers and growth 1 extends the rejection to the centered
/// 5x5 block.
#[test]
fn bright_block_grows_to_five_by_five() {
    let mut sources = vec![mono_source(16, 16, |x, y| {
        if (7..10).contains(&x) && (7..10).contains(&y) {
            0.9
        } else {
            0.2
        }
    })];
    for _ in 0..5 {
        sources.push(flat_source(16, 16, 0.2));
    }

    let mut config = base_config();
    config.rejection = Rejection::Sigma;
    config.large_scale.high = LargeScaleSide {
        enabled: true,
        protected_layers: 2,
        growth: 1,
    };
    let output = run(&engine_from(sources, config));

    // 5x5 high rejections for the block frame, nothing for the others.
    assert_eq!(output.frames[0].rejected_high, vec![25]);
    for frame in &output.frames[1..] {
        assert_eq!(frame.rejected_high, vec![0]);
    }

    let map = output.rejection_high.as_ref().unwrap();
    for y in 0..16 {
        for x in 0..16 {
            let inside = (6..11).contains(&x) && (6..11).contains(&y);
            let expected = if inside { 1.0 / 6.0 } else { 0.0 };
            assert!(
                (map[[0, y, x]] as f64 - expected).abs() < 1e-6,
                "map at ({x}, {y}) = {}",
                map[[0, y, x]]
            );
        }
    }

    // The integrated value is the five clean frames' level everywhere.
    let image = output.image.as_ref().unwrap();
    for v in image.iter() {
        assert!((v - 0.2).abs() < 1e-6);
    }
}

/// With large-scale rejection disabled, only the original 3x3 block is
/// rejected.
#[test]
fn without_expansion_only_the_block_is_rejected() {
    let mut sources = vec![mono_source(16, 16, |x, y| {
        if (7..10).contains(&x) && (7..10).contains(&y) {
            0.9
        } else {
            0.2
        }
    })];
    for _ in 0..5 {
        sources.push(flat_source(16, 16, 0.2));
    }

    let mut config = base_config();
    config.rejection = Rejection::Sigma;
    let output = run(&engine_from(sources, config));
    assert_eq!(output.frames[0].rejected_high, vec![9]);
}

/// Low-side expansion is independent of the high side.
#[test]
fn low_side_expansion_is_independent() {
    let mut sources = vec![mono_source(16, 16, |x, y| {
        if (7..10).contains(&x) && (7..10).contains(&y) {
            0.01
        } else {
            0.5
        }
    })];
    for _ in 0..5 {
        sources.push(flat_source(16, 16, 0.5));
    }

    let mut config = base_config();
    config.rejection = Rejection::Sigma;
    config.large_scale.low = LargeScaleSide {
        enabled: true,
        protected_layers: 2,
        growth: 1,
    };
    // High side expansion stays off.
    let output = run(&engine_from(sources, config));
    assert_eq!(output.frames[0].rejected_low, vec![25]);
    assert_eq!(output.frames[0].rejected_high, vec![0]);
}
