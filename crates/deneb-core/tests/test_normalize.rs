mod common;

use common::{base_config, engine_from, mono_source, run};
use deneb_core::config::Normalization;
use deneb_core::engine::IntegrationEngine;
use deneb_core::file::FrameItem;
use deneb_core::io::dfc;

// ---------------------------------------------------------------------------
// Additive and multiplicative regimes
// ---------------------------------------------------------------------------

#[test]
fn additive_normalization_matches_frames_to_reference() {
    // Second frame shifted by +0.2; additive normalization cancels the
    // shift, so the mean equals the reference frame.
    let sources = vec![
        mono_source(6, 6, |x, y| 0.2 + (x + y) as f32 / 100.0),
        mono_source(6, 6, |x, y| 0.4 + (x + y) as f32 / 100.0),
    ];
    let mut config = base_config();
    config.output_normalization = Normalization::Additive;
    let output = run(&engine_from(sources, config));
    let image = output.image.as_ref().unwrap();
    for y in 0..6 {
        for x in 0..6 {
            let expected = 0.2 + (x + y) as f64 / 100.0;
            assert!((image[[0, y, x]] - expected).abs() < 1e-6);
        }
    }
}

#[test]
fn multiplicative_normalization_matches_flux() {
    // Second frame is the reference scaled by 2; the ratio of medians
    // undoes the scaling exactly.
    let sources = vec![
        mono_source(6, 6, |x, y| 0.1 + (x + y) as f32 / 50.0),
        mono_source(6, 6, |x, y| 2.0 * (0.1 + (x + y) as f32 / 50.0)),
    ];
    let mut config = base_config();
    config.output_normalization = Normalization::Multiplicative;
    let output = run(&engine_from(sources, config));
    let image = output.image.as_ref().unwrap();
    for y in 0..6 {
        for x in 0..6 {
            let expected = 0.1 + (x + y) as f64 / 50.0;
            assert!(
                (image[[0, y, x]] - expected).abs() < 1e-5,
                "pixel ({x}, {y}): {}",
                image[[0, y, x]]
            );
        }
    }
}

// ---------------------------------------------------------------------------
// Adaptive normalization: a 1x1 grid is additive-with-scaling
// ---------------------------------------------------------------------------

#[test]
fn adaptive_grid_of_one_reduces_to_additive_scaling() {
    let build = || {
        vec![
            mono_source(8, 8, |x, y| 0.2 + (x * 3 + y * 5) as f32 / 200.0),
            mono_source(8, 8, |x, y| 0.35 + (x * 3 + y * 5) as f32 / 130.0),
        ]
    };

    let mut adaptive = base_config();
    adaptive.output_normalization = Normalization::Adaptive;
    adaptive.adaptive.grid_size = 1;
    let adaptive_out = run(&engine_from(build(), adaptive));

    let mut scaling = base_config();
    scaling.output_normalization = Normalization::AdditiveScaling;
    let scaling_out = run(&engine_from(build(), scaling));

    let a = adaptive_out.image.as_ref().unwrap();
    let b = scaling_out.image.as_ref().unwrap();
    for (va, vb) in a.iter().zip(b.iter()) {
        assert!((va - vb).abs() < 1e-12, "adaptive {va} vs scaling {vb}");
    }
}

#[test]
fn adaptive_no_scale_drops_the_scale_factor() {
    let build = || {
        vec![
            mono_source(8, 8, |x, y| 0.2 + (x + y) as f32 / 100.0),
            mono_source(8, 8, |x, y| 0.4 + (x + y) as f32 / 100.0),
        ]
    };
    let mut config = base_config();
    config.output_normalization = Normalization::Adaptive;
    config.adaptive.grid_size = 1;
    config.adaptive.no_scale = true;
    let output = run(&engine_from(build(), config));
    // Pure location matching: both frames land on the reference levels.
    let image = output.image.as_ref().unwrap();
    for y in 0..8 {
        for x in 0..8 {
            let expected = 0.2 + (x + y) as f64 / 100.0;
            assert!((image[[0, y, x]] - expected).abs() < 1e-6);
        }
    }
}

// ---------------------------------------------------------------------------
// Local normalization from companion files
// ---------------------------------------------------------------------------

#[test]
fn local_normalization_applies_per_pixel_function() {
    let dir = tempfile::tempdir().unwrap();
    let frame_path = dir.path().join("light.dfc");
    let nml_path = dir.path().join("light_nml.dfc");

    // One 4x4 frame at 0.5; normalization function 0.5 * s + 0.1.
    let samples = vec![0.5f32; 16];
    dfc::write_frame(&frame_path, 4, 4, 1, &[], &samples).unwrap();
    let mut nml = Vec::with_capacity(32);
    for _ in 0..16 {
        nml.push(0.5f32); // scale plane
    }
    for _ in 0..16 {
        nml.push(0.1f32); // offset plane
    }
    // Companion container: 2 channels, interleaved per pixel.
    let mut interleaved = Vec::with_capacity(32);
    for i in 0..16 {
        interleaved.push(nml[i]);
        interleaved.push(nml[16 + i]);
    }
    dfc::write_frame(&nml_path, 4, 4, 2, &[], &interleaved).unwrap();

    let mut item = FrameItem::new(&frame_path);
    item.normalization_path = Some(nml_path);

    let mut config = base_config();
    config.output_normalization = Normalization::Local;
    let engine = IntegrationEngine::open(vec![item], config).unwrap();
    let output = engine.run(&deneb_core::engine::CancelFlag::new()).unwrap();

    let image = output.image.as_ref().unwrap();
    for v in image.iter() {
        assert!((v - 0.35).abs() < 1e-6, "local normalization gave {v}");
    }
}

#[test]
fn local_regime_without_data_is_a_config_error() {
    let sources = vec![(
        FrameItem::new("bare.dfc"),
        Box::new(mono_source(4, 4, |_, _| 0.5)) as Box<dyn deneb_core::io::ImageSource>,
    )];
    let mut config = base_config();
    config.output_normalization = Normalization::Local;
    let engine = IntegrationEngine::from_sources(sources, config).unwrap();
    let err = engine.run(&deneb_core::engine::CancelFlag::new()).unwrap_err();
    assert!(matches!(err, deneb_core::error::DenebError::Config(_)));
}
