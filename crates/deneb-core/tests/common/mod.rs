#![allow(dead_code)]

use deneb_core::config::{IntegrationConfig, Normalization, RangeConfig, WeightMode};
use deneb_core::engine::{CancelFlag, IntegrationEngine, IntegrationOutput};
use deneb_core::file::FrameItem;
use deneb_core::io::memory::MemorySource;

/// A mono frame from a closure over (x, y).
pub fn mono_source(w: usize, h: usize, f: impl Fn(usize, usize) -> f32) -> MemorySource {
    MemorySource::from_fn(w, h, f)
}

/// A mono frame with every pixel at `fill`.
pub fn flat_source(w: usize, h: usize, fill: f32) -> MemorySource {
    MemorySource::from_fn(w, h, |_, _| fill)
}

/// Baseline configuration for engine tests: no rejection, no
/// normalization, constant weights, fixed memory budgets, cache off.
pub fn base_config() -> IntegrationConfig {
    let mut config = IntegrationConfig::default();
    config.output_normalization = Normalization::None;
    config.rejection_normalization = Normalization::None;
    config.weights.mode = WeightMode::Constant;
    config.range = RangeConfig {
        clip_low: false,
        low: 0.0,
        clip_high: false,
        high: 1.0,
        report: false,
        map: true,
    };
    config.noise.evaluate = false;
    config.use_cache = false;
    config.memory.auto_size = false;
    config.memory.buffer_size_mb = 16;
    config.memory.stack_size_mb = 64;
    config
}

/// Build an engine over in-memory sources.
pub fn engine_from(sources: Vec<MemorySource>, config: IntegrationConfig) -> IntegrationEngine {
    let sources = sources
        .into_iter()
        .enumerate()
        .map(|(i, s)| {
            (
                FrameItem::new(format!("memory_{i:03}.dfc")),
                Box::new(s) as Box<dyn deneb_core::io::ImageSource>,
            )
        })
        .collect();
    IntegrationEngine::from_sources(sources, config).expect("engine setup")
}

/// Run an engine to completion.
pub fn run(engine: &IntegrationEngine) -> IntegrationOutput {
    engine.run(&CancelFlag::new()).expect("integration run")
}
