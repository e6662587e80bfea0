//! The streaming integration driver.
//!
//! Rows are processed in bands sized to the stack budget. A band is loaded
//! by the parallel data loader, rejected and combined by row-parallel
//! workers, and fully retired before the next band starts. All outputs are
//! committed in row order, so results never depend on thread scheduling.

pub mod loader;

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use ndarray::{Array2, Array3};
use rayon::prelude::*;
use tracing::{debug, info};

use crate::cache::FileCache;
use crate::combine::combine_stack;
use crate::config::{IntegrationConfig, Rejection};
use crate::consts::{OUTPUT_PIXEL_BYTES, STACK_ITEM_BYTES};
use crate::error::{DenebError, Result};
use crate::file::{FrameItem, IntegrationFile};
use crate::io::ImageSource;
use crate::large_scale::expand_mask;
use crate::noise;
use crate::normalize::Normalizer;
use crate::reject::{reject_stack, RejectContext, StackItem, StackVerdict};
use crate::rowbuf::RowWindow;
use crate::stats;
use crate::weight::compute_weights;

/// Cooperative cancellation flag, checked between bands.
#[derive(Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Per-frame results reported after a run.
#[derive(Clone, Debug)]
pub struct FrameReport {
    pub path: PathBuf,
    pub drizzle_path: Option<PathBuf>,
    pub enabled: bool,
    pub weight: Vec<f64>,
    pub rejected_low: Vec<u64>,
    pub rejected_high: Vec<u64>,
}

/// Run-level results and estimates.
#[derive(Clone, Debug, Default)]
pub struct IntegrationTotals {
    pub output_range_low: f64,
    pub output_range_high: f64,
    pub total_rejected_low: Vec<u64>,
    pub total_rejected_high: Vec<u64>,
    pub range_rejected_low: Vec<u64>,
    pub range_rejected_high: Vec<u64>,
    pub degenerate_stacks: u64,
    pub final_noise: Vec<f64>,
    pub final_scale: Vec<f64>,
    pub final_location: Vec<f64>,
    pub reference_noise_reduction: Vec<f64>,
    pub mean_noise_reduction: Vec<f64>,
    pub reference_snr_increment: Vec<f64>,
}

/// Rejection record destined for a frame's drizzle data file.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DrizzleRejection {
    pub x: u32,
    pub y: u32,
    pub channel: u8,
    pub high: bool,
}

#[derive(Debug)]
pub struct IntegrationOutput {
    pub width: usize,
    pub height: usize,
    pub channels: usize,
    /// Integrated pixels, planar (channels, height, width).
    pub image: Option<Array3<f64>>,
    pub rejection_low: Option<Array3<f32>>,
    pub rejection_high: Option<Array3<f32>>,
    pub slope_map: Option<Array3<f32>>,
    pub frames: Vec<FrameReport>,
    /// Per enabled frame: records to append to its drizzle data.
    pub drizzle: Vec<Vec<DrizzleRejection>>,
    pub totals: IntegrationTotals,
}

/// Available physical memory in bytes, for automatic budget sizing.
fn available_memory() -> usize {
    const FALLBACK: usize = 8 << 30;
    let Ok(contents) = std::fs::read_to_string("/proc/meminfo") else {
        return FALLBACK;
    };
    for line in contents.lines() {
        if let Some(rest) = line.strip_prefix("MemAvailable:") {
            if let Some(kb) = rest.split_whitespace().next().and_then(|v| v.parse::<usize>().ok())
            {
                return kb * 1024;
            }
        }
    }
    FALLBACK
}

#[derive(Debug)]
pub struct IntegrationEngine {
    config: IntegrationConfig,
    files: Vec<IntegrationFile>,
    disabled: Vec<FrameItem>,
    reference: usize,
    stack_bytes: usize,
}

impl IntegrationEngine {
    /// Open every enabled frame from disk and prepare the run.
    pub fn open(items: Vec<FrameItem>, config: IntegrationConfig) -> Result<Self> {
        config.validate()?;
        let (buffer_bytes, stack_bytes) = resolve_budgets(&config, items.len());
        let cache = open_cache(&config);

        let enabled: Vec<(usize, FrameItem)> = items
            .iter()
            .filter(|item| item.enabled)
            .cloned()
            .enumerate()
            .collect();
        let disabled: Vec<FrameItem> = items.into_iter().filter(|item| !item.enabled).collect();
        if enabled.is_empty() {
            return Err(DenebError::EmptySequence);
        }

        let files: Vec<IntegrationFile> = enabled
            .into_par_iter()
            .map(|(index, item)| {
                IntegrationFile::open(item, index, &config, buffer_bytes, cache.as_ref())
            })
            .collect::<Result<_>>()?;

        Self::finish_build(files, disabled, config, buffer_bytes, stack_bytes)
    }

    /// Build from already-open sources (library embedding and tests).
    pub fn from_sources(
        sources: Vec<(FrameItem, Box<dyn ImageSource>)>,
        config: IntegrationConfig,
    ) -> Result<Self> {
        config.validate()?;
        let (buffer_bytes, stack_bytes) = resolve_budgets(&config, sources.len());
        let cache = open_cache(&config);

        let mut files = Vec::new();
        let mut disabled = Vec::new();
        let mut index = 0;
        for (item, source) in sources {
            if item.enabled {
                files.push(IntegrationFile::from_source(
                    source,
                    item,
                    index,
                    &config,
                    buffer_bytes,
                    cache.as_ref(),
                )?);
                index += 1;
            } else {
                disabled.push(item);
            }
        }
        if files.is_empty() {
            return Err(DenebError::EmptySequence);
        }
        Self::finish_build(files, disabled, config, buffer_bytes, stack_bytes)
    }

    fn finish_build(
        mut files: Vec<IntegrationFile>,
        disabled: Vec<FrameItem>,
        config: IntegrationConfig,
        buffer_bytes: usize,
        stack_bytes: usize,
    ) -> Result<Self> {
        let width = files[0].width();
        let height = files[0].height();
        let channels = files[0].channels();
        for file in &files[1..] {
            if file.width() != width || file.height() != height || file.channels() != channels {
                return Err(DenebError::IncompatibleGeometry {
                    path: file.item().path.display().to_string(),
                    got: format!("{}x{}x{}", file.width(), file.height(), file.channels()),
                    expected: format!("{width}x{height}x{channels}"),
                });
            }
        }

        let row_bytes = width * channels * std::mem::size_of::<f32>();
        if !config.memory.auto_size && row_bytes > buffer_bytes {
            return Err(DenebError::ResourceLimit {
                required: row_bytes,
                limit: buffer_bytes,
            });
        }
        let min_stack = width * channels * (STACK_ITEM_BYTES * files.len() + OUTPUT_PIXEL_BYTES);
        if !config.memory.auto_size && min_stack > stack_bytes {
            return Err(DenebError::ResourceLimit {
                required: min_stack,
                limit: stack_bytes,
            });
        }

        // The reference frame anchors every normalization.
        let reference = config.reference_frame.unwrap_or(0);
        if reference >= files.len() {
            return Err(DenebError::Config(format!(
                "reference frame {reference} out of range ({} enabled frames)",
                files.len()
            )));
        }
        files[reference].set_reference(true);
        compute_weights(&mut files, reference, &config)?;

        info!(
            frames = files.len(),
            width,
            height,
            channels,
            buffer_mb = buffer_bytes >> 20,
            stack_mb = stack_bytes >> 20,
            "integration prepared"
        );
        Ok(Self {
            config,
            files,
            disabled,
            reference,
            stack_bytes,
        })
    }

    pub fn files(&self) -> &[IntegrationFile] {
        &self.files
    }

    pub fn reference(&self) -> usize {
        self.reference
    }

    pub fn config(&self) -> &IntegrationConfig {
        &self.config
    }

    /// Rows per band from the stack budget:
    /// `max(1, S / (width * channels * (12N + 4)))`, clamped to the row
    /// buffers' capacity so a band always fits every buffer.
    fn rows_per_band(&self) -> usize {
        let width = self.files[0].width();
        let channels = self.files[0].channels();
        let n = self.files.len();
        let per_row = width * channels * (STACK_ITEM_BYTES * n + OUTPUT_PIXEL_BYTES);
        let mut rows = (self.stack_bytes / per_row.max(1)).max(1);
        for file in &self.files {
            rows = rows.min(file.buffer_capacity_rows());
        }
        rows.max(1)
    }

    pub fn run(&self, cancel: &CancelFlag) -> Result<IntegrationOutput> {
        self.run_reported(cancel, &|_, _| {})
    }

    /// Run with a band-granular progress callback `(bands_done, bands_total)`.
    pub fn run_reported(
        &self,
        cancel: &CancelFlag,
        on_progress: &(dyn Fn(usize, usize) + Sync),
    ) -> Result<IntegrationOutput> {
        let width = self.files[0].width();
        let height = self.files[0].height();
        let channels = self.files[0].channels();
        let n = self.files.len();

        let (x0, y0, x1, y1) = match &self.config.roi {
            Some(roi) => {
                let x1 = roi.x1.min(width);
                let y1 = roi.y1.min(height);
                if roi.x0 >= x1 || roi.y0 >= y1 {
                    return Err(DenebError::Config(
                        "region of interest lies outside the image".into(),
                    ));
                }
                (roi.x0, roi.y0, x1, y1)
            }
            None => (0, 0, width, height),
        };
        let out_w = x1 - x0;
        let out_h = y1 - y0;

        let rejection_norm = Normalizer::build(
            self.config.rejection_normalization,
            &self.files,
            self.reference,
            self.config.adaptive.no_scale,
        )?;
        let output_norm = Normalizer::build(
            self.config.output_normalization,
            &self.files,
            self.reference,
            self.config.adaptive.no_scale,
        )?;

        // Per-channel weight lookup indexed by frame.
        let weights_by_channel: Vec<Vec<f64>> = (0..channels)
            .map(|c| self.files.iter().map(|f| f.weight()[c]).collect())
            .collect();

        let file_pool = build_pool(self.config.memory.file_threads)?;
        let buffer_pool = build_pool(self.config.memory.buffer_threads)?;

        let mut image = Array3::<f64>::zeros((channels, out_h, out_w));
        let want_maps = self.config.output.rejection_maps;
        let mut map_low = want_maps.then(|| Array3::<f32>::zeros((channels, out_h, out_w)));
        let mut map_high = want_maps.then(|| Array3::<f32>::zeros((channels, out_h, out_w)));
        let want_slope = want_maps && self.config.rejection == Rejection::LinearFit;
        let mut slope_map = want_slope.then(|| Array3::<f32>::zeros((channels, out_h, out_w)));

        let mut counts_low = vec![vec![0u64; channels]; n];
        let mut counts_high = vec![vec![0u64; channels]; n];
        let mut range_low = vec![0u64; channels];
        let mut range_high = vec![0u64; channels];
        let mut degenerate_stacks = 0u64;
        let want_drizzle = self.config.output.drizzle_data;
        let mut drizzle: Vec<Vec<DrizzleRejection>> = vec![Vec::new(); n];

        let rows_per_band = self.rows_per_band();
        let bands_total = out_h.div_ceil(rows_per_band);
        info!(rows_per_band, bands = bands_total, "starting integration");

        let mut bands_done = 0usize;
        let mut band_start = y0;
        while band_start < y1 {
            if cancel.is_cancelled() {
                return Err(DenebError::Cancelled);
            }
            let band_end = (band_start + rows_per_band).min(y1);
            loader::load_band(buffer_pool.as_ref(), &self.files, band_start, band_end)?;

            let band = BandContext {
                files: &self.files,
                config: &self.config,
                rejection_norm: &rejection_norm,
                output_norm: &output_norm,
                weights_by_channel: &weights_by_channel,
                x0,
                out_w,
                channels,
                n,
                band_start,
                band_end,
                want_maps,
                want_slope,
                want_drizzle,
            };
            let outputs = match file_pool.as_ref() {
                Some(pool) => pool.install(|| band.process()),
                None => band.process(),
            }?;

            // Retire the band in row order.
            for (r, row) in outputs.into_iter().enumerate() {
                let y_out = band_start - y0 + r;
                for x in 0..out_w {
                    for c in 0..channels {
                        let idx = x * channels + c;
                        image[[c, y_out, x]] = row.pixels[idx];
                        if let Some(map) = map_low.as_mut() {
                            map[[c, y_out, x]] = row.map_low[idx];
                        }
                        if let Some(map) = map_high.as_mut() {
                            map[[c, y_out, x]] = row.map_high[idx];
                        }
                        if let Some(map) = slope_map.as_mut() {
                            map[[c, y_out, x]] = row.slope[idx];
                        }
                    }
                }
                for f in 0..n {
                    for c in 0..channels {
                        counts_low[f][c] += row.counts_low[f * channels + c];
                        counts_high[f][c] += row.counts_high[f * channels + c];
                    }
                }
                for c in 0..channels {
                    range_low[c] += row.range_low[c];
                    range_high[c] += row.range_high[c];
                }
                degenerate_stacks += row.degenerate;
                for entry in row.drizzle {
                    drizzle[entry.0].push(entry.1);
                }
            }

            debug!(band_start, band_end, "band retired");
            band_start = band_end;
            bands_done += 1;
            on_progress(bands_done, bands_total);
        }

        let mut totals = IntegrationTotals {
            total_rejected_low: counts_low.iter().fold(vec![0u64; channels], |mut acc, f| {
                for (a, &v) in acc.iter_mut().zip(f.iter()) {
                    *a += v;
                }
                acc
            }),
            total_rejected_high: counts_high.iter().fold(vec![0u64; channels], |mut acc, f| {
                for (a, &v) in acc.iter_mut().zip(f.iter()) {
                    *a += v;
                }
                acc
            }),
            range_rejected_low: range_low,
            range_rejected_high: range_high,
            degenerate_stacks,
            ..Default::default()
        };

        self.finish_output(&mut image, &mut totals)?;

        let mut frames = Vec::with_capacity(n + self.disabled.len());
        for (f, file) in self.files.iter().enumerate() {
            frames.push(FrameReport {
                path: file.item().path.clone(),
                drizzle_path: file.item().drizzle_path.clone(),
                enabled: true,
                weight: file.weight().to_vec(),
                rejected_low: counts_low[f].clone(),
                rejected_high: counts_high[f].clone(),
            });
        }
        for item in &self.disabled {
            frames.push(FrameReport {
                path: item.path.clone(),
                drizzle_path: item.drizzle_path.clone(),
                enabled: false,
                weight: vec![0.0; channels],
                rejected_low: vec![0; channels],
                rejected_high: vec![0; channels],
            });
        }

        Ok(IntegrationOutput {
            width: out_w,
            height: out_h,
            channels,
            image: self.config.output.integrated_image.then_some(image),
            rejection_low: map_low,
            rejection_high: map_high,
            slope_map,
            frames,
            drizzle,
            totals,
        })
    }

    /// Post-pass: range policy, then final statistics of the emitted image.
    fn finish_output(&self, image: &mut Array3<f64>, totals: &mut IntegrationTotals) -> Result<()> {
        let (channels, h, w) = image.dim();

        let mut global_min = f64::INFINITY;
        let mut global_max = f64::NEG_INFINITY;
        for &v in image.iter() {
            global_min = global_min.min(v);
            global_max = global_max.max(v);
        }
        totals.output_range_low = global_min;
        totals.output_range_high = global_max;

        if global_min < 0.0 || global_max > 1.0 {
            if self.config.output.truncate_on_out_of_range {
                image.mapv_inplace(|v| v.clamp(0.0, 1.0));
                info!(global_min, global_max, "output truncated to [0, 1]");
            } else {
                // Shift and scale each channel so its range becomes a
                // subset of [0, 1].
                for c in 0..channels {
                    let mut plane = image.index_axis_mut(ndarray::Axis(0), c);
                    let min = plane.iter().copied().fold(f64::INFINITY, f64::min);
                    let max = plane.iter().copied().fold(f64::NEG_INFINITY, f64::max);
                    let shift = min.min(0.0);
                    let extent = max - shift;
                    if min < 0.0 || max > 1.0 {
                        let scale = if extent > 1.0 { 1.0 / extent } else { 1.0 };
                        plane.mapv_inplace(|v| (v - shift) * scale);
                    }
                }
                info!(global_min, global_max, "output rescaled into [0, 1]");
            }
        }

        // Final estimates on the emitted image.
        let ref_stats = self.files[self.reference].stats();
        for c in 0..channels {
            let mut plane = Array2::<f32>::zeros((h, w));
            for y in 0..h {
                for x in 0..w {
                    plane[[y, x]] = image[[c, y, x]] as f32;
                }
            }
            let samples = plane.as_slice().expect("plane is contiguous");
            let mut sorted = samples.to_vec();
            let location = stats::median_f32(&mut sorted);
            let scale = stats::two_sided_scale(self.config.scale_estimator, samples, location);
            let sigma = if self.config.noise.evaluate {
                noise::estimate_noise(
                    self.config.noise.estimator,
                    &plane,
                    self.config.noise.mrs_min_data_fraction,
                )
                .sigma
            } else {
                0.0
            };
            totals.final_location.push(location);
            totals.final_scale.push(scale.mean());
            totals.final_noise.push(sigma);

            // Noise reduction and SNR increment relative to the inputs,
            // with every frame's noise brought to reference scale units.
            let ref_scale = ref_stats.scale[c].mean();
            let ref_noise = ref_stats.noise[c];
            let mut mean_noise = 0.0;
            for file in &self.files {
                let s = file.stats();
                let k = if s.scale[c].mean() > 0.0 {
                    ref_scale / s.scale[c].mean()
                } else {
                    1.0
                };
                mean_noise += s.noise[c] * k;
            }
            mean_noise /= self.files.len() as f64;

            let (ref_reduction, mean_reduction, snr_increment) = if sigma > 0.0 {
                let snr_out = scale.mean() / sigma;
                let snr_ref = if ref_noise > 0.0 {
                    ref_scale / ref_noise
                } else {
                    0.0
                };
                (
                    ref_noise / sigma,
                    mean_noise / sigma,
                    if snr_ref > 0.0 { snr_out / snr_ref } else { 0.0 },
                )
            } else {
                (0.0, 0.0, 0.0)
            };
            totals.reference_noise_reduction.push(ref_reduction);
            totals.mean_noise_reduction.push(mean_reduction);
            totals.reference_snr_increment.push(snr_increment);
        }
        Ok(())
    }
}

fn open_cache(config: &IntegrationConfig) -> Option<FileCache> {
    if !config.use_cache {
        return None;
    }
    let dir = config
        .cache_dir
        .clone()
        .unwrap_or_else(|| std::env::temp_dir().join("deneb-cache"));
    FileCache::open(&dir)
}

fn build_pool(threads: usize) -> Result<Option<rayon::ThreadPool>> {
    if threads == 0 {
        return Ok(None);
    }
    rayon::ThreadPoolBuilder::new()
        .num_threads(threads)
        .build()
        .map(Some)
        .map_err(|e| DenebError::Config(format!("cannot build thread pool: {e}")))
}

/// Resolve buffer and stack budgets in bytes.
fn resolve_budgets(config: &IntegrationConfig, n_files: usize) -> (usize, usize) {
    if config.memory.auto_size {
        let usable = (available_memory() as f64 * config.memory.auto_limit) as usize;
        let buffer = (usable / (4 * n_files.max(1))).clamp(1 << 20, 256 << 20);
        let stack = (usable / 2).max(16 << 20);
        (buffer, stack)
    } else {
        (
            config.memory.buffer_size_mb << 20,
            config.memory.stack_size_mb << 20,
        )
    }
}

/// Everything one band's workers need, borrowed for the band's lifetime.
struct BandContext<'a> {
    files: &'a [IntegrationFile],
    config: &'a IntegrationConfig,
    rejection_norm: &'a Normalizer<'a>,
    output_norm: &'a Normalizer<'a>,
    weights_by_channel: &'a [Vec<f64>],
    x0: usize,
    out_w: usize,
    channels: usize,
    n: usize,
    band_start: usize,
    band_end: usize,
    want_maps: bool,
    want_slope: bool,
    want_drizzle: bool,
}

/// One band row's stacks after rejection.
struct RowStacks {
    stacks: Vec<StackItem>,
    verdicts: Vec<StackVerdict>,
}

/// One band row's committed outputs.
struct RowOutput {
    pixels: Vec<f64>,
    map_low: Vec<f32>,
    map_high: Vec<f32>,
    slope: Vec<f32>,
    counts_low: Vec<u64>,
    counts_high: Vec<u64>,
    range_low: Vec<u64>,
    range_high: Vec<u64>,
    degenerate: u64,
    drizzle: Vec<(usize, DrizzleRejection)>,
}

impl BandContext<'_> {
    fn process(&self) -> Result<Vec<RowOutput>> {
        let band_h = self.band_end - self.band_start;

        // Borrow every frame's rows for the whole band.
        let windows: Vec<RowWindow<'_>> = self
            .files
            .iter()
            .map(|f| f.rows(self.band_start, self.band_end))
            .collect::<Result<_>>()?;

        // Pass 1: build stacks under rejection normalization and reject.
        let ctx = RejectContext {
            method: self.config.rejection,
            params: &self.config.rejection_params,
            range: &self.config.range,
            scale: self.config.scale_estimator,
        };
        let mut rows: Vec<RowStacks> = (0..band_h)
            .into_par_iter()
            .map(|r| self.reject_row(&windows, &ctx, r))
            .collect();

        // Large-scale rejection over the band's flag matrices.
        if self.config.large_scale.any_enabled() {
            self.expand_large_scale(&mut rows, band_h);
        }

        // Pass 2: output renormalization, combination, accounting.
        let outputs: Vec<RowOutput> = rows
            .into_par_iter()
            .enumerate()
            .map(|(r, row)| self.combine_row(row, r))
            .collect();
        Ok(outputs)
    }

    fn reject_row(&self, windows: &[RowWindow<'_>], ctx: &RejectContext, r: usize) -> RowStacks {
        let y_img = self.band_start + r;
        let channels = self.channels;
        let n = self.n;
        let mut stacks = vec![StackItem::default(); self.out_w * channels * n];
        let mut verdicts = vec![StackVerdict::default(); self.out_w * channels];

        for (fi, window) in windows.iter().enumerate() {
            let row = window.row(y_img);
            for x in 0..self.out_w {
                let x_img = self.x0 + x;
                for c in 0..channels {
                    let raw = row[x_img * channels + c] as f64;
                    let value = self.rejection_norm.apply(fi, c, x_img, y_img, raw);
                    stacks[(x * channels + c) * n + fi] =
                        StackItem::new(value as f32, raw as f32, fi);
                }
            }
        }

        for s in 0..self.out_w * channels {
            let stack = &mut stacks[s * n..(s + 1) * n];
            verdicts[s] = reject_stack(stack, ctx);
        }
        RowStacks { stacks, verdicts }
    }

    /// Grow per-frame rejection structures across the band and fold the
    /// expanded flags back into the stacks.
    fn expand_large_scale(&self, rows: &mut [RowStacks], band_h: usize) {
        let n = self.n;
        let channels = self.channels;

        // (frame, channel, high_side) mask jobs.
        let mut jobs: Vec<(usize, usize, bool)> = Vec::new();
        for f in 0..n {
            for c in 0..channels {
                if self.config.large_scale.low.enabled {
                    jobs.push((f, c, false));
                }
                if self.config.large_scale.high.enabled {
                    jobs.push((f, c, true));
                }
            }
        }

        let rows_ref: &[RowStacks] = rows;
        let expanded: Vec<(usize, usize, bool, Array2<bool>)> = jobs
            .into_par_iter()
            .map(|(f, c, high)| {
                let mut mask = Array2::<bool>::from_elem((band_h, self.out_w), false);
                for (r, row) in rows_ref.iter().enumerate() {
                    for x in 0..self.out_w {
                        let stack = &row.stacks[(x * channels + c) * n..][..n];
                        for item in stack {
                            if item.index() == f {
                                mask[[r, x]] = if high {
                                    item.reject_high() || item.range_high()
                                } else {
                                    item.reject_low() || item.range_low()
                                };
                                break;
                            }
                        }
                    }
                }
                let side = if high {
                    &self.config.large_scale.high
                } else {
                    &self.config.large_scale.low
                };
                let grown = expand_mask(&mask, side);
                (f, c, high, grown)
            })
            .collect();

        for (f, c, high, grown) in expanded {
            for (r, row) in rows.iter_mut().enumerate() {
                for x in 0..self.out_w {
                    if !grown[[r, x]] {
                        continue;
                    }
                    let stack = &mut row.stacks[(x * channels + c) * n..][..n];
                    for item in stack.iter_mut() {
                        if item.index() == f {
                            if high {
                                item.set_reject_high();
                            } else {
                                item.set_reject_low();
                            }
                            break;
                        }
                    }
                }
            }
        }

        // Survivor counts may have shrunk; refresh the verdicts.
        for row in rows.iter_mut() {
            for s in 0..self.out_w * channels {
                let stack = &row.stacks[s * n..(s + 1) * n];
                let kept = stack.iter().filter(|i| !i.is_rejected()).count();
                row.verdicts[s].kept = kept;
                row.verdicts[s].degenerate |= kept == 0;
            }
        }
    }

    fn combine_row(&self, mut row: RowStacks, r: usize) -> RowOutput {
        let y_img = self.band_start + r;
        let channels = self.channels;
        let n = self.n;
        let map_range = self.config.range.map;
        let report_range = self.config.range.report;

        let mut out = RowOutput {
            pixels: vec![0.0; self.out_w * channels],
            map_low: vec![0.0; if self.want_maps { self.out_w * channels } else { 0 }],
            map_high: vec![0.0; if self.want_maps { self.out_w * channels } else { 0 }],
            slope: vec![0.0; if self.want_slope { self.out_w * channels } else { 0 }],
            counts_low: vec![0; n * channels],
            counts_high: vec![0; n * channels],
            range_low: vec![0; channels],
            range_high: vec![0; channels],
            degenerate: 0,
            drizzle: Vec::new(),
        };

        for x in 0..self.out_w {
            let x_img = self.x0 + x;
            for c in 0..channels {
                let s = x * channels + c;
                let verdict = row.verdicts[s];
                let stack = &mut row.stacks[s * n..(s + 1) * n];

                // Renormalize for output before combining.
                for item in stack.iter_mut() {
                    let v = self
                        .output_norm
                        .apply(item.index(), c, x_img, y_img, item.raw as f64);
                    item.value = v as f32;
                }

                out.pixels[s] = combine_stack(
                    stack,
                    self.config.combination,
                    &self.weights_by_channel[c],
                    verdict.degenerate,
                );
                if verdict.degenerate {
                    out.degenerate += 1;
                }

                let mut stat_low = 0u32;
                let mut stat_high = 0u32;
                let mut rng_low = 0u32;
                let mut rng_high = 0u32;
                for item in stack.iter() {
                    let f = item.index();
                    if item.reject_low() {
                        stat_low += 1;
                        out.counts_low[f * channels + c] += 1;
                    }
                    if item.reject_high() {
                        stat_high += 1;
                        out.counts_high[f * channels + c] += 1;
                    }
                    if item.range_low() {
                        rng_low += 1;
                        if report_range {
                            out.counts_low[f * channels + c] += 1;
                        }
                    }
                    if item.range_high() {
                        rng_high += 1;
                        if report_range {
                            out.counts_high[f * channels + c] += 1;
                        }
                    }
                    if self.want_drizzle && (item.reject_low() || item.reject_high()) {
                        out.drizzle.push((
                            f,
                            DrizzleRejection {
                                x: x_img as u32,
                                y: y_img as u32,
                                channel: c as u8,
                                high: item.reject_high(),
                            },
                        ));
                    }
                }
                out.range_low[c] += rng_low as u64;
                out.range_high[c] += rng_high as u64;

                if self.want_maps {
                    let low = stat_low + if map_range { rng_low } else { 0 };
                    let high = stat_high + if map_range { rng_high } else { 0 };
                    out.map_low[s] = low as f32 / n as f32;
                    out.map_high[s] = high as f32 / n as f32;
                }
                if self.want_slope {
                    out.slope[s] = verdict.slope.unwrap_or(0.0);
                }
            }
        }
        out
    }
}
