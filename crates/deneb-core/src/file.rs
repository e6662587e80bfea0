//! Per-frame input state: the opened source, derived statistics, weights,
//! companion normalization data and the bounded row buffer.

use std::path::PathBuf;

use ndarray::{Array2, Array3};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::cache::{AdaptiveGrid, FileCache, FrameId, FrameStats, StatsKey};
use crate::config::IntegrationConfig;
use crate::consts::PEDESTAL_SCALE;
use crate::error::{DenebError, Result};
use crate::io::{self, ImageSource};
use crate::noise;
use crate::rowbuf::{RowBuffer, RowWindow};
use crate::stats;

fn enabled_default() -> bool {
    true
}

/// One entry of the input file list.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FrameItem {
    pub path: PathBuf,
    /// Local normalization data file (scale and offset planes).
    #[serde(default)]
    pub normalization_path: Option<PathBuf>,
    /// Drizzle data file to append rejection records to.
    #[serde(default)]
    pub drizzle_path: Option<PathBuf>,
    #[serde(default = "enabled_default")]
    pub enabled: bool,
}

impl FrameItem {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            normalization_path: None,
            drizzle_path: None,
            enabled: true,
        }
    }
}

/// Per-pixel linear normalization function: `a(x, y) * s + b(x, y)`,
/// supplied externally as planes of the companion file.
#[derive(Debug)]
pub struct LocalNorm {
    scale: Array3<f32>,
    offset: Array3<f32>,
}

impl LocalNorm {
    /// The companion container carries `2 * channels` planes: scale planes
    /// first, then offset planes, with the frame's geometry.
    pub fn load(path: &std::path::Path, width: usize, height: usize, channels: usize) -> Result<Self> {
        let source = io::open_source(path)?;
        if source.width() != width || source.height() != height {
            return Err(DenebError::IncompatibleGeometry {
                path: path.display().to_string(),
                got: format!("{}x{}", source.width(), source.height()),
                expected: format!("{width}x{height}"),
            });
        }
        if source.channels() != 2 * channels {
            return Err(DenebError::IncompatibleGeometry {
                path: path.display().to_string(),
                got: format!("{} channels", source.channels()),
                expected: format!("{} channels (scale + offset)", 2 * channels),
            });
        }
        let total = 2 * channels;
        let mut buf = vec![0.0f32; width * height * total];
        source.read_rows(0, height, &mut buf)?;
        let mut scale = Array3::<f32>::zeros((channels, height, width));
        let mut offset = Array3::<f32>::zeros((channels, height, width));
        for y in 0..height {
            for x in 0..width {
                let base = (y * width + x) * total;
                for c in 0..channels {
                    scale[[c, y, x]] = buf[base + c];
                    offset[[c, y, x]] = buf[base + channels + c];
                }
            }
        }
        Ok(Self { scale, offset })
    }

    #[inline]
    pub fn apply(&self, c: usize, x: usize, y: usize, s: f64) -> f64 {
        self.scale[[c, y, x]] as f64 * s + self.offset[[c, y, x]] as f64
    }
}

/// Loaded state of one enabled frame for the duration of a run.
#[derive(Debug)]
pub struct IntegrationFile {
    item: FrameItem,
    source: Box<dyn ImageSource>,
    index: usize,
    /// Normalized pedestal actually subtracted on read.
    pedestal: f64,
    exposure: Option<f64>,
    id: FrameId,
    stats: FrameStats,
    weight: Vec<f64>,
    local: Option<LocalNorm>,
    reference: bool,
    buffer: RowBuffer,
}

impl IntegrationFile {
    pub fn open(
        item: FrameItem,
        index: usize,
        config: &IntegrationConfig,
        buffer_bytes: usize,
        cache: Option<&FileCache>,
    ) -> Result<Self> {
        let source = io::open_source(&item.path)?;
        Self::from_source(source, item, index, config, buffer_bytes, cache)
    }

    /// Build from an already-open source (library embedding and tests).
    pub fn from_source(
        source: Box<dyn ImageSource>,
        item: FrameItem,
        index: usize,
        config: &IntegrationConfig,
        buffer_bytes: usize,
        cache: Option<&FileCache>,
    ) -> Result<Self> {
        let width = source.width();
        let height = source.height();
        let channels = source.channels();
        if width == 0 || height == 0 || channels == 0 {
            return Err(DenebError::InvalidDimensions { width, height });
        }

        let pedestal = if config.subtract_pedestals {
            source.pedestal().map(|p| p / PEDESTAL_SCALE).unwrap_or(0.0)
        } else {
            0.0
        };
        let exposure = source.exposure();

        let needs_adaptive = config.output_normalization.uses_adaptive_grids()
            || config.rejection_normalization.uses_adaptive_grids();
        let key = StatsKey {
            scale_estimator: config.scale_estimator,
            noise_estimator: config.noise.estimator,
            adaptive_grid: if needs_adaptive {
                config.adaptive.grid_size as u32
            } else {
                0
            },
            subtract_pedestal: pedestal != 0.0,
        };
        let id = FrameId::compute(
            source.content_id(),
            item.normalization_path.as_deref(),
            item.drizzle_path.as_deref(),
            &key,
        );

        let cached = cache.and_then(|c| c.get(&id)).filter(|s| {
            s.width == width
                && s.height == height
                && s.channels == channels
                && (!needs_adaptive
                    || s.adaptive
                        .as_ref()
                        .is_some_and(|g| g.grid == config.adaptive.grid_size))
        });
        let stats = match cached {
            Some(stats) => stats,
            None => {
                info!(path = %item.path.display(), "computing frame statistics");
                let stats = compute_stats(
                    source.as_ref(),
                    pedestal,
                    needs_adaptive.then_some(config.adaptive.grid_size),
                    config,
                )?;
                if let Some(cache) = cache {
                    cache.put(&id, &stats);
                }
                stats
            }
        };

        let local = match (&item.normalization_path, needs_local(config)) {
            (Some(path), true) => Some(LocalNorm::load(path, width, height, channels)?),
            _ => None,
        };

        let buffer = RowBuffer::new(buffer_bytes, width * channels, height);
        debug!(
            path = %item.path.display(),
            index,
            buffer_rows = buffer.capacity_rows(),
            "frame opened"
        );

        Ok(Self {
            item,
            source,
            index,
            pedestal,
            exposure,
            id,
            stats,
            weight: vec![1.0; channels],
            local,
            reference: false,
            buffer,
        })
    }

    pub fn width(&self) -> usize {
        self.stats.width
    }

    pub fn height(&self) -> usize {
        self.stats.height
    }

    pub fn channels(&self) -> usize {
        self.stats.channels
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn item(&self) -> &FrameItem {
        &self.item
    }

    pub fn id(&self) -> FrameId {
        self.id
    }

    pub fn stats(&self) -> &FrameStats {
        &self.stats
    }

    pub fn exposure(&self) -> Option<f64> {
        self.exposure
    }

    pub fn keyword(&self, name: &str) -> Option<f64> {
        self.source.keyword(name)
    }

    pub fn weight(&self) -> &[f64] {
        &self.weight
    }

    pub fn set_weight(&mut self, weight: Vec<f64>) {
        self.weight = weight;
    }

    pub fn is_reference(&self) -> bool {
        self.reference
    }

    pub fn set_reference(&mut self, reference: bool) {
        self.reference = reference;
    }

    pub fn local(&self) -> Option<&LocalNorm> {
        self.local.as_ref()
    }

    pub fn buffer_capacity_rows(&self) -> usize {
        self.buffer.capacity_rows()
    }

    /// Materialize rows [y0, y1) in the row buffer, reading ahead to the
    /// buffer capacity.
    pub fn request_rows(&self, y0: usize, y1: usize) -> Result<()> {
        self.buffer
            .materialize(self.source.as_ref(), self.pedestal as f32, y0, y1)
    }

    /// Borrow rows [y0, y1), materializing them first if needed.
    pub fn rows(&self, y0: usize, y1: usize) -> Result<RowWindow<'_>> {
        if let Ok(window) = self.buffer.window(y0, y1) {
            return Ok(window);
        }
        self.request_rows(y0, y1)?;
        self.buffer.window(y0, y1)
    }
}

fn needs_local(config: &IntegrationConfig) -> bool {
    config.output_normalization.uses_local_data()
        || config.rejection_normalization.uses_local_data()
}

/// Full-frame statistics: location, two-sided scale, noise, mean, and the
/// optional adaptive grids. Reads the frame once, in bounded row chunks.
fn compute_stats(
    source: &dyn ImageSource,
    pedestal: f64,
    adaptive_grid: Option<usize>,
    config: &IntegrationConfig,
) -> Result<FrameStats> {
    let width = source.width();
    let height = source.height();
    let channels = source.channels();

    let mut planes: Vec<Array2<f32>> = (0..channels)
        .map(|_| Array2::zeros((height, width)))
        .collect();

    const CHUNK_ROWS: usize = 64;
    let mut buf = vec![0.0f32; CHUNK_ROWS.min(height) * width * channels];
    let mut y0 = 0;
    while y0 < height {
        let y1 = (y0 + CHUNK_ROWS).min(height);
        let chunk = &mut buf[..(y1 - y0) * width * channels];
        source.read_rows(y0, y1, chunk)?;
        for y in y0..y1 {
            for x in 0..width {
                let base = ((y - y0) * width + x) * channels;
                for c in 0..channels {
                    let mut v = chunk[base + c] as f64 - pedestal;
                    if !v.is_finite() {
                        v = 0.0;
                    }
                    planes[c][[y, x]] = v as f32;
                }
            }
        }
        y0 = y1;
    }

    let mut stats = FrameStats {
        width,
        height,
        channels,
        ..Default::default()
    };
    for (c, plane) in planes.iter().enumerate() {
        let samples = plane.as_slice().expect("channel planes are contiguous");
        let mut sorted = samples.to_vec();
        let location = stats::median_f32(&mut sorted);
        let scale = stats::two_sided_scale(config.scale_estimator, samples, location);
        let mean = stats::mean_f32(samples);

        let keyword_noise = if config.noise.ignore_keywords {
            None
        } else {
            source.keyword(&format!("NOISE{c:02}")).filter(|&n| n > 0.0)
        };
        let (sigma, fraction) = match keyword_noise {
            Some(n) => (n, 1.0),
            None => {
                let estimate = noise::estimate_noise(
                    config.noise.estimator,
                    plane,
                    config.noise.mrs_min_data_fraction,
                );
                (estimate.sigma, estimate.fraction)
            }
        };

        stats.location.push(location);
        stats.scale.push(scale);
        stats.noise.push(sigma);
        stats.noise_fraction.push(fraction);
        stats.mean.push(mean);
    }

    if let Some(grid) = adaptive_grid {
        stats.adaptive = Some(compute_adaptive_grid(&planes, grid, config)?);
    }

    Ok(stats)
}

/// Cell statistics for adaptive normalization: the frame is divided into a
/// G x G grid and each cell gets a median and a two-sided scale.
fn compute_adaptive_grid(
    planes: &[Array2<f32>],
    grid: usize,
    config: &IntegrationConfig,
) -> Result<AdaptiveGrid> {
    let (height, width) = planes[0].dim();
    if grid > width || grid > height {
        return Err(DenebError::Config(format!(
            "adaptive grid {grid} exceeds frame dimensions {width}x{height}"
        )));
    }
    let mut location = Vec::with_capacity(planes.len());
    let mut scale_low = Vec::with_capacity(planes.len());
    let mut scale_high = Vec::with_capacity(planes.len());
    for plane in planes {
        let mut cell_loc = Vec::with_capacity(grid * grid);
        let mut cell_low = Vec::with_capacity(grid * grid);
        let mut cell_high = Vec::with_capacity(grid * grid);
        for gy in 0..grid {
            let r0 = gy * height / grid;
            let r1 = ((gy + 1) * height / grid).max(r0 + 1);
            for gx in 0..grid {
                let c0 = gx * width / grid;
                let c1 = ((gx + 1) * width / grid).max(c0 + 1);
                let mut cell: Vec<f32> = Vec::with_capacity((r1 - r0) * (c1 - c0));
                for r in r0..r1 {
                    for c in c0..c1 {
                        cell.push(plane[[r, c]]);
                    }
                }
                let loc = stats::median_f32(&mut cell);
                let scale = stats::two_sided_scale(config.scale_estimator, &cell, loc);
                cell_loc.push(loc);
                cell_low.push(scale.low);
                cell_high.push(scale.high);
            }
        }
        location.push(cell_loc);
        scale_low.push(cell_low);
        scale_high.push(cell_high);
    }
    Ok(AdaptiveGrid {
        grid,
        location,
        scale_low,
        scale_high,
    })
}
