//! Sample normalization for the rejection and output stages.
//!
//! A `Normalizer` is a pure per-sample map parameterized by frame
//! statistics; the rejection and output stages each build their own with
//! possibly different regimes. All per-frame constants are precomputed at
//! build time, including the fitted adaptive spline surfaces.

use crate::cache::AdaptiveGrid;
use crate::config::Normalization;
use crate::consts::EPSILON;
use crate::error::{DenebError, Result};
use crate::file::{IntegrationFile, LocalNorm};
use crate::spline::ThinPlateSpline;
use crate::stats::TwoSided;

struct ChannelNorm {
    location: f64,
    ref_location: f64,
    /// m_ref - m_i
    add_offset: f64,
    /// m_ref / m_i; 1 when the frame location is not positive.
    mult_ratio: f64,
    /// s_ref / s_i per side; 1 when the frame scale vanishes.
    scale_factor: TwoSided,
}

/// Interpolated location/scale surfaces of one frame.
pub struct AdaptiveSurface {
    location: Vec<ThinPlateSpline>,
    scale_low: Vec<ThinPlateSpline>,
    scale_high: Vec<ThinPlateSpline>,
}

impl AdaptiveSurface {
    pub fn fit(grid: &AdaptiveGrid, width: usize, height: usize) -> Result<Self> {
        let g = grid.grid;
        let mut nodes = Vec::with_capacity(g * g);
        for gy in 0..g {
            for gx in 0..g {
                nodes.push((
                    (gx as f64 + 0.5) * width as f64 / g as f64,
                    (gy as f64 + 0.5) * height as f64 / g as f64,
                ));
            }
        }
        let channels = grid.location.len();
        let mut location = Vec::with_capacity(channels);
        let mut scale_low = Vec::with_capacity(channels);
        let mut scale_high = Vec::with_capacity(channels);
        for c in 0..channels {
            location.push(ThinPlateSpline::fit(&nodes, &grid.location[c])?);
            scale_low.push(ThinPlateSpline::fit(&nodes, &grid.scale_low[c])?);
            scale_high.push(ThinPlateSpline::fit(&nodes, &grid.scale_high[c])?);
        }
        Ok(Self {
            location,
            scale_low,
            scale_high,
        })
    }

    #[inline]
    fn location_at(&self, c: usize, x: f64, y: f64) -> f64 {
        self.location[c].eval(x, y)
    }

    #[inline]
    fn scale_at(&self, c: usize, x: f64, y: f64, below: bool) -> f64 {
        if below {
            self.scale_low[c].eval(x, y)
        } else {
            self.scale_high[c].eval(x, y)
        }
    }
}

struct FrameNorm<'a> {
    channels: Vec<ChannelNorm>,
    local: Option<&'a LocalNorm>,
    adaptive: Option<AdaptiveSurface>,
}

pub struct Normalizer<'a> {
    mode: Normalization,
    no_scale: bool,
    frames: Vec<FrameNorm<'a>>,
    reference_adaptive: Option<AdaptiveSurface>,
}

impl<'a> Normalizer<'a> {
    /// Build a normalizer over `files` anchored at `files[reference]`.
    pub fn build(
        mode: Normalization,
        files: &'a [IntegrationFile],
        reference: usize,
        adaptive_no_scale: bool,
    ) -> Result<Self> {
        let ref_stats = files[reference].stats();
        let channels = ref_stats.channels;

        let mut frames = Vec::with_capacity(files.len());
        for file in files {
            let stats = file.stats();
            let mut per_channel = Vec::with_capacity(channels);
            for c in 0..channels {
                let m_i = stats.location[c];
                let m_ref = ref_stats.location[c];
                let s_i = stats.scale[c];
                let s_ref = ref_stats.scale[c];
                per_channel.push(ChannelNorm {
                    location: m_i,
                    ref_location: m_ref,
                    add_offset: m_ref - m_i,
                    mult_ratio: if m_i > EPSILON { m_ref / m_i } else { 1.0 },
                    scale_factor: TwoSided {
                        low: if s_i.low > EPSILON { s_ref.low / s_i.low } else { 1.0 },
                        high: if s_i.high > EPSILON {
                            s_ref.high / s_i.high
                        } else {
                            1.0
                        },
                    },
                });
            }

            let local = if mode.uses_local_data() {
                let l = file.local();
                if l.is_none() {
                    return Err(DenebError::Config(format!(
                        "local normalization selected but {} has no normalization data",
                        file.item().path.display()
                    )));
                }
                l
            } else {
                None
            };

            let adaptive = if mode.uses_adaptive_grids() {
                let grid = stats.adaptive.as_ref().ok_or_else(|| {
                    DenebError::Config(format!(
                        "adaptive normalization selected but {} has no grid statistics",
                        file.item().path.display()
                    ))
                })?;
                Some(AdaptiveSurface::fit(grid, stats.width, stats.height)?)
            } else {
                None
            };

            frames.push(FrameNorm {
                channels: per_channel,
                local,
                adaptive,
            });
        }

        let reference_adaptive = if mode.uses_adaptive_grids() {
            let stats = files[reference].stats();
            let grid = stats
                .adaptive
                .as_ref()
                .expect("reference adaptive grid checked above");
            Some(AdaptiveSurface::fit(grid, stats.width, stats.height)?)
        } else {
            None
        };

        Ok(Self {
            mode,
            no_scale: adaptive_no_scale,
            frames,
            reference_adaptive,
        })
    }

    pub fn mode(&self) -> Normalization {
        self.mode
    }

    /// Normalize one sample of `frame` at image coordinates (x, y).
    #[inline]
    pub fn apply(&self, frame: usize, c: usize, x: usize, y: usize, s: f64) -> f64 {
        let fr = &self.frames[frame];
        match self.mode {
            Normalization::None => s,
            Normalization::Additive => s + fr.channels[c].add_offset,
            Normalization::Multiplicative => s * fr.channels[c].mult_ratio,
            Normalization::AdditiveScaling => {
                let ch = &fr.channels[c];
                let f = ch.scale_factor.side(s <= ch.location);
                (s - ch.location) * f + ch.ref_location
            }
            Normalization::MultiplicativeScaling => {
                let ch = &fr.channels[c];
                let f = ch.scale_factor.side(s <= ch.location);
                ((s - ch.location) * f + ch.location) * ch.mult_ratio
            }
            Normalization::Local => match fr.local {
                Some(local) => local.apply(c, x, y, s),
                None => s,
            },
            Normalization::Adaptive => {
                let surface = fr.adaptive.as_ref().expect("adaptive surfaces built");
                let reference = self
                    .reference_adaptive
                    .as_ref()
                    .expect("adaptive surfaces built");
                let fx = x as f64 + 0.5;
                let fy = y as f64 + 0.5;
                let loc = surface.location_at(c, fx, fy);
                let ref_loc = reference.location_at(c, fx, fy);
                if self.no_scale {
                    s - loc + ref_loc
                } else {
                    let below = s <= loc;
                    let si = surface.scale_at(c, fx, fy, below);
                    let sr = reference.scale_at(c, fx, fy, below);
                    let f = if si.abs() > EPSILON { sr / si } else { 1.0 };
                    (s - loc) * f + ref_loc
                }
            }
        }
    }
}
