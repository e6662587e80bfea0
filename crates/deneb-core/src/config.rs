//! Integration run configuration.
//!
//! A plain-data record passed by value into the engine. Every enum option
//! from the process surface is represented here; defaults follow the
//! shipped process defaults.

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::{DenebError, Result};
pub use crate::noise::NoiseEstimator;
pub use crate::stats::ScaleEstimator;

/// Pixel combination operation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Combination {
    #[default]
    Mean,
    Median,
    Minimum,
    Maximum,
}

/// Normalization regime, applicable to either the rejection or the output
/// stage.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Normalization {
    None,
    Additive,
    Multiplicative,
    #[default]
    AdditiveScaling,
    MultiplicativeScaling,
    Local,
    Adaptive,
}

impl Normalization {
    pub fn uses_local_data(&self) -> bool {
        matches!(self, Normalization::Local)
    }

    pub fn uses_adaptive_grids(&self) -> bool {
        matches!(self, Normalization::Adaptive)
    }
}

/// Statistical rejection algorithm.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Rejection {
    #[default]
    None,
    #[serde(rename = "minmax")]
    MinMax,
    Percentile,
    Sigma,
    WinsorizedSigma,
    AveragedSigma,
    LinearFit,
    CcdNoise,
    Esd,
    Rcr,
}

/// Per-frame weighting mode.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum WeightMode {
    Constant,
    Exposure,
    InverseNoise,
    Signal,
    Median,
    Mean,
    Keyword,
    #[default]
    PsfSignal,
    PsfSnr,
    PsfScaleSnr,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WeightConfig {
    #[serde(default)]
    pub mode: WeightMode,
    /// Header keyword for [`WeightMode::Keyword`].
    #[serde(default)]
    pub keyword: Option<String>,
    /// Weights below this floor are clipped to it.
    #[serde(default = "default_min_weight")]
    pub min_weight: f64,
}

fn default_min_weight() -> f64 {
    0.005
}

impl Default for WeightConfig {
    fn default() -> Self {
        Self {
            mode: WeightMode::default(),
            keyword: None,
            min_weight: default_min_weight(),
        }
    }
}

/// Numeric parameters of the rejection algorithms. Only the fields of the
/// selected algorithm are consulted.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RejectionParams {
    #[serde(default = "default_min_max")]
    pub min_max_low: u32,
    #[serde(default = "default_min_max")]
    pub min_max_high: u32,
    #[serde(default = "default_pc_low")]
    pub pc_low: f64,
    #[serde(default = "default_pc_high")]
    pub pc_high: f64,
    #[serde(default = "default_sigma_low")]
    pub sigma_low: f64,
    #[serde(default = "default_sigma_high")]
    pub sigma_high: f64,
    #[serde(default = "default_winsorization_cutoff")]
    pub winsorization_cutoff: f64,
    #[serde(default = "default_lfit_low")]
    pub lfit_low: f64,
    #[serde(default = "default_lfit_high")]
    pub lfit_high: f64,
    #[serde(default = "default_esd_outliers")]
    pub esd_outliers: f64,
    #[serde(default = "default_esd_alpha")]
    pub esd_alpha: f64,
    #[serde(default = "default_esd_low_relaxation")]
    pub esd_low_relaxation: f64,
    #[serde(default = "default_rcr_limit")]
    pub rcr_limit: f64,
    #[serde(default = "default_ccd_gain")]
    pub ccd_gain: f64,
    #[serde(default = "default_ccd_read_noise")]
    pub ccd_read_noise: f64,
    #[serde(default)]
    pub ccd_scale_noise: f64,
    #[serde(default = "default_true")]
    pub clip_low: bool,
    #[serde(default = "default_true")]
    pub clip_high: bool,
}

fn default_min_max() -> u32 {
    1
}
fn default_pc_low() -> f64 {
    0.2
}
fn default_pc_high() -> f64 {
    0.1
}
fn default_sigma_low() -> f64 {
    4.0
}
fn default_sigma_high() -> f64 {
    3.0
}
fn default_winsorization_cutoff() -> f64 {
    5.0
}
fn default_lfit_low() -> f64 {
    5.0
}
fn default_lfit_high() -> f64 {
    4.0
}
fn default_esd_outliers() -> f64 {
    0.3
}
fn default_esd_alpha() -> f64 {
    0.05
}
fn default_esd_low_relaxation() -> f64 {
    1.0
}
fn default_rcr_limit() -> f64 {
    0.1
}
fn default_ccd_gain() -> f64 {
    1.0
}
fn default_ccd_read_noise() -> f64 {
    10.0
}
fn default_true() -> bool {
    true
}

impl Default for RejectionParams {
    fn default() -> Self {
        Self {
            min_max_low: default_min_max(),
            min_max_high: default_min_max(),
            pc_low: default_pc_low(),
            pc_high: default_pc_high(),
            sigma_low: default_sigma_low(),
            sigma_high: default_sigma_high(),
            winsorization_cutoff: default_winsorization_cutoff(),
            lfit_low: default_lfit_low(),
            lfit_high: default_lfit_high(),
            esd_outliers: default_esd_outliers(),
            esd_alpha: default_esd_alpha(),
            esd_low_relaxation: default_esd_low_relaxation(),
            rcr_limit: default_rcr_limit(),
            ccd_gain: default_ccd_gain(),
            ccd_read_noise: default_ccd_read_noise(),
            ccd_scale_noise: 0.0,
            clip_low: default_true(),
            clip_high: default_true(),
        }
    }
}

/// Range rejection: unconditional exclusion of samples at or below the
/// low bound and above the high bound, applied before any statistical
/// algorithm.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RangeConfig {
    #[serde(default = "default_true")]
    pub clip_low: bool,
    /// Samples with `value <= low` are rejected.
    #[serde(default)]
    pub low: f64,
    #[serde(default)]
    pub clip_high: bool,
    /// Samples with `value > high` are rejected.
    #[serde(default = "default_range_high")]
    pub high: f64,
    /// Count range-rejected samples in per-frame rejection summaries.
    #[serde(default)]
    pub report: bool,
    /// Include range-rejected samples in the rejection maps.
    #[serde(default = "default_true")]
    pub map: bool,
}

fn default_range_high() -> f64 {
    0.98
}

impl Default for RangeConfig {
    fn default() -> Self {
        Self {
            clip_low: true,
            low: 0.0,
            clip_high: false,
            high: default_range_high(),
            report: false,
            map: true,
        }
    }
}

/// One side of large-scale rejection expansion.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LargeScaleSide {
    #[serde(default)]
    pub enabled: bool,
    /// Small-scale wavelet layers protected from (excluded by) the
    /// structure detection.
    #[serde(default = "default_ls_layers")]
    pub protected_layers: usize,
    /// Dilation radius applied to detected structures, in pixels.
    #[serde(default = "default_ls_growth")]
    pub growth: usize,
}

fn default_ls_layers() -> usize {
    2
}
fn default_ls_growth() -> usize {
    2
}

impl Default for LargeScaleSide {
    fn default() -> Self {
        Self {
            enabled: false,
            protected_layers: default_ls_layers(),
            growth: default_ls_growth(),
        }
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct LargeScaleConfig {
    #[serde(default)]
    pub low: LargeScaleSide,
    #[serde(default)]
    pub high: LargeScaleSide,
}

impl LargeScaleConfig {
    pub fn any_enabled(&self) -> bool {
        self.low.enabled || self.high.enabled
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AdaptiveConfig {
    /// Grid size G: the frame is covered by G x G cells.
    #[serde(default = "default_grid_size")]
    pub grid_size: usize,
    /// Use adaptive location estimates only; no scale correction.
    #[serde(default)]
    pub no_scale: bool,
}

fn default_grid_size() -> usize {
    16
}

impl Default for AdaptiveConfig {
    fn default() -> Self {
        Self {
            grid_size: default_grid_size(),
            no_scale: false,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NoiseConfig {
    #[serde(default)]
    pub estimator: NoiseEstimator,
    /// Always evaluate input noise; ignore NOISExx header keywords.
    #[serde(default)]
    pub ignore_keywords: bool,
    /// Evaluate noise of the integrated result.
    #[serde(default = "default_true")]
    pub evaluate: bool,
    /// Minimum fraction of noise samples for a valid MRS evaluation.
    #[serde(default = "default_mrs_fraction")]
    pub mrs_min_data_fraction: f64,
}

fn default_mrs_fraction() -> f64 {
    0.01
}

impl Default for NoiseConfig {
    fn default() -> Self {
        Self {
            estimator: NoiseEstimator::default(),
            ignore_keywords: false,
            evaluate: true,
            mrs_min_data_fraction: default_mrs_fraction(),
        }
    }
}

/// Memory and threading budgets.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MemoryConfig {
    /// Per-frame row buffer budget, in MiB.
    #[serde(default = "default_buffer_mb")]
    pub buffer_size_mb: usize,
    /// Pixel stack budget for one row band, in MiB.
    #[serde(default = "default_stack_mb")]
    pub stack_size_mb: usize,
    /// Derive both budgets from available physical memory.
    #[serde(default = "default_true")]
    pub auto_size: bool,
    /// Fraction of available physical memory usable when auto-sizing.
    #[serde(default = "default_auto_limit")]
    pub auto_limit: f64,
    /// Worker threads for band processing; 0 = one per logical CPU.
    #[serde(default)]
    pub file_threads: usize,
    /// Worker threads for row-buffer refill; 0 = one per enabled frame.
    #[serde(default)]
    pub buffer_threads: usize,
}

fn default_buffer_mb() -> usize {
    16
}
fn default_stack_mb() -> usize {
    1024
}
fn default_auto_limit() -> f64 {
    0.75
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            buffer_size_mb: default_buffer_mb(),
            stack_size_mb: default_stack_mb(),
            auto_size: true,
            auto_limit: default_auto_limit(),
            file_threads: 0,
            buffer_threads: 0,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct OutputConfig {
    #[serde(default = "default_true")]
    pub integrated_image: bool,
    #[serde(default = "default_true")]
    pub rejection_maps: bool,
    /// Append weight and rejection records to drizzle data files.
    #[serde(default)]
    pub drizzle_data: bool,
    /// Emit 64-bit samples instead of 32-bit.
    #[serde(default)]
    pub generate_64bit: bool,
    /// Clamp out-of-range output instead of rescaling the channel.
    #[serde(default)]
    pub truncate_on_out_of_range: bool,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            integrated_image: true,
            rejection_maps: true,
            drizzle_data: false,
            generate_64bit: false,
            truncate_on_out_of_range: false,
        }
    }
}

/// Region of interest, in image coordinates; end-exclusive.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Roi {
    pub x0: usize,
    pub y0: usize,
    pub x1: usize,
    pub y1: usize,
}

impl Roi {
    pub fn width(&self) -> usize {
        self.x1.saturating_sub(self.x0)
    }

    pub fn height(&self) -> usize {
        self.y1.saturating_sub(self.y0)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct IntegrationConfig {
    #[serde(default)]
    pub combination: Combination,
    #[serde(default)]
    pub output_normalization: Normalization,
    #[serde(default)]
    pub rejection: Rejection,
    #[serde(default)]
    pub rejection_normalization: Normalization,
    #[serde(default)]
    pub rejection_params: RejectionParams,
    #[serde(default)]
    pub range: RangeConfig,
    #[serde(default)]
    pub large_scale: LargeScaleConfig,
    #[serde(default)]
    pub weights: WeightConfig,
    #[serde(default)]
    pub scale_estimator: ScaleEstimator,
    #[serde(default)]
    pub adaptive: AdaptiveConfig,
    #[serde(default)]
    pub noise: NoiseConfig,
    #[serde(default)]
    pub memory: MemoryConfig,
    #[serde(default)]
    pub output: OutputConfig,
    #[serde(default)]
    pub roi: Option<Roi>,
    /// Index (among enabled frames) of the normalization reference;
    /// `None` anchors at the first enabled frame.
    #[serde(default)]
    pub reference_frame: Option<usize>,
    #[serde(default = "default_true")]
    pub subtract_pedestals: bool,
    #[serde(default = "default_true")]
    pub use_cache: bool,
    /// Cache directory; `None` selects a `deneb-cache` directory under the
    /// platform temp dir.
    #[serde(default)]
    pub cache_dir: Option<PathBuf>,
}

impl Default for IntegrationConfig {
    fn default() -> Self {
        Self {
            combination: Combination::default(),
            output_normalization: Normalization::default(),
            rejection: Rejection::default(),
            rejection_normalization: Normalization::default(),
            rejection_params: RejectionParams::default(),
            range: RangeConfig::default(),
            large_scale: LargeScaleConfig::default(),
            weights: WeightConfig::default(),
            scale_estimator: ScaleEstimator::default(),
            adaptive: AdaptiveConfig::default(),
            noise: NoiseConfig::default(),
            memory: MemoryConfig::default(),
            output: OutputConfig::default(),
            roi: None,
            reference_frame: None,
            subtract_pedestals: true,
            use_cache: true,
            cache_dir: None,
        }
    }
}

impl IntegrationConfig {
    /// Reject contradictory settings before any file is opened.
    pub fn validate(&self) -> Result<()> {
        if self.adaptive.grid_size < 1 || self.adaptive.grid_size > 50 {
            return Err(DenebError::Config(format!(
                "adaptive grid size {} outside [1, 50]",
                self.adaptive.grid_size
            )));
        }
        if self.weights.mode == WeightMode::Keyword
            && self.weights.keyword.as_deref().unwrap_or("").is_empty()
        {
            return Err(DenebError::Config(
                "keyword weighting selected but no weight keyword given".into(),
            ));
        }
        if self.range.clip_low && self.range.clip_high && self.range.low >= self.range.high {
            return Err(DenebError::Config(format!(
                "range bounds are inverted: low={} high={}",
                self.range.low, self.range.high
            )));
        }
        if !(0.0..1.0).contains(&self.rejection_params.esd_outliers) {
            return Err(DenebError::Config(
                "ESD outliers fraction must be in [0, 1)".into(),
            ));
        }
        if self.rejection_params.ccd_gain <= 0.0 {
            return Err(DenebError::Config("CCD gain must be positive".into()));
        }
        if self.memory.auto_limit <= 0.0 || self.memory.auto_limit > 1.0 {
            return Err(DenebError::Config(
                "auto memory limit must be in (0, 1]".into(),
            ));
        }
        if let Some(roi) = &self.roi {
            if roi.width() == 0 || roi.height() == 0 {
                return Err(DenebError::Config("empty region of interest".into()));
            }
        }
        Ok(())
    }
}

// --- Display implementations ---

impl fmt::Display for Combination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Combination::Mean => write!(f, "Average"),
            Combination::Median => write!(f, "Median"),
            Combination::Minimum => write!(f, "Minimum"),
            Combination::Maximum => write!(f, "Maximum"),
        }
    }
}

impl fmt::Display for Normalization {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Normalization::None => write!(f, "None"),
            Normalization::Additive => write!(f, "Additive"),
            Normalization::Multiplicative => write!(f, "Multiplicative"),
            Normalization::AdditiveScaling => write!(f, "Additive + scaling"),
            Normalization::MultiplicativeScaling => write!(f, "Multiplicative + scaling"),
            Normalization::Local => write!(f, "Local"),
            Normalization::Adaptive => write!(f, "Adaptive"),
        }
    }
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rejection::None => write!(f, "None"),
            Rejection::MinMax => write!(f, "Min/Max clipping"),
            Rejection::Percentile => write!(f, "Percentile clipping"),
            Rejection::Sigma => write!(f, "Sigma clipping"),
            Rejection::WinsorizedSigma => write!(f, "Winsorized sigma clipping"),
            Rejection::AveragedSigma => write!(f, "Averaged sigma clipping"),
            Rejection::LinearFit => write!(f, "Linear fit clipping"),
            Rejection::CcdNoise => write!(f, "CCD noise model"),
            Rejection::Esd => write!(f, "Generalized extreme Studentized deviate"),
            Rejection::Rcr => write!(f, "Robust Chauvenet rejection"),
        }
    }
}

impl fmt::Display for WeightMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WeightMode::Constant => write!(f, "Don't care"),
            WeightMode::Exposure => write!(f, "Exposure time"),
            WeightMode::InverseNoise => write!(f, "Noise evaluation"),
            WeightMode::Signal => write!(f, "Signal strength"),
            WeightMode::Median => write!(f, "Median sample value"),
            WeightMode::Mean => write!(f, "Average sample value"),
            WeightMode::Keyword => write!(f, "Custom keyword"),
            WeightMode::PsfSignal => write!(f, "PSF signal weight"),
            WeightMode::PsfSnr => write!(f, "PSF SNR"),
            WeightMode::PsfScaleSnr => write!(f, "PSF scale SNR"),
        }
    }
}
