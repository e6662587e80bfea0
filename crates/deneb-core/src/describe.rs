//! Human-readable description of an integration run's settings, written
//! into the output properties and logged by the CLI.

use std::fmt::Write as _;

use crate::config::{Combination, IntegrationConfig, Rejection, WeightMode};

fn yes_no(b: bool) -> &'static str {
    if b { "yes" } else { "no" }
}

struct DescriptionItems {
    pixel_combination: String,
    output_normalization: String,
    weight_mode: String,
    scale_estimator: String,
    range_rejection: String,
    pixel_rejection: String,
    rejection_normalization: String,
    rejection_clippings: String,
    rejection_parameters: String,
    large_scale_clippings: String,
    large_scale_parameters: String,
    region_of_interest: String,
}

impl DescriptionItems {
    fn new(config: &IntegrationConfig) -> Self {
        let mut items = Self {
            pixel_combination: String::new(),
            output_normalization: String::new(),
            weight_mode: String::new(),
            scale_estimator: config.scale_estimator.to_string(),
            range_rejection: String::new(),
            pixel_rejection: config.rejection.to_string(),
            rejection_normalization: String::new(),
            rejection_clippings: String::new(),
            rejection_parameters: String::new(),
            large_scale_clippings: String::new(),
            large_scale_parameters: String::new(),
            region_of_interest: String::new(),
        };

        if config.output.integrated_image {
            items.pixel_combination = config.combination.to_string();
            items.output_normalization = config.output_normalization.to_string();
        } else {
            items.pixel_combination = "disabled".into();
        }

        if config.combination == Combination::Mean {
            items.weight_mode = match config.weights.mode {
                WeightMode::Keyword => format!(
                    "Custom keyword: {}",
                    config.weights.keyword.as_deref().unwrap_or("")
                ),
                mode => mode.to_string(),
            };
        }

        if config.range.clip_low {
            let _ = write!(items.range_rejection, "range_low={:.6}", config.range.low);
        }
        if config.range.clip_high {
            if !items.range_rejection.is_empty() {
                items.range_rejection.push(' ');
            }
            let _ = write!(items.range_rejection, "range_high={:.6}", config.range.high);
        }

        if config.rejection != Rejection::None {
            items.rejection_normalization = config.rejection_normalization.to_string();
            items.rejection_clippings = format!(
                "low={} high={}",
                yes_no(config.rejection_params.clip_low),
                yes_no(config.rejection_params.clip_high)
            );
            let p = &config.rejection_params;
            items.rejection_parameters = match config.rejection {
                Rejection::MinMax => {
                    format!("clip_low={} clip_high={}", p.min_max_low, p.min_max_high)
                }
                Rejection::Percentile => {
                    format!("pc_low={:.3} pc_high={:.3}", p.pc_low, p.pc_high)
                }
                Rejection::Sigma | Rejection::AveragedSigma => {
                    format!("sigma_low={:.3} sigma_high={:.3}", p.sigma_low, p.sigma_high)
                }
                Rejection::WinsorizedSigma => format!(
                    "sigma_low={:.3} sigma_high={:.3} cutoff={:.3}",
                    p.sigma_low, p.sigma_high, p.winsorization_cutoff
                ),
                Rejection::LinearFit => {
                    format!("lfit_low={:.3} lfit_high={:.3}", p.lfit_low, p.lfit_high)
                }
                Rejection::Esd => format!(
                    "esd_outliers={:.2} esd_alpha={:.2} esd_low={:.2}",
                    p.esd_outliers, p.esd_alpha, p.esd_low_relaxation
                ),
                Rejection::Rcr => format!("rcr_limit={:.2}", p.rcr_limit),
                Rejection::CcdNoise => format!(
                    "gain={:.2} read_noise={:.2} scale_noise={:.2}",
                    p.ccd_gain, p.ccd_read_noise, p.ccd_scale_noise
                ),
                Rejection::None => String::new(),
            };
        }

        if config.large_scale.any_enabled() {
            items.large_scale_clippings = format!(
                "low={} high={}",
                yes_no(config.large_scale.low.enabled),
                yes_no(config.large_scale.high.enabled)
            );
            items.large_scale_parameters = format!(
                "lsr_layers_low={} lsr_grow_low={} lsr_layers_high={} lsr_grow_high={}",
                config.large_scale.low.protected_layers,
                config.large_scale.low.growth,
                config.large_scale.high.protected_layers,
                config.large_scale.high.growth
            );
        }

        if let Some(roi) = &config.roi {
            items.region_of_interest = format!(
                "left={}, top={}, width={}, height={}",
                roi.x0,
                roi.y0,
                roi.width(),
                roi.height()
            );
        }

        items
    }
}

/// Multi-line description of the run settings.
pub fn integration_description(config: &IntegrationConfig) -> String {
    let items = DescriptionItems::new(config);
    let rows = [
        ("Pixel combination .................. ", &items.pixel_combination),
        ("Output normalization ............... ", &items.output_normalization),
        ("Weighting mode ..................... ", &items.weight_mode),
        ("Scale estimator .................... ", &items.scale_estimator),
        ("Range rejection .................... ", &items.range_rejection),
        ("Pixel rejection .................... ", &items.pixel_rejection),
        ("Rejection normalization ............ ", &items.rejection_normalization),
        ("Rejection clippings ................ ", &items.rejection_clippings),
        ("Rejection parameters ............... ", &items.rejection_parameters),
        ("Large-scale rejection clippings .... ", &items.large_scale_clippings),
        ("Large-scale rejection parameters ... ", &items.large_scale_parameters),
        ("Region of interest ................. ", &items.region_of_interest),
    ];
    let mut description = String::new();
    for (label, value) in rows {
        if value.is_empty() {
            continue;
        }
        if !description.is_empty() {
            description.push('\n');
        }
        description.push_str(label);
        description.push_str(value);
    }
    description
}
