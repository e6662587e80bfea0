//! Per-frame, per-channel weight estimation.

use tracing::debug;

use crate::config::{IntegrationConfig, WeightMode};
use crate::consts::EPSILON;
use crate::error::{DenebError, Result};
use crate::file::IntegrationFile;

/// Compute and store weights for every file. The reference frame anchors
/// the statistic-derived modes at weight 1.
pub fn compute_weights(
    files: &mut [IntegrationFile],
    reference: usize,
    config: &IntegrationConfig,
) -> Result<()> {
    let mode = config.weights.mode;
    let channels = files[reference].channels();
    let ref_stats = files[reference].stats().clone();

    for i in 0..files.len() {
        let mut weight = Vec::with_capacity(channels);
        for c in 0..channels {
            let w = match mode {
                WeightMode::Constant => 1.0,
                WeightMode::Exposure => {
                    let path = files[i].item().path.clone();
                    files[i].exposure().filter(|&e| e > 0.0).ok_or_else(|| {
                        DenebError::MissingKeyword {
                            keyword: "EXPTIME".into(),
                            path: path.display().to_string(),
                        }
                    })?
                }
                WeightMode::InverseNoise => {
                    let sigma = files[i].stats().noise[c];
                    let sigma_ref = ref_stats.noise[c];
                    if sigma < EPSILON || sigma_ref < EPSILON {
                        return Err(DenebError::Degenerate(format!(
                            "zero noise estimate in channel {c} of {}",
                            files[i].item().path.display()
                        )));
                    }
                    (sigma_ref * sigma_ref) / (sigma * sigma)
                }
                WeightMode::Signal => {
                    let v = files[i].stats().mean[c] - files[i].stats().location[c];
                    let v_ref = ref_stats.mean[c] - ref_stats.location[c];
                    normalized(v, v_ref, "signal", &files[i])?
                }
                WeightMode::Median => normalized(
                    files[i].stats().location[c],
                    ref_stats.location[c],
                    "median",
                    &files[i],
                )?,
                WeightMode::Mean => normalized(
                    files[i].stats().mean[c],
                    ref_stats.mean[c],
                    "mean",
                    &files[i],
                )?,
                WeightMode::Keyword => {
                    let keyword = config.weights.keyword.as_deref().unwrap_or("");
                    let path = files[i].item().path.clone();
                    files[i]
                        .keyword(keyword)
                        .filter(|&v| v > 0.0)
                        .ok_or_else(|| DenebError::MissingKeyword {
                            keyword: keyword.to_string(),
                            path: path.display().to_string(),
                        })?
                }
                WeightMode::PsfSignal => psf_weight(&files[i], c, |s| s.psf_signal.as_ref())?,
                WeightMode::PsfSnr => psf_weight(&files[i], c, |s| s.psf_snr.as_ref())?,
                WeightMode::PsfScaleSnr => {
                    if files[i].item().normalization_path.is_none() {
                        return Err(DenebError::Config(format!(
                            "PSF scale SNR weighting requires local normalization data for {}",
                            files[i].item().path.display()
                        )));
                    }
                    psf_weight(&files[i], c, |s| s.psf_scale_snr.as_ref())?
                }
            };
            weight.push(w.max(config.weights.min_weight));
        }
        debug!(index = i, weight = ?weight, "frame weight");
        files[i].set_weight(weight);
    }
    Ok(())
}

fn normalized(v: f64, v_ref: f64, what: &str, file: &IntegrationFile) -> Result<f64> {
    if v_ref.abs() < EPSILON {
        return Err(DenebError::Degenerate(format!(
            "reference {what} statistic is zero; cannot normalize weights"
        )));
    }
    if v <= 0.0 {
        return Err(DenebError::Degenerate(format!(
            "non-positive {what} statistic in {}",
            file.item().path.display()
        )));
    }
    Ok(v / v_ref)
}

fn psf_weight<'a>(
    file: &'a IntegrationFile,
    c: usize,
    select: impl Fn(&'a crate::cache::FrameStats) -> Option<&'a Vec<f64>>,
) -> Result<f64> {
    select(file.stats())
        .and_then(|v| v.get(c))
        .copied()
        .filter(|&w| w > 0.0)
        .ok_or_else(|| {
            DenebError::Config(format!(
                "no PSF weight data cached for {}; run the PSF measurement step first",
                file.item().path.display()
            ))
        })
}
