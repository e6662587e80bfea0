use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Args, ValueEnum};
use indicatif::{ProgressBar, ProgressStyle};
use serde::Deserialize;
use tracing::info;

use deneb_core::config::{Combination, IntegrationConfig, Normalization, Rejection, WeightMode};
use deneb_core::engine::{CancelFlag, IntegrationEngine};
use deneb_core::file::FrameItem;
use deneb_core::io::export::save_image;
use deneb_core::output::{frame_report_table, totals_summary, OutputWriter};

use crate::summary;

#[derive(Clone, ValueEnum)]
pub enum CombinationArg {
    Mean,
    Median,
    Min,
    Max,
}

#[derive(Clone, ValueEnum)]
pub enum RejectionArg {
    None,
    Minmax,
    Percentile,
    Sigma,
    WinsorizedSigma,
    AveragedSigma,
    LinearFit,
    CcdNoise,
    Esd,
    Rcr,
}

#[derive(Clone, ValueEnum)]
pub enum NormalizationArg {
    None,
    Additive,
    Multiplicative,
    AdditiveScaling,
    MultiplicativeScaling,
    Local,
    Adaptive,
}

#[derive(Clone, ValueEnum)]
pub enum WeightArg {
    Constant,
    Exposure,
    InverseNoise,
    Signal,
    Median,
    Mean,
    PsfSignal,
    PsfSnr,
}

/// A TOML run file: frame list plus the full integration configuration.
#[derive(Deserialize)]
pub struct RunFile {
    #[serde(default)]
    pub output: Option<PathBuf>,
    #[serde(default)]
    pub frames: Vec<FrameItem>,
    #[serde(default)]
    pub integration: IntegrationConfig,
}

#[derive(Args)]
pub struct IntegrateArgs {
    /// Input frame containers (.dfc)
    pub files: Vec<PathBuf>,

    /// Run file (TOML) with frames and full configuration
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Output path for the integrated image
    #[arg(short, long, default_value = "integration.dfc")]
    pub output: PathBuf,

    /// Also export a preview image (PNG or TIFF by extension)
    #[arg(long)]
    pub preview: Option<PathBuf>,

    /// Pixel combination
    #[arg(long, value_enum, default_value = "mean")]
    pub combination: CombinationArg,

    /// Rejection algorithm
    #[arg(long, value_enum, default_value = "none")]
    pub rejection: RejectionArg,

    /// Output normalization
    #[arg(long, value_enum, default_value = "additive-scaling")]
    pub normalization: NormalizationArg,

    /// Frame weighting mode
    #[arg(long, value_enum, default_value = "inverse-noise")]
    pub weights: WeightArg,

    /// Low sigma clipping point, in sigma units
    #[arg(long, default_value = "4.0")]
    pub sigma_low: f64,

    /// High sigma clipping point, in sigma units
    #[arg(long, default_value = "3.0")]
    pub sigma_high: f64,

    /// Disable the frame statistics cache
    #[arg(long)]
    pub no_cache: bool,

    /// Worker threads (0 = all logical CPUs)
    #[arg(long, default_value = "0")]
    pub threads: usize,
}

fn build_from_args(args: &IntegrateArgs) -> (Vec<FrameItem>, IntegrationConfig) {
    let frames = args.files.iter().map(FrameItem::new).collect();
    let mut config = IntegrationConfig {
        combination: match args.combination {
            CombinationArg::Mean => Combination::Mean,
            CombinationArg::Median => Combination::Median,
            CombinationArg::Min => Combination::Minimum,
            CombinationArg::Max => Combination::Maximum,
        },
        rejection: match args.rejection {
            RejectionArg::None => Rejection::None,
            RejectionArg::Minmax => Rejection::MinMax,
            RejectionArg::Percentile => Rejection::Percentile,
            RejectionArg::Sigma => Rejection::Sigma,
            RejectionArg::WinsorizedSigma => Rejection::WinsorizedSigma,
            RejectionArg::AveragedSigma => Rejection::AveragedSigma,
            RejectionArg::LinearFit => Rejection::LinearFit,
            RejectionArg::CcdNoise => Rejection::CcdNoise,
            RejectionArg::Esd => Rejection::Esd,
            RejectionArg::Rcr => Rejection::Rcr,
        },
        output_normalization: match args.normalization {
            NormalizationArg::None => Normalization::None,
            NormalizationArg::Additive => Normalization::Additive,
            NormalizationArg::Multiplicative => Normalization::Multiplicative,
            NormalizationArg::AdditiveScaling => Normalization::AdditiveScaling,
            NormalizationArg::MultiplicativeScaling => Normalization::MultiplicativeScaling,
            NormalizationArg::Local => Normalization::Local,
            NormalizationArg::Adaptive => Normalization::Adaptive,
        },
        ..Default::default()
    };
    config.weights.mode = match args.weights {
        WeightArg::Constant => WeightMode::Constant,
        WeightArg::Exposure => WeightMode::Exposure,
        WeightArg::InverseNoise => WeightMode::InverseNoise,
        WeightArg::Signal => WeightMode::Signal,
        WeightArg::Median => WeightMode::Median,
        WeightArg::Mean => WeightMode::Mean,
        WeightArg::PsfSignal => WeightMode::PsfSignal,
        WeightArg::PsfSnr => WeightMode::PsfSnr,
    };
    config.rejection_params.sigma_low = args.sigma_low;
    config.rejection_params.sigma_high = args.sigma_high;
    config.use_cache = !args.no_cache;
    config.memory.file_threads = args.threads;
    (frames, config)
}

pub fn run(args: &IntegrateArgs) -> Result<()> {
    let (frames, config, output_path) = match &args.config {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("cannot read run file {}", path.display()))?;
            let run_file: RunFile = toml::from_str(&text)
                .with_context(|| format!("invalid run file {}", path.display()))?;
            let output = run_file.output.clone().unwrap_or_else(|| args.output.clone());
            (run_file.frames, run_file.integration, output)
        }
        None => {
            let (frames, config) = build_from_args(args);
            (frames, config, args.output.clone())
        }
    };
    if frames.is_empty() {
        bail!("no input frames given (pass files or --config)");
    }

    summary::print_run_summary(&config, frames.len());

    println!("Preparing {} frames...", frames.len());
    let engine = IntegrationEngine::open(frames, config.clone())?;

    let pb = ProgressBar::new(100);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("Integrating [{bar:40}] {pos}%")?
            .progress_chars("=> "),
    );
    let cancel = CancelFlag::new();
    let output = engine.run_reported(&cancel, &|done, total| {
        pb.set_position((done * 100 / total.max(1)) as u64);
    })?;
    pb.finish();
    info!(
        rejected_low = ?output.totals.total_rejected_low,
        rejected_high = ?output.totals.total_rejected_high,
        degenerate = output.totals.degenerate_stacks,
        "integration finished"
    );

    let written = OutputWriter::new(&output_path).write(&output, &config)?;
    for path in &written {
        println!("Wrote {}", path.display());
    }

    if let Some(preview) = &args.preview {
        if let Some(image) = &output.image {
            save_image(image, preview)?;
            println!("Wrote {}", preview.display());
        }
    }

    println!();
    print!("{}", frame_report_table(&output));
    println!();
    print!("{}", totals_summary(&output));
    Ok(())
}
