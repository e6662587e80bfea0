//! Output assembly: integrated image, rejection maps, slope map, drizzle
//! records, and the per-frame report.

use std::fmt::Write as _;
use std::fs::OpenOptions;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use byteorder::{LittleEndian, WriteBytesExt};
use ndarray::Array3;
use tracing::info;

use crate::config::IntegrationConfig;
use crate::describe::integration_description;
use crate::engine::IntegrationOutput;
use crate::error::Result;
use crate::io::dfc::DfcSink;
use crate::io::ImageSink;

const DRIZZLE_MAGIC: &[u8; 4] = b"DNRJ";
const DRIZZLE_VERSION: u32 = 1;

/// Write a planar f64 image through a sink.
fn write_image(
    sink: &mut dyn ImageSink,
    image: &Array3<f64>,
    bits_per_sample: u32,
) -> Result<()> {
    let (channels, height, width) = image.dim();
    sink.allocate(width, height, channels, bits_per_sample)?;
    let mut row = vec![0.0f64; width * channels];
    for y in 0..height {
        for x in 0..width {
            for c in 0..channels {
                row[x * channels + c] = image[[c, y, x]];
            }
        }
        sink.write_rows(y, &row)?;
    }
    Ok(())
}

fn write_map(sink: &mut dyn ImageSink, map: &Array3<f32>) -> Result<()> {
    let (channels, height, width) = map.dim();
    sink.allocate(width, height, channels, 32)?;
    let mut row = vec![0.0f64; width * channels];
    for y in 0..height {
        for x in 0..width {
            for c in 0..channels {
                row[x * channels + c] = map[[c, y, x]] as f64;
            }
        }
        sink.write_rows(y, &row)?;
    }
    Ok(())
}

/// Per-frame report table: index, enabled flag, weights and rejection
/// counts per channel, path.
pub fn frame_report_table(output: &IntegrationOutput) -> String {
    let mut table = String::new();
    let _ = writeln!(
        table,
        "{:>4}  {:<8} {:<20} {:<16} {:<16} path",
        "idx", "enabled", "weight", "rejected_low", "rejected_high"
    );
    for (i, frame) in output.frames.iter().enumerate() {
        let weight = frame
            .weight
            .iter()
            .map(|w| format!("{w:.4}"))
            .collect::<Vec<_>>()
            .join("/");
        let low = frame
            .rejected_low
            .iter()
            .map(|v| v.to_string())
            .collect::<Vec<_>>()
            .join("/");
        let high = frame
            .rejected_high
            .iter()
            .map(|v| v.to_string())
            .collect::<Vec<_>>()
            .join("/");
        let _ = writeln!(
            table,
            "{:>4}  {:<8} {:<20} {:<16} {:<16} {}",
            i,
            if frame.enabled { "yes" } else { "no" },
            weight,
            low,
            high,
            frame.path.display()
        );
    }
    table
}

/// Summary of the run-level estimates.
pub fn totals_summary(output: &IntegrationOutput) -> String {
    let t = &output.totals;
    let mut text = String::new();
    let _ = writeln!(
        text,
        "output range ........ [{:.6}, {:.6}]",
        t.output_range_low, t.output_range_high
    );
    for c in 0..output.channels {
        let _ = writeln!(
            text,
            "channel {c}: location={:.6} scale={:.6e} noise={:.6e} snr_incr={:.3}",
            t.final_location[c], t.final_scale[c], t.final_noise[c], t.reference_snr_increment[c]
        );
    }
    let _ = writeln!(text, "degenerate stacks ... {}", t.degenerate_stacks);
    text
}

/// File-based output writer: one integrated image plus companions next to
/// it, named by suffix.
pub struct OutputWriter {
    base: PathBuf,
}

impl OutputWriter {
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self { base: base.into() }
    }

    fn companion(&self, suffix: &str) -> PathBuf {
        let stem = self
            .base
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "integration".into());
        self.base.with_file_name(format!("{stem}_{suffix}.dfc"))
    }

    /// Write everything the configuration asks for. Returns the list of
    /// files written.
    pub fn write(
        &self,
        output: &IntegrationOutput,
        config: &IntegrationConfig,
    ) -> Result<Vec<PathBuf>> {
        let mut written = Vec::new();

        if let Some(image) = &output.image {
            let bits = if config.output.generate_64bit { 64 } else { 32 };
            let mut sink = DfcSink::create(&self.base);
            write_image(&mut sink, image, bits)?;
            sink.set_property("DENEB:DESCRIPTION", &integration_description(config))?;
            sink.set_property("DENEB:FRAMES", &frame_report_table(output))?;
            sink.set_property("DENEB:SUMMARY", &totals_summary(output))?;
            sink.finish()?;
            info!(path = %self.base.display(), "integrated image written");
            written.push(self.base.clone());
        }

        if let Some(map) = &output.rejection_low {
            let path = self.companion("rejection_low");
            let mut sink = DfcSink::create(&path);
            write_map(&mut sink, map)?;
            sink.finish()?;
            written.push(path);
        }
        if let Some(map) = &output.rejection_high {
            let path = self.companion("rejection_high");
            let mut sink = DfcSink::create(&path);
            write_map(&mut sink, map)?;
            sink.finish()?;
            written.push(path);
        }
        if let Some(map) = &output.slope_map {
            let path = self.companion("slope");
            let mut sink = DfcSink::create(&path);
            write_map(&mut sink, map)?;
            sink.finish()?;
            written.push(path);
        }

        if config.output.drizzle_data {
            for (frame, records) in output.frames.iter().zip(output.drizzle.iter()) {
                if !frame.enabled {
                    continue;
                }
                if let Some(drz) = &frame.drizzle_path {
                    append_drizzle_records(drz, &frame.weight, records)?;
                    written.push(drz.clone());
                }
            }
        }

        Ok(written)
    }
}

/// Append one weight + rejection record to a drizzle data file.
pub fn append_drizzle_records(
    path: &Path,
    weight: &[f64],
    records: &[crate::engine::DrizzleRejection],
) -> Result<()> {
    let file = OpenOptions::new().create(true).append(true).open(path)?;
    let mut out = BufWriter::new(file);
    out.write_all(DRIZZLE_MAGIC)?;
    out.write_u32::<LittleEndian>(DRIZZLE_VERSION)?;
    out.write_u32::<LittleEndian>(weight.len() as u32)?;
    for &w in weight {
        out.write_f64::<LittleEndian>(w)?;
    }
    out.write_u32::<LittleEndian>(records.len() as u32)?;
    for r in records {
        out.write_u32::<LittleEndian>(r.x)?;
        out.write_u32::<LittleEndian>(r.y)?;
        out.write_u8(r.channel)?;
        out.write_u8(r.high as u8)?;
    }
    out.flush()?;
    Ok(())
}
