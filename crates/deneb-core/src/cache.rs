//! Persistent, content-addressed store of per-frame derived statistics.
//!
//! One binary record per frame identity, written atomically. The cache is
//! advisory: every failure (missing, corrupt, version mismatch, I/O) reads
//! as a miss and the engine recomputes. Nothing here ever aborts a run.

use std::fs::{self, File};
use std::io::{BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use tracing::{debug, warn};

use crate::noise::NoiseEstimator;
use crate::stats::{ScaleEstimator, TwoSided};

const CACHE_MAGIC: &[u8; 4] = b"DNBC";
const CACHE_VERSION: u32 = 1;

/// Stable 128-bit identity of one input frame: content digest of the image
/// file plus its companion paths plus every setting that changes the cached
/// statistics.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct FrameId([u8; 16]);

impl FrameId {
    pub fn compute(
        content_id: [u8; 16],
        normalization_path: Option<&Path>,
        drizzle_path: Option<&Path>,
        key: &StatsKey,
    ) -> Self {
        let mut hasher = blake3::Hasher::new();
        hasher.update(&content_id);
        if let Some(p) = normalization_path {
            hasher.update(p.to_string_lossy().as_bytes());
        }
        hasher.update(&[0u8]);
        if let Some(p) = drizzle_path {
            hasher.update(p.to_string_lossy().as_bytes());
        }
        hasher.update(&[0u8]);
        hasher.update(&key.digest_material());
        let mut id = [0u8; 16];
        id.copy_from_slice(&hasher.finalize().as_bytes()[..16]);
        Self(id)
    }

    pub fn to_hex(&self) -> String {
        self.0.iter().map(|b| format!("{b:02x}")).collect()
    }
}

/// Settings that participate in the frame identity because they change the
/// derived statistics.
#[derive(Clone, Copy, Debug)]
pub struct StatsKey {
    pub scale_estimator: ScaleEstimator,
    pub noise_estimator: NoiseEstimator,
    /// 0 when adaptive grids are not requested.
    pub adaptive_grid: u32,
    pub subtract_pedestal: bool,
}

impl StatsKey {
    fn digest_material(&self) -> [u8; 7] {
        let scale = match self.scale_estimator {
            ScaleEstimator::AvgAbsDev => 0u8,
            ScaleEstimator::Mad => 1,
            ScaleEstimator::BiweightMidvariance => 2,
        };
        let noise = match self.noise_estimator {
            NoiseEstimator::KSigma => 0u8,
            NoiseEstimator::Mrs => 1,
            NoiseEstimator::NStar => 2,
        };
        let g = self.adaptive_grid.to_le_bytes();
        [scale, noise, g[0], g[1], g[2], g[3], self.subtract_pedestal as u8]
    }
}

/// Adaptive normalization grids: G x G cell statistics per channel,
/// row-major over cells.
#[derive(Clone, Debug, PartialEq)]
pub struct AdaptiveGrid {
    pub grid: usize,
    pub location: Vec<Vec<f64>>,
    pub scale_low: Vec<Vec<f64>>,
    pub scale_high: Vec<Vec<f64>>,
}

/// Everything derived from one frame that is expensive enough to persist.
#[derive(Clone, Debug, PartialEq, Default)]
pub struct FrameStats {
    pub width: usize,
    pub height: usize,
    pub channels: usize,
    pub location: Vec<f64>,
    pub scale: Vec<TwoSided>,
    pub noise: Vec<f64>,
    pub noise_fraction: Vec<f64>,
    pub mean: Vec<f64>,
    pub adaptive: Option<AdaptiveGrid>,
    pub psf_signal: Option<Vec<f64>>,
    pub psf_snr: Option<Vec<f64>>,
    pub psf_scale_snr: Option<Vec<f64>>,
}

pub struct FileCache {
    dir: PathBuf,
}

impl FileCache {
    /// Open (creating the directory if needed). Returns `None` when the
    /// directory cannot be created; the engine then runs uncached.
    pub fn open(dir: &Path) -> Option<Self> {
        if let Err(e) = fs::create_dir_all(dir) {
            warn!(dir = %dir.display(), error = %e, "cannot create cache directory");
            return None;
        }
        Some(Self {
            dir: dir.to_path_buf(),
        })
    }

    fn entry_path(&self, id: &FrameId) -> PathBuf {
        self.dir.join(format!("{}.dnbc", id.to_hex()))
    }

    pub fn get(&self, id: &FrameId) -> Option<FrameStats> {
        let path = self.entry_path(id);
        let mut bytes = Vec::new();
        File::open(&path).ok()?.read_to_end(&mut bytes).ok()?;
        match decode(&bytes) {
            Some(stats) => {
                debug!(id = %id.to_hex(), "cache hit");
                Some(stats)
            }
            None => {
                debug!(id = %id.to_hex(), "discarding unreadable cache entry");
                None
            }
        }
    }

    /// Atomic overwrite: encode to a sibling temp file, then rename.
    /// Failures are logged and swallowed.
    pub fn put(&self, id: &FrameId, stats: &FrameStats) {
        let path = self.entry_path(id);
        let tmp = path.with_extension("tmp");
        let result = (|| -> std::io::Result<()> {
            let mut out = BufWriter::new(File::create(&tmp)?);
            encode(&mut out, stats)?;
            out.flush()?;
            drop(out);
            fs::rename(&tmp, &path)
        })();
        if let Err(e) = result {
            warn!(id = %id.to_hex(), error = %e, "cache write failed");
            let _ = fs::remove_file(&tmp);
        }
    }

    /// Remove every cache entry. Returns the number of removed files.
    pub fn clear(&self) -> std::io::Result<usize> {
        let mut removed = 0;
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            if entry.path().extension().and_then(|e| e.to_str()) == Some("dnbc") {
                fs::remove_file(entry.path())?;
                removed += 1;
            }
        }
        Ok(removed)
    }

    pub fn entry_count(&self) -> usize {
        fs::read_dir(&self.dir)
            .map(|rd| {
                rd.filter_map(|e| e.ok())
                    .filter(|e| e.path().extension().and_then(|x| x.to_str()) == Some("dnbc"))
                    .count()
            })
            .unwrap_or(0)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

fn write_vec<W: Write>(out: &mut W, v: &[f64]) -> std::io::Result<()> {
    out.write_u32::<LittleEndian>(v.len() as u32)?;
    for &x in v {
        out.write_f64::<LittleEndian>(x)?;
    }
    Ok(())
}

fn write_opt_vec<W: Write>(out: &mut W, v: &Option<Vec<f64>>) -> std::io::Result<()> {
    match v {
        Some(v) => {
            out.write_u8(1)?;
            write_vec(out, v)
        }
        None => out.write_u8(0),
    }
}

fn encode<W: Write>(out: &mut W, stats: &FrameStats) -> std::io::Result<()> {
    out.write_all(CACHE_MAGIC)?;
    out.write_u32::<LittleEndian>(CACHE_VERSION)?;
    out.write_u32::<LittleEndian>(stats.width as u32)?;
    out.write_u32::<LittleEndian>(stats.height as u32)?;
    out.write_u32::<LittleEndian>(stats.channels as u32)?;
    write_vec(out, &stats.location)?;
    out.write_u32::<LittleEndian>(stats.scale.len() as u32)?;
    for s in &stats.scale {
        out.write_f64::<LittleEndian>(s.low)?;
        out.write_f64::<LittleEndian>(s.high)?;
    }
    write_vec(out, &stats.noise)?;
    write_vec(out, &stats.noise_fraction)?;
    write_vec(out, &stats.mean)?;
    match &stats.adaptive {
        Some(grid) => {
            out.write_u8(1)?;
            out.write_u32::<LittleEndian>(grid.grid as u32)?;
            out.write_u32::<LittleEndian>(grid.location.len() as u32)?;
            for c in 0..grid.location.len() {
                write_vec(out, &grid.location[c])?;
                write_vec(out, &grid.scale_low[c])?;
                write_vec(out, &grid.scale_high[c])?;
            }
        }
        None => out.write_u8(0)?,
    }
    write_opt_vec(out, &stats.psf_signal)?;
    write_opt_vec(out, &stats.psf_snr)?;
    write_opt_vec(out, &stats.psf_scale_snr)?;
    Ok(())
}

fn read_vec(cursor: &mut std::io::Cursor<&[u8]>) -> Option<Vec<f64>> {
    let len = cursor.read_u32::<LittleEndian>().ok()? as usize;
    if len > 1 << 24 {
        return None;
    }
    let mut v = Vec::with_capacity(len);
    for _ in 0..len {
        v.push(cursor.read_f64::<LittleEndian>().ok()?);
    }
    Some(v)
}

fn read_opt_vec(cursor: &mut std::io::Cursor<&[u8]>) -> Option<Option<Vec<f64>>> {
    match cursor.read_u8().ok()? {
        0 => Some(None),
        1 => Some(Some(read_vec(cursor)?)),
        _ => None,
    }
}

fn decode(bytes: &[u8]) -> Option<FrameStats> {
    if bytes.len() < 8 || &bytes[..4] != CACHE_MAGIC {
        return None;
    }
    let mut cursor = std::io::Cursor::new(&bytes[4..]);
    if cursor.read_u32::<LittleEndian>().ok()? != CACHE_VERSION {
        return None;
    }
    let width = cursor.read_u32::<LittleEndian>().ok()? as usize;
    let height = cursor.read_u32::<LittleEndian>().ok()? as usize;
    let channels = cursor.read_u32::<LittleEndian>().ok()? as usize;
    let location = read_vec(&mut cursor)?;
    let scale_len = cursor.read_u32::<LittleEndian>().ok()? as usize;
    if scale_len > 1 << 16 {
        return None;
    }
    let mut scale = Vec::with_capacity(scale_len);
    for _ in 0..scale_len {
        let low = cursor.read_f64::<LittleEndian>().ok()?;
        let high = cursor.read_f64::<LittleEndian>().ok()?;
        scale.push(TwoSided { low, high });
    }
    let noise = read_vec(&mut cursor)?;
    let noise_fraction = read_vec(&mut cursor)?;
    let mean = read_vec(&mut cursor)?;
    let adaptive = match cursor.read_u8().ok()? {
        0 => None,
        1 => {
            let grid = cursor.read_u32::<LittleEndian>().ok()? as usize;
            let nch = cursor.read_u32::<LittleEndian>().ok()? as usize;
            if nch > 1 << 8 {
                return None;
            }
            let mut location = Vec::with_capacity(nch);
            let mut scale_low = Vec::with_capacity(nch);
            let mut scale_high = Vec::with_capacity(nch);
            for _ in 0..nch {
                location.push(read_vec(&mut cursor)?);
                scale_low.push(read_vec(&mut cursor)?);
                scale_high.push(read_vec(&mut cursor)?);
            }
            Some(AdaptiveGrid {
                grid,
                location,
                scale_low,
                scale_high,
            })
        }
        _ => return None,
    };
    let psf_signal = read_opt_vec(&mut cursor)?;
    let psf_snr = read_opt_vec(&mut cursor)?;
    let psf_scale_snr = read_opt_vec(&mut cursor)?;

    if location.len() != channels || scale.len() != channels || noise.len() != channels {
        return None;
    }
    Some(FrameStats {
        width,
        height,
        channels,
        location,
        scale,
        noise,
        noise_fraction,
        mean,
        adaptive,
        psf_signal,
        psf_snr,
        psf_scale_snr,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_stats() -> FrameStats {
        FrameStats {
            width: 64,
            height: 32,
            channels: 1,
            location: vec![0.25],
            scale: vec![TwoSided { low: 0.01, high: 0.02 }],
            noise: vec![0.001],
            noise_fraction: vec![0.9],
            mean: vec![0.26],
            adaptive: Some(AdaptiveGrid {
                grid: 2,
                location: vec![vec![0.2, 0.25, 0.3, 0.25]],
                scale_low: vec![vec![0.01; 4]],
                scale_high: vec![vec![0.02; 4]],
            }),
            psf_signal: Some(vec![1.5]),
            psf_snr: None,
            psf_scale_snr: None,
        }
    }

    #[test]
    fn record_round_trips_bitwise() {
        let stats = sample_stats();
        let mut bytes = Vec::new();
        encode(&mut bytes, &stats).unwrap();
        let decoded = decode(&bytes).unwrap();
        assert_eq!(decoded, stats);
    }

    #[test]
    fn corrupt_record_is_a_miss() {
        let stats = sample_stats();
        let mut bytes = Vec::new();
        encode(&mut bytes, &stats).unwrap();
        bytes[0] = b'X';
        assert!(decode(&bytes).is_none());
        let mut short = Vec::new();
        encode(&mut short, &stats).unwrap();
        short.truncate(short.len() / 2);
        assert!(decode(&short).is_none());
    }

    #[test]
    fn stats_key_changes_identity() {
        let base = StatsKey {
            scale_estimator: ScaleEstimator::BiweightMidvariance,
            noise_estimator: NoiseEstimator::Mrs,
            adaptive_grid: 0,
            subtract_pedestal: true,
        };
        let other = StatsKey {
            scale_estimator: ScaleEstimator::Mad,
            ..base
        };
        let content = [7u8; 16];
        assert_ne!(
            FrameId::compute(content, None, None, &base),
            FrameId::compute(content, None, None, &other)
        );
    }
}
