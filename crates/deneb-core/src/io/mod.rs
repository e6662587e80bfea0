pub mod dfc;
pub mod export;
pub mod memory;

use std::path::Path;

use crate::error::{DenebError, Result};

/// Reader over one input frame. Implementations must be shareable across
/// worker threads; row reads are internally positioned and stateless.
pub trait ImageSource: Send + Sync + std::fmt::Debug {
    fn width(&self) -> usize;
    fn height(&self) -> usize;
    fn channels(&self) -> usize;
    fn bits_per_sample(&self) -> u32;

    /// Exposure time in seconds, when declared by the container.
    fn exposure(&self) -> Option<f64> {
        self.keyword("EXPTIME").or_else(|| self.keyword("EXPOSURE"))
    }

    /// Pedestal in 16-bit data numbers, when declared by the container.
    fn pedestal(&self) -> Option<f64> {
        self.keyword("PEDESTAL")
    }

    /// Numeric header keyword lookup.
    fn keyword(&self, name: &str) -> Option<f64>;

    /// Stable digest of the underlying content; cache identity material.
    fn content_id(&self) -> [u8; 16];

    /// Fill `dst` with rows [y0, y1). Sample layout is channel-interleaved:
    /// `dst[((y - y0) * width + x) * channels + c]`.
    fn read_rows(&self, y0: usize, y1: usize, dst: &mut [f32]) -> Result<()>;

    fn sample_count(&self) -> usize {
        self.width() * self.height() * self.channels()
    }
}

/// Writer for one output image plus named properties.
pub trait ImageSink {
    fn allocate(
        &mut self,
        width: usize,
        height: usize,
        channels: usize,
        bits_per_sample: u32,
    ) -> Result<()>;

    /// Write consecutive rows starting at `y0`, channel-interleaved as in
    /// [`ImageSource::read_rows`].
    fn write_rows(&mut self, y0: usize, rows: &[f64]) -> Result<()>;

    fn set_property(&mut self, name: &str, value: &str) -> Result<()>;

    /// Flush everything to the backing store.
    fn finish(&mut self) -> Result<()>;
}

/// Open a frame container by path. Only the native container is
/// recognized; other formats come in through explicit conversion.
pub fn open_source(path: &Path) -> Result<Box<dyn ImageSource>> {
    match path.extension().and_then(|e| e.to_str()) {
        Some("dfc") => Ok(Box::new(dfc::DfcReader::open(path)?)),
        _ => Err(DenebError::Input(format!(
            "unsupported input container: {}",
            path.display()
        ))),
    }
}
