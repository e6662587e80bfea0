//! In-memory source and sink, for tests and for embedding the engine
//! without touching the filesystem.

use crate::error::{DenebError, Result};
use crate::io::{ImageSink, ImageSource};

#[derive(Clone, Debug)]
pub struct MemorySource {
    width: usize,
    height: usize,
    channels: usize,
    keywords: Vec<(String, f64)>,
    samples: Vec<f32>,
}

impl MemorySource {
    pub fn new(width: usize, height: usize, channels: usize, samples: Vec<f32>) -> Self {
        assert_eq!(samples.len(), width * height * channels);
        Self {
            width,
            height,
            channels,
            keywords: Vec::new(),
            samples,
        }
    }

    /// Single-channel frame from a closure over (x, y).
    pub fn from_fn(width: usize, height: usize, f: impl Fn(usize, usize) -> f32) -> Self {
        let mut samples = Vec::with_capacity(width * height);
        for y in 0..height {
            for x in 0..width {
                samples.push(f(x, y));
            }
        }
        Self::new(width, height, 1, samples)
    }

    pub fn with_keyword(mut self, name: &str, value: f64) -> Self {
        self.keywords.push((name.to_string(), value));
        self
    }
}

impl ImageSource for MemorySource {
    fn width(&self) -> usize {
        self.width
    }

    fn height(&self) -> usize {
        self.height
    }

    fn channels(&self) -> usize {
        self.channels
    }

    fn bits_per_sample(&self) -> u32 {
        32
    }

    fn keyword(&self, name: &str) -> Option<f64> {
        self.keywords
            .iter()
            .find(|(k, _)| k == name)
            .map(|&(_, v)| v)
    }

    fn content_id(&self) -> [u8; 16] {
        let mut hasher = blake3::Hasher::new();
        hasher.update(&(self.width as u64).to_le_bytes());
        hasher.update(&(self.height as u64).to_le_bytes());
        hasher.update(&(self.channels as u64).to_le_bytes());
        for &s in &self.samples {
            hasher.update(&s.to_le_bytes());
        }
        let mut id = [0u8; 16];
        id.copy_from_slice(&hasher.finalize().as_bytes()[..16]);
        id
    }

    fn read_rows(&self, y0: usize, y1: usize, dst: &mut [f32]) -> Result<()> {
        let row_len = self.width * self.channels;
        if y1 > self.height || y0 > y1 {
            return Err(DenebError::Input(format!(
                "row range [{y0}, {y1}) out of bounds (height {})",
                self.height
            )));
        }
        if dst.len() != (y1 - y0) * row_len {
            return Err(DenebError::Input(format!(
                "row destination has {} samples, expected {}",
                dst.len(),
                (y1 - y0) * row_len
            )));
        }
        dst.copy_from_slice(&self.samples[y0 * row_len..y1 * row_len]);
        Ok(())
    }
}

#[derive(Default)]
pub struct MemorySink {
    pub width: usize,
    pub height: usize,
    pub channels: usize,
    pub bits_per_sample: u32,
    pub samples: Vec<f64>,
    pub properties: Vec<(String, String)>,
}

impl ImageSink for MemorySink {
    fn allocate(
        &mut self,
        width: usize,
        height: usize,
        channels: usize,
        bits_per_sample: u32,
    ) -> Result<()> {
        self.width = width;
        self.height = height;
        self.channels = channels;
        self.bits_per_sample = bits_per_sample;
        self.samples = vec![0.0; width * height * channels];
        Ok(())
    }

    fn write_rows(&mut self, y0: usize, rows: &[f64]) -> Result<()> {
        let row_len = self.width * self.channels;
        let start = y0 * row_len;
        if start + rows.len() > self.samples.len() {
            return Err(DenebError::Input("row write out of bounds".into()));
        }
        self.samples[start..start + rows.len()].copy_from_slice(rows);
        Ok(())
    }

    fn set_property(&mut self, name: &str, value: &str) -> Result<()> {
        self.properties.push((name.to_string(), value.to_string()));
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        Ok(())
    }
}
