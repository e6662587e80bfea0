//! DFC: the native frame container.
//!
//! A minimal self-describing binary layout: fixed header, a numeric
//! keyword table, then raw little-endian floating point samples in
//! channel-interleaved row-major order. Readers memory-map the file and
//! copy rows on demand.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use memmap2::Mmap;

use crate::error::{DenebError, Result};
use crate::io::{ImageSink, ImageSource};

const DFC_MAGIC: &[u8; 4] = b"DNBF";
const DFC_VERSION: u32 = 1;
const FIXED_HEADER_SIZE: usize = 4 + 4 + 4 + 4 + 4 + 4 + 4;
/// Optional trailer after the sample data: named text properties.
const PROPERTY_MAGIC: &[u8; 4] = b"DNBP";

#[derive(Clone, Debug)]
pub struct DfcHeader {
    pub width: usize,
    pub height: usize,
    pub channels: usize,
    pub bits_per_sample: u32,
    pub keywords: Vec<(String, f64)>,
}

impl DfcHeader {
    fn bytes_per_sample(&self) -> usize {
        if self.bits_per_sample == 64 { 8 } else { 4 }
    }
}

/// Memory-mapped DFC reader.
#[derive(Debug)]
pub struct DfcReader {
    mmap: Mmap,
    header: DfcHeader,
    data_offset: usize,
    digest: [u8; 16],
}

impl DfcReader {
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        let mmap = unsafe { Mmap::map(&file)? };

        if mmap.len() < FIXED_HEADER_SIZE {
            return Err(DenebError::InvalidContainer(format!(
                "{}: file too small for DFC header",
                path.display()
            )));
        }
        if &mmap[0..4] != DFC_MAGIC {
            return Err(DenebError::InvalidContainer(format!(
                "{}: missing DNBF magic",
                path.display()
            )));
        }

        let mut cursor = std::io::Cursor::new(&mmap[4..]);
        let version = cursor.read_u32::<LittleEndian>()?;
        if version != DFC_VERSION {
            return Err(DenebError::InvalidContainer(format!(
                "{}: unsupported DFC version {version}",
                path.display()
            )));
        }
        let width = cursor.read_u32::<LittleEndian>()? as usize;
        let height = cursor.read_u32::<LittleEndian>()? as usize;
        let channels = cursor.read_u32::<LittleEndian>()? as usize;
        let bits_per_sample = cursor.read_u32::<LittleEndian>()?;
        let keyword_count = cursor.read_u32::<LittleEndian>()? as usize;

        if width == 0 || height == 0 {
            return Err(DenebError::InvalidDimensions { width, height });
        }
        if channels == 0 {
            return Err(DenebError::InvalidContainer(format!(
                "{}: zero channels",
                path.display()
            )));
        }
        if bits_per_sample != 32 && bits_per_sample != 64 {
            return Err(DenebError::InvalidContainer(format!(
                "{}: unsupported sample width {bits_per_sample}",
                path.display()
            )));
        }

        let mut keywords = Vec::with_capacity(keyword_count);
        for _ in 0..keyword_count {
            let name_len = cursor.read_u16::<LittleEndian>()? as usize;
            // cursor runs over mmap[4..]; translate to an absolute offset.
            let start = 4 + cursor.position() as usize;
            let end = start + name_len;
            if end > mmap.len() {
                return Err(DenebError::InvalidContainer(format!(
                    "{}: truncated keyword table",
                    path.display()
                )));
            }
            let name = String::from_utf8_lossy(&mmap[start..end]).into_owned();
            cursor.set_position(cursor.position() + name_len as u64);
            let value = cursor.read_f64::<LittleEndian>()?;
            keywords.push((name, value));
        }

        let header = DfcHeader {
            width,
            height,
            channels,
            bits_per_sample,
            keywords,
        };

        let data_offset = 4 + cursor.position() as usize;
        let expected = data_offset + width * height * channels * header.bytes_per_sample();
        if mmap.len() < expected {
            return Err(DenebError::InvalidContainer(format!(
                "{}: truncated, expected at least {} bytes, got {}",
                path.display(),
                expected,
                mmap.len()
            )));
        }

        let hash = blake3::hash(&mmap);
        let mut digest = [0u8; 16];
        digest.copy_from_slice(&hash.as_bytes()[..16]);

        Ok(Self {
            mmap,
            header,
            data_offset,
            digest,
        })
    }

    pub fn header(&self) -> &DfcHeader {
        &self.header
    }

    /// Text properties from the optional trailer, empty when absent or
    /// unreadable.
    pub fn text_properties(&self) -> Vec<(String, String)> {
        let data_end = self.data_offset
            + self.header.width
                * self.header.height
                * self.header.channels
                * self.header.bytes_per_sample();
        let Some(trailer) = self.mmap.get(data_end..) else {
            return Vec::new();
        };
        parse_text_properties(trailer).unwrap_or_default()
    }
}

fn parse_text_properties(trailer: &[u8]) -> Option<Vec<(String, String)>> {
    if trailer.len() < 8 || &trailer[..4] != PROPERTY_MAGIC {
        return None;
    }
    let mut cursor = std::io::Cursor::new(&trailer[4..]);
    let count = cursor.read_u32::<LittleEndian>().ok()? as usize;
    if count > 1 << 16 {
        return None;
    }
    let mut properties = Vec::with_capacity(count);
    for _ in 0..count {
        let name_len = cursor.read_u16::<LittleEndian>().ok()? as usize;
        let start = 4 + cursor.position() as usize;
        let name = String::from_utf8_lossy(trailer.get(start..start + name_len)?).into_owned();
        cursor.set_position(cursor.position() + name_len as u64);
        let value_len = cursor.read_u32::<LittleEndian>().ok()? as usize;
        let start = 4 + cursor.position() as usize;
        let value = String::from_utf8_lossy(trailer.get(start..start + value_len)?).into_owned();
        cursor.set_position(cursor.position() + value_len as u64);
        properties.push((name, value));
    }
    Some(properties)
}

impl ImageSource for DfcReader {
    fn width(&self) -> usize {
        self.header.width
    }

    fn height(&self) -> usize {
        self.header.height
    }

    fn channels(&self) -> usize {
        self.header.channels
    }

    fn bits_per_sample(&self) -> u32 {
        self.header.bits_per_sample
    }

    fn keyword(&self, name: &str) -> Option<f64> {
        self.header
            .keywords
            .iter()
            .find(|(k, _)| k == name)
            .map(|&(_, v)| v)
    }

    fn content_id(&self) -> [u8; 16] {
        self.digest
    }

    fn read_rows(&self, y0: usize, y1: usize, dst: &mut [f32]) -> Result<()> {
        let row_len = self.header.width * self.header.channels;
        if y1 > self.header.height || y0 > y1 {
            return Err(DenebError::Input(format!(
                "row range [{y0}, {y1}) out of bounds (height {})",
                self.header.height
            )));
        }
        if dst.len() != (y1 - y0) * row_len {
            return Err(DenebError::Input(format!(
                "row destination has {} samples, expected {}",
                dst.len(),
                (y1 - y0) * row_len
            )));
        }
        let bps = self.header.bytes_per_sample();
        let start = self.data_offset + y0 * row_len * bps;
        let bytes = &self.mmap[start..start + (y1 - y0) * row_len * bps];
        if bps == 4 {
            for (out, chunk) in dst.iter_mut().zip(bytes.chunks_exact(4)) {
                *out = f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
            }
        } else {
            for (out, chunk) in dst.iter_mut().zip(bytes.chunks_exact(8)) {
                let mut buf = [0u8; 8];
                buf.copy_from_slice(chunk);
                *out = f64::from_le_bytes(buf) as f32;
            }
        }
        Ok(())
    }
}

fn write_header<W: Write>(out: &mut W, header: &DfcHeader) -> Result<()> {
    out.write_all(DFC_MAGIC)?;
    out.write_u32::<LittleEndian>(DFC_VERSION)?;
    out.write_u32::<LittleEndian>(header.width as u32)?;
    out.write_u32::<LittleEndian>(header.height as u32)?;
    out.write_u32::<LittleEndian>(header.channels as u32)?;
    out.write_u32::<LittleEndian>(header.bits_per_sample)?;
    out.write_u32::<LittleEndian>(header.keywords.len() as u32)?;
    for (name, value) in &header.keywords {
        out.write_u16::<LittleEndian>(name.len() as u16)?;
        out.write_all(name.as_bytes())?;
        out.write_f64::<LittleEndian>(*value)?;
    }
    Ok(())
}

/// Write a complete 32-bit frame in one call. Test fixtures and format
/// conversion both go through here.
pub fn write_frame(
    path: &Path,
    width: usize,
    height: usize,
    channels: usize,
    keywords: &[(String, f64)],
    samples: &[f32],
) -> Result<()> {
    if samples.len() != width * height * channels {
        return Err(DenebError::Input(format!(
            "sample buffer has {} entries, expected {}",
            samples.len(),
            width * height * channels
        )));
    }
    let header = DfcHeader {
        width,
        height,
        channels,
        bits_per_sample: 32,
        keywords: keywords.to_vec(),
    };
    let mut out = BufWriter::new(File::create(path)?);
    write_header(&mut out, &header)?;
    for &s in samples {
        out.write_f32::<LittleEndian>(s)?;
    }
    out.flush()?;
    Ok(())
}

/// Streaming DFC sink: rows are buffered and the file is written on
/// [`ImageSink::finish`].
pub struct DfcSink {
    path: std::path::PathBuf,
    header: Option<DfcHeader>,
    samples: Vec<f64>,
    properties: Vec<(String, String)>,
}

impl DfcSink {
    pub fn create(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
            header: None,
            samples: Vec::new(),
            properties: Vec::new(),
        }
    }

    pub fn properties(&self) -> &[(String, String)] {
        &self.properties
    }
}

impl ImageSink for DfcSink {
    fn allocate(
        &mut self,
        width: usize,
        height: usize,
        channels: usize,
        bits_per_sample: u32,
    ) -> Result<()> {
        self.header = Some(DfcHeader {
            width,
            height,
            channels,
            bits_per_sample,
            keywords: Vec::new(),
        });
        self.samples = vec![0.0; width * height * channels];
        Ok(())
    }

    fn write_rows(&mut self, y0: usize, rows: &[f64]) -> Result<()> {
        let header = self
            .header
            .as_ref()
            .ok_or_else(|| DenebError::Input("sink not allocated".into()))?;
        let row_len = header.width * header.channels;
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
        let header = self
            .header
            .as_ref()
            .ok_or_else(|| DenebError::Input("sink not allocated".into()))?;
        let mut out = BufWriter::new(File::create(&self.path)?);
        write_header(&mut out, header)?;
        if header.bits_per_sample == 64 {
            for &s in &self.samples {
                out.write_f64::<LittleEndian>(s)?;
            }
        } else {
            for &s in &self.samples {
                out.write_f32::<LittleEndian>(s as f32)?;
            }
        }
        if !self.properties.is_empty() {
            out.write_all(PROPERTY_MAGIC)?;
            out.write_u32::<LittleEndian>(self.properties.len() as u32)?;
            for (name, value) in &self.properties {
                out.write_u16::<LittleEndian>(name.len() as u16)?;
                out.write_all(name.as_bytes())?;
                out.write_u32::<LittleEndian>(value.len() as u32)?;
                out.write_all(value.as_bytes())?;
            }
        }
        out.flush()?;
        Ok(())
    }
}
