//! Export of integrated images to viewable formats.

use std::path::Path;

use image::{ImageFormat, Luma, Rgb};
use ndarray::Array3;

use crate::error::{DenebError, Result};

fn to_u16(v: f64) -> u16 {
    (v.clamp(0.0, 1.0) * 65535.0) as u16
}

/// Save an integrated image (planar (channels, height, width), values in
/// [0, 1]) as 16-bit grayscale or RGB TIFF.
pub fn save_tiff(pixels: &Array3<f64>, path: &Path) -> Result<()> {
    let (c, h, w) = pixels.dim();
    match c {
        1 => {
            let mut data: Vec<u16> = Vec::with_capacity(h * w);
            for row in 0..h {
                for col in 0..w {
                    data.push(to_u16(pixels[[0, row, col]]));
                }
            }
            let img = image::ImageBuffer::<Luma<u16>, Vec<u16>>::from_raw(w as u32, h as u32, data)
                .expect("buffer size matches dimensions");
            img.save(path)?;
        }
        3 => {
            let mut data: Vec<u16> = Vec::with_capacity(h * w * 3);
            for row in 0..h {
                for col in 0..w {
                    for ch in 0..3 {
                        data.push(to_u16(pixels[[ch, row, col]]));
                    }
                }
            }
            let img = image::ImageBuffer::<Rgb<u16>, Vec<u16>>::from_raw(w as u32, h as u32, data)
                .expect("buffer size matches dimensions");
            img.save(path)?;
        }
        _ => {
            return Err(DenebError::Input(format!(
                "cannot export {c}-channel image as TIFF"
            )));
        }
    }
    Ok(())
}

/// Save as 8-bit PNG (grayscale or RGB).
pub fn save_png(pixels: &Array3<f64>, path: &Path) -> Result<()> {
    let (c, h, w) = pixels.dim();
    match c {
        1 => {
            let mut img = image::GrayImage::new(w as u32, h as u32);
            for row in 0..h {
                for col in 0..w {
                    let v = (pixels[[0, row, col]].clamp(0.0, 1.0) * 255.0) as u8;
                    img.put_pixel(col as u32, row as u32, Luma([v]));
                }
            }
            img.save_with_format(path, ImageFormat::Png)?;
        }
        3 => {
            let mut img = image::RgbImage::new(w as u32, h as u32);
            for row in 0..h {
                for col in 0..w {
                    let px = [
                        (pixels[[0, row, col]].clamp(0.0, 1.0) * 255.0) as u8,
                        (pixels[[1, row, col]].clamp(0.0, 1.0) * 255.0) as u8,
                        (pixels[[2, row, col]].clamp(0.0, 1.0) * 255.0) as u8,
                    ];
                    img.put_pixel(col as u32, row as u32, Rgb(px));
                }
            }
            img.save_with_format(path, ImageFormat::Png)?;
        }
        _ => {
            return Err(DenebError::Input(format!(
                "cannot export {c}-channel image as PNG"
            )));
        }
    }
    Ok(())
}

/// Save choosing the format from the file extension.
pub fn save_image(pixels: &Array3<f64>, path: &Path) -> Result<()> {
    match path.extension().and_then(|e| e.to_str()) {
        Some("png") => save_png(pixels, path),
        _ => save_tiff(pixels, path),
    }
}
