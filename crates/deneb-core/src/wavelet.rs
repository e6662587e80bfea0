//! Stationary (a-trous) wavelet decomposition with the B3 spline kernel.
//!
//! Shared by the noise estimators and the large-scale rejection stage. The
//! transform is non-decimated: every level has the geometry of the input,
//! and the input equals the sum of all detail layers plus the residual.

use ndarray::Array2;

use crate::consts::B3_KERNEL;

/// Mirror boundary handling: reflect index into [0, size).
/// Even function with period 2*size, ping-ponging within [0, size).
pub fn mirror_index(idx: isize, size: usize) -> usize {
    if size <= 1 {
        return 0;
    }
    let period = 2 * size;
    let m = idx.unsigned_abs() % period;
    if m < size { m } else { 2 * size - 1 - m }
}

fn convolve_rows(data: &Array2<f32>, step: usize) -> Array2<f32> {
    let (h, w) = data.dim();
    let mut result = Array2::<f32>::zeros((h, w));
    for row in 0..h {
        for col in 0..w {
            let mut sum = 0.0f64;
            for (ki, &kv) in B3_KERNEL.iter().enumerate() {
                let offset = (ki as isize - 2) * step as isize;
                let src = mirror_index(col as isize + offset, w);
                sum += data[[row, src]] as f64 * kv;
            }
            result[[row, col]] = sum as f32;
        }
    }
    result
}

fn convolve_cols(data: &Array2<f32>, step: usize) -> Array2<f32> {
    let (h, w) = data.dim();
    let mut result = Array2::<f32>::zeros((h, w));
    for row in 0..h {
        for col in 0..w {
            let mut sum = 0.0f64;
            for (ki, &kv) in B3_KERNEL.iter().enumerate() {
                let offset = (ki as isize - 2) * step as isize;
                let src = mirror_index(row as isize + offset, h);
                sum += data[[src, col]] as f64 * kv;
            }
            result[[row, col]] = sum as f32;
        }
    }
    result
}

/// One smoothing pass at `scale`: separable B3 convolution with taps spaced
/// 2^scale pixels apart.
pub fn smooth(data: &Array2<f32>, scale: usize) -> Array2<f32> {
    let step = 1usize << scale;
    convolve_cols(&convolve_rows(data, step), step)
}

/// Decompose into `levels` detail layers plus a residual.
///
/// `input = layers[0] + layers[1] + ... + residual`, with layers ordered
/// from the smallest scale up.
pub fn decompose(data: &Array2<f32>, levels: usize) -> (Vec<Array2<f32>>, Array2<f32>) {
    let mut layers = Vec::with_capacity(levels);
    let mut current = data.clone();
    for scale in 0..levels {
        let smoothed = smooth(&current, scale);
        layers.push(&current - &smoothed);
        current = smoothed;
    }
    (layers, current)
}

/// The finest detail layer only: `data - smooth(data, 0)`. Cheaper than a
/// full decomposition when only layer 0 is needed (noise estimation).
pub fn finest_layer(data: &Array2<f32>) -> Array2<f32> {
    let smoothed = smooth(data, 0);
    data - &smoothed
}
