//! Large-scale rejection expansion.
//!
//! Rejected regions that are part of an extended structure (satellite
//! trails, reflections) get grown to cover their borderline surroundings:
//! the binary rejection mask is smoothed past its small-scale layers,
//! binarized, dilated, and unioned back.

use ndarray::Array2;

use crate::config::LargeScaleSide;
use crate::consts::LARGE_SCALE_THRESHOLD;
use crate::wavelet;

/// Expand one side's rejection mask for one frame and channel.
///
/// Smoothing the mask through `protected_layers` wavelet scales is exactly
/// the reconstruction that discards those detail layers; what remains at
/// or above the structure threshold is a large-scale structure.
pub fn expand_mask(mask: &Array2<bool>, side: &LargeScaleSide) -> Array2<bool> {
    let (h, w) = mask.dim();
    let mut smoothed = Array2::<f32>::zeros((h, w));
    for (dst, &m) in smoothed.iter_mut().zip(mask.iter()) {
        *dst = if m { 1.0 } else { 0.0 };
    }
    for scale in 0..side.protected_layers {
        smoothed = wavelet::smooth(&smoothed, scale);
    }

    let mut structure = Array2::<bool>::from_elem((h, w), false);
    for (dst, &v) in structure.iter_mut().zip(smoothed.iter()) {
        *dst = v as f64 >= LARGE_SCALE_THRESHOLD;
    }

    if side.growth > 0 {
        structure = dilate(&structure, side.growth);
    }

    // Union with the original flags: expansion never un-rejects.
    for (dst, &m) in structure.iter_mut().zip(mask.iter()) {
        *dst |= m;
    }
    structure
}

/// Binary dilation by `radius` in the Chebyshev metric: a pixel becomes
/// true if any pixel of the surrounding (2r+1)-square is true. The square
/// is separable, so one pass of row interval-ors followed by one column
/// pass covers `radius` rounds of 8-connected growth.
fn dilate(mask: &Array2<bool>, radius: usize) -> Array2<bool> {
    let (h, w) = mask.dim();
    let mut by_rows = Array2::from_elem((h, w), false);
    for row in 0..h {
        for col in 0..w {
            let span = col.saturating_sub(radius)..(col + radius + 1).min(w);
            by_rows[[row, col]] = span.into_iter().any(|k| mask[[row, k]]);
        }
    }
    let mut result = Array2::from_elem((h, w), false);
    for row in 0..h {
        let span = row.saturating_sub(radius)..(row + radius + 1).min(h);
        for col in 0..w {
            result[[row, col]] = span.clone().any(|k| by_rows[[k, col]]);
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    fn block_mask(size: usize, r0: usize, c0: usize, extent: usize) -> Array2<bool> {
        let mut mask = Array2::from_elem((size, size), false);
        for r in r0..r0 + extent {
            for c in c0..c0 + extent {
                mask[[r, c]] = true;
            }
        }
        mask
    }

    #[test]
    fn compact_block_grows_by_growth() {
        // A 3x3 block with two protected layers keeps its own footprint
        // after smoothing and binarization; growth=1 dilates it to 5x5.
        let mask = block_mask(16, 7, 7, 3);
        let side = LargeScaleSide {
            enabled: true,
            protected_layers: 2,
            growth: 1,
        };
        let expanded = expand_mask(&mask, &side);
        for r in 0..16 {
            for c in 0..16 {
                let inside = (6..11).contains(&r) && (6..11).contains(&c);
                assert_eq!(
                    expanded[[r, c]],
                    inside,
                    "unexpected mask state at ({r}, {c})"
                );
            }
        }
    }

    #[test]
    fn isolated_pixel_is_suppressed() {
        let mask = block_mask(16, 8, 8, 1);
        let side = LargeScaleSide {
            enabled: true,
            protected_layers: 2,
            growth: 1,
        };
        let expanded = expand_mask(&mask, &side);
        // The original rejection survives (union), but no structure grows.
        let count = expanded.iter().filter(|&&m| m).count();
        assert_eq!(count, 1);
        assert!(expanded[[8, 8]]);
    }

    #[test]
    fn dilation_is_eight_connected() {
        let mask = block_mask(5, 2, 2, 1);
        let d = dilate(&mask, 1);
        assert!(d[[1, 1]] && d[[1, 3]] && d[[3, 1]] && d[[3, 3]]);
        assert!(!d[[0, 0]]);
    }

    #[test]
    fn dilation_radius_covers_the_chebyshev_ball() {
        // Radius 2 from a single pixel fills the 5x5 square and no more.
        let mask = block_mask(7, 3, 3, 1);
        let d = dilate(&mask, 2);
        for r in 0..7 {
            for c in 0..7 {
                let inside = (1..6).contains(&r) && (1..6).contains(&c);
                assert_eq!(d[[r, c]], inside, "state at ({r}, {c})");
            }
        }
    }
}
