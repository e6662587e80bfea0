//! Parallel row-buffer refill across all enabled frames.

use rayon::prelude::*;

use crate::error::Result;
use crate::file::IntegrationFile;

/// Materialize rows [y0, y1) in every frame's row buffer.
///
/// Frames load in parallel; rows inside one frame load sequentially. When
/// a band is already resident (the buffers read ahead), this is a no-op
/// per frame.
pub fn load_band(
    pool: Option<&rayon::ThreadPool>,
    files: &[IntegrationFile],
    y0: usize,
    y1: usize,
) -> Result<()> {
    let load = || {
        files
            .par_iter()
            .try_for_each(|file| file.request_rows(y0, y1))
    };
    match pool {
        Some(pool) => pool.install(load),
        None => load(),
    }
}
