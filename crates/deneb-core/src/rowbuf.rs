//! Bounded read-ahead row buffer, one per input frame.
//!
//! Workers borrow materialized rows through a shared read guard; refills
//! take the write side. A band's rows must fit the buffer; the engine
//! enforces that when it sizes bands.

use std::sync::{RwLock, RwLockReadGuard};

use crate::error::{DenebError, Result};
use crate::io::ImageSource;

#[derive(Debug)]
struct BufferState {
    rows: Vec<f32>,
    row_len: usize,
    /// First materialized image row.
    first: usize,
    /// Number of materialized rows.
    count: usize,
}

#[derive(Debug)]
pub struct RowBuffer {
    state: RwLock<BufferState>,
    capacity_rows: usize,
    row_len: usize,
    height: usize,
}

impl RowBuffer {
    /// `capacity_bytes` is the configured per-frame budget; the buffer
    /// never holds more than the remaining rows of the frame.
    pub fn new(capacity_bytes: usize, row_len: usize, height: usize) -> Self {
        let row_bytes = row_len * std::mem::size_of::<f32>();
        let capacity_rows = (capacity_bytes / row_bytes.max(1)).clamp(1, height.max(1));
        Self {
            state: RwLock::new(BufferState {
                rows: Vec::new(),
                row_len,
                first: 0,
                count: 0,
            }),
            capacity_rows,
            row_len,
            height,
        }
    }

    pub fn capacity_rows(&self) -> usize {
        self.capacity_rows
    }

    fn contains(state: &BufferState, y0: usize, y1: usize) -> bool {
        y0 >= state.first && y1 <= state.first + state.count && y1 > y0
    }

    /// Ensure rows [y0, y1) are materialized, reading ahead to capacity.
    /// No-op when the range is already resident.
    pub fn materialize(
        &self,
        source: &dyn ImageSource,
        pedestal: f32,
        y0: usize,
        y1: usize,
    ) -> Result<()> {
        if y1 - y0 > self.capacity_rows {
            let row_bytes = self.row_len * std::mem::size_of::<f32>();
            return Err(DenebError::ResourceLimit {
                required: (y1 - y0) * row_bytes,
                limit: self.capacity_rows * row_bytes,
            });
        }
        let mut state = self.state.write().expect("row buffer lock");
        if Self::contains(&state, y0, y1) {
            return Ok(());
        }
        let end = (y0 + self.capacity_rows).min(self.height).max(y1);
        let row_len = state.row_len;
        state.rows.resize((end - y0) * row_len, 0.0);
        source.read_rows(y0, end, &mut state.rows)?;
        if pedestal != 0.0 {
            for v in state.rows.iter_mut() {
                *v -= pedestal;
            }
        }
        // Samples that are not finite integrate as zero.
        for v in state.rows.iter_mut() {
            if !v.is_finite() {
                *v = 0.0;
            }
        }
        state.first = y0;
        state.count = end - y0;
        Ok(())
    }

    /// Borrow rows [y0, y1); fails if the range is not resident.
    pub fn window(&self, y0: usize, y1: usize) -> Result<RowWindow<'_>> {
        let guard = self.state.read().expect("row buffer lock");
        if !Self::contains(&guard, y0, y1) {
            return Err(DenebError::Input(format!(
                "rows [{y0}, {y1}) not materialized"
            )));
        }
        Ok(RowWindow { guard })
    }
}

/// Shared view over materialized rows. Holds the buffer's read lock for
/// the lifetime of the borrow.
pub struct RowWindow<'a> {
    guard: RwLockReadGuard<'a, BufferState>,
}

impl RowWindow<'_> {
    /// One image row, channel-interleaved.
    pub fn row(&self, y: usize) -> &[f32] {
        let offset = (y - self.guard.first) * self.guard.row_len;
        &self.guard.rows[offset..offset + self.guard.row_len]
    }
}
