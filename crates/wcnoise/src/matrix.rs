// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Dense sample × beam amplitude matrix.
//!
//! Row-major `f32` storage. `NaN` marks a cell with no data, so padding
//! between beams of different sample counts never looks like a real level.

/// Value stored in cells that carry no sample.
pub const NO_DATA: f32 = f32::NAN;

/// Row-major matrix of amplitudes (rows = range samples, columns = beams).
#[derive(Debug, Clone, PartialEq)]
pub struct Matrix {
    rows: usize,
    cols: usize,
    data: Vec<f32>,
}

impl Matrix {
    /// Create a matrix with every cell set to [`NO_DATA`].
    pub fn empty(rows: usize, cols: usize) -> Self {
        Self::filled(rows, cols, NO_DATA)
    }

    /// Create a matrix with every cell set to `value`.
    pub fn filled(rows: usize, cols: usize, value: f32) -> Self {
        Self {
            rows,
            cols,
            data: vec![value; rows * cols],
        }
    }

    /// Build from row-major data. Returns `None` if the length does not match.
    pub fn from_rows(rows: usize, cols: usize, data: Vec<f32>) -> Option<Self> {
        if data.len() != rows * cols {
            return None;
        }
        Some(Self { rows, cols, data })
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn get(&self, row: usize, col: usize) -> Option<f32> {
        if row < self.rows && col < self.cols {
            Some(self.data[row * self.cols + col])
        } else {
            None
        }
    }

    /// Set a cell. Out-of-range writes are ignored.
    pub fn set(&mut self, row: usize, col: usize, value: f32) {
        if row < self.rows && col < self.cols {
            self.data[row * self.cols + col] = value;
        }
    }

    /// One row as a slice.
    pub fn row(&self, row: usize) -> &[f32] {
        let start = row * self.cols;
        &self.data[start..start + self.cols]
    }

    /// Copy of one column (all rows).
    pub fn column(&self, col: usize) -> Vec<f32> {
        (0..self.rows)
            .map(|r| self.data[r * self.cols + col])
            .collect()
    }

    /// Overwrite a column. Rows past the end of `values` become [`NO_DATA`].
    pub fn set_column(&mut self, col: usize, values: &[f32]) {
        if col >= self.cols {
            return;
        }
        for r in 0..self.rows {
            self.data[r * self.cols + col] = values.get(r).copied().unwrap_or(NO_DATA);
        }
    }

    /// Move every column one place right, dropping the last; column 0 keeps its old value.
    pub fn shift_columns_right(&mut self) {
        if self.cols < 2 {
            return;
        }
        for r in 0..self.rows {
            let start = r * self.cols;
            self.data.copy_within(start..start + self.cols - 1, start + 1);
        }
    }

    /// Copy with `rows` rows; new rows are [`NO_DATA`], extra rows are dropped.
    pub fn with_rows(&self, rows: usize) -> Matrix {
        let mut out = Matrix::empty(rows, self.cols);
        out.paste_columns(self, 0);
        out
    }

    /// Raw row-major data.
    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }

    /// Copy `block` into this matrix with its top-left cell at (0, `col_offset`).
    ///
    /// Rows and columns that fall outside this matrix are clipped.
    pub fn paste_columns(&mut self, block: &Matrix, col_offset: usize) {
        let rows = block.rows.min(self.rows);
        let cols = block.cols.min(self.cols.saturating_sub(col_offset));
        if cols == 0 {
            return;
        }
        for r in 0..rows {
            let dst = r * self.cols + col_offset;
            let src = r * block.cols;
            self.data[dst..dst + cols].copy_from_slice(&block.data[src..src + cols]);
        }
    }

    /// New matrix whose column `i` is column `order[i]` of this one.
    pub fn permute_columns(&self, order: &[usize]) -> Matrix {
        let mut out = Matrix::empty(self.rows, order.len());
        for r in 0..self.rows {
            let src_row = self.row(r);
            let dst = r * out.cols;
            for (i, &src_col) in order.iter().enumerate() {
                out.data[dst + i] = src_row[src_col];
            }
        }
        out
    }

    /// Mean of each column over rows `[0, rows)`. NaN cells propagate.
    ///
    /// An empty window yields NaN for every column.
    pub fn column_means(&self, rows: usize) -> Vec<f32> {
        let rows = rows.min(self.rows);
        if rows == 0 {
            return vec![NO_DATA; self.cols];
        }
        let mut sums = vec![0.0f64; self.cols];
        for r in 0..rows {
            for (sum, &v) in sums.iter_mut().zip(self.row(r)) {
                *sum += v as f64;
            }
        }
        sums.into_iter().map(|s| (s / rows as f64) as f32).collect()
    }
}

/// Mean over the non-NaN values, or NaN if there are none.
pub fn nan_mean(values: &[f32]) -> f32 {
    let (sum, count) = values
        .iter()
        .filter(|v| !v.is_nan())
        .fold((0.0f64, 0usize), |(s, n), &v| (s + v as f64, n + 1));
    if count == 0 {
        NO_DATA
    } else {
        (sum / count as f64) as f32
    }
}

/// Population standard deviation over the non-NaN values, or NaN if there are none.
pub fn nan_std(values: &[f32]) -> f32 {
    let mean = nan_mean(values);
    if mean.is_nan() {
        return NO_DATA;
    }
    let (sq, count) = values
        .iter()
        .filter(|v| !v.is_nan())
        .fold((0.0f64, 0usize), |(s, n), &v| {
            let d = v as f64 - mean as f64;
            (s + d * d, n + 1)
        });
    ((sq / count as f64).sqrt()) as f32
}
