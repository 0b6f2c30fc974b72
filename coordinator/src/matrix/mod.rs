//! Dense matrix blocks
//!
//! `MatrixBlock` is the in-memory value exchanged between coordinator and
//! workers. It carries only the kernels the federated layer needs:
//! - elementwise add / scale used by the combinators
//! - row and column append used by bind
//! - slicing used to partition a matrix across workers
//! - unary aggregates evaluated by workers (see [`aggregate`])

pub mod aggregate;

use crate::errors::{FederatedError, Result};
use serde::{Deserialize, Serialize};

/// Row-major dense matrix of `f64` values
///
/// Decoding goes through [`MatrixBlock::new`], so a block whose shape and
/// value count disagree never leaves the codec.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawMatrixBlock")]
pub struct MatrixBlock {
    rows: usize,
    cols: usize,
    values: Vec<f64>,
}

#[derive(Deserialize)]
struct RawMatrixBlock {
    rows: usize,
    cols: usize,
    values: Vec<f64>,
}

impl TryFrom<RawMatrixBlock> for MatrixBlock {
    type Error = FederatedError;

    fn try_from(raw: RawMatrixBlock) -> Result<Self> {
        MatrixBlock::new(raw.rows, raw.cols, raw.values)
    }
}

impl MatrixBlock {
    /// Create a matrix from row-major values
    pub fn new(rows: usize, cols: usize, values: Vec<f64>) -> Result<Self> {
        if rows.checked_mul(cols) != Some(values.len()) {
            return Err(FederatedError::Execution(format!(
                "Data length {} doesn't match shape {}x{}",
                values.len(),
                rows,
                cols
            )));
        }
        Ok(Self { rows, cols, values })
    }

    /// Create a matrix from a list of equally long rows
    pub fn from_rows(rows: Vec<Vec<f64>>) -> Result<Self> {
        let n_rows = rows.len();
        let n_cols = rows.first().map(Vec::len).unwrap_or(0);
        let mut values = Vec::with_capacity(n_rows * n_cols);
        for (i, row) in rows.into_iter().enumerate() {
            if row.len() != n_cols {
                return Err(FederatedError::Execution(format!(
                    "Row {} has {} columns, expected {}",
                    i,
                    row.len(),
                    n_cols
                )));
            }
            values.extend(row);
        }
        Self::new(n_rows, n_cols, values)
    }

    /// Parse comma-separated rows of numbers; blank lines are skipped
    pub fn from_csv(text: &str) -> Result<Self> {
        let rows = text
            .lines()
            .enumerate()
            .filter(|(_, line)| !line.trim().is_empty())
            .map(|(line_no, line)| {
                line.split(',')
                    .map(|cell| {
                        cell.trim().parse::<f64>().map_err(|_| {
                            FederatedError::Execution(format!(
                                "Line {}: '{}' is not a number",
                                line_no + 1,
                                cell.trim()
                            ))
                        })
                    })
                    .collect::<Result<Vec<f64>>>()
            })
            .collect::<Result<Vec<_>>>()?;
        Self::from_rows(rows)
    }

    /// Create a 1x1 matrix holding a scalar
    pub fn scalar(value: f64) -> Self {
        Self {
            rows: 1,
            cols: 1,
            values: vec![value],
        }
    }

    /// Create a matrix filled with zeros
    pub fn zeros(rows: usize, cols: usize) -> Self {
        Self::filled(rows, cols, 0.0)
    }

    /// Create a matrix filled with a constant value
    pub fn filled(rows: usize, cols: usize, value: f64) -> Self {
        Self {
            rows,
            cols,
            values: vec![value; rows * cols],
        }
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    /// Shape as `(rows, cols)`
    pub fn shape(&self) -> (usize, usize) {
        (self.rows, self.cols)
    }

    /// Row-major view of all values
    pub fn values(&self) -> &[f64] {
        &self.values
    }

    /// Get total number of elements
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Get element at (row, col)
    #[inline]
    pub fn get(&self, row: usize, col: usize) -> f64 {
        self.values[row * self.cols + col]
    }

    /// Set element at (row, col)
    #[inline]
    pub fn set(&mut self, row: usize, col: usize, value: f64) {
        self.values[row * self.cols + col] = value;
    }

    /// Get a row as a slice
    pub fn row(&self, row: usize) -> &[f64] {
        let start = row * self.cols;
        &self.values[start..start + self.cols]
    }

    /// Scale every element by a scalar
    pub fn scale(&self, factor: f64) -> MatrixBlock {
        self.map(|v| v * factor)
    }

    /// Apply a function to every element
    pub fn map(&self, f: impl Fn(f64) -> f64) -> MatrixBlock {
        MatrixBlock {
            rows: self.rows,
            cols: self.cols,
            values: self.values.iter().map(|&v| f(v)).collect(),
        }
    }

    /// Combine two equally shaped matrices element by element
    pub fn zip_with(&self, other: &MatrixBlock, f: impl Fn(f64, f64) -> f64) -> Result<MatrixBlock> {
        if self.shape() != other.shape() {
            return Err(FederatedError::Execution(format!(
                "Shape mismatch: {}x{} vs {}x{}",
                self.rows, self.cols, other.rows, other.cols
            )));
        }
        Ok(MatrixBlock {
            rows: self.rows,
            cols: self.cols,
            values: self
                .values
                .iter()
                .zip(&other.values)
                .map(|(&a, &b)| f(a, b))
                .collect(),
        })
    }

    /// Element-wise addition
    pub fn add(&self, other: &MatrixBlock) -> Result<MatrixBlock> {
        self.zip_with(other, |a, b| a + b)
    }

    /// N-ary element-wise addition of equally shaped matrices
    pub fn nary_add(inputs: &[MatrixBlock]) -> Result<MatrixBlock> {
        let (first, rest) = inputs.split_first().ok_or_else(|| {
            FederatedError::Execution("N-ary add requires at least one input".to_string())
        })?;
        rest.iter().try_fold(first.clone(), |acc, m| acc.add(m))
    }

    /// Smallest value, `f64::MAX` for an empty matrix
    pub fn min(&self) -> f64 {
        self.values.iter().copied().fold(f64::MAX, f64::min)
    }

    /// Largest value, `f64::MIN` for an empty matrix
    pub fn max(&self) -> f64 {
        self.values.iter().copied().fold(f64::MIN, f64::max)
    }

    /// Append matrices to this one.
    ///
    /// `cbind = true` concatenates along columns (row counts must agree),
    /// otherwise along rows (column counts must agree).
    pub fn append(&self, others: &[MatrixBlock], cbind: bool) -> Result<MatrixBlock> {
        if cbind {
            if let Some(bad) = others.iter().find(|m| m.rows != self.rows) {
                return Err(FederatedError::Execution(format!(
                    "cbind requires equal row counts: {} vs {}",
                    self.rows, bad.rows
                )));
            }
            let cols = self.cols + others.iter().map(|m| m.cols).sum::<usize>();
            let mut values = Vec::with_capacity(self.rows * cols);
            for r in 0..self.rows {
                values.extend_from_slice(self.row(r));
                for m in others {
                    values.extend_from_slice(m.row(r));
                }
            }
            MatrixBlock::new(self.rows, cols, values)
        } else {
            if let Some(bad) = others.iter().find(|m| m.cols != self.cols) {
                return Err(FederatedError::Execution(format!(
                    "rbind requires equal column counts: {} vs {}",
                    self.cols, bad.cols
                )));
            }
            let rows = self.rows + others.iter().map(|m| m.rows).sum::<usize>();
            let mut values = self.values.clone();
            for m in others {
                values.extend_from_slice(&m.values);
            }
            MatrixBlock::new(rows, self.cols, values)
        }
    }

    /// Copy out the half-open block `[row_start, row_end) x [col_start, col_end)`
    pub fn slice(
        &self,
        row_start: usize,
        row_end: usize,
        col_start: usize,
        col_end: usize,
    ) -> Result<MatrixBlock> {
        if row_start > row_end || col_start > col_end || row_end > self.rows || col_end > self.cols
        {
            return Err(FederatedError::Execution(format!(
                "Slice [{}:{}, {}:{}] out of bounds for {}x{}",
                row_start, row_end, col_start, col_end, self.rows, self.cols
            )));
        }
        let mut values = Vec::with_capacity((row_end - row_start) * (col_end - col_start));
        for r in row_start..row_end {
            values.extend_from_slice(&self.row(r)[col_start..col_end]);
        }
        MatrixBlock::new(row_end - row_start, col_end - col_start, values)
    }
}
