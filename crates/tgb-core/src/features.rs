// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Dense feature matrices with a compact all-zero representation.

use std::borrow::Cow;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Default feature width, kept for compatibility with existing artifacts.
pub const DEFAULT_FEAT_DIM: usize = 172;

/// Storage for a [`FeatureMatrix`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FeatureValues {
    /// Every entry is zero; nothing is allocated.
    Zeros,
    /// Row-major values, `rows * cols` long.
    Dense(Vec<f32>),
}

/// Row-major `rows × cols` matrix.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureMatrix {
    rows: usize,
    cols: usize,
    values: FeatureValues,
}

impl FeatureMatrix {
    /// All-zero matrix.
    pub fn zeros(rows: usize, cols: usize) -> Self {
        Self {
            rows,
            cols,
            values: FeatureValues::Zeros,
        }
    }

    /// Build from per-row native features, right-padding with zeros to at
    /// least `pad_to` columns. Rows must all have the same width.
    pub fn from_rows(rows: Vec<Vec<f32>>, pad_to: usize) -> Result<Self> {
        let native = rows.first().map_or(0, Vec::len);
        if let Some(bad) = rows.iter().position(|r| r.len() != native) {
            return Err(Error::InvalidInput(format!(
                "feature row {bad} has {} values, expected {native}",
                rows[bad].len()
            )));
        }
        let cols = native.max(pad_to);
        let n = rows.len();
        if rows.iter().flatten().all(|v| *v == 0.0) {
            return Ok(Self::zeros(n, cols));
        }
        let mut data = Vec::with_capacity(n * cols);
        for row in rows {
            data.extend_from_slice(&row);
            data.resize(data.len() + (cols - native), 0.0);
        }
        Ok(Self {
            rows: n,
            cols,
            values: FeatureValues::Dense(data),
        })
    }

    /// Number of rows.
    pub fn rows(&self) -> usize {
        self.rows
    }

    /// Number of columns.
    pub fn cols(&self) -> usize {
        self.cols
    }

    /// `(rows, cols)`.
    pub fn shape(&self) -> (usize, usize) {
        (self.rows, self.cols)
    }

    /// Returns `true` if every entry is zero.
    pub fn is_zero(&self) -> bool {
        match &self.values {
            FeatureValues::Zeros => true,
            FeatureValues::Dense(data) => data.iter().all(|v| *v == 0.0),
        }
    }

    /// Entry at `(row, col)`.
    pub fn get(&self, row: usize, col: usize) -> Option<f32> {
        if row >= self.rows || col >= self.cols {
            return None;
        }
        match &self.values {
            FeatureValues::Zeros => Some(0.0),
            FeatureValues::Dense(data) => data.get(row * self.cols + col).copied(),
        }
    }

    /// One row; borrowed for dense storage.
    pub fn row(&self, row: usize) -> Option<Cow<'_, [f32]>> {
        if row >= self.rows {
            return None;
        }
        match &self.values {
            FeatureValues::Zeros => Some(Cow::Owned(vec![0.0; self.cols])),
            FeatureValues::Dense(data) => {
                let start = row * self.cols;
                data.get(start..start + self.cols).map(Cow::Borrowed)
            }
        }
    }

    /// Storage accessor.
    pub fn values(&self) -> &FeatureValues {
        &self.values
    }

    /// Encode as CBOR.
    pub fn to_cbor(&self) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        ciborium::ser::into_writer(self, &mut out)
            .map_err(|e| Error::Codec(format!("feature matrix encode: {e}")))?;
        Ok(out)
    }

    /// Decode from CBOR, checking the declared shape.
    pub fn from_cbor(bytes: &[u8]) -> Result<Self> {
        let m: Self = ciborium::de::from_reader(bytes)
            .map_err(|e| Error::Codec(format!("feature matrix decode: {e}")))?;
        if let FeatureValues::Dense(data) = &m.values {
            if data.len() != m.rows * m.cols {
                return Err(Error::Codec(format!(
                    "feature matrix declares {}x{} but holds {} values",
                    m.rows,
                    m.cols,
                    data.len()
                )));
            }
        }
        Ok(m)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn zeros_allocate_nothing_but_read_as_zero() {
        let m = FeatureMatrix::zeros(3, DEFAULT_FEAT_DIM);
        assert_eq!(m.shape(), (3, 172));
        assert_eq!(m.get(2, 171), Some(0.0));
        assert_eq!(m.get(3, 0), None);
        assert_eq!(m.row(0).unwrap().len(), 172);
        assert!(matches!(m.values(), FeatureValues::Zeros));
    }

    #[test]
    fn native_rows_are_right_padded() {
        let m = FeatureMatrix::from_rows(vec![vec![1.0, 2.0], vec![3.0, 4.0]], 4).unwrap();
        assert_eq!(m.shape(), (2, 4));
        assert_eq!(&*m.row(1).unwrap(), &[3.0, 4.0, 0.0, 0.0]);
    }

    #[test]
    fn wider_native_rows_keep_their_width() {
        let m = FeatureMatrix::from_rows(vec![vec![1.0; 5]], 2).unwrap();
        assert_eq!(m.cols(), 5);
    }

    #[test]
    fn ragged_rows_rejected() {
        let err = FeatureMatrix::from_rows(vec![vec![1.0], vec![1.0, 2.0]], 2).unwrap_err();
        assert_eq!(err.code(), crate::ErrorCode::InvalidInput);
    }

    #[test]
    fn cbor_preserves_matrix() {
        let m = FeatureMatrix::from_rows(vec![vec![0.5, -1.0]], 3).unwrap();
        assert_eq!(FeatureMatrix::from_cbor(&m.to_cbor().unwrap()).unwrap(), m);
        let z = FeatureMatrix::zeros(1_000_000, 172);
        assert!(z.to_cbor().unwrap().len() < 64);
    }
}
