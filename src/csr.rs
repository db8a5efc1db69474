//! csr.rs  –  owned CSR triple (cells × genes)
//! ===========================================
//! `data`, `indices`, `indptr` exactly as they sit in the store, plus the
//! feature (gene) count.  Construction validates the structure once so the
//! expansion kernels can trust every row range.

use std::ops::Range;

use sprs::{CsMat, TriMat};

use crate::error::{Error, Result};

/// Cells × genes expression matrix in compressed‑sparse‑row form.
#[derive(Debug, Clone, PartialEq)]
pub struct CsrMatrix {
    data: Vec<f64>,
    indices: Vec<usize>,
    indptr: Vec<usize>,
    n_features: usize,
}

impl CsrMatrix {
    /// Build from raw parts, checking:
    /// * `indptr` is non‑empty and non‑decreasing,
    /// * every offset lies within `data`,
    /// * `indices` and `data` have equal length,
    /// * every column index is below `n_features`.
    pub fn try_new(
        data: Vec<f64>,
        indices: Vec<usize>,
        indptr: Vec<usize>,
        n_features: usize,
    ) -> Result<Self> {
        if indptr.is_empty() {
            return Err(Error::MalformedCsr("indptr must hold at least one offset".into()));
        }
        if indices.len() != data.len() {
            return Err(Error::MalformedCsr(format!(
                "indices ({}) and data ({}) must have equal length",
                indices.len(),
                data.len()
            )));
        }
        if let Some(w) = indptr.windows(2).position(|w| w[0] > w[1]) {
            return Err(Error::MalformedCsr(format!(
                "indptr must be non-decreasing (indptr[{}] = {} > indptr[{}] = {})",
                w,
                indptr[w],
                w + 1,
                indptr[w + 1]
            )));
        }
        let nnz = data.len();
        if let Some(&last) = indptr.last() {
            if last > nnz {
                return Err(Error::MalformedCsr(format!(
                    "indptr offset {} exceeds nnz {}",
                    last, nnz
                )));
            }
        }
        if let Some(&col) = indices.iter().find(|&&c| c >= n_features) {
            return Err(Error::MalformedCsr(format!(
                "column index {} out of bounds for {} features",
                col, n_features
            )));
        }
        Ok(Self { data, indices, indptr, n_features })
    }

    /// Number of rows (cells): one fewer than the `indptr` length.
    pub fn n_rows(&self) -> usize {
        self.indptr.len() - 1
    }

    pub fn n_features(&self) -> usize {
        self.n_features
    }

    pub fn nnz(&self) -> usize {
        self.data.len()
    }

    pub fn data(&self) -> &[f64] {
        &self.data
    }

    pub fn indices(&self) -> &[usize] {
        &self.indices
    }

    pub fn indptr(&self) -> &[usize] {
        &self.indptr
    }

    /// Range of `data`/`indices` holding row `row`.  The last row runs to
    /// the end of `data`, so entries past the final offset belong to it.
    pub fn row_range(&self, row: usize) -> Result<Range<usize>> {
        let n_rows = self.n_rows();
        if row >= n_rows {
            return Err(Error::IndexOutOfRange { index: row, len: n_rows });
        }
        let start = self.indptr[row];
        let end = if row + 1 == n_rows { self.data.len() } else { self.indptr[row + 1] };
        if start > end || end > self.data.len() {
            return Err(Error::MalformedCsr(format!("row {} spans {}..{}", row, start, end)));
        }
        Ok(start..end)
    }

    /// Column indices and values of one row.
    pub fn row(&self, row: usize) -> Result<(&[usize], &[f64])> {
        let range = self.row_range(row)?;
        Ok((&self.indices[range.clone()], &self.data[range]))
    }

    /// Copy into a `sprs` matrix (indices sorted per row, as `sprs` requires).
    pub fn to_sprs(&self) -> CsMat<f64> {
        let mut tri = TriMat::<f64>::with_capacity((self.n_rows(), self.n_features), self.nnz());
        for r in 0..self.n_rows() {
            if let Ok((cols, vals)) = self.row(r) {
                for (&c, &v) in cols.iter().zip(vals) {
                    tri.add_triplet(r, c, v);
                }
            }
        }
        tri.to_csr()
    }
}

/// Any `sprs` matrix; CSC input is flipped to CSR first.
impl From<&CsMat<f64>> for CsrMatrix {
    fn from(mat: &CsMat<f64>) -> Self {
        let csr = if mat.is_csr() { mat.clone() } else { mat.to_other_storage() };
        let n_features = csr.cols();
        let (indptr, indices, data) = csr.into_raw_storage();
        CsrMatrix { data, indices, indptr, n_features }
    }
}
