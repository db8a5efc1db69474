//! store.rs  –  sparse reader for 10x‑style expression stores
//! ==========================================================
//! Layout under one named group (`mm10` for the E18 mouse brain data):
//! * `genes`   – one entry per feature; only its length is used
//! * `data`    – non‑zero values
//! * `indices` – column (gene) index of each value
//! * `indptr`  – row (cell) offsets, `n_rows + 1` entries
//!
//! [`SparseStore::read_csr`] pulls all three arrays fully into memory; the
//! file mapping is released when the store is dropped, before any worker
//! thread touches the data.

use std::path::Path;

use crate::csr::CsrMatrix;
use crate::error::{Error, Result};
use crate::hdf5::H5File;
use crate::logging::Stage;

pub const DEFAULT_GROUP: &str = "mm10";
pub const DEFAULT_FEATURE_KEY: &str = "genes";

/// An opened store with its schema checked.
#[derive(Debug)]
pub struct SparseStore {
    file: H5File,
    group: String,
    n_features: usize,
    n_rows: usize,
    nnz: usize,
}

impl SparseStore {
    /// Open `path` and check that `group` carries `data`, `indices`,
    /// `indptr` and `feature_key`.
    pub fn open(path: impl AsRef<Path>, group: &str, feature_key: &str) -> Result<Self> {
        let file = H5File::open(path)?;
        let group = group.trim_matches('/').to_string();
        if !file.has_group(&group) {
            return Err(Error::DatasetNotFound(format!("group '{}'", group)));
        }
        let key = |name: &str| format!("{}/{}", group, name);

        let n_features = leading_dim(&file, &key(feature_key))?;
        let indptr_len = leading_dim(&file, &key("indptr"))?;
        if indptr_len == 0 {
            return Err(Error::MalformedCsr(format!("'{}' is empty", key("indptr"))));
        }
        let nnz = leading_dim(&file, &key("data"))?;
        let n_indices = leading_dim(&file, &key("indices"))?;
        if n_indices != nnz {
            return Err(Error::MalformedCsr(format!(
                "'{}' has {} entries but '{}' has {}",
                key("indices"),
                n_indices,
                key("data"),
                nnz
            )));
        }

        Ok(Self { file, group, n_features, n_rows: indptr_len - 1, nnz })
    }

    /// Open with the default `mm10` / `genes` layout.
    pub fn open_default(path: impl AsRef<Path>) -> Result<Self> {
        Self::open(path, DEFAULT_GROUP, DEFAULT_FEATURE_KEY)
    }

    pub fn n_features(&self) -> usize {
        self.n_features
    }

    pub fn n_rows(&self) -> usize {
        self.n_rows
    }

    pub fn nnz(&self) -> usize {
        self.nnz
    }

    pub fn group(&self) -> &str {
        &self.group
    }

    /// Bulk‑read the three arrays and validate them as one CSR matrix.
    pub fn read_csr(&self, silent: bool) -> Result<CsrMatrix> {
        let stage = Stage::start("Reading data", silent);
        let data = self.file.read_f64(&self.key("data"))?;
        stage.finish();

        let stage = Stage::start("Reading indices", silent);
        let indices = self.file.read_indices(&self.key("indices"))?;
        stage.finish();

        let stage = Stage::start("Reading indptr", silent);
        let indptr = self.file.read_indices(&self.key("indptr"))?;
        stage.finish();

        CsrMatrix::try_new(data, indices, indptr, self.n_features)
    }

    fn key(&self, name: &str) -> String {
        format!("{}/{}", self.group, name)
    }
}

fn leading_dim(file: &H5File, path: &str) -> Result<usize> {
    let shape = file.shape(path)?;
    let n = shape.first().copied().unwrap_or(1);
    usize::try_from(n).map_err(|_| Error::InvalidFileStructure(format!("'{}' is too large", path)))
}

// ------------------- tests -------------------
#[cfg(test)]
#[allow(dead_code)]
#[path = "../tests/common/hdf5_builder.rs"]
mod test_builder;
