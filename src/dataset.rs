//! dataset.rs  –  the consumer‑facing dense dataset
//! ================================================
//! Wraps the built `(cells × genes)` tensor behind a sequence‑like
//! interface (`len`, `get`) and owns the one destructive operation, the
//! per‑gene rescale to `[0, 1]`.

use std::path::Path;

use ndarray::{Array2, ArrayView1};
use tracing::debug;

use crate::build::build_dense;
use crate::config::LoadOptions;
use crate::csr::CsrMatrix;
use crate::error::{Error, Result};
use crate::expand::Transform;
use crate::logging::Stage;
use crate::store::SparseStore;

/// Dense expression matrix: one row per selected cell, one column per gene.
#[derive(Debug, Clone, PartialEq)]
pub struct DenseDataset {
    data: Array2<f64>,
    selection: Vec<usize>,
    transform: Transform,
}

impl DenseDataset {
    /// Open the store at `path`, read the CSR arrays and build the tensor.
    pub fn load(path: impl AsRef<Path>, opts: &LoadOptions) -> Result<Self> {
        let csr = {
            let store = SparseStore::open(path, &opts.group, &opts.feature_key)?;
            store.read_csr(opts.silent)?
        };
        Self::from_csr(&csr, opts)
    }

    /// Build from an in‑memory matrix; `group` and `feature_key` are ignored.
    pub fn from_csr(csr: &CsrMatrix, opts: &LoadOptions) -> Result<Self> {
        debug!(rows = opts.selection.len(csr.n_rows()), source_rows = csr.n_rows(), "resolving selection");
        let selection = opts.selection.resolve(csr.n_rows())?;

        let stage = Stage::start("Building tensor", opts.silent);
        let data = build_dense(csr, &selection, opts.transform, opts.workers)?;
        stage.finish();

        Ok(Self { data, selection, transform: opts.transform })
    }

    /// Number of rows (selected cells).
    pub fn len(&self) -> usize {
        self.data.nrows()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of columns (genes).
    pub fn n_features(&self) -> usize {
        self.data.ncols()
    }

    /// Row `index` of the tensor.
    pub fn get(&self, index: usize) -> Result<ArrayView1<'_, f64>> {
        if index >= self.len() {
            return Err(Error::IndexOutOfRange { index, len: self.len() });
        }
        Ok(self.data.row(index))
    }

    pub fn rows(&self) -> impl ExactSizeIterator<Item = ArrayView1<'_, f64>> + '_ {
        self.data.outer_iter()
    }

    /// Source row behind each output row.
    pub fn selection(&self) -> &[usize] {
        &self.selection
    }

    pub fn transform(&self) -> Transform {
        self.transform
    }

    pub fn as_array(&self) -> &Array2<f64> {
        &self.data
    }

    pub fn into_array(self) -> Array2<f64> {
        self.data
    }

    /// Divide every gene column by its maximum when that maximum is > 0.
    ///
    /// In place and irreversible; the maxima are not kept.  The maximum is
    /// a strict `>` scan seeded with the first row, so a NaN never replaces
    /// it; a column that starts with NaN keeps NaN as its maximum and is
    /// left as it is.
    pub fn rescale_columns_to_unit_range(&mut self) {
        if self.is_empty() {
            return;
        }
        for mut col in self.data.columns_mut() {
            let fmax = col.iter().skip(1).fold(col[0], |m, &v| if v > m { v } else { m });
            if fmax > 0.0 {
                col.mapv_inplace(|v| v / fmax);
            }
        }
    }
}

/// Scale each gene of `ds` into `[0, 1]`; see
/// [`DenseDataset::rescale_columns_to_unit_range`].
pub fn rescale(ds: &mut DenseDataset) {
    ds.rescale_columns_to_unit_range()
}
