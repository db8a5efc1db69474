//! expand.rs  –  sparse row → dense row
//! ====================================
//! The one primitive every worker runs: scatter the non‑zeros of a single
//! CSR row into a pre‑zeroed dense row, passing each value through the
//! build‑wide [`Transform`].

use ndarray::ArrayViewMut1;

use crate::csr::CsrMatrix;
use crate::error::{Error, Result};

/// Monotonic transform applied to every expanded value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Transform {
    #[default]
    Identity,
    /// `ln(1 + x)`
    Log1p,
}

impl Transform {
    #[inline]
    pub fn apply(self, v: f64) -> f64 {
        match self {
            Transform::Identity => v,
            Transform::Log1p => v.ln_1p(),
        }
    }
}

/// Write row `idx` of `csr` into `dest`.
///
/// Only the columns listed for that row are touched, so `dest` must start
/// zeroed.  An empty row leaves `dest` unchanged.
pub fn expand_row(
    csr: &CsrMatrix,
    idx: usize,
    mut dest: ArrayViewMut1<'_, f64>,
    transform: Transform,
) -> Result<()> {
    let (cols, vals) = csr.row(idx)?;
    let width = dest.len();
    for (&col, &val) in cols.iter().zip(vals) {
        let cell = dest
            .get_mut(col)
            .ok_or(Error::IndexOutOfRange { index: col, len: width })?;
        *cell = transform.apply(val);
    }
    Ok(())
}
