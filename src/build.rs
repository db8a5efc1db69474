//! build.rs  –  parallel sparse → dense tensor construction
//! ========================================================
//! Strategy: static striding over one shared buffer.
//! 1. Allocate the zero‑filled `(L × genes)` tensor once.
//! 2. Split it into per‑row mutable views and deal them out: worker `t`
//!    owns output rows `t, t+N, t+2N, …`.
//! 3. Run the stripes on a dedicated pool of at most `N` threads; each one
//!    expands its rows in place.  The views are disjoint, so no locks and no
//!    merge step; the pool join is the only barrier.
//!
//! Row ownership depends only on the row index and `N`, never on scheduling,
//! so every worker count yields the same bits.  Any failing row fails the
//! whole build and the buffer is dropped.

use ndarray::{Array2, ArrayViewMut1, Axis};
use rayon::prelude::*;
use rayon::ThreadPoolBuilder;
use tracing::{debug, info_span};

use crate::csr::CsrMatrix;
use crate::error::{Error, Result};
use crate::expand::{expand_row, Transform};

/// Zero‑filled `(rows × cols)` tensor; reports [`Error::Allocation`]
/// instead of aborting when the buffer cannot be reserved.
pub fn alloc_zeros(rows: usize, cols: usize) -> Result<Array2<f64>> {
    let too_big = || Error::Allocation { rows, cols };
    let len = rows.checked_mul(cols).ok_or_else(too_big)?;
    let mut buf: Vec<f64> = Vec::new();
    buf.try_reserve_exact(len).map_err(|_| too_big())?;
    buf.resize(len, 0.0);
    Array2::from_shape_vec((rows, cols), buf).map_err(|_| too_big())
}

/// Output rows owned by worker `t` out of `workers`.
pub fn stripe(t: usize, workers: usize, len: usize) -> impl Iterator<Item = usize> {
    (t..len).step_by(workers.max(1))
}

/// Expand `rows` (already resolved and bounds‑checked) of `csr` into a dense
/// tensor using `workers` threads.
pub fn build_dense(
    csr: &CsrMatrix,
    rows: &[usize],
    transform: Transform,
    workers: usize,
) -> Result<Array2<f64>> {
    if workers == 0 {
        return Err(Error::InvalidWorkerCount(workers));
    }
    let n_features = csr.n_features();
    let _span = info_span!("build_dense", rows = rows.len(), features = n_features, workers).entered();

    let mut out = alloc_zeros(rows.len(), n_features)?;
    debug!("zero tensor allocated");

    if workers == 1 {
        for (row, &src) in out.axis_iter_mut(Axis(0)).zip(rows) {
            expand_row(csr, src, row, transform)?;
        }
        return Ok(out);
    }

    // ---- deal rows into stripes
    let mut stripes: Vec<Vec<(usize, ArrayViewMut1<'_, f64>)>> =
        (0..workers).map(|t| Vec::with_capacity(stripe(t, workers, rows.len()).count())).collect();
    for (i, row) in out.axis_iter_mut(Axis(0)).enumerate() {
        stripes[i % workers].push((i, row));
    }

    // ---- one pool per build, torn down on return; never more threads than rows
    let threads = workers.min(rows.len().max(1));
    let pool = ThreadPoolBuilder::new().num_threads(threads).build()?;
    pool.install(|| {
        stripes.into_par_iter().enumerate().try_for_each(|(t, stripe)| {
            debug!(worker = t, rows = stripe.len(), "expanding stripe");
            for (i, row) in stripe {
                expand_row(csr, rows[i], row, transform)?;
            }
            Ok::<(), Error>(())
        })
    })?;

    Ok(out)
}
