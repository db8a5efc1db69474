//! lib.rs – public API & orchestration layer
//! ==========================================
//! Loads a cells × genes expression matrix stored as a CSR triple in an
//! HDF5 file (10x Genomics layout) into a dense, row‑addressable tensor.
//!
//! * Sparse reader            → `SparseStore`           store.rs / hdf5.rs
//! * Cell selection           → `Selection`             select.rs
//! * Row expansion            → `expand_row()`          expand.rs
//! * Parallel tensor builder  → `build_dense()`         build.rs
//! * Dense dataset & rescale  → `DenseDataset`          dataset.rs
//!
//! ```no_run
//! use scdense::{DenseDataset, LoadOptions};
//!
//! let opts = LoadOptions::new().log1p(true).workers(8);
//! let mut ds = DenseDataset::load("GSE93421_brain_aggregate_matrix.hdf5", &opts)?;
//! scdense::rescale(&mut ds);
//! println!("{} cells x {} genes", ds.len(), ds.n_features());
//! # Ok::<(), scdense::Error>(())
//! ```
//!
//! -------------------------------------------------------------------------
//! Copyright © 2025 Scott Furlan – MIT OR Apache‑2.0.

// ---- project modules ----------------------------------------------------
pub mod build;
pub mod config;
pub mod csr;
pub mod dataset;
pub mod error;
pub mod expand;
pub mod hdf5;
pub mod logging;
pub mod select;
pub mod store;

pub use build::build_dense;
pub use config::LoadOptions;
pub use csr::CsrMatrix;
pub use dataset::{rescale, DenseDataset};
pub use error::{Error, Result};
pub use expand::{expand_row, Transform};
pub use select::Selection;
pub use store::SparseStore;
