//! config.rs  –  construction parameters for a dense load

use crate::expand::Transform;
use crate::select::Selection;
use crate::store::{DEFAULT_FEATURE_KEY, DEFAULT_GROUP};

/// Options controlling [`DenseDataset::load`](crate::DenseDataset::load).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadOptions {
    pub group: String,          // HDF5 group holding the CSR arrays (default "mm10")
    pub feature_key: String,    // dataset under `group` sized by the gene count
    pub transform: Transform,   // identity or log1p, applied to every value
    pub workers: usize,         // worker threads for the build (default 1)
    pub selection: Selection,   // rows to materialise (default all)
    pub silent: bool,           // demote progress narration to debug
}

impl Default for LoadOptions {
    fn default() -> Self {
        Self {
            group: DEFAULT_GROUP.to_string(),
            feature_key: DEFAULT_FEATURE_KEY.to_string(),
            transform: Transform::Identity,
            workers: 1,
            selection: Selection::All,
            silent: false,
        }
    }
}

impl LoadOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn group(mut self, group: impl Into<String>) -> Self {
        self.group = group.into();
        self
    }

    pub fn feature_key(mut self, key: impl Into<String>) -> Self {
        self.feature_key = key.into();
        self
    }

    pub fn transform(mut self, transform: Transform) -> Self {
        self.transform = transform;
        self
    }

    /// Shorthand for `transform(Transform::Log1p)` when `on`.
    pub fn log1p(self, on: bool) -> Self {
        self.transform(if on { Transform::Log1p } else { Transform::Identity })
    }

    pub fn workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub fn selection(mut self, selection: impl Into<Selection>) -> Self {
        self.selection = selection.into();
        self
    }

    pub fn silent(mut self, silent: bool) -> Self {
        self.silent = silent;
        self
    }
}
