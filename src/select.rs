//! select.rs  –  which cells to materialise
//! ========================================
//! A [`Selection`] resolves to a concrete, ordered list of source rows.  Its
//! length becomes the leading dimension of the dense tensor.  Every index is
//! checked against the row count before anything is allocated; duplicates
//! and arbitrary orderings are kept as given.

use rand::rngs::StdRng;
use rand::seq::index::sample;
use rand::SeedableRng;

use crate::error::{Error, Result};

/// Rows of the source matrix to expand, in output order.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Selection {
    /// Every row, `0..n_rows`.
    #[default]
    All,
    /// An explicit list; may repeat rows or use any order.
    Rows(Vec<usize>),
    /// `amount` distinct rows drawn uniformly with a fixed seed.
    Random { amount: usize, seed: u64 },
}

impl Selection {
    pub fn random(amount: usize, seed: u64) -> Self {
        Selection::Random { amount, seed }
    }

    /// Concrete row list for a matrix with `n_rows` rows.
    pub fn resolve(&self, n_rows: usize) -> Result<Vec<usize>> {
        match self {
            Selection::All => Ok((0..n_rows).collect()),
            Selection::Rows(rows) => {
                if let Some(&bad) = rows.iter().find(|&&r| r >= n_rows) {
                    return Err(Error::IndexOutOfRange { index: bad, len: n_rows });
                }
                Ok(rows.clone())
            }
            Selection::Random { amount, seed } => {
                if *amount > n_rows {
                    return Err(Error::SelectionTooLarge { requested: *amount, available: n_rows });
                }
                let mut rng = StdRng::seed_from_u64(*seed);
                Ok(sample(&mut rng, n_rows, *amount).into_vec())
            }
        }
    }

    /// Output row count without materialising the list.
    pub fn len(&self, n_rows: usize) -> usize {
        match self {
            Selection::All => n_rows,
            Selection::Rows(rows) => rows.len(),
            Selection::Random { amount, .. } => *amount,
        }
    }
}

impl From<Vec<usize>> for Selection {
    fn from(rows: Vec<usize>) -> Self {
        Selection::Rows(rows)
    }
}

impl From<Option<Vec<usize>>> for Selection {
    fn from(rows: Option<Vec<usize>>) -> Self {
        rows.map_or(Selection::All, Selection::Rows)
    }
}
