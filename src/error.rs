//! error.rs – one error type for the whole load pipeline
//! =====================================================
//! Store-open failures, bad indices, allocation failures and worker pool
//! problems all surface as [`Error`].  Nothing in the crate retries: every
//! variant aborts the operation that produced it.

use thiserror::Error;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, Error>;

/// All errors that can occur while loading or using a dense dataset.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error opening or mapping the store.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The file does not start with an HDF5 signature.
    #[error("Invalid HDF5 signature, found {found:?}")]
    InvalidMagicNumber { found: Vec<u8> },

    /// File structure is invalid or outside the supported subset.
    #[error("Invalid file structure: {0}")]
    InvalidFileStructure(String),

    /// A read ran past the end of the file.
    #[error("Unexpected end of file")]
    UnexpectedEof,

    /// An expected dataset (or its group) is missing from the store.
    #[error("Dataset not found: {0}")]
    DatasetNotFound(String),

    /// Element type the reader cannot convert.
    #[error("Unsupported dtype: {0}")]
    UnsupportedDType(String),

    /// Storage layout the reader cannot assemble.
    #[error("Unsupported storage layout: {0}")]
    UnsupportedLayout(String),

    /// Chunk filter other than deflate or shuffle.
    #[error("Unsupported HDF5 filter id {0}")]
    UnsupportedFilter(u16),

    /// A deflate-compressed chunk failed to inflate.
    #[error("Decompression error: {0}")]
    Decompression(std::io::Error),

    /// The CSR triple is structurally inconsistent.
    #[error("Malformed CSR matrix: {0}")]
    MalformedCsr(String),

    /// A row index (selection, `get`, or a column inside a row) is out of bounds.
    #[error("Index {index} out of range for length {len}")]
    IndexOutOfRange { index: usize, len: usize },

    /// A random selection asked for more rows than the matrix holds.
    #[error("Cannot select {requested} rows from a matrix of {available}")]
    SelectionTooLarge { requested: usize, available: usize },

    /// The dense tensor could not be allocated.
    #[error("Cannot allocate a dense {rows} x {cols} tensor")]
    Allocation { rows: usize, cols: usize },

    /// Worker count must be at least one.
    #[error("Worker count must be at least 1, got {0}")]
    InvalidWorkerCount(usize),

    /// The worker thread pool could not be built.
    #[error("Thread pool error: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),

    /// The tracing subscriber could not be installed.
    #[error("Logging setup error: {0}")]
    Logging(String),
}

impl Error {
    /// True for failures raised while opening or reading the store.
    pub fn is_store_error(&self) -> bool {
        matches!(
            self,
            Error::Io(_)
                | Error::InvalidMagicNumber { .. }
                | Error::InvalidFileStructure(_)
                | Error::UnexpectedEof
                | Error::DatasetNotFound(_)
                | Error::UnsupportedDType(_)
                | Error::UnsupportedLayout(_)
                | Error::UnsupportedFilter(_)
                | Error::Decompression(_)
                | Error::MalformedCsr(_)
        )
    }
}
