//! Error types for the benchmark harness.
//!
//! Configuration problems ([`BlockSpecError`], unknown methods, bad tags) are
//! raised before any timed work starts. [`EpochError`] carries whatever the
//! data source failed with, untouched.

use std::io;

use thiserror::Error;

/// Result type for harness operations that don't involve a data source.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors from parsing or constructing a [`crate::block_spec::BlockSpec`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BlockSpecError {
    #[error("malformed block spec: {0:?}")]
    Malformed(String),

    #[error("non-integral chunk division: {block_size} is not divisible by {divisor}")]
    NonIntegral { block_size: u64, divisor: u64 },

    #[error(
        "conflicting block spec: chunk_size={chunk_size} x chunks_per_block={chunks_per_block} != block_size={block_size}"
    )]
    Conflicting {
        chunk_size: u64,
        chunks_per_block: u64,
        block_size: u64,
    },

    #[error("block spec field {0} must be positive")]
    Zero(&'static str),

    #[error("block spec needs at least two of chunk_size, chunks_per_block, block_size")]
    Underspecified,

    #[error("block spec overflows: {chunk_size} x {chunks_per_block}")]
    Overflow { chunk_size: u64, chunks_per_block: u64 },
}

/// Errors raised while timing one epoch over a data source.
#[derive(Error, Debug)]
pub enum EpochError<E> {
    /// The data source failed; propagated as-is.
    #[error(transparent)]
    Source(E),

    #[error("no rows read in epoch; per-sample rates are undefined")]
    NoRows,

    #[error("batch size must be positive")]
    ZeroBatchSize,

    #[error("unexpected batch shape at index {index}: {reason}")]
    UnexpectedShape { index: u64, reason: String },
}

/// Errors from the persisted results table.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("io error: {0}")]
    Io(#[from] io::Error),

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid table name: {0:?}")]
    InvalidTableName(String),

    #[error("malformed table file: {0}")]
    Malformed(String),
}

/// Errors from the synthetic dataset file and the loader reading it.
#[derive(Error, Debug)]
pub enum DatasetError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    #[error("encoding error: {0}")]
    Encoding(#[from] bincode::Error),

    #[error("invalid magic bytes: {0:?}")]
    BadMagic([u8; 8]),

    #[error("unsupported dataset format version: {0}")]
    UnsupportedVersion(u32),

    #[error("corrupt dataset: {0}")]
    Corrupt(String),
}

/// Top-level error for the benchmark suites.
#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    BlockSpec(#[from] BlockSpecError),

    #[error("unknown representation method: {0:?} (dense|coo|csr)")]
    UnknownMethod(String),

    #[error("number of epochs must be positive")]
    ZeroEpochs,

    #[error("invalid tag {0:?}: expected <key>=<value>")]
    InvalidTag(String),

    #[error("{method} read {got} elements, expected {expected}")]
    ReadMismatch {
        method: String,
        expected: u64,
        got: u64,
    },

    #[error(transparent)]
    Epoch(#[from] EpochError<DatasetError>),

    #[error(transparent)]
    Dataset(#[from] DatasetError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("io error: {0}")]
    Io(#[from] io::Error),
}
