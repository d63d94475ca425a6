//! Errors raised by the in-memory store.

use docmap_core::error::MapperError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum MemoryStoreError {
    /// A write would break the uniqueness of `_id` or of a unique index.
    #[error("Duplicate key in collection `{collection}`: {key}")]
    DuplicateKey { collection: String, key: String },
    #[error("Invalid filter: {0}")]
    InvalidFilter(String),
    #[error("Invalid update: {0}")]
    InvalidUpdate(String),
    /// An operator this store does not evaluate.
    #[error("Unsupported operator: {0}")]
    UnsupportedOperator(String),
}

pub type MemoryStoreResult<T> = Result<T, MemoryStoreError>;

impl From<MemoryStoreError> for MapperError {
    fn from(err: MemoryStoreError) -> Self {
        MapperError::driver(err)
    }
}
