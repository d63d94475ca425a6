//! Error types and result types for mapping operations.
//!
//! Every fallible operation in the mapper returns [`MapperResult<T>`]. Coercion and validation
//! errors are raised before any driver call is issued; driver errors are carried unmodified
//! inside [`MapperError::Driver`] so callers can inspect the original cause through
//! [`std::error::Error::source`].

use std::error::Error as StdError;

use bson::error::Error as BsonError;
use serde_json::Error as SerdeJsonError;
use thiserror::Error;

/// Represents all possible errors raised by the mapping engine.
#[derive(Error, Debug)]
pub enum MapperError {
    /// An atomic operation was applied to a field whose declared type cannot hold it.
    #[error("Can't use `{operator}` atomic operation for `{field_type}` type")]
    TypeMismatch {
        /// The store operator of the rejected operation (e.g. `$inc`).
        operator: String,
        /// The declared type of the target field.
        field_type: String,
    },
    /// A model or reference target has no usable mapping.
    #[error("Mapping error: {0}")]
    Mapping(String),
    /// The underlying store operation failed.
    #[error("Driver error: {0}")]
    Driver(#[source] Box<dyn StdError + Send + Sync>),
    /// A value could not be converted to the declared field type.
    #[error("Invalid value: {0}")]
    InvalidValue(String),
    /// The record is not in a state that allows the requested operation.
    #[error("Invalid state: {0}")]
    InvalidState(String),
    /// The driver does not support the requested operation.
    #[error("Unsupported operation: {0}")]
    Unsupported(String),
    /// Serialization/deserialization error when converting between document formats.
    #[error("Serialization error: {0}")]
    Serialization(String),
    /// Error during driver construction or connection setup.
    #[error("Initialization error: {0}")]
    Initialization(String),
}

impl MapperError {
    /// Wraps a driver failure without altering it.
    pub fn driver<E>(err: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        MapperError::Driver(Box::new(err))
    }

    pub(crate) fn type_mismatch(operator: impl Into<String>, field_type: impl ToString) -> Self {
        MapperError::TypeMismatch {
            operator: operator.into(),
            field_type: field_type.to_string(),
        }
    }
}

/// A specialized `Result` type for mapping operations.
pub type MapperResult<T> = Result<T, MapperError>;

impl From<BsonError> for MapperError {
    fn from(err: BsonError) -> Self {
        MapperError::Serialization(err.to_string())
    }
}

impl From<SerdeJsonError> for MapperError {
    fn from(err: SerdeJsonError) -> Self {
        MapperError::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Error)]
    #[error("connection reset")]
    struct Reset;

    #[test]
    fn type_mismatch_names_operator_and_type() {
        let err = MapperError::type_mismatch("$inc", "string");
        assert_eq!(err.to_string(), "Can't use `$inc` atomic operation for `string` type");
    }

    #[test]
    fn driver_errors_keep_their_source() {
        let err = MapperError::driver(Reset);
        let source = err.source().expect("driver error has a source");
        assert_eq!(source.to_string(), "connection reset");
    }
}
