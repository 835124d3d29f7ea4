//! Incremental units of a streamed result

use crate::error::{Error, Result};

/// One step of a streaming operation
///
/// The end of the sequence is the end of the stream that carries the deltas;
/// there is no explicit variant for it. After an `Error` delta no further
/// deltas are produced.
#[derive(Debug, Clone)]
pub enum Delta<T> {
    /// One incremental unit
    Data(T),
    /// The producer failed; terminal
    Error(Error),
}

impl<T> Delta<T> {
    /// Whether this delta carries a value
    pub fn is_data(&self) -> bool {
        matches!(self, Delta::Data(_))
    }

    /// Whether this delta is the terminal error
    pub fn is_error(&self) -> bool {
        matches!(self, Delta::Error(_))
    }

    /// Borrow the value, if any
    pub fn as_data(&self) -> Option<&T> {
        match self {
            Delta::Data(value) => Some(value),
            Delta::Error(_) => None,
        }
    }

    /// Convert into a `Result`
    pub fn into_result(self) -> Result<T> {
        match self {
            Delta::Data(value) => Ok(value),
            Delta::Error(error) => Err(error),
        }
    }

    /// Transform the carried value
    pub fn map<U, F>(self, f: F) -> Delta<U>
    where
        F: FnOnce(T) -> U,
    {
        match self {
            Delta::Data(value) => Delta::Data(f(value)),
            Delta::Error(error) => Delta::Error(error),
        }
    }
}

impl<T> From<Result<T>> for Delta<T> {
    fn from(result: Result<T>) -> Self {
        match result {
            Ok(value) => Delta::Data(value),
            Err(error) => Delta::Error(error),
        }
    }
}

impl<T: PartialEq> PartialEq<T> for Delta<T> {
    fn eq(&self, other: &T) -> bool {
        matches!(self, Delta::Data(value) if value == other)
    }
}
