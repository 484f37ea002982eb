//! Error type shared by sketches, datasets and the remote worker.
//!
//! Errors fall in two families:
//! - specification errors: the request is rejected before any data is
//!   scanned (bad parameters, mismatched bucket descriptors, unknown columns);
//! - execution errors: something failed while a scan, merge or transport was
//!   in progress.  These terminate a partial-result stream.

use thiserror::Error as ThisError;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(ThisError, Debug, Clone, PartialEq)]
pub enum Error {
    /// A sketch or dataset parameter is out of its supported range.
    #[error("invalid parameter `{name}`: {reason}")]
    InvalidParameter { name: &'static str, reason: String },

    /// Two histograms built over different bucket descriptors were added.
    #[error("cannot merge results built with different bucket descriptors")]
    BucketsMismatch,

    /// Two results were produced by differently configured sketches.
    #[error("incompatible results: {0}")]
    IncompatibleResults(String),

    /// The table has no column with this name.
    #[error("unknown column `{0}`")]
    UnknownColumn(String),

    /// The column exists but holds values of the wrong kind.
    #[error("column `{column}` has kind {actual}, expected {expected}")]
    ColumnKind {
        column: String,
        actual: String,
        expected: String,
    },

    /// Datasets combined positionally do not have the same shape.
    #[error("dataset shapes differ: {0}")]
    ShapeMismatch(String),

    /// The operation cannot be shipped to a remote worker.
    #[error("operation `{0}` cannot be sent to a remote worker")]
    NotRemotable(String),

    /// A `create`, `apply` or `add` call failed.
    #[error("execution failed: {0}")]
    Execution(String),

    /// User code panicked inside a dataset leaf.
    #[error("computation panicked: {0}")]
    Panicked(String),

    /// The producer of a stream went away before sending a terminal signal.
    #[error("disconnected: {0}")]
    Disconnected(String),

    /// Error text relayed verbatim from a remote worker.
    #[error("remote worker failed: {0}")]
    Remote(String),

    /// The worker registry has no dataset with this id.
    #[error("unknown dataset id {0}")]
    UnknownDataSet(u64),

    /// The worker has no handler registered under this name.
    #[error("no handler registered for operation `{0}`")]
    UnknownOperation(String),

    /// A caller supplied deadline elapsed before the stream finished.
    #[error("deadline exceeded")]
    DeadlineExceeded,

    /// The stream was cancelled before it produced a terminal signal.
    #[error("cancelled")]
    Cancelled,

    #[error("serialization error: {0}")]
    Serialization(String),
}

impl Error {
    /// Shorthand for [`Error::InvalidParameter`].
    pub fn invalid(name: &'static str, reason: impl Into<String>) -> Self {
        Error::InvalidParameter {
            name,
            reason: reason.into(),
        }
    }

    /// True when the error rejected the request before any work was done.
    pub fn is_specification(&self) -> bool {
        matches!(
            self,
            Error::InvalidParameter { .. }
                | Error::BucketsMismatch
                | Error::IncompatibleResults(_)
                | Error::UnknownColumn(_)
                | Error::ColumnKind { .. }
                | Error::ShapeMismatch(_)
                | Error::NotRemotable(_)
        )
    }
}

impl From<serde_json::Error> for Error {
    fn from(source: serde_json::Error) -> Self {
        Error::Serialization(source.to_string())
    }
}

#[cfg(test)]
pub mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case(Error::invalid("precision", "must be in [4, 16]") => true)]
    #[test_case(Error::BucketsMismatch => true)]
    #[test_case(Error::UnknownColumn("x".into()) => true)]
    #[test_case(Error::Execution("boom".into()) => false)]
    #[test_case(Error::Disconnected("worker".into()) => false)]
    #[test_case(Error::DeadlineExceeded => false)]
    #[test_case(Error::Cancelled => false)]
    fn test_is_specification(e: Error) -> bool {
        e.is_specification()
    }

    #[test]
    fn test_display() {
        let e = Error::invalid("precision", "got 20");
        assert_eq!(e.to_string(), "invalid parameter `precision`: got 20");
    }
}
