//! Errors in the library.
use thiserror::Error;

/// Errors in the library.
///
/// A learning step that fails with one of these errors has not modified
/// any network parameter or optimizer state.
#[derive(Error, Debug, PartialEq)]
pub enum AcerError {
    /// A transition sequence is missing a field or has an unexpected shape.
    #[error("Malformed batch: {0}")]
    MalformedBatch(String),

    /// Non-finite values were found in distribution parameters, losses or gradients.
    #[error("Numerical instability: non-finite values in {0}")]
    NumericalInstability(String),

    /// The configuration is inconsistent.
    #[error("Configuration mismatch: {0}")]
    ConfigMismatch(String),

    /// Record key error.
    #[error("Record key error: {0}")]
    RecordKeyError(String),
}
