//! Error taxonomy shared by every utmforge crate.

use std::fmt;
use thiserror::Error;

pub type UtmforgeResult<T> = Result<T, UtmforgeError>;

/// Errors raised while building an image.
///
/// The pipeline never inspects these beyond presence; the variant exists so
/// operators and callers can tell configuration mistakes from driver or
/// network failures.
#[derive(Debug, Error)]
pub enum UtmforgeError {
    /// Invalid operator configuration. Never retried.
    #[error("configuration error: {0}")]
    Config(String),

    /// An automation command or version query failed.
    #[error("driver error: {0}")]
    Driver(String),

    /// The driver reported success but its output broke the expected contract.
    #[error("contract violation: {0}")]
    Contract(String),

    /// Transient transport failure while fetching an artifact.
    #[error("network error: {0}")]
    Network(String),

    /// Fetch failed in a way retrying will not fix (e.g. HTTP 404).
    #[error("fetch failed: {0}")]
    Fetch(String),

    #[error("checksum mismatch for {path}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        path: String,
        expected: String,
        actual: String,
    },

    #[error("storage error: {0}")]
    Storage(String),

    #[error("unsupported: {0}")]
    Unsupported(String),

    #[error("build cancelled")]
    Cancelled,

    /// Programming error, e.g. a step read a state key that was never written.
    #[error("internal error: {0}")]
    Internal(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl UtmforgeError {
    /// Whether retrying the same operation may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, UtmforgeError::Network(_))
    }

    /// Prefix the message with `context`, keeping the variant.
    ///
    /// I/O errors become [`UtmforgeError::Storage`]. Cancellation and
    /// checksum mismatches carry no free-form message and pass through.
    pub fn context(self, context: impl fmt::Display) -> Self {
        use UtmforgeError::*;
        match self {
            Config(m) => Config(format!("{}: {}", context, m)),
            Driver(m) => Driver(format!("{}: {}", context, m)),
            Contract(m) => Contract(format!("{}: {}", context, m)),
            Network(m) => Network(format!("{}: {}", context, m)),
            Fetch(m) => Fetch(format!("{}: {}", context, m)),
            Storage(m) => Storage(format!("{}: {}", context, m)),
            Unsupported(m) => Unsupported(format!("{}: {}", context, m)),
            Internal(m) => Internal(format!("{}: {}", context, m)),
            Io(e) => Storage(format!("{}: {}", context, e)),
            other @ (ChecksumMismatch { .. } | Cancelled) => other,
        }
    }
}
