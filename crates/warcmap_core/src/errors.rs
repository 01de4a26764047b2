use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum WarcMapError {
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON: {0}")]
    SerdeJson(#[from] serde_json::Error),

    #[error("Argument error: {0}")]
    Argument(String),

    #[error("Input format '{name}' is not supported. Supported input formats are: {}", valid.join(", "))]
    UnsupportedFormat { name: String, valid: Vec<String> },

    #[error("malformed record at byte {offset}: {reason}")]
    MalformedRecord { offset: u64, reason: String },

    #[error("record at byte {offset} has no usable {field} header")]
    MissingIdentifier { offset: u64, field: String },

    #[error("split {split} failed after {attempts} attempt(s): {reason}")]
    WorkerFailure {
        split: usize,
        attempts: u32,
        reason: String,
    },

    #[error("sort input incomplete: {received} of {expected} splits accounted for")]
    IncompleteInput { expected: usize, received: usize },

    #[error("keys out of order: {prev:?} followed by {next:?}")]
    KeyOrder { prev: String, next: String },

    #[error("duplicate key {0:?}")]
    DuplicateKey(String),

    #[error("output path {} already exists", .0.display())]
    OutputExists(PathBuf),

    #[error("Bad magic or version")]
    BadHeader,

    #[error("Corrupt entry at byte {0}")]
    Corrupt(u64),
}

impl WarcMapError {
    pub fn malformed(offset: u64, reason: impl Into<String>) -> Self {
        Self::MalformedRecord {
            offset,
            reason: reason.into(),
        }
    }

    /// Failures a fresh attempt on the same split may not hit again.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Io(_))
    }

    /// Per-record failures, subject to the configured error policy.
    pub fn is_record_error(&self) -> bool {
        matches!(
            self,
            Self::MalformedRecord { .. } | Self::MissingIdentifier { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, WarcMapError>;
