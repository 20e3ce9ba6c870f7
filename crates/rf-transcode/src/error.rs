//! Error types for album transcoding

use thiserror::Error;

/// Transcoding errors
#[derive(Error, Debug)]
pub enum TranscodeError {
    #[error("Failed to read source {name}: {reason}")]
    FileRead { name: String, reason: String },

    #[error("Failed to decode source {name}: {reason}")]
    Decode { name: String, reason: String },

    #[error("Encoding error: {0}")]
    Encode(String),

    #[error("Source {name} is {size} bytes, exceeds limit of {limit} bytes")]
    SizeLimit { name: String, size: u64, limit: u64 },

    #[error("Conversion already in progress for {0}")]
    Concurrency(String),

    #[error("Archive assembly failed: {0}")]
    Archive(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl TranscodeError {
    /// Faults isolated to a single source; the job skips the source and continues
    pub fn is_source_fault(&self) -> bool {
        matches!(
            self,
            Self::FileRead { .. } | Self::Decode { .. } | Self::Encode(_)
        )
    }

    pub(crate) fn decode(name: impl Into<String>, reason: impl ToString) -> Self {
        Self::Decode {
            name: name.into(),
            reason: reason.to_string(),
        }
    }
}

impl From<zip::result::ZipError> for TranscodeError {
    fn from(err: zip::result::ZipError) -> Self {
        Self::Archive(err.to_string())
    }
}

/// Result type for transcoding operations
pub type TranscodeResult<T> = Result<T, TranscodeError>;
