use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RelationsError {
    #[error("transfer failed for {url}: {source}")]
    Transfer {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("archive size mismatch: expected={expected}, actual={actual}")]
    Integrity { expected: u64, actual: u64 },

    #[error("dataset file not found after extraction: {}", path.display())]
    MissingDatasetFile { path: PathBuf },

    #[error("malformed record at {}:{line_number}: {line}", path.display())]
    MalformedRecord {
        path: PathBuf,
        line_number: usize,
        line: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to extract archive {}: {message}", path.display())]
    Archive { path: PathBuf, message: String },

    #[error("I/O error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("background task failed: {0}")]
    Worker(String),
}

impl RelationsError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Pipeline stage that produced the error, used as a log field.
    pub fn stage(&self) -> &'static str {
        match self {
            Self::Transfer { .. } => "acquire",
            Self::Integrity { .. } => "verify",
            Self::MissingDatasetFile { .. } | Self::Archive { .. } => "extract",
            Self::MalformedRecord { .. } => "parse",
            Self::Io { .. } => "io",
            Self::Worker(_) => "index",
        }
    }
}

pub type Result<T> = std::result::Result<T, RelationsError>;
