//! Error types for levelgrid.
//!
//! Library crates use [`LevelGridError`] via `thiserror`.
//! App crates (cli) wrap this with `color-eyre` for rich diagnostics.

use std::path::PathBuf;

/// Top-level error type for all levelgrid operations.
#[derive(Debug, thiserror::Error)]
pub enum LevelGridError {
    /// Configuration loading or validation error.
    #[error("config error: {message}")]
    Config { message: String },

    /// Input validation error (text too short, grid below minimums).
    /// The message is written for end users and passed through unchanged.
    #[error("validation error: {message}")]
    Validation { message: String },

    /// A structured response could not be decoded into the expected shape.
    #[error("parse error: {message}")]
    Parse { message: String },

    /// Generation service returned a non-transient failure.
    #[error("generation error: {0}")]
    Generation(String),

    /// Generation service rate limit (HTTP 429).
    #[error("generation service rate limited")]
    RateLimited,

    /// Account quota exhausted on the generation service.
    #[error("generation service quota exceeded")]
    QuotaExceeded,

    /// A call to the generation service timed out.
    #[error("generation service request timed out")]
    Timeout,

    /// The generation service could not be reached.
    #[error("connection error: {0}")]
    Connection(String),

    /// Database or storage layer error.
    #[error("storage error: {0}")]
    Storage(String),

    /// A referenced record does not exist.
    #[error("{what} not found")]
    NotFound { what: String },

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Run aborted by a cancellation request.
    #[error("run cancelled")]
    Cancelled,
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, LevelGridError>;

impl LevelGridError {
    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create a validation error from any displayable message.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
        }
    }

    /// Create a parse error from any displayable message.
    pub fn parse(msg: impl Into<String>) -> Self {
        Self::Parse {
            message: msg.into(),
        }
    }

    /// Create a storage error from any displayable message.
    pub fn storage(msg: impl Into<String>) -> Self {
        Self::Storage(msg.into())
    }

    /// Create a not-found error naming the missing record.
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound { what: what.into() }
    }

    /// Wrap a `std::io::Error` with a path for context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// The sanitized message surfaced to external callers in run status.
    ///
    /// Raw error detail goes to logs only; callers see a fixed category
    /// message, except validation errors which are user-facing already.
    pub fn user_message(&self) -> String {
        match self {
            Self::Validation { message } => message.clone(),
            Self::RateLimited => {
                "Service temporarily busy. Please try again in a few moments.".into()
            }
            Self::QuotaExceeded => "Service quota exceeded. Please contact support.".into(),
            Self::Timeout => "Request timed out. Please try again.".into(),
            Self::Connection(_) => "Could not connect to AI service. Please try again.".into(),
            Self::Generation(_) => "AI service error. Please try again later.".into(),
            Self::Parse { .. } => {
                "Failed to process file structure. Please try a different file format.".into()
            }
            Self::Storage(_) => "Failed to save results. Please try again.".into(),
            Self::Cancelled => "Processing was cancelled.".into(),
            Self::NotFound { what } => format!("{what} not found."),
            Self::Config { .. } | Self::Io { .. } => {
                "An unexpected error occurred. Please try again or contact support.".into()
            }
        }
    }
}
