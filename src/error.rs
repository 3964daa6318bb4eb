//! Error types for every layer of the service.
//!
//! Each subsystem gets its own `thiserror` enum so callers can match on the
//! failure they care about; the HTTP layer maps them onto status codes.

use std::path::PathBuf;
use thiserror::Error;

/// Failures while turning an upload into a report.
#[derive(Error, Debug)]
pub enum AnalysisError {
    /// The file could not be decoded as the format its name implies.
    #[error("Unable to parse file: {0}")]
    Parse(String),

    /// No rows, or no column matched a known parameter.
    #[error("No recognized water-quality parameters in file. Check the column names.")]
    NoRecognizedParameters,
}

impl AnalysisError {
    /// Stable identifier sent to API clients.
    pub fn kind(&self) -> &'static str {
        match self {
            AnalysisError::Parse(_) => "ParseError",
            AnalysisError::NoRecognizedParameters => "NoRecognizedParameters",
        }
    }
}

/// Failures of the optional pollution model.
#[derive(Error, Debug)]
pub enum ModelError {
    #[error("Failed to read model file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid model file {path}: {reason}")]
    Format { path: PathBuf, reason: String },

    #[error("Model expects {expected} features, got {actual}")]
    FeatureMismatch { expected: usize, actual: usize },

    #[error("Model produced a non-finite prediction")]
    NonFinite,
}

/// Failures of the persistent report snapshot.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Report snapshot I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("Report snapshot encoding failed: {0}")]
    Encode(#[from] bincode::Error),
}

/// Failures while rendering a report for download.
#[derive(Error, Debug)]
pub enum ExportError {
    #[error("PDF rendering failed: {0}")]
    Pdf(String),

    #[error("XLSX rendering failed: {0}")]
    Xlsx(#[from] rust_xlsxwriter::XlsxError),
}

/// Account and session failures.
#[derive(Error, Debug)]
pub enum AuthError {
    #[error("Incorrect username or password")]
    InvalidCredentials,

    #[error("Account is pending administrator approval")]
    PendingApproval,

    #[error("Missing or invalid bearer token")]
    Unauthenticated,

    #[error("Insufficient role for this operation")]
    Forbidden,

    #[error("Username already exists")]
    UsernameTaken,

    #[error("No such user: {0}")]
    UnknownUser(String),

    #[error("{0}")]
    InvalidInput(String),

    #[error("User database error: {0}")]
    Storage(String),
}

/// Failures while loading configuration files.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid config file {path}: {source}")]
    Format {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Unknown parameter in threshold overrides: {0}")]
    UnknownParameter(String),

    #[error("Invalid scoring policy: {0}")]
    InvalidPolicy(String),
}
