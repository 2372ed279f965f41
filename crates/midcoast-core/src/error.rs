use thiserror::Error;

/// Application-wide error types for Midcoast.
#[derive(Error, Debug)]
pub enum AppError {
    /// HTTP request failed (non-success status, unreadable body, bad URL).
    #[error("HTTP error: {0}")]
    HttpError(String),

    /// Network/connection error.
    #[error("Network error: {0}")]
    NetworkError(String),

    /// Request timed out.
    #[error("Request timed out after {0} seconds")]
    Timeout(u64),

    /// A listing or document could not be parsed into the expected shape.
    #[error("Parse error: {0}")]
    ParseError(String),

    /// The dedup ledger could not be read or written.
    #[error("Cache error: {0}")]
    CacheError(String),

    /// Filesystem operation failed.
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// JSON serialization/deserialization failed.
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// Invalid or missing configuration.
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// A collaborator could not enrich, score or persist a lead.
    #[error("Collaborator error: {0}")]
    CollaboratorError(String),

    /// Export to a file format failed.
    #[error("Export error: {0}")]
    ExportError(String),

    /// Report generation for a single lead failed.
    #[error("Report error: {0}")]
    ReportError(String),

    /// The requested operation is handled outside this system.
    #[error("Unsupported: {0}")]
    Unsupported(String),

    /// Generic error.
    #[error("{0}")]
    Generic(String),
}

impl AppError {
    /// Returns true if this error is transient and worth retrying.
    pub fn is_retryable(&self) -> bool {
        match self {
            AppError::NetworkError(_) | AppError::Timeout(_) => true,
            AppError::HttpError(msg) => {
                msg.contains("timeout") || msg.contains("connect") || msg.contains("reset")
            }
            _ => false,
        }
    }

    /// True for errors confined to one listing. Anything else aborts the
    /// current source's run.
    pub fn is_item_level(&self) -> bool {
        matches!(self, AppError::ParseError(_))
    }

    /// Short machine-friendly label used in run summaries.
    pub fn kind(&self) -> &'static str {
        match self {
            AppError::HttpError(_) => "http",
            AppError::NetworkError(_) => "network",
            AppError::Timeout(_) => "timeout",
            AppError::ParseError(_) => "parse",
            AppError::CacheError(_) => "cache",
            AppError::IoError(_) => "io",
            AppError::SerializationError(_) => "serialization",
            AppError::ConfigError(_) => "config",
            AppError::CollaboratorError(_) => "collaborator",
            AppError::ExportError(_) => "export",
            AppError::ReportError(_) => "report",
            AppError::Unsupported(_) => "unsupported",
            AppError::Generic(_) => "generic",
        }
    }
}
