//! Error types for the indexing pipeline

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Result type alias for indexer operations
pub type Result<T> = std::result::Result<T, Error>;

/// Indexer errors
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error (fatal at startup)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Source file could not be read or is not a valid document
    #[error("Failed to load '{path}': {message}")]
    Load { path: String, message: String },

    /// Document metadata could not be extracted (non-fatal, defaults apply)
    #[error("Failed to read metadata of '{path}': {message}")]
    Metadata { path: String, message: String },

    /// Record ledger read/write failure
    #[error("Ledger error: {0}")]
    Ledger(String),

    /// Embedding provider failure for one or more chunks
    #[error("Embedding failed for {} chunk(s): {message}", failed_ids.len())]
    Embedding {
        failed_ids: Vec<String>,
        message: String,
    },

    /// Vector store write/delete failure
    #[error("Vector store error: {0}")]
    VectorStore(String),

    /// Moving a source file into the processed folder failed
    #[error("Failed to archive '{path}': {message}")]
    Archive { path: String, message: String },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// TOML config parse error
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    /// HTTP request error
    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    /// Malformed API request
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a load error
    pub fn load(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Load {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Create a metadata error
    pub fn metadata(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Metadata {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Create a ledger error
    pub fn ledger(message: impl Into<String>) -> Self {
        Self::Ledger(message.into())
    }

    /// Create an embedding error for the given chunk identifiers
    pub fn embedding(failed_ids: Vec<String>, message: impl Into<String>) -> Self {
        Self::Embedding {
            failed_ids,
            message: message.into(),
        }
    }

    /// Create a vector store error
    pub fn vector_store(message: impl Into<String>) -> Self {
        Self::VectorStore(message.into())
    }

    /// Create an archive error
    pub fn archive(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Archive {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Create an internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Whether a later pass may succeed where this one failed.
    ///
    /// Only configuration errors are permanent; every other failure leaves the
    /// source file pending for the next trigger.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Error::Config(_))
    }

    /// Short machine-readable category, used in reports and HTTP bodies
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Config(_) => "config_error",
            Error::Load { .. } => "load_error",
            Error::Metadata { .. } => "metadata_error",
            Error::Ledger(_) => "ledger_error",
            Error::Embedding { .. } => "embedding_error",
            Error::VectorStore(_) => "vector_store_error",
            Error::Archive { .. } => "archive_error",
            Error::Io(_) => "io_error",
            Error::Json(_) => "json_error",
            Error::Toml(_) => "toml_error",
            Error::Http(_) => "http_error",
            Error::InvalidRequest(_) => "invalid_request",
            Error::Internal(_) => "internal_error",
        }
    }
}

impl From<rusqlite::Error> for Error {
    fn from(err: rusqlite::Error) -> Self {
        Error::Ledger(err.to_string())
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = match &self {
            Error::Config(_) | Error::Json(_) | Error::Toml(_) | Error::InvalidRequest(_) => {
                StatusCode::BAD_REQUEST
            }
            Error::Load { .. } | Error::Metadata { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            Error::Embedding { .. } | Error::Http(_) => StatusCode::BAD_GATEWAY,
            Error::Ledger(_)
            | Error::VectorStore(_)
            | Error::Archive { .. }
            | Error::Io(_)
            | Error::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let mut body = json!({
            "error": {
                "type": self.kind(),
                "message": self.to_string(),
            }
        });

        if let Error::Embedding { failed_ids, .. } = &self {
            body["error"]["failed_ids"] = json!(failed_ids);
        }

        (status, Json(body)).into_response()
    }
}
