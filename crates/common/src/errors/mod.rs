//! Error types for ProposalForge services
//!
//! Provides the pipeline error taxonomy with:
//! - Distinct error kinds for validation, retrieval, generation and configuration
//! - Mode/stage tagging added by the dispatcher without changing the kind
//! - HTTP status code mapping and structured error responses

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Result type alias using AppError
pub type Result<T> = std::result::Result<T, AppError>;

/// Error codes for machine-readable error identification
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // Validation errors (1xxx)
    ValidationError,
    UnknownMode,
    MissingArgument,

    // Retrieval errors (4xxx)
    RetrievalError,

    // Generation errors (8xxx)
    GenerationError,
    UpstreamError,

    // Internal errors (9xxx)
    InternalError,
    ConfigurationError,
    SerializationError,
}

impl ErrorCode {
    /// Get the numeric code for this error
    pub fn as_code(&self) -> u16 {
        match self {
            ErrorCode::ValidationError => 1001,
            ErrorCode::UnknownMode => 1002,
            ErrorCode::MissingArgument => 1003,

            ErrorCode::RetrievalError => 4001,

            ErrorCode::GenerationError => 8001,
            ErrorCode::UpstreamError => 8002,

            ErrorCode::InternalError => 9001,
            ErrorCode::ConfigurationError => 9002,
            ErrorCode::SerializationError => 9003,
        }
    }
}

/// Pipeline stage an error originated in
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStage {
    Dispatch,
    QueryExpansion,
    Retrieval,
    Citation,
    Schema,
    Generation,
    Rendering,
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PipelineStage::Dispatch => "dispatch",
            PipelineStage::QueryExpansion => "query_expansion",
            PipelineStage::Retrieval => "retrieval",
            PipelineStage::Citation => "citation",
            PipelineStage::Schema => "schema",
            PipelineStage::Generation => "generation",
            PipelineStage::Rendering => "rendering",
        };
        f.write_str(name)
    }
}

/// Application error types
#[derive(Error, Debug)]
pub enum AppError {
    // Validation errors
    #[error("Validation failed: {message}")]
    Validation {
        message: String,
        field: Option<String>,
    },

    #[error("Unknown mode '{mode}'; registered modes: {}", .available.join(", "))]
    UnknownMode { mode: String, available: Vec<String> },

    #[error("Required argument missing: {field}")]
    MissingArgument { field: String },

    // Retrieval errors
    #[error("Retrieval failed on index '{index}': {message}")]
    Retrieval { index: String, message: String },

    // Generation errors
    #[error("Generation failed after {attempts} attempt(s): {reason}")]
    Generation { reason: String, attempts: u32 },

    #[error("HTTP client error: {0}")]
    HttpClient(#[from] reqwest::Error),

    // Internal errors
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {message}")]
    Internal { message: String },

    // Dispatcher tag
    #[error("[mode={mode} stage={stage}] {source}")]
    Stage {
        mode: String,
        stage: PipelineStage,
        #[source]
        source: Box<AppError>,
    },
}

impl AppError {
    /// Shorthand for a validation error without a field
    pub fn validation(message: impl Into<String>) -> Self {
        AppError::Validation {
            message: message.into(),
            field: None,
        }
    }

    /// Shorthand for a configuration error
    pub fn configuration(message: impl Into<String>) -> Self {
        AppError::Configuration {
            message: message.into(),
        }
    }

    /// Tag this error with the mode and stage it surfaced in.
    ///
    /// Already-tagged errors keep their original tag.
    pub fn in_stage(self, mode: &str, stage: PipelineStage) -> Self {
        match self {
            tagged @ AppError::Stage { .. } => tagged,
            other => AppError::Stage {
                mode: mode.to_string(),
                stage,
                source: Box::new(other),
            },
        }
    }

    /// The underlying error with any stage tag removed
    pub fn root(&self) -> &AppError {
        match self {
            AppError::Stage { source, .. } => source.root(),
            other => other,
        }
    }

    /// The stage tag, if one was attached
    pub fn stage(&self) -> Option<PipelineStage> {
        match self {
            AppError::Stage { stage, .. } => Some(*stage),
            _ => None,
        }
    }

    /// Get the error code for this error
    pub fn code(&self) -> ErrorCode {
        match self.root() {
            AppError::Validation { .. } => ErrorCode::ValidationError,
            AppError::UnknownMode { .. } => ErrorCode::UnknownMode,
            AppError::MissingArgument { .. } => ErrorCode::MissingArgument,
            AppError::Retrieval { .. } => ErrorCode::RetrievalError,
            AppError::Generation { .. } => ErrorCode::GenerationError,
            AppError::HttpClient(_) => ErrorCode::UpstreamError,
            AppError::Configuration { .. } => ErrorCode::ConfigurationError,
            AppError::Serialization(_) => ErrorCode::SerializationError,
            AppError::Internal { .. } | AppError::Stage { .. } => ErrorCode::InternalError,
        }
    }

    /// Whether this is a bad request rather than a backend failure
    pub fn is_validation(&self) -> bool {
        matches!(
            self.root(),
            AppError::Validation { .. } | AppError::UnknownMode { .. } | AppError::MissingArgument { .. }
        )
    }

    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self.root() {
            // 400 Bad Request
            AppError::Validation { .. }
            | AppError::UnknownMode { .. }
            | AppError::MissingArgument { .. } => StatusCode::BAD_REQUEST,

            // 502 Bad Gateway
            AppError::Retrieval { .. }
            | AppError::Generation { .. }
            | AppError::HttpClient(_) => StatusCode::BAD_GATEWAY,

            // 500 Internal Server Error
            AppError::Configuration { .. }
            | AppError::Serialization(_)
            | AppError::Internal { .. }
            | AppError::Stage { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Check if this error should be logged at error level
    pub fn is_server_error(&self) -> bool {
        self.status_code().is_server_error()
    }

    /// Check if this error is a client error
    pub fn is_client_error(&self) -> bool {
        self.status_code().is_client_error()
    }

    fn details(&self) -> Option<serde_json::Value> {
        let mut details = serde_json::Map::new();
        if let AppError::Stage { mode, stage, .. } = self {
            details.insert("mode".into(), mode.clone().into());
            details.insert("stage".into(), stage.to_string().into());
        }
        if let AppError::UnknownMode { available, .. } = self.root() {
            details.insert("available_modes".into(), available.clone().into());
        }
        if details.is_empty() {
            None
        } else {
            Some(serde_json::Value::Object(details))
        }
    }
}

/// Structured error response for API
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: ErrorDetails,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorDetails {
    pub code: ErrorCode,
    pub numeric_code: u16,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let code = self.code();
        let message = self.to_string();

        // Log based on severity
        if self.is_server_error() {
            tracing::error!(
                error = %message,
                code = ?code,
                status = status.as_u16(),
                "Server error"
            );
        } else if self.is_client_error() {
            tracing::warn!(
                error = %message,
                code = ?code,
                status = status.as_u16(),
                "Client error"
            );
        }

        let body = ErrorResponse {
            error: ErrorDetails {
                code,
                numeric_code: code.as_code(),
                message,
                details: self.details(),
            },
        };

        (status, Json(body)).into_response()
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::Internal {
            message: err.to_string(),
        }
    }
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::Configuration {
            message: err.to_string(),
        }
    }
}
