//! Error types for the portal client

use reqwest::StatusCode;
use thiserror::Error;

/// Client error types
#[derive(Error, Debug)]
pub enum ClientError {
    /// The transport could not reach the backend at all.
    #[error("Cannot connect to backend. Please ensure the server is running at {origin}")]
    NetworkUnavailable {
        origin: String,
        #[source]
        source: reqwest::Error,
    },

    /// The backend answered with a non-2xx status.
    #[error("{detail}")]
    Api { status: StatusCode, detail: String },

    /// A 401 that the refresh token could not recover. The caller has to log in again.
    #[error("Session expired: {detail}")]
    AuthExpired { detail: String },

    #[error("Malformed response body (status {status}): {source}")]
    MalformedResponse {
        status: StatusCode,
        #[source]
        source: serde_json::Error,
    },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Storage error: {0}")]
    Storage(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Configuration(String),
}

/// Coarse classification callers branch on when deciding what to show the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NetworkUnavailable,
    ApiError,
    AuthExpired,
    MalformedResponse,
    /// Local failures: bad input, serialization, storage, configuration.
    Client,
}

impl ClientError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NetworkUnavailable { .. } => ErrorKind::NetworkUnavailable,
            Self::Api { .. } => ErrorKind::ApiError,
            Self::AuthExpired { .. } => ErrorKind::AuthExpired,
            Self::MalformedResponse { .. } => ErrorKind::MalformedResponse,
            Self::Serialization(_)
            | Self::InvalidRequest(_)
            | Self::Storage(_)
            | Self::Configuration(_) => ErrorKind::Client,
        }
    }

    /// HTTP status behind the error, if the backend produced one.
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Self::Api { status, .. } | Self::MalformedResponse { status, .. } => Some(*status),
            Self::AuthExpired { .. } => Some(StatusCode::UNAUTHORIZED),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, ClientError>;
