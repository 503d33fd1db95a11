//! Error types for userkv

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    // === I/O Errors ===
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // === Store Errors ===
    #[error("Invalid userId format")]
    InvalidIdentifier(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Invalid JSON format: {0}")]
    MalformedBody(String),

    #[error("User not found")]
    NotFound(uuid::Uuid),

    // === Cluster Errors ===
    #[error("Channel send failed: {0}")]
    ChannelSend(String),

    #[error("Channel closed before {0}")]
    ChannelClosed(&'static str),

    #[error("Failed to launch worker {slot}: {reason}")]
    Launch { slot: usize, reason: String },

    // === Network Errors ===
    #[error("HTTP error: {0}")]
    Http(String),

    #[error("Upstream {endpoint} unreachable: {reason}")]
    Upstream { endpoint: String, reason: String },

    #[error("Request body exceeds {0} bytes")]
    PayloadTooLarge(usize),

    // === Config Errors ===
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),
}

impl Error {
    /// Convert to HTTP status code
    pub fn to_http_status(&self) -> StatusCode {
        match self {
            Error::InvalidIdentifier(_) | Error::InvalidInput(_) => StatusCode::BAD_REQUEST,
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            Error::InvalidConfig(_) | Error::Config(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.to_http_status();
        if status.is_server_error() {
            tracing::error!("Request failed: {}", self);
        }
        (status, axum::Json(json!({ "error": self.to_string() }))).into_response()
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        Error::Http(e.to_string())
    }
}
