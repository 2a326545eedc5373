//! Error types for the OpenStack client.

use thiserror::Error;

/// Result type alias for cloud API operations.
pub type CloudResult<T> = Result<T, CloudError>;

/// Errors that can occur while talking to the cloud APIs.
#[derive(Debug, Error)]
pub enum CloudError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("{url} returned {status}: {message}")]
    Status {
        status: u16,
        url: String,
        message: String,
    },

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("no {service} endpoint in catalog: {detail}")]
    Endpoint { service: String, detail: String },

    #[error("invalid url: {0}")]
    Url(String),

    #[error("decode error: {0}")]
    Decode(String),
}

impl From<serde_json::Error> for CloudError {
    fn from(e: serde_json::Error) -> Self {
        CloudError::Decode(e.to_string())
    }
}
