//! Notebook server client error types.

use thiserror::Error;

/// Result type for notebook server operations.
pub type JupyterResult<T> = Result<T, JupyterError>;

/// Errors that can occur talking to the notebook server's REST API.
#[derive(Debug, Error)]
pub enum JupyterError {
    /// HTTP request failed.
    #[error("HTTP request failed: {0}")]
    RequestFailed(#[from] reqwest::Error),

    /// The server answered with a non-success status.
    #[error("Jupyter server returned {status} for {url}: {body}")]
    Status {
        status: u16,
        url: String,
        body: String,
    },

    /// Failed to parse response.
    #[error("Failed to parse response: {0}")]
    ParseError(String),

    /// Connection failed.
    #[error("Failed to connect to Jupyter server at {url}: {message}")]
    ConnectionFailed { url: String, message: String },
}

impl JupyterError {
    /// Whether the server reported the resource as missing.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Status { status: 404, .. })
    }
}
