//! Errors surfaced by the control-plane client.

use thiserror::Error;

/// Failures from a single control-plane call. Callers decide what's fatal;
/// this type only classifies.
#[derive(Debug, Error)]
pub enum ApiError {
    /// The request could not be sent or the response could not be read.
    #[error("http transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// The server returned a non-success status outside the cases each
    /// method treats specially (e.g. poll's 404).
    #[error("control plane returned {status}: {body}")]
    Status {
        status: reqwest::StatusCode,
        body: String,
    },

    /// The response body did not parse into the expected shape.
    #[error("failed to decode response: {0}")]
    Decode(#[from] serde_json::Error),
}
