//! Error types shared across the agent-core boundary.

use thiserror::Error;

/// Errors surfaced by `agent-core`.
#[derive(Debug, Error)]
pub enum CoreError {
    /// The provider token was not supplied via CLI, env, or config file.
    #[error("missing provider token: pass --token, set GP4U_PROVIDER_TOKEN, or add it to the config file")]
    MissingToken,

    /// The config file exists but could not be parsed.
    #[error("failed to read config file {path}: {source}")]
    ConfigRead {
        /// Path to the offending config file.
        path: String,
        /// Underlying I/O or parse error.
        #[source]
        source: std::io::Error,
    },

    /// The config file contains invalid JSON.
    #[error("failed to parse config file {path}: {source}")]
    ConfigParse {
        /// Path to the offending config file.
        path: String,
        /// Underlying JSON error.
        #[source]
        source: serde_json::Error,
    },
}
