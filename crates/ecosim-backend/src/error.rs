//! Error types for simulation backends.
//!
//! Every failure a backend can report surfaces as a [`BackendError`]. The
//! prediction scheduler absorbs these at its boundary; the sim-job
//! orchestrator turns them into a rollback.

/// Errors that can occur while talking to a simulation backend.
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    /// The HTTP request could not be sent or its body could not be read.
    #[error("backend request failed: {0}")]
    Http(String),

    /// The backend answered with a non-success status.
    #[error("backend returned {status}: {body}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Response body, for diagnostics.
        body: String,
    },

    /// The biomass report could not be interpreted.
    #[error("malformed biomass report: {0}")]
    MalformedReport(String),

    /// The backend does not know the given manipulation id.
    #[error("unknown manipulation session: {0}")]
    UnknownSession(String),

    /// A failure injected into the stub backend.
    #[error("injected failure in {operation}")]
    Injected {
        /// The operation that was told to fail.
        operation: &'static str,
    },

    /// Backend configuration is invalid.
    #[error("backend config error: {0}")]
    Config(String),

    /// Serialization or deserialization failure.
    #[error("serde error: {0}")]
    Serde(#[from] serde_json::Error),
}
