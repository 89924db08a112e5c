//! Error types for the Ecosim engine binary.
//!
//! [`AppError`] wraps every failure mode during startup and shutdown.

/// Top-level error for the engine binary.
///
/// Each variant wraps a specific subsystem error, providing a single
/// error type that `main` can propagate with `?`.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// Configuration loading failed.
    #[error("config error: {source}")]
    Config {
        /// The underlying config error.
        #[from]
        source: ecosim_core::ConfigError,
    },

    /// Database connection or migration failed.
    #[error("database error: {source}")]
    Database {
        /// The underlying database error.
        #[from]
        source: ecosim_db::DbError,
    },

    /// A backend slot is misconfigured.
    #[error("backend error: {source}")]
    Backend {
        /// The underlying backend error.
        #[from]
        source: ecosim_backend::BackendError,
    },

    /// A zone engine failed to start or stopped early.
    #[error("zone error: {source}")]
    Zone {
        /// The underlying engine error.
        #[from]
        source: ecosim_core::EngineError,
    },

    /// Installing the shutdown signal handler failed.
    #[error("signal error: {source}")]
    Signal {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },
}
