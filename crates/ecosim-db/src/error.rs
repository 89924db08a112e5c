//! Error types for the data layer.
//!
//! Every store operation returns [`DbError`]. Callers inside the zone
//! engine log it and carry on; the simulation job orchestrator treats it
//! as a persistence fault and rolls back.

/// Errors that can occur in the data layer.
#[derive(Debug, thiserror::Error)]
pub enum DbError {
    /// A query or connection failed.
    #[error("postgres query failed: {0}")]
    Postgres(#[from] sqlx::Error),

    /// Applying `migrations/` failed.
    #[error("schema migration failed: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// A stored JSON column could not be encoded or decoded.
    #[error("stored json is invalid: {0}")]
    Serialization(#[from] serde_json::Error),

    /// An update targeted a row that does not exist.
    #[error("{0} not found")]
    NotFound(String),

    /// The connection settings are unusable.
    #[error("invalid database configuration: {0}")]
    Config(String),
}
