//! Data layer for the Ecosim prediction engine (`PostgreSQL`).
//!
//! Every store is an enum over a `PostgreSQL` variant and an in-memory
//! variant, so the engine runs unchanged with or without a database.
//!
//! ```text
//! Zone engine --- reconciliation ---> ChangeLogStore  (eco_species_change)
//!             \-- player actions ---> StatsStore      (player_stat)
//! Sim jobs    ----- persistence ----> SimJobStore     (sim_job)
//! ```
//!
//! # Modules
//!
//! - [`postgres`] -- `PostgreSQL` connection pool and migrations
//! - [`change_log_store`] -- Last per-species delta per zone
//! - [`sim_job_store`] -- Offline simulation job records
//! - [`stats_store`] -- Player action statistics
//! - [`error`] -- Shared error types

pub mod change_log_store;
pub mod error;
pub mod postgres;
pub mod sim_job_store;
pub mod stats_store;

pub use change_log_store::ChangeLogStore;
pub use error::DbError;
pub use postgres::{PostgresConfig, PostgresPool};
pub use sim_job_store::{SimJobRow, SimJobStore};
pub use stats_store::{StatRecord, StatsStore};

/// The three stores the engine writes to, sharing one backing choice.
#[derive(Debug, Clone)]
pub struct Stores {
    /// Per-species change log.
    pub change_log: ChangeLogStore,
    /// Simulation job records.
    pub sim_jobs: SimJobStore,
    /// Player statistics.
    pub stats: StatsStore,
}

impl Stores {
    /// Stores backed by `pool`.
    pub fn postgres(pool: &PostgresPool) -> Self {
        Self {
            change_log: ChangeLogStore::Postgres(pool.pool().clone()),
            sim_jobs: SimJobStore::Postgres(pool.pool().clone()),
            stats: StatsStore::Postgres(pool.pool().clone()),
        }
    }

    /// Fresh in-memory stores.
    pub fn memory() -> Self {
        Self {
            change_log: ChangeLogStore::memory(),
            sim_jobs: SimJobStore::memory(),
            stats: StatsStore::memory(),
        }
    }
}
