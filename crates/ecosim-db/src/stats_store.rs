//! Player action statistics.

use std::sync::Arc;

use ecosim_types::{PlayerId, SpeciesId, StatAction, ZoneId};
use sqlx::PgPool;
use tokio::sync::Mutex;

use crate::error::DbError;

/// One recorded player action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatRecord {
    /// Species the action concerned.
    pub species: SpeciesId,
    /// Game month the action happened in.
    pub month: u32,
    /// What the player did.
    pub action: StatAction,
    /// Biomass bought or removed.
    pub amount: i64,
    /// Acting player.
    pub player: PlayerId,
    /// Zone the action happened in.
    pub zone: ZoneId,
}

/// Operations on the `player_stat` table.
#[derive(Debug, Clone)]
pub enum StatsStore {
    /// Rows in `PostgreSQL`.
    Postgres(PgPool),
    /// Rows in process memory; clones share state.
    Memory(Arc<Mutex<Vec<StatRecord>>>),
}

impl StatsStore {
    /// An empty in-memory store.
    pub fn memory() -> Self {
        Self::Memory(Arc::new(Mutex::new(Vec::new())))
    }

    /// Append one statistic.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Postgres`] if the insert fails.
    pub async fn record(&self, record: StatRecord) -> Result<(), DbError> {
        match self {
            Self::Postgres(pool) => {
                sqlx::query(
                    r"INSERT INTO player_stat (species_id, month, action, amount, player_id, zone_id)
                      VALUES ($1, $2, $3, $4, $5, $6)",
                )
                .bind(record.species.into_inner())
                .bind(i32::try_from(record.month).unwrap_or(i32::MAX))
                .bind(record.action.as_str())
                .bind(record.amount)
                .bind(record.player.into_inner())
                .bind(record.zone.into_inner())
                .execute(pool)
                .await?;
            }
            Self::Memory(rows) => rows.lock().await.push(record),
        }
        tracing::debug!(
            zone_id = %record.zone,
            species_id = %record.species,
            action = record.action.as_str(),
            amount = record.amount,
            "Recorded player stat"
        );
        Ok(())
    }

    /// Everything recorded so far. Only the in-memory variant keeps a
    /// readable copy; the `PostgreSQL` variant returns an empty list.
    pub async fn recorded(&self) -> Vec<StatRecord> {
        match self {
            Self::Postgres(_) => Vec::new(),
            Self::Memory(rows) => rows.lock().await.clone(),
        }
    }
}
