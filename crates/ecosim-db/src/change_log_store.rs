//! Durable record of the last computed per-species delta for each zone.
//!
//! Each `(zone, species)` pair holds at most one row. A new delta
//! overwrites the previous one instead of accumulating onto it, so
//! replaying the same reconciliation leaves the store unchanged.

use std::collections::BTreeMap;
use std::sync::Arc;

use ecosim_types::{SpeciesId, ZoneId};
use sqlx::PgPool;
use tokio::sync::Mutex;

use crate::error::DbError;

/// Operations on the `eco_species_change` table.
///
/// The `Memory` variant backs tests and offline runs; clones share state.
#[derive(Debug, Clone)]
pub enum ChangeLogStore {
    /// Rows in `PostgreSQL`.
    Postgres(PgPool),
    /// Rows in process memory.
    Memory(Arc<Mutex<BTreeMap<(ZoneId, SpeciesId), i64>>>),
}

impl ChangeLogStore {
    /// An empty in-memory store.
    pub fn memory() -> Self {
        Self::Memory(Arc::new(Mutex::new(BTreeMap::new())))
    }

    /// Record `delta` as the latest change for `species` in `zone`.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Postgres`] if the upsert fails.
    pub async fn upsert(
        &self,
        zone: ZoneId,
        species: SpeciesId,
        delta: i64,
    ) -> Result<(), DbError> {
        match self {
            Self::Postgres(pool) => {
                sqlx::query(
                    r"INSERT INTO eco_species_change (zone_id, species_id, delta, updated_at)
                      VALUES ($1, $2, $3, now())
                      ON CONFLICT (zone_id, species_id)
                      DO UPDATE SET delta = EXCLUDED.delta, updated_at = now()",
                )
                .bind(zone.into_inner())
                .bind(species.into_inner())
                .bind(delta)
                .execute(pool)
                .await?;
            }
            Self::Memory(rows) => {
                rows.lock().await.insert((zone, species), delta);
            }
        }
        tracing::debug!(zone_id = %zone, species_id = %species, delta, "Upserted species change");
        Ok(())
    }

    /// Delete the rows of `species` in `zone`.
    ///
    /// Returns the number of rows removed.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Postgres`] if the delete fails.
    pub async fn delete(&self, zone: ZoneId, species: &[SpeciesId]) -> Result<u64, DbError> {
        if species.is_empty() {
            return Ok(0);
        }
        match self {
            Self::Postgres(pool) => {
                let ids: Vec<i32> = species.iter().map(|s| s.into_inner()).collect();
                let result = sqlx::query(
                    r"DELETE FROM eco_species_change
                      WHERE zone_id = $1 AND species_id = ANY($2)",
                )
                .bind(zone.into_inner())
                .bind(&ids)
                .execute(pool)
                .await?;
                Ok(result.rows_affected())
            }
            Self::Memory(rows) => {
                let mut rows = rows.lock().await;
                let removed = species
                    .iter()
                    .filter(|s| rows.remove(&(zone, **s)).is_some())
                    .count();
                Ok(u64::try_from(removed).unwrap_or(u64::MAX))
            }
        }
    }

    /// All recorded deltas for `zone`, keyed by species.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Postgres`] if the query fails.
    pub async fn list(&self, zone: ZoneId) -> Result<BTreeMap<SpeciesId, i64>, DbError> {
        match self {
            Self::Postgres(pool) => {
                let rows: Vec<(i32, i64)> = sqlx::query_as(
                    r"SELECT species_id, delta FROM eco_species_change
                      WHERE zone_id = $1",
                )
                .bind(zone.into_inner())
                .fetch_all(pool)
                .await?;
                Ok(rows
                    .into_iter()
                    .map(|(species, delta)| (SpeciesId::new(species), delta))
                    .collect())
            }
            Self::Memory(rows) => Ok(rows
                .lock()
                .await
                .iter()
                .filter(|((z, _), _)| *z == zone)
                .map(|((_, species), delta)| (*species, *delta))
                .collect()),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn upsert_overwrites_previous_delta() {
        let store = ChangeLogStore::memory();
        let zone = ZoneId::new(1);
        store.upsert(zone, SpeciesId::new(7), 5).await.unwrap();
        store.upsert(zone, SpeciesId::new(7), -2).await.unwrap();

        let rows = store.list(zone).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows.get(&SpeciesId::new(7)), Some(&-2));
    }

    #[tokio::test]
    async fn list_is_scoped_to_zone() {
        let store = ChangeLogStore::memory();
        store.upsert(ZoneId::new(1), SpeciesId::new(7), 5).await.unwrap();
        store.upsert(ZoneId::new(2), SpeciesId::new(7), 9).await.unwrap();

        let rows = store.list(ZoneId::new(2)).await.unwrap();
        assert_eq!(rows.get(&SpeciesId::new(7)), Some(&9));
        assert_eq!(rows.len(), 1);
    }

    #[tokio::test]
    async fn delete_removes_only_named_species() {
        let store = ChangeLogStore::memory();
        let zone = ZoneId::new(1);
        store.upsert(zone, SpeciesId::new(1), 1).await.unwrap();
        store.upsert(zone, SpeciesId::new(2), 2).await.unwrap();

        let removed = store
            .delete(zone, &[SpeciesId::new(1), SpeciesId::new(3)])
            .await
            .unwrap();
        assert_eq!(removed, 1);
        let rows = store.list(zone).await.unwrap();
        assert!(rows.contains_key(&SpeciesId::new(2)));
        assert!(!rows.contains_key(&SpeciesId::new(1)));
    }
}
