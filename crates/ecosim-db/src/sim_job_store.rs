//! Persistence for offline simulation jobs.
//!
//! The first save of a job inserts a row and lets the database assign the
//! job id; later saves of the same job update that row in place. The
//! report header written after persistence quotes this id, so a job must
//! be saved before its report file exists.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use ecosim_types::{JobId, JobStatus, ManipulationId, NodeId, SimJob};
use sqlx::PgPool;
use tokio::sync::Mutex;

use crate::error::DbError;

/// In-memory job table: the last id handed out and the saved jobs.
#[derive(Debug, Default)]
pub struct MemoryJobs {
    next_id: i64,
    jobs: BTreeMap<JobId, SimJob>,
}

/// Operations on the `sim_job` table.
#[derive(Debug, Clone)]
pub enum SimJobStore {
    /// Rows in `PostgreSQL`.
    Postgres(PgPool),
    /// Rows in process memory; clones share state.
    Memory(Arc<Mutex<MemoryJobs>>),
}

impl SimJobStore {
    /// An empty in-memory store.
    pub fn memory() -> Self {
        Self::Memory(Arc::new(Mutex::new(MemoryJobs::default())))
    }

    /// Insert `job` if it has no id yet, otherwise update its row.
    ///
    /// Returns the job id.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::NotFound`] when updating an id that does not
    /// exist, or [`DbError::Postgres`] if the query fails.
    pub async fn save(&self, job: &SimJob) -> Result<JobId, DbError> {
        let id = match self {
            Self::Postgres(pool) => save_postgres(pool, job).await?,
            Self::Memory(state) => {
                let mut state = state.lock().await;
                let id = if let Some(id) = job.job_id {
                    if !state.jobs.contains_key(&id) {
                        return Err(DbError::NotFound(format!("sim job {id}")));
                    }
                    id
                } else {
                    state.next_id = state.next_id.saturating_add(1);
                    JobId::new(state.next_id)
                };
                let mut stored = job.clone();
                stored.job_id = Some(id);
                state.jobs.insert(id, stored);
                id
            }
        };
        tracing::debug!(job_id = %id, status = job.status.as_str(), "Saved sim job");
        Ok(id)
    }

    /// Load a job by id.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Postgres`] if the query fails or
    /// [`DbError::Serialization`] if the stored biomass map is corrupt.
    pub async fn load(&self, id: JobId) -> Result<Option<SimJob>, DbError> {
        match self {
            Self::Postgres(pool) => {
                let row = sqlx::query_as::<_, SimJobRow>(
                    r"SELECT job_id, description, node_list, timesteps, species_zone_map,
                             manipulation_id, trophic_manipulation_id, manip_timestamp,
                             status, csv
                      FROM sim_job
                      WHERE job_id = $1",
                )
                .bind(id.into_inner())
                .fetch_optional(pool)
                .await?;
                row.map(SimJobRow::into_job).transpose()
            }
            Self::Memory(state) => Ok(state.lock().await.jobs.get(&id).cloned()),
        }
    }
}

async fn save_postgres(pool: &PgPool, job: &SimJob) -> Result<JobId, DbError> {
    let node_list = render_node_list(&job.node_list);
    let species_zone_map = serde_json::to_value(&job.species_zone_map)?;
    let timesteps = i32::try_from(job.timesteps).unwrap_or(i32::MAX);
    let manipulation_id = job.manipulation_id.as_ref().map(ManipulationId::as_str);
    let trophic_id = job
        .trophic_manipulation_id
        .as_ref()
        .map(ManipulationId::as_str);

    if let Some(id) = job.job_id {
        let result = sqlx::query(
            r"UPDATE sim_job
              SET description = $2, node_list = $3, timesteps = $4, species_zone_map = $5,
                  manipulation_id = $6, trophic_manipulation_id = $7, manip_timestamp = $8,
                  status = $9, csv = $10
              WHERE job_id = $1",
        )
        .bind(id.into_inner())
        .bind(&job.description)
        .bind(&node_list)
        .bind(timesteps)
        .bind(&species_zone_map)
        .bind(manipulation_id)
        .bind(trophic_id)
        .bind(job.manip_timestamp)
        .bind(job.status.as_str())
        .bind(&job.csv)
        .execute(pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(DbError::NotFound(format!("sim job {id}")));
        }
        return Ok(id);
    }

    let row: (i64,) = sqlx::query_as(
        r"INSERT INTO sim_job (description, node_list, timesteps, species_zone_map,
                               manipulation_id, trophic_manipulation_id, manip_timestamp,
                               status, csv)
          VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
          RETURNING job_id",
    )
    .bind(&job.description)
    .bind(&node_list)
    .bind(timesteps)
    .bind(&species_zone_map)
    .bind(manipulation_id)
    .bind(trophic_id)
    .bind(job.manip_timestamp)
    .bind(job.status.as_str())
    .bind(&job.csv)
    .fetch_one(pool)
    .await?;

    Ok(JobId::new(row.0))
}

fn render_node_list(nodes: &[NodeId]) -> String {
    nodes
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(",")
}

fn parse_node_list(raw: &str) -> Vec<NodeId> {
    raw.split(',')
        .filter_map(|n| n.trim().parse().ok())
        .map(NodeId::new)
        .collect()
}

/// A row from the `sim_job` table.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct SimJobRow {
    /// Job id.
    pub job_id: i64,
    /// Requester description.
    pub description: String,
    /// Comma-separated node ids.
    pub node_list: String,
    /// Requested timestep count.
    pub timesteps: i32,
    /// Node id to initial biomass, as JSON.
    pub species_zone_map: serde_json::Value,
    /// Classic backend manipulation id.
    pub manipulation_id: Option<String>,
    /// Trophic backend manipulation id.
    pub trophic_manipulation_id: Option<String>,
    /// When allocation began.
    pub manip_timestamp: Option<DateTime<Utc>>,
    /// `SUCCESS` or `FAILURE`.
    pub status: String,
    /// Report payload.
    pub csv: String,
}

impl SimJobRow {
    /// Convert the row back into a [`SimJob`].
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Serialization`] if the biomass map is not a
    /// JSON object of node ids to integers.
    pub fn into_job(self) -> Result<SimJob, DbError> {
        let species_zone_map: BTreeMap<NodeId, i64> =
            serde_json::from_value(self.species_zone_map)?;
        Ok(SimJob {
            job_id: Some(JobId::new(self.job_id)),
            description: self.description,
            node_list: parse_node_list(&self.node_list),
            timesteps: u32::try_from(self.timesteps).unwrap_or(0),
            species_zone_map,
            manipulation_id: self.manipulation_id.map(ManipulationId::new),
            trophic_manipulation_id: self.trophic_manipulation_id.map(ManipulationId::new),
            manip_timestamp: self.manip_timestamp,
            status: JobStatus::from_db(&self.status),
            csv: self.csv,
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn job() -> SimJob {
        let map = [(NodeId::new(3), 100), (NodeId::new(5), 40)]
            .into_iter()
            .collect();
        SimJob::new("grassland test", map, 5)
    }

    #[tokio::test]
    async fn first_save_assigns_id_then_updates() {
        let store = SimJobStore::memory();
        let mut job = job();

        let id = store.save(&job).await.unwrap();
        job.job_id = Some(id);
        job.status = JobStatus::Success;
        let again = store.save(&job).await.unwrap();
        assert_eq!(id, again);

        let loaded = store.load(id).await.unwrap().unwrap();
        assert_eq!(loaded.status, JobStatus::Success);
        assert_eq!(loaded.node_list, vec![NodeId::new(3), NodeId::new(5)]);
    }

    #[tokio::test]
    async fn ids_are_distinct_per_job() {
        let store = SimJobStore::memory();
        let a = store.save(&job()).await.unwrap();
        let b = store.save(&job()).await.unwrap();
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn updating_unknown_id_fails() {
        let store = SimJobStore::memory();
        let mut job = job();
        job.job_id = Some(JobId::new(42));
        assert!(matches!(store.save(&job).await, Err(DbError::NotFound(_))));
    }

    #[test]
    fn row_converts_back_to_job() {
        let row = SimJobRow {
            job_id: 9,
            description: "desc".to_owned(),
            node_list: "3, 5".to_owned(),
            timesteps: 4,
            species_zone_map: serde_json::json!({"3": 100, "5": 40}),
            manipulation_id: Some("m-1".to_owned()),
            trophic_manipulation_id: None,
            manip_timestamp: None,
            status: "FAILURE".to_owned(),
            csv: String::new(),
        };
        let job = row.into_job().unwrap();
        assert_eq!(job.job_id, Some(JobId::new(9)));
        assert_eq!(job.species_zone_map.get(&NodeId::new(5)), Some(&40));
        assert_eq!(job.status, JobStatus::Failure);
        assert_eq!(job.node_list, vec![NodeId::new(3), NodeId::new(5)]);
    }
}
