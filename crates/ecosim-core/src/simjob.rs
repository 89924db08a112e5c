//! Offline simulation jobs.
//!
//! A job walks through explicit phases:
//!
//! ```text
//! CREATED -> CONFIGURED -> RESOURCES_ALLOCATED -> SEEDED -> ADVANCED
//!         -> PERSISTED -> RELEASED
//!                 \-- any failure --> ROLLED_BACK
//! ```
//!
//! Allocation, seeding and advancing run independently for each enabled
//! backend. A backend that fails is rolled back on its own: its resources
//! are released through the [`ResourceLedger`] and its manipulation id is
//! cleared, while the other backend carries on. A job record is always
//! written, in `FAILURE` status if anything went wrong.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::sync::Arc;

use chrono::Utc;
use ecosim_backend::{BackendError, ManipulationSession, SimulationBackend};
use ecosim_db::{DbError, SimJobStore};
use ecosim_types::{BackendKind, JobId, JobStatus, ManipulationId, SimJob, SpeciesCatalog};
use tracing::{debug, error, info, warn};

use crate::backends::BackendSet;
use crate::foodweb::{ConsumeMap, PathTable};
use crate::ledger::{ReleaseFailure, ResourceLedger};
use crate::report::ReportWriter;

/// Phase a job (or one backend's share of it) has reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum JobPhase {
    /// Record built, nothing done yet.
    Created,
    /// Node configuration checked.
    Configured,
    /// Manipulation (and network) allocated.
    ResourcesAllocated,
    /// Timestep 1 seeded.
    Seeded,
    /// Timesteps 2..=n simulated and the report sampled.
    Advanced,
    /// Job record saved.
    Persisted,
    /// Every surviving resource released.
    Released,
    /// A failure was compensated.
    RolledBack,
}

impl JobPhase {
    /// Upper-case name used in logs.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Created => "CREATED",
            Self::Configured => "CONFIGURED",
            Self::ResourcesAllocated => "RESOURCES_ALLOCATED",
            Self::Seeded => "SEEDED",
            Self::Advanced => "ADVANCED",
            Self::Persisted => "PERSISTED",
            Self::Released => "RELEASED",
            Self::RolledBack => "ROLLED_BACK",
        }
    }
}

impl core::fmt::Display for JobPhase {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors raised while running a simulation job.
///
/// None of these abort [`SimJobOrchestrator::run`]; they are logged and
/// collected in the [`SimJobOutcome`].
#[derive(Debug, thiserror::Error)]
pub enum SimJobError {
    /// The node configuration is inconsistent. Logged, not fatal.
    #[error("invalid job configuration: {0}")]
    Configuration(String),

    /// A backend call failed.
    #[error("{backend} backend failed after {phase}: {source}")]
    Backend {
        /// Backend slot.
        backend: BackendKind,
        /// Last phase the backend completed.
        phase: JobPhase,
        /// The backend fault.
        #[source]
        source: BackendError,
    },

    /// The job record could not be saved.
    #[error("job persistence failed: {source}")]
    Persistence {
        /// The storage fault.
        #[from]
        source: DbError,
    },

    /// A resource could not be released and may still exist remotely.
    #[error("{backend} {resource} may have leaked: {source}")]
    ResourceLeak {
        /// Backend slot.
        backend: BackendKind,
        /// The resource that was not released.
        resource: String,
        /// Why the release failed.
        #[source]
        source: BackendError,
    },
}

impl From<ReleaseFailure> for SimJobError {
    fn from(failure: ReleaseFailure) -> Self {
        Self::ResourceLeak {
            backend: failure.backend,
            resource: failure.resource,
            source: failure.source,
        }
    }
}

/// What happened to a job.
#[derive(Debug)]
pub struct SimJobOutcome {
    /// The job as last persisted.
    pub job: SimJob,
    /// Final phase of the job as a whole.
    pub phase: JobPhase,
    /// Final phase per enabled backend.
    pub backend_phases: BTreeMap<BackendKind, JobPhase>,
    /// Every fault encountered, in order.
    pub errors: Vec<SimJobError>,
}

/// One backend's share of a job.
struct BackendRun {
    kind: BackendKind,
    backend: SimulationBackend,
    phase: JobPhase,
    session: Option<ManipulationSession>,
    result: Result<String, BackendError>,
}

/// Runs simulation jobs with compensating rollback.
#[derive(Debug, Clone)]
pub struct SimJobOrchestrator {
    backends: BackendSet,
    store: SimJobStore,
    catalog: Arc<SpeciesCatalog>,
    reports: ReportWriter,
    description_max_len: usize,
}

impl SimJobOrchestrator {
    /// Create an orchestrator.
    pub const fn new(
        backends: BackendSet,
        store: SimJobStore,
        catalog: Arc<SpeciesCatalog>,
        reports: ReportWriter,
        description_max_len: usize,
    ) -> Self {
        Self {
            backends,
            store,
            catalog,
            reports,
            description_max_len,
        }
    }

    /// Run `job` to completion. Always returns; faults are in the outcome.
    pub async fn run(&self, mut job: SimJob) -> SimJobOutcome {
        let mut errors = Vec::new();
        let mut backend_phases = BTreeMap::new();

        match build_node_config(&job) {
            Ok(node_config) => debug!(node_config = %node_config, "node configuration built"),
            Err(e) => {
                warn!(error = %e, "job configuration fault");
                errors.push(e);
            }
        }

        let description = truncate_chars(&job.description, self.description_max_len);
        job.manip_timestamp = Some(Utc::now());

        let (classic, trophic) = tokio::join!(
            self.run_backend(BackendKind::Classic, &job, &description),
            self.run_backend(BackendKind::Trophic, &job, &description),
        );

        let mut ledger = ResourceLedger::new();
        let mut reports: Vec<(ManipulationId, String)> = Vec::new();
        let mut all_completed = true;

        for run in [classic, trophic].into_iter().flatten() {
            let kind = run.kind;
            if let Some(session) = run.session {
                set_manipulation(&mut job, kind, Some(session.manipulation_id.clone()));
                ledger.hold(kind, run.backend, session);
            }
            match run.result {
                Ok(report) => {
                    if let Some(id) = manipulation_of(&job, kind) {
                        reports.push((id.clone(), report));
                    }
                    backend_phases.insert(kind, run.phase);
                }
                Err(source) => {
                    all_completed = false;
                    warn!(backend = %kind, phase = %run.phase, error = %source, "backend failed, rolling back");
                    errors.push(SimJobError::Backend {
                        backend: kind,
                        phase: run.phase,
                        source,
                    });
                    rollback(&mut ledger, kind, &mut job, &mut errors).await;
                    backend_phases.insert(kind, JobPhase::RolledBack);
                }
            }
        }

        if reports.is_empty() {
            job.manip_timestamp = None;
        }
        job.csv = self.build_payload(&job, &reports);
        job.status = if all_completed {
            JobStatus::Success
        } else {
            JobStatus::Failure
        };

        // Saving assigns the job id the report header quotes.
        match self.store.save(&job).await {
            Ok(id) => job.job_id = Some(id),
            Err(e) => {
                error!(error = %e, "failed to persist job, rolling back");
                errors.push(e.into());
                for kind in ledger.held() {
                    rollback(&mut ledger, kind, &mut job, &mut errors).await;
                    backend_phases.insert(kind, JobPhase::RolledBack);
                }
                job.manip_timestamp = None;
                job.status = JobStatus::Failure;
                match self.store.save(&job).await {
                    Ok(id) => job.job_id = Some(id),
                    Err(e) => {
                        error!(error = %e, "failed to persist rolled-back job");
                        errors.push(e.into());
                    }
                }
                return SimJobOutcome {
                    job,
                    phase: JobPhase::RolledBack,
                    backend_phases,
                    errors,
                };
            }
        }
        for phase in backend_phases.values_mut() {
            if *phase == JobPhase::Advanced {
                *phase = JobPhase::Persisted;
            }
        }

        if let Some(job_id) = job.job_id {
            let header = format!("Job_id: {job_id}");
            for (manipulation_id, _) in &reports {
                if let Err(e) = self.reports.write(manipulation_id, &header, &job.csv).await {
                    warn!(manipulation_id = %manipulation_id, error = %e, "failed to write job report");
                }
            }
        }

        for kind in ledger.held() {
            for failure in ledger.release(kind).await {
                warn!(
                    backend = %failure.backend,
                    resource = %failure.resource,
                    error = %failure.source,
                    "release failed after persistence"
                );
                errors.push(failure.into());
            }
            backend_phases.insert(kind, JobPhase::Released);
        }

        let phase = if all_completed {
            JobPhase::Released
        } else {
            JobPhase::RolledBack
        };
        info!(
            job_id = ?job.job_id.map(JobId::into_inner),
            status = job.status.as_str(),
            phase = %phase,
            "simulation job finished"
        );
        SimJobOutcome {
            job,
            phase,
            backend_phases,
            errors,
        }
    }

    async fn run_backend(
        &self,
        kind: BackendKind,
        job: &SimJob,
        description: &str,
    ) -> Option<BackendRun> {
        let backend = self.backends.get(kind)?.clone();
        let mut phase = JobPhase::Configured;
        let mut session = None;
        let result = drive_backend(&backend, job, description, &mut phase, &mut session).await;
        Some(BackendRun {
            kind,
            backend,
            phase,
            session,
            result,
        })
    }

    fn build_payload(&self, job: &SimJob, reports: &[(ManipulationId, String)]) -> String {
        if reports.is_empty() {
            return String::new();
        }
        let consume = ConsumeMap::build(&job.node_list, &self.catalog);
        let paths = PathTable::build(&consume);

        let mut payload = String::new();
        for (manipulation_id, report) in reports {
            let _ = write!(payload, "Manipulation_id: {manipulation_id}\n\n{report}\n\n");
        }
        let _ = write!(payload, "{consume}\n\n{paths}");
        payload
    }
}

/// Allocate, seed timestep 1, advance 2..=n and sample, recording the
/// phase reached and the session as soon as it exists.
async fn drive_backend(
    backend: &SimulationBackend,
    job: &SimJob,
    description: &str,
    phase: &mut JobPhase,
    session: &mut Option<ManipulationSession>,
) -> Result<String, BackendError> {
    let allocated = backend
        .allocate_session(&job.node_list, description, job.timesteps, true)
        .await?;
    let manipulation_id = allocated.manipulation_id.clone();
    *session = Some(allocated);
    *phase = JobPhase::ResourcesAllocated;

    backend
        .seed(&job.species_zone_map, 1, &manipulation_id)
        .await?;
    *phase = JobPhase::Seeded;

    if job.timesteps >= 2 {
        backend.advance(2, job.timesteps, &manipulation_id).await?;
    }
    let report = backend.sample_biomass(&manipulation_id).await?;
    *phase = JobPhase::Advanced;
    Ok(report)
}

/// Release everything held for `kind` and clear its manipulation id.
async fn rollback(
    ledger: &mut ResourceLedger,
    kind: BackendKind,
    job: &mut SimJob,
    errors: &mut Vec<SimJobError>,
) {
    for failure in ledger.release(kind).await {
        error!(
            backend = %failure.backend,
            resource = %failure.resource,
            error = %failure.source,
            "ResourceLeakRisk: release failed during rollback"
        );
        errors.push(failure.into());
    }
    set_manipulation(job, kind, None);
}

fn set_manipulation(job: &mut SimJob, kind: BackendKind, id: Option<ManipulationId>) {
    match kind {
        BackendKind::Classic => job.manipulation_id = id,
        BackendKind::Trophic => job.trophic_manipulation_id = id,
    }
}

const fn manipulation_of(job: &SimJob, kind: BackendKind) -> Option<&ManipulationId> {
    match kind {
        BackendKind::Classic => job.manipulation_id.as_ref(),
        BackendKind::Trophic => job.trophic_manipulation_id.as_ref(),
    }
}

/// `node:biomass` pairs for every node in the job.
///
/// # Errors
///
/// Returns [`SimJobError::Configuration`] if the job has no nodes, no
/// timesteps, or a node without starting biomass.
pub fn build_node_config(job: &SimJob) -> Result<String, SimJobError> {
    if job.node_list.is_empty() {
        return Err(SimJobError::Configuration("job has no nodes".to_owned()));
    }
    if job.timesteps == 0 {
        return Err(SimJobError::Configuration(
            "job has zero timesteps".to_owned(),
        ));
    }
    let pairs = job
        .node_list
        .iter()
        .map(|node| {
            job.species_zone_map
                .get(node)
                .map(|biomass| format!("{node}:{biomass}"))
                .ok_or_else(|| {
                    SimJobError::Configuration(format!("node {node} has no starting biomass"))
                })
        })
        .collect::<Result<Vec<_>, _>>()?;
    Ok(pairs.join(","))
}

/// The first `max` characters of `text`.
pub fn truncate_chars(text: &str, max: usize) -> String {
    text.chars().take(max).collect()
}

#[cfg(test)]
mod tests {
    use ecosim_types::NodeId;

    use super::*;

    #[test]
    fn node_config_lists_every_node() {
        let job = SimJob::new(
            "job",
            [(NodeId::new(1), 2000), (NodeId::new(5), 10)]
                .into_iter()
                .collect(),
            3,
        );
        assert!(matches!(build_node_config(&job).as_deref(), Ok("1:2000,5:10")));
    }

    #[test]
    fn node_without_biomass_is_a_configuration_fault() {
        let mut job = SimJob::new("job", [(NodeId::new(1), 5)].into_iter().collect(), 3);
        job.node_list.push(NodeId::new(9));
        assert!(matches!(
            build_node_config(&job),
            Err(SimJobError::Configuration(_))
        ));
    }

    #[test]
    fn empty_job_is_a_configuration_fault() {
        let job = SimJob::new("job", BTreeMap::new(), 3);
        assert!(build_node_config(&job).is_err());
    }

    #[test]
    fn truncation_counts_characters_not_bytes() {
        assert_eq!(truncate_chars("ééééé", 3), "ééé");
        assert_eq!(truncate_chars("short", 50), "short");
    }

    #[test]
    fn phases_render_upper_case() {
        assert_eq!(JobPhase::ResourcesAllocated.to_string(), "RESOURCES_ALLOCATED");
        assert!(JobPhase::Created < JobPhase::Released);
    }
}
