//! Prediction jobs and the per-backend coalescing queue.
//!
//! Each (zone, backend) pair has one [`PredictionQueue`]. At most one job
//! is in flight; anything submitted meanwhile waits. When the in-flight job
//! completes, every waiting job except the most recent is dropped and the
//! survivor becomes the next job in flight. The queue is a plain state
//! machine: it never spawns or awaits anything, the zone engine does.

use std::collections::{BTreeMap, VecDeque};

use chrono::{DateTime, Utc};
use ecosim_backend::{BackendError, SimulationBackend, parse_biomass_report};
use ecosim_types::{BackendKind, ManipulationId, NodeId, SpeciesId, ZoneId};
use tracing::debug;

/// One requested simulation step for one zone against one backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PredictionJob {
    /// Monotonic id, unique within the zone engine.
    pub seq: u64,
    /// Zone the step belongs to.
    pub zone: ZoneId,
    /// Backend slot that runs it.
    pub backend: BackendKind,
    /// The zone's session on that backend, if one was allocated.
    pub manipulation_id: Option<ManipulationId>,
    /// Timestep (game month) to simulate.
    pub timestep: u32,
    /// Node biomass at snapshot time.
    pub current: BTreeMap<NodeId, i64>,
    /// Biomass not yet seeded into this backend's session, seeded first.
    pub pending: BTreeMap<NodeId, i64>,
    /// Species present at snapshot time.
    pub species_ids: Vec<SpeciesId>,
    /// When the job left the queue for the worker pool.
    pub dispatched_at: Option<DateTime<Utc>>,
}

/// What a completion released from the queue.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Drain {
    /// Sequence ids of the waiting jobs that were discarded.
    pub dropped: Vec<u64>,
    /// The job to dispatch next, now marked in flight.
    pub next: Option<PredictionJob>,
}

/// Coalescing wait queue with a single in-flight slot.
#[derive(Debug, Default)]
pub struct PredictionQueue {
    in_flight: Option<u64>,
    waiting: VecDeque<PredictionJob>,
}

impl PredictionQueue {
    /// An idle, empty queue.
    pub const fn new() -> Self {
        Self {
            in_flight: None,
            waiting: VecDeque::new(),
        }
    }

    /// Submit a job. Returns it back, marked in flight, when the queue was
    /// idle and the caller must dispatch it now.
    pub fn submit(&mut self, job: PredictionJob) -> Option<PredictionJob> {
        if self.in_flight.is_some() {
            self.waiting.push_back(job);
            return None;
        }
        self.in_flight = Some(job.seq);
        Some(job)
    }

    /// Mark job `seq` complete and coalesce the backlog.
    ///
    /// A completion for a job that is not in flight is ignored.
    pub fn complete(&mut self, seq: u64) -> Drain {
        if self.in_flight != Some(seq) {
            debug!(seq, in_flight = ?self.in_flight, "stale completion ignored");
            return Drain::default();
        }
        self.in_flight = None;

        let next = self.waiting.pop_back();
        let dropped = self.waiting.drain(..).map(|job| job.seq).collect();
        if let Some(job) = &next {
            self.in_flight = Some(job.seq);
        }
        Drain { dropped, next }
    }

    /// Sequence id of the job in flight.
    pub const fn in_flight(&self) -> Option<u64> {
        self.in_flight
    }

    /// Number of jobs waiting behind the in-flight one.
    pub fn backlog(&self) -> usize {
        self.waiting.len()
    }
}

/// Run one prediction step on `backend` and return the sampled node
/// biomass.
///
/// Pending additions are seeded at the job's timestep first, then the
/// session advances exactly that timestep.
///
/// # Errors
///
/// Returns [`BackendError::UnknownSession`] if the zone holds no session
/// for the backend, or whatever the backend reports.
pub async fn execute(
    backend: &SimulationBackend,
    job: &PredictionJob,
) -> Result<BTreeMap<NodeId, i64>, BackendError> {
    let Some(manipulation_id) = &job.manipulation_id else {
        return Err(BackendError::UnknownSession(format!(
            "zone {} has no {} session",
            job.zone, job.backend
        )));
    };

    if !job.pending.is_empty() {
        backend
            .seed(&job.pending, job.timestep, manipulation_id)
            .await?;
    }
    backend
        .advance(job.timestep, job.timestep, manipulation_id)
        .await?;
    let report = backend.sample_biomass(manipulation_id).await?;
    parse_biomass_report(&report)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use ecosim_backend::StubBackend;

    use super::*;

    fn job(seq: u64) -> PredictionJob {
        PredictionJob {
            seq,
            zone: ZoneId::new(1),
            backend: BackendKind::Classic,
            manipulation_id: None,
            timestep: 1,
            current: BTreeMap::new(),
            pending: BTreeMap::new(),
            species_ids: Vec::new(),
            dispatched_at: None,
        }
    }

    #[test]
    fn idle_queue_dispatches_immediately() {
        let mut queue = PredictionQueue::new();
        let dispatched = queue.submit(job(1));
        assert_eq!(dispatched.map(|j| j.seq), Some(1));
        assert_eq!(queue.in_flight(), Some(1));
        assert_eq!(queue.backlog(), 0);
    }

    #[test]
    fn busy_queue_holds_submissions() {
        let mut queue = PredictionQueue::new();
        queue.submit(job(1));
        assert!(queue.submit(job(2)).is_none());
        assert!(queue.submit(job(3)).is_none());
        assert_eq!(queue.backlog(), 2);
        assert_eq!(queue.in_flight(), Some(1));
    }

    #[test]
    fn completion_keeps_only_latest_waiting_job() {
        let mut queue = PredictionQueue::new();
        queue.submit(job(1));
        for seq in 2..=6 {
            queue.submit(job(seq));
        }

        let drain = queue.complete(1);
        assert_eq!(drain.dropped, vec![2, 3, 4, 5]);
        assert_eq!(drain.next.map(|j| j.seq), Some(6));
        assert_eq!(queue.in_flight(), Some(6));
        assert_eq!(queue.backlog(), 0);
    }

    #[test]
    fn completion_with_empty_backlog_goes_idle() {
        let mut queue = PredictionQueue::new();
        queue.submit(job(1));
        let drain = queue.complete(1);
        assert_eq!(drain, Drain::default());
        assert_eq!(queue.in_flight(), None);
        assert!(queue.submit(job(2)).is_some());
    }

    #[test]
    fn stale_completion_changes_nothing() {
        let mut queue = PredictionQueue::new();
        queue.submit(job(1));
        queue.submit(job(2));
        let drain = queue.complete(7);
        assert_eq!(drain, Drain::default());
        assert_eq!(queue.in_flight(), Some(1));
        assert_eq!(queue.backlog(), 1);
    }

    #[tokio::test]
    async fn execute_without_session_is_a_backend_fault() {
        let backend = SimulationBackend::Stub(StubBackend::new());
        let result = execute(&backend, &job(1)).await;
        assert!(matches!(result, Err(BackendError::UnknownSession(_))));
    }

    #[tokio::test]
    async fn execute_seeds_pending_then_advances() {
        let stub = StubBackend::new().with_default_growth(2.0);
        let backend = SimulationBackend::Stub(stub.clone());
        let session = backend
            .allocate_session(&[NodeId::new(1)], "zone", 1, true)
            .await
            .unwrap();

        let mut job = job(1);
        job.manipulation_id = Some(session.manipulation_id);
        job.timestep = 3;
        job.pending = [(NodeId::new(1), 10)].into_iter().collect();

        let sampled = execute(&backend, &job).await.unwrap();
        assert_eq!(sampled.get(&NodeId::new(1)), Some(&20));
        assert_eq!(stub.calls().await.len(), 4);
    }
}
