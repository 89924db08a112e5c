//! Integration tests for the simulation job orchestrator.
//!
//! Failures are injected through the stub backend; the in-memory job store
//! stands in for `PostgreSQL`.

#![allow(clippy::unwrap_used, clippy::unreachable, clippy::indexing_slicing)]

use std::collections::BTreeMap;
use std::sync::Arc;

use ecosim_backend::{SimulationBackend, StubBackend, StubCall, StubOp};
use ecosim_core::report::ReportWriter;
use ecosim_core::{BackendSet, JobPhase, SimJobError, SimJobOrchestrator};
use ecosim_db::SimJobStore;
use ecosim_types::{
    BackendKind, JobId, JobStatus, NodeId, NodeWeight, SimJob, SpeciesCatalog, SpeciesId,
    SpeciesType,
};

fn catalog() -> SpeciesCatalog {
    SpeciesCatalog::from(vec![
        SpeciesType {
            id: SpeciesId::new(1),
            name: "Grass".to_owned(),
            nodes: vec![NodeWeight {
                node: NodeId::new(1),
                weight: 1.0,
            }],
            diet: Vec::new(),
        },
        SpeciesType {
            id: SpeciesId::new(2),
            name: "Rabbit".to_owned(),
            nodes: vec![NodeWeight {
                node: NodeId::new(5),
                weight: 1.0,
            }],
            diet: vec![NodeId::new(1)],
        },
    ])
}

fn orchestrator(backends: BackendSet, store: &SimJobStore) -> SimJobOrchestrator {
    SimJobOrchestrator::new(
        backends,
        store.clone(),
        Arc::new(catalog()),
        ReportWriter::default(),
        50,
    )
}

fn stub_set(classic: Option<&StubBackend>, trophic: Option<&StubBackend>) -> BackendSet {
    let mut set = BackendSet::default();
    if let Some(stub) = classic {
        set = set.with(BackendKind::Classic, SimulationBackend::Stub(stub.clone()));
    }
    if let Some(stub) = trophic {
        set = set.with(BackendKind::Trophic, SimulationBackend::Stub(stub.clone()));
    }
    set
}

fn job(timesteps: u32) -> SimJob {
    SimJob::new(
        "grass and rabbits",
        BTreeMap::from([(NodeId::new(1), 2000), (NodeId::new(5), 10)]),
        timesteps,
    )
}

async fn release_counts(stub: &StubBackend) -> (usize, usize) {
    let calls = stub.calls().await;
    let sessions = calls
        .iter()
        .filter(|c| matches!(c, StubCall::ReleaseSession(_)))
        .count();
    let networks = calls
        .iter()
        .filter(|c| matches!(c, StubCall::ReleaseNetwork(_)))
        .count();
    (sessions, networks)
}

#[tokio::test]
async fn successful_job_is_persisted_and_released() {
    let stub = StubBackend::new();
    let store = SimJobStore::memory();
    let outcome = orchestrator(stub_set(Some(&stub), None), &store)
        .run(job(5))
        .await;

    assert_eq!(outcome.phase, JobPhase::Released);
    assert!(outcome.errors.is_empty());
    assert_eq!(outcome.backend_phases[&BackendKind::Classic], JobPhase::Released);
    assert_eq!(outcome.job.status, JobStatus::Success);
    assert!(outcome.job.manip_timestamp.is_some());

    let saved = store.load(outcome.job.job_id.unwrap()).await.unwrap().unwrap();
    assert_eq!(saved.status, JobStatus::Success);
    assert!(saved.csv.starts_with("Manipulation_id: stub-manip-1\n\nnode_id,"));
    assert!(saved.csv.contains("ConsumeMap\nnode_id,prey\n1,\n5,1\n"));
    assert!(saved.csv.contains("PathTable\nnode_id,paths\n1,1\n5,1\n"));

    let calls = stub.calls().await;
    assert!(matches!(
        &calls[0],
        StubCall::Allocate { timesteps: 5, seed_only: true, .. }
    ));
    assert!(calls.iter().any(|c| matches!(c, StubCall::Seed { timestep: 1, .. })));
    assert!(calls.iter().any(|c| matches!(c, StubCall::Advance { from: 2, to: 5, .. })));
    assert_eq!(release_counts(&stub).await, (1, 1));
    assert_eq!(stub.live_sessions().await, 0);
}

#[tokio::test]
async fn failure_after_allocation_rolls_back_once() {
    let stub = StubBackend::new();
    stub.fail_on(StubOp::Advance).await;
    let store = SimJobStore::memory();
    let outcome = orchestrator(stub_set(Some(&stub), None), &store)
        .run(job(5))
        .await;

    assert_eq!(outcome.phase, JobPhase::RolledBack);
    assert_eq!(outcome.backend_phases[&BackendKind::Classic], JobPhase::RolledBack);
    assert!(matches!(
        outcome.errors.first(),
        Some(SimJobError::Backend {
            phase: JobPhase::Seeded,
            ..
        })
    ));
    assert_eq!(release_counts(&stub).await, (1, 1));
    assert_eq!(stub.live_sessions().await, 0);
    assert_eq!(stub.live_networks().await, 0);

    let saved = store.load(outcome.job.job_id.unwrap()).await.unwrap().unwrap();
    assert_eq!(saved.status, JobStatus::Failure);
    assert!(saved.manipulation_id.is_none());
    assert!(saved.manip_timestamp.is_none());
    assert!(saved.csv.is_empty());
}

#[tokio::test]
async fn one_failing_backend_does_not_block_the_other() {
    let classic = StubBackend::new();
    let trophic = StubBackend::new();
    trophic.fail_on(StubOp::Seed).await;
    let store = SimJobStore::memory();
    let outcome = orchestrator(stub_set(Some(&classic), Some(&trophic)), &store)
        .run(job(3))
        .await;

    assert_eq!(outcome.phase, JobPhase::RolledBack);
    assert_eq!(outcome.backend_phases[&BackendKind::Classic], JobPhase::Released);
    assert_eq!(outcome.backend_phases[&BackendKind::Trophic], JobPhase::RolledBack);

    let saved = store.load(outcome.job.job_id.unwrap()).await.unwrap().unwrap();
    assert_eq!(saved.status, JobStatus::Failure);
    assert!(saved.manipulation_id.is_some());
    assert!(saved.trophic_manipulation_id.is_none());
    assert!(saved.manip_timestamp.is_some());
    assert!(saved.csv.contains("Manipulation_id: stub-manip-1"));

    assert_eq!(release_counts(&classic).await, (1, 1));
    assert_eq!(release_counts(&trophic).await, (1, 1));
}

#[tokio::test]
async fn persistence_failure_rolls_back_every_session() {
    let stub = StubBackend::new();
    let store = SimJobStore::memory();
    let mut doomed = job(3);
    doomed.job_id = Some(JobId::new(404));
    let outcome = orchestrator(stub_set(Some(&stub), None), &store)
        .run(doomed)
        .await;

    assert_eq!(outcome.phase, JobPhase::RolledBack);
    assert_eq!(outcome.job.status, JobStatus::Failure);
    assert!(outcome.job.manipulation_id.is_none());
    assert!(outcome.job.manip_timestamp.is_none());
    let persistence_errors = outcome
        .errors
        .iter()
        .filter(|e| matches!(e, SimJobError::Persistence { .. }))
        .count();
    assert_eq!(persistence_errors, 2);
    assert_eq!(release_counts(&stub).await, (1, 1));
    assert_eq!(stub.live_sessions().await, 0);
}

#[tokio::test]
async fn release_failure_after_persistence_is_not_rolled_back() {
    let stub = StubBackend::new();
    stub.fail_on(StubOp::ReleaseNetwork).await;
    let store = SimJobStore::memory();
    let outcome = orchestrator(stub_set(Some(&stub), None), &store)
        .run(job(2))
        .await;

    assert_eq!(outcome.phase, JobPhase::Released);
    assert_eq!(outcome.job.status, JobStatus::Success);
    assert!(matches!(
        outcome.errors.as_slice(),
        [SimJobError::ResourceLeak { backend: BackendKind::Classic, .. }]
    ));
    let saved = store.load(outcome.job.job_id.unwrap()).await.unwrap().unwrap();
    assert_eq!(saved.status, JobStatus::Success);
    assert!(saved.manipulation_id.is_some());
}

#[tokio::test]
async fn description_is_truncated_before_allocation() {
    let stub = StubBackend::new();
    let store = SimJobStore::memory();
    let mut long = job(2);
    long.description = "x".repeat(80);
    orchestrator(stub_set(Some(&stub), None), &store)
        .run(long)
        .await;

    let calls = stub.calls().await;
    let Some(StubCall::Allocate { description, .. }) = calls.first() else {
        unreachable!("first call is always an allocation");
    };
    assert_eq!(description.chars().count(), 50);
}

#[tokio::test]
async fn job_without_backends_succeeds_vacuously() {
    let store = SimJobStore::memory();
    let outcome = orchestrator(BackendSet::default(), &store)
        .run(job(3))
        .await;

    assert_eq!(outcome.job.status, JobStatus::Success);
    assert!(outcome.job.csv.is_empty());
    assert!(outcome.job.manip_timestamp.is_none());
    assert!(outcome.job.job_id.is_some());
}
