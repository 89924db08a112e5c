//! Zone engine: one actor task per zone.
//!
//! The task owns the [`Zone`] and one [`PredictionQueue`] per enabled
//! backend. Everything that touches the zone, whether a clock tick, a
//! player action or a finished backend run, arrives as a command on
//! the zone's channel and is handled in order, so zone state needs no
//! locks.
//!
//! Backend runs execute on worker tasks bounded by a semaphore shared by
//! every zone. A worker reports back by sending `Complete` on the same
//! channel; the engine reconciles the result, drains the queue and
//! dispatches the survivor.
//!
//! ```text
//! ZoneHandle --cmd--> ZoneEngine --spawn--> worker (permit) --Complete--+
//!                         ^                                             |
//!                         +---------------------------------------------+
//! ```

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use ecosim_backend::BackendError;
use ecosim_db::{ChangeLogStore, StatRecord, StatsStore, Stores};
use ecosim_types::{
    BackendKind, ManipulationId, NodeId, PlayerId, Species, SpeciesCatalog, SpeciesGroup,
    SpeciesId, SpeciesType, StatAction, ZoneId,
};
use rand::SeedableRng;
use rand::rngs::StdRng;
use serde::Serialize;
use tokio::sync::{Semaphore, mpsc, oneshot};
use tracing::{debug, error, info, warn};

use crate::backends::BackendSet;
use crate::config::{EcosimConfig, ZoneSeed};
use crate::ledger::ResourceLedger;
use crate::notify::{Notifier, ZoneNotification};
use crate::prediction::{self, PredictionJob, PredictionQueue};
use crate::reconcile::reconcile;
use crate::report::ReportWriter;
use crate::zone::Zone;

/// Shared services every zone engine needs.
#[derive(Debug, Clone)]
pub struct EngineContext {
    /// Species templates.
    pub catalog: Arc<SpeciesCatalog>,
    /// Enabled simulation backends.
    pub backends: BackendSet,
    /// Per-species delta log.
    pub change_log: ChangeLogStore,
    /// Player statistics.
    pub stats: StatsStore,
    /// Notification sink.
    pub notifier: Notifier,
    /// Worker pool bound, shared across zones.
    pub workers: Arc<Semaphore>,
    /// Writes each session's report at shutdown.
    pub reports: ReportWriter,
    /// Seed for the reconciliation order, mixed with the zone id.
    pub rng_seed: Option<u64>,
    /// Days the zone clock moves per tick.
    pub days_per_tick: u32,
    /// Capacity of each zone's command channel.
    pub command_buffer: usize,
}

impl EngineContext {
    /// Wire a context from configuration and already-built services.
    pub fn new(
        config: &EcosimConfig,
        backends: BackendSet,
        stores: &Stores,
        notifier: Notifier,
    ) -> Self {
        Self {
            catalog: Arc::new(config.catalog.clone()),
            backends,
            change_log: stores.change_log.clone(),
            stats: stores.stats.clone(),
            notifier,
            workers: Arc::new(Semaphore::new(config.engine.max_concurrent_jobs.max(1))),
            reports: ReportWriter::new(config.simjob.report_dir.clone()),
            rng_seed: config.engine.rng_seed,
            days_per_tick: config.engine.days_per_tick,
            command_buffer: config.engine.command_buffer,
        }
    }
}

/// Errors returned through a [`ZoneHandle`].
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// The zone's engine task has stopped.
    #[error("zone {0} engine is closed")]
    Closed(ZoneId),

    /// The species is not in the catalog.
    #[error("species {0} is not in the catalog")]
    UnknownSpecies(SpeciesId),

    /// The species is already present in the zone.
    #[error("species {0} is already present")]
    DuplicateSpecies(SpeciesId),
}

type Reply<T> = oneshot::Sender<T>;

enum Command {
    Tick {
        reply: Reply<u32>,
    },
    Predict {
        timestep: Option<u32>,
    },
    InitializeSpecies {
        species: SpeciesId,
        biomass: i64,
        reply: Reply<Result<Vec<SpeciesGroup>, EngineError>>,
    },
    Purchase {
        player: PlayerId,
        purchases: BTreeMap<SpeciesId, i64>,
        reply: Reply<Result<Vec<SpeciesGroup>, EngineError>>,
    },
    Remove {
        species: Vec<SpeciesId>,
        reply: Reply<Vec<SpeciesId>>,
    },
    Snapshot {
        reply: Reply<ZoneSnapshot>,
    },
    Complete {
        job: Box<PredictionJob>,
        result: Result<BTreeMap<NodeId, i64>, BackendError>,
    },
    Close {
        reply: Reply<()>,
    },
}

/// Queue counters for one backend.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct QueueStatus {
    /// Sequence id of the job in flight.
    pub in_flight: Option<u64>,
    /// Jobs waiting behind it.
    pub backlog: usize,
    /// Jobs dropped by coalescing since spawn.
    pub dropped_total: u64,
    /// Sequence ids dropped by the most recent drain.
    pub last_dropped: Vec<u64>,
    /// Completions handled, successful or not.
    pub completed: u64,
}

/// Point-in-time copy of a zone.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ZoneSnapshot {
    /// Zone id.
    pub zone: ZoneId,
    /// Current game month.
    pub month: u32,
    /// Ecosystem score.
    pub score: i64,
    /// Biomass per node.
    pub node_biomass: BTreeMap<NodeId, i64>,
    /// Biomass not yet seeded, per backend.
    pub pending_additions: BTreeMap<BackendKind, BTreeMap<NodeId, i64>>,
    /// Net change per species from the last reconciliation.
    pub last_changes: BTreeMap<SpeciesId, i64>,
    /// Species present.
    pub species: BTreeMap<SpeciesId, Species>,
    /// Manipulation held per backend.
    pub sessions: BTreeMap<BackendKind, ManipulationId>,
    /// Queue state per enabled backend.
    pub queues: BTreeMap<BackendKind, QueueStatus>,
}

/// Cloneable handle to a running zone engine.
#[derive(Debug, Clone)]
pub struct ZoneHandle {
    zone: ZoneId,
    tx: mpsc::Sender<Command>,
}

impl ZoneHandle {
    /// Zone this handle talks to.
    pub const fn zone(&self) -> ZoneId {
        self.zone
    }

    /// Advance the zone clock one tick. When the month changes a
    /// prediction is requested for the new month. Returns the month.
    pub async fn tick(&self) -> Result<u32, EngineError> {
        self.call(|reply| Command::Tick { reply }).await
    }

    /// Request a prediction step on every enabled backend at `timestep`,
    /// or at the current month when `None`.
    pub async fn request_prediction(&self, timestep: Option<u32>) -> Result<(), EngineError> {
        self.tx
            .send(Command::Predict { timestep })
            .await
            .map_err(|_closed| EngineError::Closed(self.zone))
    }

    /// Place a new species with `biomass` in one group at the origin. Its
    /// node shares are seeded into every session on the next prediction.
    pub async fn initialize_species(
        &self,
        species: SpeciesId,
        biomass: i64,
    ) -> Result<Vec<SpeciesGroup>, EngineError> {
        self.call(|reply| Command::InitializeSpecies {
            species,
            biomass,
            reply,
        })
        .await?
    }

    /// Buy biomass for `player`. Either every species is known and the
    /// whole purchase applies, or nothing changes.
    pub async fn purchase_species(
        &self,
        player: PlayerId,
        purchases: BTreeMap<SpeciesId, i64>,
    ) -> Result<Vec<SpeciesGroup>, EngineError> {
        self.call(|reply| Command::Purchase {
            player,
            purchases,
            reply,
        })
        .await?
    }

    /// Remove species and their change-log rows. Returns the ids that
    /// were present.
    pub async fn remove_species(
        &self,
        species: Vec<SpeciesId>,
    ) -> Result<Vec<SpeciesId>, EngineError> {
        self.call(|reply| Command::Remove { species, reply }).await
    }

    /// Copy of the zone and its queues.
    pub async fn snapshot(&self) -> Result<ZoneSnapshot, EngineError> {
        self.call(|reply| Command::Snapshot { reply }).await
    }

    /// Write session reports, release every backend resource and stop the
    /// engine. Jobs still in flight are not cancelled; their results are
    /// discarded.
    pub async fn close(&self) -> Result<(), EngineError> {
        self.call(|reply| Command::Close { reply }).await
    }

    async fn call<T>(&self, make: impl FnOnce(Reply<T>) -> Command) -> Result<T, EngineError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(make(reply))
            .await
            .map_err(|_closed| EngineError::Closed(self.zone))?;
        rx.await.map_err(|_closed| EngineError::Closed(self.zone))
    }
}

/// The zone actor.
pub struct ZoneEngine {
    zone: Zone,
    ctx: EngineContext,
    queues: BTreeMap<BackendKind, PredictionQueue>,
    status: BTreeMap<BackendKind, QueueStatus>,
    ledger: ResourceLedger,
    rng: StdRng,
    next_seq: u64,
    tx: mpsc::WeakSender<Command>,
}

impl ZoneEngine {
    /// Build a zone from `seed`, allocate and seed a session on every
    /// enabled backend, and start the actor task.
    ///
    /// A backend that cannot allocate or seed is logged and left without
    /// a session; predictions against it fail fast instead of stalling.
    pub async fn spawn(seed: &ZoneSeed, ctx: EngineContext) -> Result<ZoneHandle, EngineError> {
        let mut zone = Zone::new(seed.id, ctx.days_per_tick)
            .with_backends(ctx.backends.enabled().map(|(kind, _)| kind));
        for initial in &seed.species {
            let Some(species_type) = ctx.catalog.get(initial.species) else {
                return Err(EngineError::UnknownSpecies(initial.species));
            };
            let species = zone.new_species(initial.species, initial.biomass);
            for group in zone.initialize_species(species, species_type) {
                ctx.notifier.publish(ZoneNotification::SpeciesCreated {
                    zone: seed.id,
                    group,
                });
            }
        }
        zone.update_score(&ctx.catalog);

        let mut ledger = ResourceLedger::new();
        let nodes: Vec<NodeId> = {
            let mut nodes: Vec<NodeId> = ctx
                .catalog
                .iter()
                .flat_map(SpeciesType::node_ids)
                .collect();
            nodes.sort_unstable();
            nodes.dedup();
            nodes
        };
        let description = format!("zone {}", seed.id);
        for (kind, backend) in ctx.backends.enabled() {
            let session = match backend.allocate_session(&nodes, &description, 1, true).await {
                Ok(session) => session,
                Err(e) => {
                    warn!(zone_id = %seed.id, backend = %kind, error = %e, "session allocation failed");
                    continue;
                }
            };
            ledger.hold(kind, backend.clone(), session.clone());
            if let Err(e) = backend
                .seed(zone.node_biomass(), 1, &session.manipulation_id)
                .await
            {
                warn!(zone_id = %seed.id, backend = %kind, error = %e, "session seeding failed, releasing");
                for failure in ledger.release(kind).await {
                    error!(
                        zone_id = %seed.id,
                        backend = %failure.backend,
                        resource = %failure.resource,
                        error = %failure.source,
                        "ResourceLeakRisk: release failed"
                    );
                }
                continue;
            }
            info!(
                zone_id = %seed.id,
                backend = %kind,
                implementation = backend.name(),
                manipulation_id = %session.manipulation_id,
                "zone session ready"
            );
            zone.set_session(kind, session);
        }

        let rng = match ctx.rng_seed {
            Some(s) => StdRng::seed_from_u64(s ^ u64::from(seed.id.into_inner().unsigned_abs())),
            None => StdRng::from_os_rng(),
        };
        let (tx, rx) = mpsc::channel(ctx.command_buffer.max(1));
        let queues = BackendKind::ALL
            .into_iter()
            .filter(|&kind| ctx.backends.is_enabled(kind))
            .map(|kind| (kind, PredictionQueue::new()))
            .collect();

        let engine = Self {
            zone,
            ctx,
            queues,
            status: BTreeMap::new(),
            ledger,
            rng,
            next_seq: 0,
            tx: tx.downgrade(),
        };
        info!(zone_id = %seed.id, species = seed.species.len(), "zone engine started");
        tokio::spawn(engine.run(rx));

        Ok(ZoneHandle { zone: seed.id, tx })
    }

    async fn run(mut self, mut rx: mpsc::Receiver<Command>) {
        while let Some(command) = rx.recv().await {
            match command {
                Command::Tick { reply } => {
                    let before = self.zone.current_month();
                    let month = self.zone.tick();
                    if month != before {
                        self.request_prediction(Some(month));
                    }
                    let _ = reply.send(month);
                }
                Command::Predict { timestep } => self.request_prediction(timestep),
                Command::InitializeSpecies {
                    species,
                    biomass,
                    reply,
                } => {
                    let _ = reply.send(self.initialize_species(species, biomass));
                }
                Command::Purchase {
                    player,
                    purchases,
                    reply,
                } => {
                    let result = self.purchase_species(player, &purchases).await;
                    let _ = reply.send(result);
                }
                Command::Remove { species, reply } => {
                    let removed = self.remove_species(&species).await;
                    let _ = reply.send(removed);
                }
                Command::Snapshot { reply } => {
                    let _ = reply.send(self.snapshot());
                }
                Command::Complete { job, result } => self.on_complete(*job, result).await,
                Command::Close { reply } => {
                    self.shutdown().await;
                    let _ = reply.send(());
                    return;
                }
            }
        }
        // Every handle was dropped.
        self.shutdown().await;
    }

    fn request_prediction(&mut self, timestep: Option<u32>) {
        let timestep = timestep.unwrap_or_else(|| self.zone.current_month());
        for kind in BackendKind::ALL {
            if !self.ctx.backends.is_enabled(kind) {
                continue;
            }
            self.next_seq = self.next_seq.saturating_add(1);
            let job = self.zone.prediction_job(self.next_seq, kind, timestep);
            let seq = job.seq;
            let submitted = self.queues.entry(kind).or_default().submit(job);
            match submitted {
                Some(job) => self.dispatch(job),
                None => debug!(zone_id = %self.zone.id(), backend = %kind, seq, timestep, "prediction queued"),
            }
        }
    }

    fn dispatch(&mut self, mut job: PredictionJob) {
        self.zone.update_score(&self.ctx.catalog);
        self.zone.refresh_job(&mut job);
        job.dispatched_at = Some(Utc::now());
        info!(
            zone_id = %job.zone,
            backend = %job.backend,
            seq = job.seq,
            timestep = job.timestep,
            pending_nodes = job.pending.len(),
            "prediction dispatched"
        );

        let backend = self.ctx.backends.get(job.backend).cloned();
        let workers = Arc::clone(&self.ctx.workers);
        let tx = self.tx.clone();
        tokio::spawn(async move {
            let _permit = workers.acquire_owned().await;
            let result = match &backend {
                Some(backend) => prediction::execute(backend, &job).await,
                None => Err(BackendError::Config(format!(
                    "{} backend is not enabled",
                    job.backend
                ))),
            };
            let Some(tx) = tx.upgrade() else {
                debug!(seq = job.seq, "zone engine gone, result discarded");
                return;
            };
            if tx
                .send(Command::Complete {
                    job: Box::new(job),
                    result,
                })
                .await
                .is_err()
            {
                debug!("zone engine gone, result discarded");
            }
        });
    }

    async fn on_complete(
        &mut self,
        job: PredictionJob,
        result: Result<BTreeMap<NodeId, i64>, BackendError>,
    ) {
        let zone_id = self.zone.id();
        let kind = job.backend;
        if self.queues.get(&kind).and_then(PredictionQueue::in_flight) != Some(job.seq) {
            debug!(zone_id = %zone_id, backend = %kind, seq = job.seq, "stale completion ignored");
            return;
        }

        match result {
            Ok(sampled) => {
                let outcome = reconcile(
                    &job.current,
                    &sampled,
                    &job.species_ids,
                    &self.ctx.catalog,
                    &mut self.rng,
                );
                for (&species_id, &delta) in &outcome.changes {
                    if let Err(e) = self.ctx.change_log.upsert(zone_id, species_id, delta).await {
                        warn!(zone_id = %zone_id, species_id = %species_id, error = %e, "failed to record species change");
                    }
                }
                self.zone.consume_pending(kind, &job.pending);
                self.zone
                    .apply_reconciliation(outcome.changes.clone(), &sampled, &self.ctx.catalog);
                info!(
                    zone_id = %zone_id,
                    backend = %kind,
                    seq = job.seq,
                    timestep = job.timestep,
                    changes = outcome.changes.len(),
                    score = self.zone.score(),
                    "prediction reconciled"
                );
                self.ctx.notifier.publish(ZoneNotification::Prediction {
                    zone: zone_id,
                    backend: kind,
                    seq: job.seq,
                    timestep: job.timestep,
                    results: outcome.changes,
                });
            }
            Err(e) => {
                warn!(
                    zone_id = %zone_id,
                    backend = %kind,
                    seq = job.seq,
                    error = %e,
                    "prediction failed, pending additions retained"
                );
            }
        }

        let drain = self
            .queues
            .get_mut(&kind)
            .map(|queue| queue.complete(job.seq))
            .unwrap_or_default();
        for &seq in &drain.dropped {
            info!(zone_id = %zone_id, backend = %kind, seq, "prediction dropped");
        }
        let status = self.status.entry(kind).or_default();
        status.completed = status.completed.saturating_add(1);
        status.dropped_total = status
            .dropped_total
            .saturating_add(u64::try_from(drain.dropped.len()).unwrap_or(u64::MAX));
        status.last_dropped = drain.dropped;

        if let Some(next) = drain.next {
            self.dispatch(next);
        }
    }

    fn initialize_species(
        &mut self,
        species_id: SpeciesId,
        biomass: i64,
    ) -> Result<Vec<SpeciesGroup>, EngineError> {
        let catalog = Arc::clone(&self.ctx.catalog);
        let species_type = catalog
            .get(species_id)
            .ok_or(EngineError::UnknownSpecies(species_id))?;
        if self.zone.species().contains_key(&species_id) {
            return Err(EngineError::DuplicateSpecies(species_id));
        }

        let species = self.zone.new_species(species_id, biomass);
        let groups = self.zone.introduce_species(species, species_type);
        self.zone.update_score(&catalog);
        self.notify_groups(&groups);
        info!(zone_id = %self.zone.id(), species_id = %species_id, biomass, "species initialized");
        Ok(groups)
    }

    async fn purchase_species(
        &mut self,
        player: PlayerId,
        purchases: &BTreeMap<SpeciesId, i64>,
    ) -> Result<Vec<SpeciesGroup>, EngineError> {
        let catalog = Arc::clone(&self.ctx.catalog);
        if let Some(&unknown) = purchases.keys().find(|id| catalog.get(**id).is_none()) {
            return Err(EngineError::UnknownSpecies(unknown));
        }

        let zone_id = self.zone.id();
        let month = self.zone.current_month();
        let mut changed = Vec::new();
        for (&species_id, &biomass) in purchases {
            let Some(species_type) = catalog.get(species_id) else {
                continue;
            };
            let groups = self.zone.purchase_species(species_type, biomass);
            self.notify_groups(&groups);
            changed.extend(groups);

            let record = StatRecord {
                species: species_id,
                month,
                action: StatAction::Purchase,
                amount: biomass,
                player,
                zone: zone_id,
            };
            if let Err(e) = self.ctx.stats.record(record).await {
                warn!(zone_id = %zone_id, species_id = %species_id, error = %e, "failed to record purchase");
            }
            info!(zone_id = %zone_id, player_id = %player, species_id = %species_id, biomass, "species purchased");
        }
        self.zone.update_score(&catalog);
        Ok(changed)
    }

    async fn remove_species(&mut self, ids: &[SpeciesId]) -> Vec<SpeciesId> {
        let zone_id = self.zone.id();
        let removed = self.zone.remove_species(ids);
        if !removed.is_empty() {
            match self.ctx.change_log.delete(zone_id, &removed).await {
                Ok(rows) => debug!(zone_id = %zone_id, rows, "change-log rows deleted"),
                Err(e) => warn!(zone_id = %zone_id, error = %e, "failed to delete change-log rows"),
            }
            info!(zone_id = %zone_id, removed = ?removed, "species removed");
        }
        self.zone.update_score(&self.ctx.catalog);
        removed
    }

    fn notify_groups(&self, groups: &[SpeciesGroup]) {
        for group in groups {
            self.ctx.notifier.publish(ZoneNotification::SpeciesCreated {
                zone: self.zone.id(),
                group: group.clone(),
            });
        }
    }

    fn snapshot(&self) -> ZoneSnapshot {
        let queues = self
            .queues
            .iter()
            .map(|(&kind, queue)| {
                let mut status = self.status.get(&kind).cloned().unwrap_or_default();
                status.in_flight = queue.in_flight();
                status.backlog = queue.backlog();
                (kind, status)
            })
            .collect();
        let sessions = BackendKind::ALL
            .into_iter()
            .filter_map(|kind| {
                self.zone
                    .session(kind)
                    .map(|s| (kind, s.manipulation_id.clone()))
            })
            .collect();

        ZoneSnapshot {
            zone: self.zone.id(),
            month: self.zone.current_month(),
            score: self.zone.score(),
            node_biomass: self.zone.node_biomass().clone(),
            pending_additions: self.zone.pending_additions().clone(),
            last_changes: self.zone.last_changes().clone(),
            species: self.zone.species().clone(),
            sessions,
            queues,
        }
    }

    async fn shutdown(&mut self) {
        let zone_id = self.zone.id();
        let header = format!("Zone_id: {zone_id}");
        for (kind, session) in self.zone.take_sessions() {
            if let Some(backend) = self.ctx.backends.get(kind) {
                match backend.sample_biomass(&session.manipulation_id).await {
                    Ok(report) => {
                        if let Err(e) = self
                            .ctx
                            .reports
                            .write(&session.manipulation_id, &header, &report)
                            .await
                        {
                            warn!(zone_id = %zone_id, backend = %kind, error = %e, "failed to write zone report");
                        }
                    }
                    Err(e) => {
                        warn!(zone_id = %zone_id, backend = %kind, error = %e, "failed to sample zone report");
                    }
                }
            }
            for failure in self.ledger.release(kind).await {
                error!(
                    zone_id = %zone_id,
                    backend = %failure.backend,
                    resource = %failure.resource,
                    error = %failure.source,
                    "ResourceLeakRisk: release failed"
                );
            }
        }
        info!(zone_id = %zone_id, "zone engine stopped");
    }
}
