//! In-process stub backend.
//!
//! The stub keeps every session in memory and evolves node biomass with a
//! fixed per-node growth factor per timestep. It records each call it
//! receives and can be told to fail specific operations, which makes it
//! the backend of choice for tests and for offline runs without the remote
//! engines.
//!
//! An optional gate lets tests hold `advance` calls until they release a
//! permit, so a job can be kept in flight deterministically.
//!
//! Each session keeps at most [`HISTORY_LIMIT`] samples; reports render
//! the retained window only.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use ecosim_types::{ManipulationId, NetworkId, NodeId};
use tokio::sync::{Mutex, Semaphore};
use tracing::debug;

use crate::ManipulationSession;
use crate::error::BackendError;
use crate::report::render_biomass_report;

/// Backend operations that can be made to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum StubOp {
    /// `allocate_session`.
    Allocate,
    /// `seed`.
    Seed,
    /// `advance`.
    Advance,
    /// `sample_biomass`.
    Sample,
    /// `release_session`.
    ReleaseSession,
    /// `release_network`.
    ReleaseNetwork,
}

impl StubOp {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Allocate => "allocate_session",
            Self::Seed => "seed",
            Self::Advance => "advance",
            Self::Sample => "sample_biomass",
            Self::ReleaseSession => "release_session",
            Self::ReleaseNetwork => "release_network",
        }
    }
}

/// A call received by the stub, in arrival order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StubCall {
    /// A session allocation.
    Allocate {
        /// Nodes the session covers.
        node_ids: Vec<NodeId>,
        /// Requester description.
        description: String,
        /// Requested timestep count.
        timesteps: u32,
        /// Whether only seeding was requested.
        seed_only: bool,
    },
    /// Biomass pushed into a session.
    Seed {
        /// Target session.
        manipulation_id: ManipulationId,
        /// Timestep the biomass applies to.
        timestep: u32,
        /// Biomass per node.
        biomass: BTreeMap<NodeId, i64>,
    },
    /// Timesteps simulated.
    Advance {
        /// Target session.
        manipulation_id: ManipulationId,
        /// First timestep.
        from: u32,
        /// Last timestep, inclusive.
        to: u32,
    },
    /// Biomass report requested.
    Sample {
        /// Target session.
        manipulation_id: ManipulationId,
    },
    /// Session deleted.
    ReleaseSession(ManipulationId),
    /// Network deleted.
    ReleaseNetwork(NetworkId),
}

/// Samples retained per session.
pub const HISTORY_LIMIT: usize = 64;

#[derive(Debug, Default)]
struct StubSession {
    current: BTreeMap<NodeId, f64>,
    history: Vec<(u32, BTreeMap<NodeId, f64>)>,
}

impl StubSession {
    /// Append the current biomass as the sample for `timestep`, dropping
    /// the oldest samples beyond the limit.
    fn record(&mut self, timestep: u32) {
        self.history.push((timestep, self.current.clone()));
        let excess = self.history.len().saturating_sub(HISTORY_LIMIT);
        if excess > 0 {
            self.history.drain(..excess);
        }
    }
}

#[derive(Debug, Default)]
struct StubState {
    next_id: u64,
    sessions: BTreeMap<ManipulationId, StubSession>,
    networks: BTreeSet<NetworkId>,
    calls: Vec<StubCall>,
    failures: BTreeSet<StubOp>,
}

impl StubState {
    fn check(&self, op: StubOp) -> Result<(), BackendError> {
        if self.failures.contains(&op) {
            return Err(BackendError::Injected {
                operation: op.as_str(),
            });
        }
        Ok(())
    }

    fn session_mut(&mut self, id: &ManipulationId) -> Result<&mut StubSession, BackendError> {
        self.sessions
            .get_mut(id)
            .ok_or_else(|| BackendError::UnknownSession(id.to_string()))
    }
}

/// Deterministic in-memory backend.
///
/// Clones share the same session state, so a test can keep one clone for
/// inspection while the engine owns another.
#[derive(Debug, Clone)]
pub struct StubBackend {
    state: Arc<Mutex<StubState>>,
    growth: BTreeMap<NodeId, f64>,
    default_growth: f64,
    gate: Option<Arc<Semaphore>>,
}

impl Default for StubBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl StubBackend {
    /// A stub whose nodes keep constant biomass.
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(StubState::default())),
            growth: BTreeMap::new(),
            default_growth: 1.0,
            gate: None,
        }
    }

    /// Multiply `node`'s biomass by `factor` every timestep.
    #[must_use]
    pub fn with_growth(mut self, node: NodeId, factor: f64) -> Self {
        self.growth.insert(node, factor);
        self
    }

    /// Growth factor for nodes without an explicit factor.
    #[must_use]
    pub const fn with_default_growth(mut self, factor: f64) -> Self {
        self.default_growth = factor;
        self
    }

    /// Make every `advance` wait for (and consume) one permit of `gate`.
    #[must_use]
    pub fn with_gate(mut self, gate: Arc<Semaphore>) -> Self {
        self.gate = Some(gate);
        self
    }

    /// Make `op` fail until [`clear_failure`](Self::clear_failure) is called.
    pub async fn fail_on(&self, op: StubOp) {
        self.state.lock().await.failures.insert(op);
    }

    /// Stop failing `op`.
    pub async fn clear_failure(&self, op: StubOp) {
        self.state.lock().await.failures.remove(&op);
    }

    /// Every call received so far.
    pub async fn calls(&self) -> Vec<StubCall> {
        self.state.lock().await.calls.clone()
    }

    /// Number of sessions allocated and not yet released.
    pub async fn live_sessions(&self) -> usize {
        self.state.lock().await.sessions.len()
    }

    /// Number of networks allocated and not yet released.
    pub async fn live_networks(&self) -> usize {
        self.state.lock().await.networks.len()
    }

    pub(crate) async fn allocate_session(
        &self,
        node_ids: &[NodeId],
        description: &str,
        timesteps: u32,
        seed_only: bool,
    ) -> Result<ManipulationSession, BackendError> {
        let mut state = self.state.lock().await;
        state.calls.push(StubCall::Allocate {
            node_ids: node_ids.to_vec(),
            description: description.to_owned(),
            timesteps,
            seed_only,
        });
        state.check(StubOp::Allocate)?;

        state.next_id = state.next_id.saturating_add(1);
        let manipulation_id = ManipulationId::new(format!("stub-manip-{}", state.next_id));
        let network_id = NetworkId::new(format!("stub-net-{}", state.next_id));

        state
            .sessions
            .insert(manipulation_id.clone(), StubSession::default());
        state.networks.insert(network_id.clone());

        debug!(manipulation_id = %manipulation_id, "stub allocated session");
        Ok(ManipulationSession {
            manipulation_id,
            network_id: Some(network_id),
        })
    }

    pub(crate) async fn seed(
        &self,
        species_zone_map: &BTreeMap<NodeId, i64>,
        timestep: u32,
        manipulation_id: &ManipulationId,
    ) -> Result<(), BackendError> {
        let mut state = self.state.lock().await;
        state.calls.push(StubCall::Seed {
            manipulation_id: manipulation_id.clone(),
            timestep,
            biomass: species_zone_map.clone(),
        });
        state.check(StubOp::Seed)?;

        let session = state.session_mut(manipulation_id)?;
        for (&node, &amount) in species_zone_map {
            #[allow(clippy::cast_precision_loss)]
            let amount = amount as f64;
            let entry = session.current.entry(node).or_insert(0.0);
            *entry += amount;
        }
        session.record(timestep);
        Ok(())
    }

    pub(crate) async fn advance(
        &self,
        from: u32,
        to: u32,
        manipulation_id: &ManipulationId,
    ) -> Result<(), BackendError> {
        if let Some(gate) = &self.gate
            && let Ok(permit) = gate.acquire().await
        {
            permit.forget();
        }

        let mut state = self.state.lock().await;
        state.calls.push(StubCall::Advance {
            manipulation_id: manipulation_id.clone(),
            from,
            to,
        });
        state.check(StubOp::Advance)?;

        let growth = &self.growth;
        let default_growth = self.default_growth;
        let session = state.session_mut(manipulation_id)?;
        for timestep in from..=to {
            for (node, biomass) in &mut session.current {
                *biomass *= growth.get(node).copied().unwrap_or(default_growth);
            }
            session.record(timestep);
        }
        Ok(())
    }

    pub(crate) async fn sample_biomass(
        &self,
        manipulation_id: &ManipulationId,
    ) -> Result<String, BackendError> {
        let mut state = self.state.lock().await;
        state.calls.push(StubCall::Sample {
            manipulation_id: manipulation_id.clone(),
        });
        state.check(StubOp::Sample)?;

        let session = state.session_mut(manipulation_id)?;
        if session.history.is_empty() {
            return Ok(render_biomass_report(&[(0, session.current.clone())]));
        }
        Ok(render_biomass_report(&session.history))
    }

    pub(crate) async fn release_session(
        &self,
        manipulation_id: &ManipulationId,
    ) -> Result<(), BackendError> {
        let mut state = self.state.lock().await;
        state
            .calls
            .push(StubCall::ReleaseSession(manipulation_id.clone()));
        state.check(StubOp::ReleaseSession)?;

        state
            .sessions
            .remove(manipulation_id)
            .map(|_| ())
            .ok_or_else(|| BackendError::UnknownSession(manipulation_id.to_string()))
    }

    pub(crate) async fn release_network(&self, network_id: &NetworkId) -> Result<(), BackendError> {
        let mut state = self.state.lock().await;
        state.calls.push(StubCall::ReleaseNetwork(network_id.clone()));
        state.check(StubOp::ReleaseNetwork)?;

        if state.networks.remove(network_id) {
            Ok(())
        } else {
            Err(BackendError::UnknownSession(network_id.to_string()))
        }
    }
}
