//! Simulation backend capability for the Ecosim prediction engine.
//!
//! A backend runs the ecological numerics the game server treats as opaque.
//! Every implementation exposes the same six operations: allocate a
//! manipulation session, seed it with biomass, advance it through
//! timesteps, sample its biomass report, and release the session and its
//! network.
//!
//! Implementations are dispatched through the [`SimulationBackend`] enum
//! rather than a trait object because async methods are not dyn-compatible.
//!
//! # Modules
//!
//! - [`config`] -- Per-slot backend configuration
//! - [`error`] -- [`BackendError`]
//! - [`report`] -- Biomass report parsing and rendering
//! - [`web_service`] -- Classic web-service engine
//! - [`trophic`] -- Trophic-network (ATN) engine
//! - [`stub`] -- In-process deterministic stub

pub mod config;
pub mod error;
mod http;
pub mod report;
pub mod stub;
pub mod trophic;
pub mod web_service;

use std::collections::BTreeMap;

use ecosim_types::{ManipulationId, NetworkId, NodeId};

pub use config::{BackendConfig, BackendImpl};
pub use error::BackendError;
pub use report::{parse_biomass_report, render_biomass_report};
pub use stub::{StubBackend, StubCall, StubOp};
pub use trophic::TrophicBackend;
pub use web_service::WebServiceBackend;

/// Handles for the external resources backing one simulated run.
///
/// Both handles must be released exactly once by whoever allocated them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManipulationSession {
    /// The manipulation (simulated run) handle.
    pub manipulation_id: ManipulationId,
    /// The network handle, when the backend allocates one.
    pub network_id: Option<NetworkId>,
}

/// A simulation backend.
///
/// Uses enum dispatch instead of trait objects because async methods
/// are not dyn-compatible in Rust.
#[derive(Debug, Clone)]
pub enum SimulationBackend {
    /// Classic web-service engine.
    WebService(WebServiceBackend),
    /// Trophic-network engine.
    Trophic(TrophicBackend),
    /// In-process stub.
    Stub(StubBackend),
}

impl SimulationBackend {
    /// Build the backend a slot's configuration asks for.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError::Config`] if a remote implementation is
    /// selected without a URL.
    pub fn from_config(config: &BackendConfig) -> Result<Self, BackendError> {
        match config.implementation {
            BackendImpl::WebService | BackendImpl::Trophic if config.url.is_empty() => Err(
                BackendError::Config(format!("{:?} backend requires a url", config.implementation)),
            ),
            BackendImpl::WebService => Ok(Self::WebService(WebServiceBackend::new(&config.url))),
            BackendImpl::Trophic => Ok(Self::Trophic(TrophicBackend::new(&config.url))),
            BackendImpl::Stub => Ok(Self::Stub(StubBackend::new())),
        }
    }

    /// Human-readable name for logging.
    pub const fn name(&self) -> &'static str {
        match self {
            Self::WebService(_) => "web-service",
            Self::Trophic(_) => "trophic",
            Self::Stub(_) => "stub",
        }
    }

    /// Allocate a manipulation session covering `node_ids`.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError`] if the backend refuses or cannot be reached.
    pub async fn allocate_session(
        &self,
        node_ids: &[NodeId],
        description: &str,
        timesteps: u32,
        seed_only: bool,
    ) -> Result<ManipulationSession, BackendError> {
        match self {
            Self::WebService(b) => {
                b.allocate_session(node_ids, description, timesteps, seed_only)
                    .await
            }
            Self::Trophic(b) => {
                b.allocate_session(node_ids, description, timesteps, seed_only)
                    .await
            }
            Self::Stub(b) => {
                b.allocate_session(node_ids, description, timesteps, seed_only)
                    .await
            }
        }
    }

    /// Push biomass into a session at `timestep` without evolving it.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError`] if the session is unknown or the call fails.
    pub async fn seed(
        &self,
        species_zone_map: &BTreeMap<NodeId, i64>,
        timestep: u32,
        manipulation_id: &ManipulationId,
    ) -> Result<(), BackendError> {
        match self {
            Self::WebService(b) => b.seed(species_zone_map, timestep, manipulation_id).await,
            Self::Trophic(b) => b.seed(species_zone_map, timestep, manipulation_id).await,
            Self::Stub(b) => b.seed(species_zone_map, timestep, manipulation_id).await,
        }
    }

    /// Simulate timesteps `from..=to`.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError`] if the session is unknown or the run fails.
    pub async fn advance(
        &self,
        from: u32,
        to: u32,
        manipulation_id: &ManipulationId,
    ) -> Result<(), BackendError> {
        match self {
            Self::WebService(b) => b.advance(from, to, manipulation_id).await,
            Self::Trophic(b) => b.advance(from, to, manipulation_id).await,
            Self::Stub(b) => b.advance(from, to, manipulation_id).await,
        }
    }

    /// Fetch the session's biomass report.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError`] if the session is unknown or the call fails.
    pub async fn sample_biomass(
        &self,
        manipulation_id: &ManipulationId,
    ) -> Result<String, BackendError> {
        match self {
            Self::WebService(b) => b.sample_biomass(manipulation_id).await,
            Self::Trophic(b) => b.sample_biomass(manipulation_id).await,
            Self::Stub(b) => b.sample_biomass(manipulation_id).await,
        }
    }

    /// Delete a manipulation session.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError`] if the session is unknown or the call fails.
    pub async fn release_session(
        &self,
        manipulation_id: &ManipulationId,
    ) -> Result<(), BackendError> {
        match self {
            Self::WebService(b) => b.release_session(manipulation_id).await,
            Self::Trophic(b) => b.release_session(manipulation_id).await,
            Self::Stub(b) => b.release_session(manipulation_id).await,
        }
    }

    /// Delete a network resource.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError`] if the network is unknown or the call fails.
    pub async fn release_network(&self, network_id: &NetworkId) -> Result<(), BackendError> {
        match self {
            Self::WebService(b) => b.release_network(network_id).await,
            Self::Trophic(b) => b.release_network(network_id).await,
            Self::Stub(b) => b.release_network(network_id).await,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn node_map(entries: &[(i32, i64)]) -> BTreeMap<NodeId, i64> {
        entries.iter().map(|&(n, b)| (NodeId::new(n), b)).collect()
    }

    #[test]
    fn remote_backends_require_url() {
        let config = BackendConfig {
            enabled: true,
            implementation: BackendImpl::WebService,
            url: String::new(),
        };
        assert!(matches!(
            SimulationBackend::from_config(&config),
            Err(BackendError::Config(_))
        ));
    }

    #[test]
    fn from_config_dispatches_correctly() {
        let trophic = BackendConfig {
            enabled: true,
            implementation: BackendImpl::Trophic,
            url: "http://atn:9000".to_owned(),
        };
        assert_eq!(SimulationBackend::from_config(&trophic).unwrap().name(), "trophic");
        assert_eq!(
            SimulationBackend::from_config(&BackendConfig::stub()).unwrap().name(),
            "stub"
        );
    }

    #[tokio::test]
    async fn stub_seeds_advances_and_reports() {
        let stub = StubBackend::new().with_growth(NodeId::new(1), 2.0);
        let backend = SimulationBackend::Stub(stub.clone());

        let session = backend
            .allocate_session(&[NodeId::new(1), NodeId::new(2)], "test", 3, false)
            .await
            .unwrap();
        backend
            .seed(&node_map(&[(1, 100), (2, 40)]), 1, &session.manipulation_id)
            .await
            .unwrap();
        backend.advance(2, 3, &session.manipulation_id).await.unwrap();

        let report = backend.sample_biomass(&session.manipulation_id).await.unwrap();
        let latest = parse_biomass_report(&report).unwrap();
        assert_eq!(latest.get(&NodeId::new(1)), Some(&400));
        assert_eq!(latest.get(&NodeId::new(2)), Some(&40));
    }

    #[tokio::test]
    async fn stub_report_keeps_a_bounded_window() {
        let backend = SimulationBackend::Stub(StubBackend::new());
        let session = backend
            .allocate_session(&[NodeId::new(1)], "zone 1", 1, true)
            .await
            .unwrap();
        backend
            .seed(&node_map(&[(1, 10)]), 1, &session.manipulation_id)
            .await
            .unwrap();
        for month in 2..200 {
            backend
                .advance(month, month, &session.manipulation_id)
                .await
                .unwrap();
        }

        let report = backend.sample_biomass(&session.manipulation_id).await.unwrap();
        let header = report.lines().next().unwrap();
        assert_eq!(header.split(',').count(), stub::HISTORY_LIMIT + 1);
        assert!(header.ends_with(",199"));
        assert!(parse_biomass_report(&report).is_ok());
    }

    #[tokio::test]
    async fn stub_refuses_double_release() {
        let stub = StubBackend::new();
        let backend = SimulationBackend::Stub(stub.clone());
        let session = backend
            .allocate_session(&[NodeId::new(1)], "test", 1, true)
            .await
            .unwrap();
        let network = session.network_id.clone().unwrap();

        backend.release_session(&session.manipulation_id).await.unwrap();
        backend.release_network(&network).await.unwrap();
        assert!(backend.release_session(&session.manipulation_id).await.is_err());
        assert!(backend.release_network(&network).await.is_err());
        assert_eq!(stub.live_sessions().await, 0);
        assert_eq!(stub.live_networks().await, 0);
    }

    #[tokio::test]
    async fn stub_injected_failure_is_reported() {
        let stub = StubBackend::new();
        let backend = SimulationBackend::Stub(stub.clone());
        stub.fail_on(StubOp::Allocate).await;

        let err = backend
            .allocate_session(&[NodeId::new(1)], "test", 1, false)
            .await
            .unwrap_err();
        assert!(matches!(err, BackendError::Injected { operation: "allocate_session" }));

        stub.clear_failure(StubOp::Allocate).await;
        assert!(backend.allocate_session(&[NodeId::new(1)], "test", 1, false).await.is_ok());
        assert_eq!(stub.calls().await.len(), 2);
    }
}
