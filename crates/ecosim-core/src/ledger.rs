//! Bookkeeping for external backend resources.
//!
//! Every manipulation and network handle that has been allocated is held
//! here until it is released. Release takes the handle out of the ledger
//! before calling the backend, so no handle is ever released twice, even
//! when the release call itself fails.

use std::collections::BTreeMap;

use ecosim_backend::{BackendError, ManipulationSession, SimulationBackend};
use ecosim_types::{BackendKind, ManipulationId, NetworkId};
use tracing::debug;

/// A release call that failed. The resource may still exist remotely.
#[derive(Debug)]
pub struct ReleaseFailure {
    /// Backend slot the resource belongs to.
    pub backend: BackendKind,
    /// `manipulation <id>` or `network <id>`.
    pub resource: String,
    /// Why the release failed.
    pub source: BackendError,
}

#[derive(Debug)]
struct HeldSession {
    backend: SimulationBackend,
    manipulation: Option<ManipulationId>,
    network: Option<NetworkId>,
}

/// Allocated backend handles awaiting release, one session per slot.
#[derive(Debug, Default)]
pub struct ResourceLedger {
    held: BTreeMap<BackendKind, HeldSession>,
}

impl ResourceLedger {
    /// An empty ledger.
    pub const fn new() -> Self {
        Self {
            held: BTreeMap::new(),
        }
    }

    /// Start tracking `session`, allocated on `backend` for slot `kind`.
    pub fn hold(
        &mut self,
        kind: BackendKind,
        backend: SimulationBackend,
        session: ManipulationSession,
    ) {
        self.held.insert(
            kind,
            HeldSession {
                backend,
                manipulation: Some(session.manipulation_id),
                network: session.network_id,
            },
        );
    }

    /// Slots with resources still held.
    pub fn held(&self) -> Vec<BackendKind> {
        self.held.keys().copied().collect()
    }

    /// Whether anything is still held for `kind`.
    pub fn is_held(&self, kind: BackendKind) -> bool {
        self.held.contains_key(&kind)
    }

    /// Release the manipulation and then the network held for `kind`.
    ///
    /// Both releases are attempted even if the first fails. Returns the
    /// failures; an empty list means everything was released.
    pub async fn release(&mut self, kind: BackendKind) -> Vec<ReleaseFailure> {
        let Some(mut held) = self.held.remove(&kind) else {
            return Vec::new();
        };

        let mut failures = Vec::new();
        if let Some(manipulation) = held.manipulation.take() {
            match held.backend.release_session(&manipulation).await {
                Ok(()) => debug!(backend = %kind, manipulation_id = %manipulation, "released manipulation"),
                Err(source) => failures.push(ReleaseFailure {
                    backend: kind,
                    resource: format!("manipulation {manipulation}"),
                    source,
                }),
            }
        }
        if let Some(network) = held.network.take() {
            match held.backend.release_network(&network).await {
                Ok(()) => debug!(backend = %kind, network_id = %network, "released network"),
                Err(source) => failures.push(ReleaseFailure {
                    backend: kind,
                    resource: format!("network {network}"),
                    source,
                }),
            }
        }
        failures
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use ecosim_backend::{StubBackend, StubCall, StubOp};
    use ecosim_types::NodeId;

    use super::*;

    async fn allocated(stub: &StubBackend) -> (SimulationBackend, ManipulationSession) {
        let backend = SimulationBackend::Stub(stub.clone());
        let session = backend
            .allocate_session(&[NodeId::new(1)], "ledger", 1, true)
            .await
            .unwrap();
        (backend, session)
    }

    #[tokio::test]
    async fn release_frees_both_handles_once() {
        let stub = StubBackend::new();
        let (backend, session) = allocated(&stub).await;
        let mut ledger = ResourceLedger::new();
        ledger.hold(BackendKind::Classic, backend, session);

        assert!(ledger.release(BackendKind::Classic).await.is_empty());
        assert!(ledger.release(BackendKind::Classic).await.is_empty());
        assert!(!ledger.is_held(BackendKind::Classic));

        let releases = stub
            .calls()
            .await
            .into_iter()
            .filter(|c| matches!(c, StubCall::ReleaseSession(_) | StubCall::ReleaseNetwork(_)))
            .count();
        assert_eq!(releases, 2);
        assert_eq!(stub.live_sessions().await, 0);
        assert_eq!(stub.live_networks().await, 0);
    }

    #[tokio::test]
    async fn failed_manipulation_release_still_releases_network() {
        let stub = StubBackend::new();
        let (backend, session) = allocated(&stub).await;
        stub.fail_on(StubOp::ReleaseSession).await;

        let mut ledger = ResourceLedger::new();
        ledger.hold(BackendKind::Trophic, backend, session);
        let failures = ledger.release(BackendKind::Trophic).await;

        assert_eq!(failures.len(), 1);
        assert!(failures.first().unwrap().resource.starts_with("manipulation"));
        assert_eq!(stub.live_networks().await, 0);
        assert!(ledger.held().is_empty());
    }
}
