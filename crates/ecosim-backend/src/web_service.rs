//! Classic web-service simulation engine.
//!
//! The service allocates both a manipulation (one simulated run) and a
//! network (the food-web graph the run operates on). Both handles are
//! issued remotely and must be deleted when the caller is done with them.

use std::collections::BTreeMap;

use ecosim_types::{ManipulationId, NetworkId, NodeId};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::ManipulationSession;
use crate::error::BackendError;
use crate::http::HttpTransport;

/// Backend for the classic web-service engine.
#[derive(Debug, Clone)]
pub struct WebServiceBackend {
    http: HttpTransport,
}

#[derive(Serialize)]
struct AllocateRequest<'a> {
    node_ids: &'a [NodeId],
    description: &'a str,
    timesteps: u32,
    seed_only: bool,
}

#[derive(Deserialize)]
struct AllocateResponse {
    manipulation_id: String,
    network_id: String,
}

#[derive(Serialize)]
struct SeedRequest<'a> {
    timestep: u32,
    biomass: &'a BTreeMap<NodeId, i64>,
}

#[derive(Serialize)]
struct RunRequest {
    from_timestep: u32,
    to_timestep: u32,
}

impl WebServiceBackend {
    /// Create a backend talking to the service at `url`.
    pub fn new(url: &str) -> Self {
        Self {
            http: HttpTransport::new(url),
        }
    }

    pub(crate) async fn allocate_session(
        &self,
        node_ids: &[NodeId],
        description: &str,
        timesteps: u32,
        seed_only: bool,
    ) -> Result<ManipulationSession, BackendError> {
        let response: AllocateResponse = self
            .http
            .post_json(
                "manipulations",
                &AllocateRequest {
                    node_ids,
                    description,
                    timesteps,
                    seed_only,
                },
            )
            .await?;

        if response.manipulation_id.is_empty() {
            return Err(BackendError::Http(
                "service returned an empty manipulation id".to_owned(),
            ));
        }

        debug!(
            manipulation_id = %response.manipulation_id,
            network_id = %response.network_id,
            nodes = node_ids.len(),
            "web service allocated session"
        );

        let network_id = NetworkId::new(response.network_id);
        Ok(ManipulationSession {
            manipulation_id: ManipulationId::new(response.manipulation_id),
            network_id: (!network_id.is_empty()).then_some(network_id),
        })
    }

    pub(crate) async fn seed(
        &self,
        species_zone_map: &BTreeMap<NodeId, i64>,
        timestep: u32,
        manipulation_id: &ManipulationId,
    ) -> Result<(), BackendError> {
        self.http
            .post_unit(
                &format!("manipulations/{manipulation_id}/seed"),
                &SeedRequest {
                    timestep,
                    biomass: species_zone_map,
                },
            )
            .await
    }

    pub(crate) async fn advance(
        &self,
        from_timestep: u32,
        to_timestep: u32,
        manipulation_id: &ManipulationId,
    ) -> Result<(), BackendError> {
        self.http
            .post_unit(
                &format!("manipulations/{manipulation_id}/run"),
                &RunRequest {
                    from_timestep,
                    to_timestep,
                },
            )
            .await
    }

    pub(crate) async fn sample_biomass(
        &self,
        manipulation_id: &ManipulationId,
    ) -> Result<String, BackendError> {
        self.http
            .get_text(&format!("manipulations/{manipulation_id}/biomass"))
            .await
    }

    pub(crate) async fn release_session(
        &self,
        manipulation_id: &ManipulationId,
    ) -> Result<(), BackendError> {
        self.http
            .delete(&format!("manipulations/{manipulation_id}"))
            .await
    }

    pub(crate) async fn release_network(&self, network_id: &NetworkId) -> Result<(), BackendError> {
        self.http.delete(&format!("networks/{network_id}")).await
    }
}
