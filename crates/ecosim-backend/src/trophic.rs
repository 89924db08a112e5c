//! Alternate trophic-network (ATN) engine.
//!
//! Unlike the classic service, the ATN engine does not hand out ids: the
//! caller mints a manipulation id locally and the engine creates a model
//! under that key on first use. There is no separate network resource, so
//! sessions from this backend never carry a network id.

use std::collections::BTreeMap;

use ecosim_types::{ManipulationId, NetworkId, NodeId};
use serde::Serialize;
use tracing::debug;
use uuid::Uuid;

use crate::ManipulationSession;
use crate::error::BackendError;
use crate::http::HttpTransport;

/// Backend for the trophic-network engine.
#[derive(Debug, Clone)]
pub struct TrophicBackend {
    http: HttpTransport,
}

#[derive(Serialize)]
struct CreateModelRequest<'a> {
    node_ids: &'a [NodeId],
    description: &'a str,
    timesteps: u32,
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

impl TrophicBackend {
    /// Create a backend talking to the ATN engine at `url`.
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
        _seed_only: bool,
    ) -> Result<ManipulationSession, BackendError> {
        let manipulation_id = ManipulationId::new(Uuid::new_v4().to_string());
        self.http
            .post_unit(
                &format!("atn/{manipulation_id}"),
                &CreateModelRequest {
                    node_ids,
                    description,
                    timesteps,
                },
            )
            .await?;

        debug!(
            manipulation_id = %manipulation_id,
            nodes = node_ids.len(),
            "trophic engine created model"
        );

        Ok(ManipulationSession {
            manipulation_id,
            network_id: None,
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
                &format!("atn/{manipulation_id}/seed"),
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
                &format!("atn/{manipulation_id}/run"),
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
            .get_text(&format!("atn/{manipulation_id}/biomass"))
            .await
    }

    pub(crate) async fn release_session(
        &self,
        manipulation_id: &ManipulationId,
    ) -> Result<(), BackendError> {
        self.http.delete(&format!("atn/{manipulation_id}")).await
    }

    #[allow(clippy::unused_async)]
    pub(crate) async fn release_network(&self, network_id: &NetworkId) -> Result<(), BackendError> {
        // The ATN engine never allocates networks.
        debug!(network_id = %network_id, "trophic engine has no network to release");
        Ok(())
    }
}
