//! Core entity structs: species templates, zone-local species, and the
//! simulation job record.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::enums::JobStatus;
use crate::ids::{GroupId, JobId, ManipulationId, NodeId, SpeciesId};

// ---------------------------------------------------------------------------
// Species templates
// ---------------------------------------------------------------------------

/// One node a species template occupies, with its distribution weight.
///
/// Weights are relative allocations, not percentages; a template's weights
/// need not sum to 1.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NodeWeight {
    /// The trophic-network node.
    pub node: NodeId,
    /// Fraction of the species' biomass attributed to this node.
    pub weight: f64,
}

/// Immutable species template shared by every zone.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpeciesType {
    /// Template identifier.
    pub id: SpeciesId,
    /// Display name.
    pub name: String,
    /// Ordered node set with distribution weights.
    pub nodes: Vec<NodeWeight>,
    /// Nodes this species feeds on. Only used for food-web summaries.
    #[serde(default)]
    pub diet: Vec<NodeId>,
}

impl SpeciesType {
    /// Node ids in template order.
    pub fn node_ids(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.nodes.iter().map(|n| n.node)
    }

    /// Whether this template occupies `node`.
    pub fn occupies(&self, node: NodeId) -> bool {
        self.nodes.iter().any(|n| n.node == node)
    }
}

/// Lookup table of every species template known to the server.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "Vec<SpeciesType>", into = "Vec<SpeciesType>")]
pub struct SpeciesCatalog {
    types: BTreeMap<SpeciesId, SpeciesType>,
}

impl SpeciesCatalog {
    /// Create an empty catalog.
    pub const fn new() -> Self {
        Self {
            types: BTreeMap::new(),
        }
    }

    /// Add or replace a template.
    pub fn insert(&mut self, species_type: SpeciesType) {
        self.types.insert(species_type.id, species_type);
    }

    /// Look up a template by id.
    pub fn get(&self, id: SpeciesId) -> Option<&SpeciesType> {
        self.types.get(&id)
    }

    /// Find the template that occupies `node`, if any.
    pub fn owner_of(&self, node: NodeId) -> Option<&SpeciesType> {
        self.types.values().find(|t| t.occupies(node))
    }

    /// Number of templates.
    pub fn len(&self) -> usize {
        self.types.len()
    }

    /// Whether the catalog has no templates.
    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    /// Iterate templates in id order.
    pub fn iter(&self) -> impl Iterator<Item = &SpeciesType> {
        self.types.values()
    }
}

impl From<Vec<SpeciesType>> for SpeciesCatalog {
    fn from(types: Vec<SpeciesType>) -> Self {
        let mut catalog = Self::new();
        for t in types {
            catalog.insert(t);
        }
        catalog
    }
}

impl From<SpeciesCatalog> for Vec<SpeciesType> {
    fn from(catalog: SpeciesCatalog) -> Self {
        catalog.types.into_values().collect()
    }
}

// ---------------------------------------------------------------------------
// Zone-local species
// ---------------------------------------------------------------------------

/// Position of a group inside the zone's 3D scene.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Position {
    /// X coordinate.
    pub x: f32,
    /// Y coordinate.
    pub y: f32,
    /// Z coordinate.
    pub z: f32,
}

/// A group of organisms belonging to one zone-local species.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpeciesGroup {
    /// Group identifier.
    pub id: GroupId,
    /// Species this group belongs to.
    pub species_id: SpeciesId,
    /// Whole-unit biomass held by the group.
    pub biomass: i64,
    /// Position in the zone.
    pub position: Position,
}

/// A zone-local instantiation of a [`SpeciesType`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Species {
    /// Template identifier.
    pub id: SpeciesId,
    /// Groups keyed by id.
    pub groups: BTreeMap<GroupId, SpeciesGroup>,
}

impl Species {
    /// Create a species with no groups.
    pub const fn new(id: SpeciesId) -> Self {
        Self {
            id,
            groups: BTreeMap::new(),
        }
    }

    /// Add a group, replacing any group with the same id.
    pub fn add_group(&mut self, group: SpeciesGroup) {
        self.groups.insert(group.id, group);
    }

    /// Sum of group biomass.
    pub fn total_biomass(&self) -> i64 {
        self.groups
            .values()
            .fold(0_i64, |acc, g| acc.saturating_add(g.biomass))
    }
}

// ---------------------------------------------------------------------------
// Simulation job record
// ---------------------------------------------------------------------------

/// An ad-hoc simulation job and its persisted outcome.
///
/// A job record is written whether the job succeeds or fails, so a job id
/// is never silently lost.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimJob {
    /// Storage-assigned id. `None` until the first save.
    pub job_id: Option<JobId>,
    /// Free-form description supplied by the requester.
    pub description: String,
    /// Nodes that make up the job's food web.
    pub node_list: Vec<NodeId>,
    /// Total timesteps to simulate (timestep 1 seeds, 2..=n advance).
    pub timesteps: u32,
    /// Starting biomass per node.
    pub species_zone_map: BTreeMap<NodeId, i64>,
    /// Manipulation allocated on the classic backend.
    pub manipulation_id: Option<ManipulationId>,
    /// Manipulation allocated on the trophic backend.
    pub trophic_manipulation_id: Option<ManipulationId>,
    /// When resources were first allocated.
    pub manip_timestamp: Option<DateTime<Utc>>,
    /// Terminal status.
    pub status: JobStatus,
    /// Report payload (biomass CSV plus food-web summaries).
    pub csv: String,
}

impl SimJob {
    /// Create an unsaved job in `Failure` status; the orchestrator flips the
    /// status once every phase has succeeded.
    pub fn new(
        description: impl Into<String>,
        species_zone_map: BTreeMap<NodeId, i64>,
        timesteps: u32,
    ) -> Self {
        Self {
            job_id: None,
            description: description.into(),
            node_list: species_zone_map.keys().copied().collect(),
            timesteps,
            species_zone_map,
            manipulation_id: None,
            trophic_manipulation_id: None,
            manip_timestamp: None,
            status: JobStatus::Failure,
            csv: String::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grass() -> SpeciesType {
        SpeciesType {
            id: SpeciesId::new(1),
            name: String::from("Grass"),
            nodes: vec![
                NodeWeight {
                    node: NodeId::new(10),
                    weight: 0.5,
                },
                NodeWeight {
                    node: NodeId::new(11),
                    weight: 0.5,
                },
            ],
            diet: Vec::new(),
        }
    }

    #[test]
    fn catalog_finds_owner_of_node() {
        let catalog = SpeciesCatalog::from(vec![grass()]);
        assert_eq!(catalog.owner_of(NodeId::new(11)).map(|t| t.id), Some(SpeciesId::new(1)));
        assert!(catalog.owner_of(NodeId::new(99)).is_none());
    }

    #[test]
    fn species_total_biomass_sums_groups() {
        let mut species = Species::new(SpeciesId::new(1));
        for (id, biomass) in [(1, 100), (2, 250)] {
            species.add_group(SpeciesGroup {
                id: GroupId::new(id),
                species_id: SpeciesId::new(1),
                biomass,
                position: Position::default(),
            });
        }
        assert_eq!(species.total_biomass(), 350);
    }

    #[test]
    fn new_job_lists_nodes_from_zone_map() {
        let mut map = BTreeMap::new();
        map.insert(NodeId::new(5), 2000);
        map.insert(NodeId::new(1), 500);
        let job = SimJob::new("test", map, 10);
        assert_eq!(job.node_list, vec![NodeId::new(1), NodeId::new(5)]);
        assert_eq!(job.status, JobStatus::Failure);
        assert!(job.job_id.is_none());
    }

    #[test]
    fn catalog_deserializes_from_list() {
        let json = r#"[{"id":1,"name":"Grass","nodes":[{"node":10,"weight":1.0}]}]"#;
        let catalog: Result<SpeciesCatalog, _> = serde_json::from_str(json);
        assert_eq!(catalog.ok().map(|c| c.len()), Some(1));
    }
}
