//! Shared type definitions for the Ecosim prediction engine.
//!
//! This crate is the single source of truth for identifiers and entity
//! structs used across the Ecosim workspace.
//!
//! # Modules
//!
//! - [`ids`] -- Type-safe wrappers for integer keys and backend handles
//! - [`enums`] -- Backend slots, job status, statistic kinds
//! - [`structs`] -- Species templates, zone-local species, simulation jobs

pub mod enums;
pub mod ids;
pub mod structs;

// Re-export all public types at crate root for convenience.
pub use enums::{BackendKind, JobStatus, StatAction};
pub use ids::{GroupId, JobId, ManipulationId, NetworkId, NodeId, PlayerId, SpeciesId, ZoneId};
pub use structs::{
    NodeWeight, Position, SimJob, Species, SpeciesCatalog, SpeciesGroup, SpeciesType,
};
