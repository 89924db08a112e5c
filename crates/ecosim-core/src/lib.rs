//! Zone scheduling, biomass reconciliation and simulation jobs for Ecosim.
//!
//! Each zone runs as an actor ([`engine::ZoneEngine`]) that turns clock
//! ticks and player actions into prediction jobs, keeps at most one job in
//! flight per backend, and folds each backend sample back into per-species
//! changes. Offline simulation jobs run through
//! [`simjob::SimJobOrchestrator`] with compensating rollback.
//!
//! # Modules
//!
//! - [`backends`] -- The enabled backend slots.
//! - [`clock`] -- Zone clock and month derivation.
//! - [`config`] -- Configuration loading from `ecosim-config.yaml` into
//!   strongly-typed structs.
//! - [`engine`] -- The per-zone actor and its handle.
//! - [`foodweb`] -- Consumption and food-chain summaries for job reports.
//! - [`ledger`] -- Allocated backend resources awaiting release.
//! - [`notify`] -- Notification sink.
//! - [`prediction`] -- Prediction jobs and the coalescing queue.
//! - [`reconcile`] -- Node deltas to per-species changes.
//! - [`report`] -- Biomass report files.
//! - [`simjob`] -- Multi-phase simulation jobs.
//! - [`zone`] -- Zone state.

pub mod backends;
pub mod clock;
pub mod config;
pub mod engine;
pub mod foodweb;
pub mod ledger;
pub mod notify;
pub mod prediction;
pub mod reconcile;
pub mod report;
pub mod simjob;
pub mod zone;

pub use backends::BackendSet;
pub use config::{ConfigError, EcosimConfig};
pub use engine::{EngineContext, EngineError, ZoneEngine, ZoneHandle, ZoneSnapshot};
pub use notify::{Notifier, ZoneNotification};
pub use simjob::{JobPhase, SimJobError, SimJobOrchestrator, SimJobOutcome};
