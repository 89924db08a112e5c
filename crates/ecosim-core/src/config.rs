//! Configuration loading and typed config structures for the Ecosim engine.
//!
//! The canonical configuration lives in `ecosim-config.yaml` at the project
//! root. Every section and field has a default, so an empty file (or no
//! file at all) yields a runnable offline setup: both backend slots served
//! by the in-process stub, in-memory stores, and no reports on disk.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use ecosim_backend::BackendConfig;
use ecosim_types::{BackendKind, NodeId, SpeciesCatalog, SpeciesId, ZoneId};
use serde::Deserialize;

/// Errors that can occur when loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read the configuration file from disk.
    #[error("failed to read config file: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },

    /// Failed to parse YAML content.
    #[error("failed to parse config YAML: {source}")]
    Yaml {
        /// The underlying YAML parse error.
        source: serde_yml::Error,
    },
}

impl From<serde_yml::Error> for ConfigError {
    fn from(source: serde_yml::Error) -> Self {
        Self::Yaml { source }
    }
}

/// Top-level engine configuration, mirroring `ecosim-config.yaml`.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct EcosimConfig {
    /// Scheduler and clock settings.
    #[serde(default)]
    pub engine: EngineConfig,

    /// The two backend slots.
    #[serde(default)]
    pub backends: BackendsConfig,

    /// Offline simulation job settings.
    #[serde(default)]
    pub simjob: SimJobConfig,

    /// Species templates shared by every zone.
    #[serde(default)]
    pub catalog: SpeciesCatalog,

    /// Zones to spawn at startup.
    #[serde(default)]
    pub zones: Vec<ZoneSeed>,

    /// Simulation jobs to run once at startup.
    #[serde(default)]
    pub jobs: Vec<JobSpec>,

    /// Infrastructure connection strings.
    #[serde(default)]
    pub infrastructure: InfrastructureConfig,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl EcosimConfig {
    /// Load configuration from a YAML file at the given path.
    ///
    /// Environment variables override YAML values:
    /// - `DATABASE_URL` overrides `infrastructure.postgres_url`
    /// - `ECOSIM_CLASSIC_URL` overrides `backends.classic.url`
    /// - `ECOSIM_TROPHIC_URL` overrides `backends.trophic.url`
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] if the file cannot be read, or
    /// [`ConfigError::Yaml`] if the content is not valid YAML.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::parse(&contents)
    }

    /// Parse configuration from a YAML string, then apply environment
    /// overrides.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Yaml`] if the string is not valid YAML.
    pub fn parse(yaml: &str) -> Result<Self, ConfigError> {
        let mut config: Self = serde_yml::from_str(yaml)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Apply the `DATABASE_URL`, `ECOSIM_CLASSIC_URL` and
    /// `ECOSIM_TROPHIC_URL` overrides.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("DATABASE_URL") {
            self.infrastructure.postgres_url = Some(val);
        }
        if let Ok(val) = std::env::var("ECOSIM_CLASSIC_URL") {
            self.backends.classic.url = val;
        }
        if let Ok(val) = std::env::var("ECOSIM_TROPHIC_URL") {
            self.backends.trophic.url = val;
        }
    }
}

/// Scheduler and clock settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct EngineConfig {
    /// Suppress client notifications.
    #[serde(default)]
    pub silent: bool,

    /// Upper bound on backend calls running at once, across all zones.
    #[serde(default = "default_max_concurrent_jobs")]
    pub max_concurrent_jobs: usize,

    /// Seed for the reconciliation shuffle. Unset means OS entropy.
    #[serde(default)]
    pub rng_seed: Option<u64>,

    /// Real-time milliseconds between zone clock ticks.
    #[serde(default = "default_month_interval_ms")]
    pub month_interval_ms: u64,

    /// Game days each clock tick advances.
    #[serde(default = "default_days_per_tick")]
    pub days_per_tick: u32,

    /// Capacity of the per-zone command channel.
    #[serde(default = "default_command_buffer")]
    pub command_buffer: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            silent: false,
            max_concurrent_jobs: default_max_concurrent_jobs(),
            rng_seed: None,
            month_interval_ms: default_month_interval_ms(),
            days_per_tick: default_days_per_tick(),
            command_buffer: default_command_buffer(),
        }
    }
}

/// The classic and trophic backend slots.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct BackendsConfig {
    /// Classic web-service slot.
    #[serde(default = "default_backend_slot")]
    pub classic: BackendConfig,

    /// Trophic-network slot.
    #[serde(default)]
    pub trophic: BackendConfig,
}

impl Default for BackendsConfig {
    fn default() -> Self {
        Self {
            classic: default_backend_slot(),
            trophic: BackendConfig::default(),
        }
    }
}

impl BackendsConfig {
    /// The slot configured for `kind`.
    pub const fn slot(&self, kind: BackendKind) -> &BackendConfig {
        match kind {
            BackendKind::Classic => &self.classic,
            BackendKind::Trophic => &self.trophic,
        }
    }
}

/// Offline simulation job settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SimJobConfig {
    /// Directory biomass reports are written to. Unset disables reports.
    #[serde(default)]
    pub report_dir: Option<PathBuf>,

    /// Descriptions are cut to this many characters before reaching a
    /// backend.
    #[serde(default = "default_description_max_len")]
    pub description_max_len: usize,
}

impl Default for SimJobConfig {
    fn default() -> Self {
        Self {
            report_dir: None,
            description_max_len: default_description_max_len(),
        }
    }
}

/// A zone to spawn at startup.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ZoneSeed {
    /// Zone id.
    pub id: ZoneId,

    /// Species placed in the zone before the first tick.
    #[serde(default)]
    pub species: Vec<InitialSpecies>,
}

/// A species and its starting total biomass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct InitialSpecies {
    /// Species template id.
    pub species: SpeciesId,
    /// Total biomass, split across nodes by distribution weight.
    pub biomass: i64,
}

/// A batch simulation job.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct JobSpec {
    /// Free-form description.
    #[serde(default)]
    pub description: String,

    /// Timesteps to simulate.
    #[serde(default = "default_job_timesteps")]
    pub timesteps: u32,

    /// Starting biomass per node.
    pub nodes: BTreeMap<NodeId, i64>,
}

/// Infrastructure connection strings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct InfrastructureConfig {
    /// `PostgreSQL` connection string. Unset means in-memory stores.
    #[serde(default)]
    pub postgres_url: Option<String>,

    /// Maximum pooled `PostgreSQL` connections.
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error), used when `RUST_LOG`
    /// is unset.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Emit JSON lines instead of human-readable output.
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

// ---------------------------------------------------------------------------
// Default value functions (serde default requires named functions)
// ---------------------------------------------------------------------------

const fn default_max_concurrent_jobs() -> usize {
    8
}

const fn default_month_interval_ms() -> u64 {
    60_000
}

const fn default_days_per_tick() -> u32 {
    30
}

const fn default_command_buffer() -> usize {
    64
}

const fn default_backend_slot() -> BackendConfig {
    BackendConfig::stub()
}

const fn default_description_max_len() -> usize {
    50
}

const fn default_job_timesteps() -> u32 {
    5
}

const fn default_max_connections() -> u32 {
    8
}

fn default_log_level() -> String {
    "info".to_owned()
}
