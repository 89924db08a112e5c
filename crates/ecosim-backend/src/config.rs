//! Configuration types for simulation backends.
//!
//! Backends are declared in the `backends` section of `ecosim-config.yaml`,
//! one entry per slot (`classic`, `trophic`). The implementation behind a
//! slot is chosen by `implementation`, so a slot can point at the remote
//! service in production and at the in-process stub for offline runs.

use serde::Deserialize;

/// Configuration for a single backend slot.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct BackendConfig {
    /// Whether this slot participates in predictions and sim jobs.
    #[serde(default)]
    pub enabled: bool,

    /// Which implementation serves this slot.
    #[serde(default = "default_implementation")]
    pub implementation: BackendImpl,

    /// Base URL of the remote service. Ignored by the stub.
    #[serde(default)]
    pub url: String,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            implementation: default_implementation(),
            url: String::new(),
        }
    }
}

impl BackendConfig {
    /// An enabled slot served by the in-process stub.
    pub const fn stub() -> Self {
        Self {
            enabled: true,
            implementation: BackendImpl::Stub,
            url: String::new(),
        }
    }
}

/// Supported backend implementations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendImpl {
    /// Classic web-service engine (remote manipulation + network resources).
    WebService,
    /// Trophic-network engine (locally issued manipulation ids).
    Trophic,
    /// In-process deterministic stub.
    Stub,
}

const fn default_implementation() -> BackendImpl {
    BackendImpl::Stub
}
