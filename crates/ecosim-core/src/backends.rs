//! The enabled backend slots.

use ecosim_backend::{BackendError, SimulationBackend};
use ecosim_types::BackendKind;

use crate::config::BackendsConfig;

/// Backends for the slots that are enabled. A disabled slot is `None`.
#[derive(Debug, Clone, Default)]
pub struct BackendSet {
    classic: Option<SimulationBackend>,
    trophic: Option<SimulationBackend>,
}

impl BackendSet {
    /// Build every enabled slot.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError::Config`] if an enabled slot is misconfigured.
    pub fn from_config(config: &BackendsConfig) -> Result<Self, BackendError> {
        let mut set = Self::default();
        for kind in BackendKind::ALL {
            let slot = config.slot(kind);
            if slot.enabled {
                set = set.with(kind, SimulationBackend::from_config(slot)?);
            }
        }
        Ok(set)
    }

    /// Enable `kind` with `backend`.
    #[must_use]
    pub fn with(mut self, kind: BackendKind, backend: SimulationBackend) -> Self {
        match kind {
            BackendKind::Classic => self.classic = Some(backend),
            BackendKind::Trophic => self.trophic = Some(backend),
        }
        self
    }

    /// The backend serving `kind`, if enabled.
    pub const fn get(&self, kind: BackendKind) -> Option<&SimulationBackend> {
        match kind {
            BackendKind::Classic => self.classic.as_ref(),
            BackendKind::Trophic => self.trophic.as_ref(),
        }
    }

    /// Enabled slots in dispatch order.
    pub fn enabled(&self) -> impl Iterator<Item = (BackendKind, &SimulationBackend)> {
        BackendKind::ALL
            .into_iter()
            .filter_map(|kind| self.get(kind).map(|b| (kind, b)))
    }

    /// Whether `kind` is enabled.
    pub const fn is_enabled(&self, kind: BackendKind) -> bool {
        self.get(kind).is_some()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use ecosim_backend::{BackendConfig, StubBackend};

    use super::*;

    #[test]
    fn only_enabled_slots_are_built() {
        let config = BackendsConfig {
            classic: BackendConfig::stub(),
            trophic: BackendConfig::default(),
        };
        let set = BackendSet::from_config(&config).unwrap();
        assert!(set.is_enabled(BackendKind::Classic));
        assert!(!set.is_enabled(BackendKind::Trophic));
        assert_eq!(set.enabled().count(), 1);
    }

    #[test]
    fn enabled_yields_dispatch_order() {
        let set = BackendSet::default()
            .with(BackendKind::Trophic, SimulationBackend::Stub(StubBackend::new()))
            .with(BackendKind::Classic, SimulationBackend::Stub(StubBackend::new()));
        let kinds: Vec<_> = set.enabled().map(|(k, _)| k).collect();
        assert_eq!(kinds, vec![BackendKind::Classic, BackendKind::Trophic]);
    }
}
