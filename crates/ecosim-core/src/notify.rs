//! Notification sink for zone events.
//!
//! Zone engines publish on a tokio broadcast channel; the lobby transport
//! (or a test) subscribes. In silent mode nothing is published.

use std::collections::BTreeMap;

use ecosim_types::{BackendKind, SpeciesGroup, SpeciesId, ZoneId};
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::trace;

/// Capacity of the notification channel.
///
/// A subscriber that falls behind by more than this many messages receives
/// [`broadcast::error::RecvError::Lagged`] and skips to the newest one.
const BROADCAST_CAPACITY: usize = 256;

/// A message for the players of a zone.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ZoneNotification {
    /// A prediction step was reconciled.
    Prediction {
        /// Zone the step ran for.
        zone: ZoneId,
        /// Backend that produced it.
        backend: BackendKind,
        /// Job sequence id.
        seq: u64,
        /// Simulated timestep.
        timestep: u32,
        /// Net change per species.
        results: BTreeMap<SpeciesId, i64>,
    },
    /// A species group was created or grew through a purchase.
    SpeciesCreated {
        /// Zone the group lives in.
        zone: ZoneId,
        /// The group after the change.
        group: SpeciesGroup,
    },
}

/// Publishing side of the notification channel.
#[derive(Debug, Clone)]
pub struct Notifier {
    tx: broadcast::Sender<ZoneNotification>,
    silent: bool,
}

impl Notifier {
    /// A notifier; `silent` suppresses every message.
    pub fn new(silent: bool) -> Self {
        let (tx, _) = broadcast::channel(BROADCAST_CAPACITY);
        Self { tx, silent }
    }

    /// Receive every message published from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<ZoneNotification> {
        self.tx.subscribe()
    }

    /// Whether messages are suppressed.
    pub const fn is_silent(&self) -> bool {
        self.silent
    }

    /// Publish `notification` unless silent.
    pub fn publish(&self, notification: ZoneNotification) {
        if self.silent {
            return;
        }
        // No subscribers is not an error.
        if self.tx.send(notification).is_err() {
            trace!("notification published with no subscribers");
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use super::*;

    fn prediction() -> ZoneNotification {
        ZoneNotification::Prediction {
            zone: ZoneId::new(1),
            backend: BackendKind::Classic,
            seq: 1,
            timestep: 2,
            results: [(SpeciesId::new(4), 12)].into_iter().collect(),
        }
    }

    #[tokio::test]
    async fn subscribers_receive_published_messages() {
        let notifier = Notifier::new(false);
        let mut rx = notifier.subscribe();
        notifier.publish(prediction());
        assert_eq!(rx.recv().await.unwrap(), prediction());
    }

    #[tokio::test]
    async fn silent_mode_publishes_nothing() {
        let notifier = Notifier::new(true);
        let mut rx = notifier.subscribe();
        notifier.publish(prediction());
        assert!(matches!(
            rx.try_recv(),
            Err(broadcast::error::TryRecvError::Empty)
        ));
    }

    #[test]
    fn serializes_with_type_tag() {
        let json = serde_json::to_value(prediction()).unwrap();
        assert_eq!(json["type"], "prediction");
        assert_eq!(json["results"]["4"], 12);
    }
}
