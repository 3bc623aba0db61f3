//! Typed events and the fan-out bus that carries them to subscribers.
//!
//! Each subscriber owns an unbounded channel, so delivery is in order per
//! emitter and never dropped while the receiver is alive. Closed receivers
//! are pruned on the next emit.

use std::sync::{Arc, Mutex, PoisonError};

use serde::Serialize;
use tokio::sync::mpsc;

use hostshare_core::{HostRecord, SharedHostRecord};

use crate::peer::Peer;

/// Raised by the discovery listener and sweeper.
#[derive(Debug, Clone, PartialEq)]
pub enum DiscoveryEvent {
    PeerDiscovered(Peer),
    PeerOffline(Peer),
}

/// Outward-facing events for the presentation layer.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum NetworkEvent {
    PeerDiscovered(Peer),
    PeerOffline(Peer),
    #[serde(rename_all = "camelCase")]
    NodeShared {
        node_id: String,
        node_data: HostRecord,
    },
    #[serde(rename_all = "camelCase")]
    NodeUnshared {
        node_id: String,
    },
    #[serde(rename_all = "camelCase")]
    NodeImported {
        original_node: SharedHostRecord,
        imported_node: HostRecord,
        source: Peer,
    },
    /// Services are up; handlers re-populate previously shared nodes.
    SharingEnabled,
    ServicesStarted,
    ServicesStopped,
}

impl NetworkEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::PeerDiscovered(_) => "peer-discovered",
            Self::PeerOffline(_) => "peer-offline",
            Self::NodeShared { .. } => "node-shared",
            Self::NodeUnshared { .. } => "node-unshared",
            Self::NodeImported { .. } => "node-imported",
            Self::SharingEnabled => "sharing-enabled",
            Self::ServicesStarted => "services-started",
            Self::ServicesStopped => "services-stopped",
        }
    }
}

impl From<DiscoveryEvent> for NetworkEvent {
    fn from(event: DiscoveryEvent) -> Self {
        match event {
            DiscoveryEvent::PeerDiscovered(peer) => Self::PeerDiscovered(peer),
            DiscoveryEvent::PeerOffline(peer) => Self::PeerOffline(peer),
        }
    }
}

/// Fan-out publisher. Cloning shares the subscriber list.
pub struct EventBus<E> {
    subscribers: Arc<Mutex<Vec<mpsc::UnboundedSender<E>>>>,
}

impl<E> Clone for EventBus<E> {
    fn clone(&self) -> Self {
        Self {
            subscribers: self.subscribers.clone(),
        }
    }
}

impl<E> Default for EventBus<E> {
    fn default() -> Self {
        Self {
            subscribers: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

impl<E: Clone> EventBus<E> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<E> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(tx);
        rx
    }

    pub fn emit(&self, event: E) {
        let mut subscribers = self.subscribers.lock().unwrap_or_else(PoisonError::into_inner);
        subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Drop every subscriber; their receivers see the channel close.
    pub fn close(&self) {
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn every_subscriber_receives_in_order() {
        let bus = EventBus::new();
        let mut a = bus.subscribe();
        let mut b = bus.subscribe();

        bus.emit(1u32);
        bus.emit(2u32);

        assert_eq!(a.recv().await, Some(1));
        assert_eq!(a.recv().await, Some(2));
        assert_eq!(b.recv().await, Some(1));
        assert_eq!(b.recv().await, Some(2));
    }

    #[test]
    fn dropped_subscribers_are_pruned() {
        let bus = EventBus::new();
        let keep = bus.subscribe();
        drop(bus.subscribe());
        assert_eq!(bus.subscriber_count(), 2);

        bus.emit(());
        assert_eq!(bus.subscriber_count(), 1);
        drop(keep);
    }

    #[tokio::test]
    async fn close_ends_streams() {
        let bus: EventBus<u8> = EventBus::new();
        let mut rx = bus.subscribe();
        bus.close();
        assert_eq!(rx.recv().await, None);
    }

    #[test]
    fn event_serializes_with_kebab_name() {
        let value = serde_json::to_value(NetworkEvent::NodeUnshared {
            node_id: "web1".into(),
        })
        .unwrap();
        assert_eq!(value["event"], "node-unshared");
        assert_eq!(value["data"]["nodeId"], "web1");
        assert_eq!(NetworkEvent::SharingEnabled.name(), "sharing-enabled");
    }
}
