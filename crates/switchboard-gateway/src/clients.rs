//! Client registry — every open connection and the channel feeding its writer

use std::collections::HashMap;

use serde::Serialize;
use switchboard_core::SwitchboardError;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{RwLock, mpsc};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::protocol::ServerMessage;

/// Messages a connection may have queued before further sends to it fail
pub const OUTBOUND_QUEUE_CAPACITY: usize = 256;

/// Outbound queue of one connection; its writer task drains it onto the socket
pub type ClientSender = mpsc::Sender<String>;

/// Create the bounded outbound queue for a new connection
pub fn outbound_queue() -> (ClientSender, mpsc::Receiver<String>) {
    mpsc::channel(OUTBOUND_QUEUE_CAPACITY)
}

/// Outcome of a fan-out
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BroadcastReport {
    pub delivered: usize,
    pub failed: usize,
}

/// Tracks all open connections
#[derive(Default)]
pub struct ClientRegistry {
    clients: RwLock<HashMap<Uuid, ClientSender>>,
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new connection, returning its id
    pub async fn register(&self, sender: ClientSender) -> Uuid {
        let id = Uuid::new_v4();
        let mut clients = self.clients.write().await;
        clients.insert(id, sender);
        info!("Client {} connected. Total clients: {}", id, clients.len());
        id
    }

    pub async fn unregister(&self, id: Uuid) {
        let mut clients = self.clients.write().await;
        if clients.remove(&id).is_some() {
            info!("Client {} disconnected. Total clients: {}", id, clients.len());
        }
    }

    pub async fn count(&self) -> usize {
        self.clients.read().await.len()
    }

    /// Queue a message for one client. Returns false if the client is gone
    /// or its queue is full.
    pub async fn send_to(&self, id: Uuid, message: &ServerMessage) -> bool {
        let Some(json) = encode(message) else {
            return false;
        };
        let clients = self.clients.read().await;
        match clients.get(&id) {
            Some(tx) => enqueue(id, tx, json),
            None => false,
        }
    }

    /// Queue a message for every open connection. A failed send to one
    /// client (closed, or not draining its queue) is logged and never stops
    /// delivery to the others.
    pub async fn broadcast(&self, message: &ServerMessage) -> BroadcastReport {
        let mut report = BroadcastReport::default();
        let Some(json) = encode(message) else {
            return report;
        };

        let clients = self.clients.read().await;
        for (id, tx) in clients.iter() {
            if enqueue(*id, tx, json.clone()) {
                report.delivered += 1;
            } else {
                report.failed += 1;
            }
        }
        debug!(
            "Broadcast delivered to {} clients ({} failed)",
            report.delivered, report.failed
        );
        report
    }
}

/// Non-blocking send; a slow reader never stalls the caller
fn enqueue(id: Uuid, tx: &ClientSender, json: String) -> bool {
    let reason = match tx.try_send(json) {
        Ok(()) => return true,
        Err(TrySendError::Full(_)) => "outbound queue full",
        Err(TrySendError::Closed(_)) => "connection closed",
    };
    let failure = SwitchboardError::Delivery {
        client: id.to_string(),
        reason: reason.to_string(),
    };
    warn!("{}", failure);
    false
}

fn encode(message: &ServerMessage) -> Option<String> {
    match serde_json::to_string(message) {
        Ok(json) => Some(json),
        Err(e) => {
            warn!("Failed to serialize outbound message: {}", e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_register_and_unregister() {
        let registry = ClientRegistry::new();
        let (tx, _rx) = outbound_queue();
        let id = registry.register(tx).await;
        assert_eq!(registry.count().await, 1);
        registry.unregister(id).await;
        assert_eq!(registry.count().await, 0);
        // unregistering twice is harmless
        registry.unregister(id).await;
    }

    #[tokio::test]
    async fn test_broadcast_reaches_all_clients() {
        let registry = ClientRegistry::new();
        let (tx1, mut rx1) = outbound_queue();
        let (tx2, mut rx2) = outbound_queue();
        registry.register(tx1).await;
        registry.register(tx2).await;

        let report = registry
            .broadcast(&ServerMessage::task_completed("build X", "builder"))
            .await;
        assert_eq!(report, BroadcastReport { delivered: 2, failed: 0 });
        assert!(rx1.recv().await.unwrap().contains("task_completed"));
        assert!(rx2.recv().await.unwrap().contains("task_completed"));
    }

    #[tokio::test]
    async fn test_broadcast_survives_dead_client() {
        let registry = ClientRegistry::new();
        let (tx1, rx1) = outbound_queue();
        let (tx2, mut rx2) = outbound_queue();
        registry.register(tx1).await;
        registry.register(tx2).await;
        drop(rx1);

        let report = registry.broadcast(&ServerMessage::error("x")).await;
        assert_eq!(report, BroadcastReport { delivered: 1, failed: 1 });
        assert!(rx2.recv().await.is_some());
    }

    #[tokio::test]
    async fn test_send_to_targets_one_client() {
        let registry = ClientRegistry::new();
        let (tx1, mut rx1) = outbound_queue();
        let (tx2, mut rx2) = outbound_queue();
        let id1 = registry.register(tx1).await;
        registry.register(tx2).await;

        assert!(registry.send_to(id1, &ServerMessage::welcome("a")).await);
        assert!(rx1.recv().await.is_some());
        assert!(rx2.try_recv().is_err());
        assert!(!registry.send_to(Uuid::new_v4(), &ServerMessage::welcome("b")).await);
    }

    #[tokio::test]
    async fn test_full_queue_counts_as_failed() {
        let registry = ClientRegistry::new();
        let (stalled_tx, mut stalled_rx) = mpsc::channel(1);
        let (tx, mut rx) = outbound_queue();
        let stalled = registry.register(stalled_tx).await;
        registry.register(tx).await;

        let first = registry.broadcast(&ServerMessage::error("one")).await;
        assert_eq!(first, BroadcastReport { delivered: 2, failed: 0 });

        // The stalled client never drained its single slot
        let second = registry.broadcast(&ServerMessage::error("two")).await;
        assert_eq!(second, BroadcastReport { delivered: 1, failed: 1 });
        assert!(!registry.send_to(stalled, &ServerMessage::error("three")).await);

        assert!(rx.recv().await.unwrap().contains("one"));
        assert!(rx.recv().await.unwrap().contains("two"));
        assert!(stalled_rx.recv().await.unwrap().contains("one"));
        assert!(stalled_rx.try_recv().is_err());

        // Once drained, the client receives again
        assert!(registry.send_to(stalled, &ServerMessage::error("four")).await);
        assert!(stalled_rx.recv().await.unwrap().contains("four"));
    }
}
