//! Observer registry and broadcaster.
//!
//! The registry holds the sending half of each observer's outbound queue; the
//! transport owns the receiving half and the connection itself. Delivery is a
//! non-blocking enqueue, so it runs under the session lock and every observer
//! sees one total order. A failed enqueue means the connection is gone and
//! only that observer is dropped.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::value::RawValue;
use tokio::sync::mpsc::UnboundedSender;

use agentbridge_core::protocol::{ServerMessage, SessionStatus};

use super::types::{ObserverFrame, ObserverId};

/// Sending half of an observer's outbound queue.
pub type ObserverSender = UnboundedSender<ObserverFrame>;

#[derive(Default)]
pub(crate) struct ObserverRegistry {
    next_id: u64,
    observers: BTreeMap<ObserverId, ObserverSender>,
}

impl ObserverRegistry {
    /// Bring a new observer to parity, then add it to the live set.
    ///
    /// The observer first receives `status`, then every cached event in
    /// order. Nothing else can be broadcast in between because the caller
    /// holds the session lock.
    pub fn register(
        &mut self,
        tx: ObserverSender,
        status: SessionStatus,
        history: &[Arc<RawValue>],
    ) -> ObserverId {
        self.next_id += 1;
        let id = ObserverId(self.next_id);

        let replay = std::iter::once(ServerMessage::SessionStatus { status }).chain(
            history.iter().map(|event| ServerMessage::ClaudeEvent {
                event: Arc::clone(event),
            }),
        );
        for message in replay {
            if tx.send(ObserverFrame::Message(message)).is_err() {
                // Connection already gone; the next broadcast prunes it.
                break;
            }
        }
        self.observers.insert(id, tx);
        id
    }

    /// Remove one observer. Returns `false` if it was not registered.
    pub fn remove(&mut self, id: ObserverId) -> bool {
        self.observers.remove(&id).is_some()
    }

    /// Deliver `message` to every observer. Returns the observers dropped
    /// because their connection is gone.
    pub fn broadcast(&mut self, message: &ServerMessage) -> Vec<ObserverId> {
        let mut gone = Vec::new();
        for (id, tx) in &self.observers {
            if tx.send(ObserverFrame::Message(message.clone())).is_err() {
                gone.push(*id);
            }
        }
        for id in &gone {
            self.observers.remove(id);
        }
        gone
    }

    /// Remove and return every observer.
    pub fn drain(&mut self) -> Vec<(ObserverId, ObserverSender)> {
        std::mem::take(&mut self.observers).into_iter().collect()
    }

    pub fn len(&self) -> usize {
        self.observers.len()
    }
}
