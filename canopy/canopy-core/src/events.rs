use crate::tree::{NodeId, Rid};
use serde::Serialize;
use std::collections::BTreeSet;
use tokio::sync::broadcast;

/// Structural notifications emitted by container mutations.
///
/// `moving` and `duplicating` let subscribers tell a relocation or a copy
/// apart from plain creation and deletion.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "type")]
pub enum Event {
    WillBeAdded {
        resource: NodeId,
        rid: Option<Rid>,
        parent: NodeId,
        name: String,
        duplicating: Option<NodeId>,
        moving: Option<NodeId>,
    },
    Added {
        resource: NodeId,
        rid: Option<Rid>,
        parent: NodeId,
        name: String,
        duplicating: Option<NodeId>,
        moving: Option<NodeId>,
        contained_rids: BTreeSet<Rid>,
    },
    WillBeRemoved {
        resource: NodeId,
        rid: Option<Rid>,
        parent: NodeId,
        name: String,
        moving: Option<NodeId>,
        contained_rids: BTreeSet<Rid>,
    },
    Removed {
        resource: NodeId,
        rid: Option<Rid>,
        parent: NodeId,
        name: String,
        moving: Option<NodeId>,
    },
}

impl Event {
    pub fn kind(&self) -> &'static str {
        match self {
            Event::WillBeAdded { .. } => "WillBeAdded",
            Event::Added { .. } => "Added",
            Event::WillBeRemoved { .. } => "WillBeRemoved",
            Event::Removed { .. } => "Removed",
        }
    }

    pub fn resource(&self) -> NodeId {
        match self {
            Event::WillBeAdded { resource, .. }
            | Event::Added { resource, .. }
            | Event::WillBeRemoved { resource, .. }
            | Event::Removed { resource, .. } => *resource,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Event::WillBeAdded { name, .. }
            | Event::Added { name, .. }
            | Event::WillBeRemoved { name, .. }
            | Event::Removed { name, .. } => name,
        }
    }

    pub fn moving(&self) -> Option<NodeId> {
        match self {
            Event::WillBeAdded { moving, .. }
            | Event::Added { moving, .. }
            | Event::WillBeRemoved { moving, .. }
            | Event::Removed { moving, .. } => *moving,
        }
    }

    /// Descendant rids carried by `Added` and `WillBeRemoved`.
    pub fn contained_rids(&self) -> Option<&BTreeSet<Rid>> {
        match self {
            Event::Added { contained_rids, .. } | Event::WillBeRemoved { contained_rids, .. } => {
                Some(contained_rids)
            }
            _ => None,
        }
    }
}

/// Receives notifications synchronously while a mutation runs.
pub trait NotificationSink: Send + Sync {
    fn notify(&self, event: &Event);
}

impl<F> NotificationSink for F
where
    F: Fn(&Event) + Send + Sync,
{
    fn notify(&self, event: &Event) {
        self(event)
    }
}

/// Fan-out sink backed by a broadcast channel.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<Event>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(100);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }

    pub fn send(&self, event: Event) {
        let _ = self.tx.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl NotificationSink for EventBus {
    fn notify(&self, event: &Event) {
        self.send(event.clone());
    }
}
