//! Events emitted to the front end.
//!
//! Services talk to collaborators through an [`EventSink`]; the default sink fans events
//! out over a tokio broadcast channel so any number of views can subscribe.

use log::{debug, trace};
use serde::Serialize;
use tokio::sync::broadcast;

use crate::types::{Device, DeviceId};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase", tag = "event")]
pub enum CourierEvent {
    #[serde(rename_all = "camelCase")]
    DeviceListChanged {
        devices: Vec<Device>,
        selected: Option<DeviceId>,
    },
    #[serde(rename_all = "camelCase")]
    DeviceDisconnected { device_id: Option<DeviceId> },
    #[serde(rename_all = "camelCase")]
    ScanStateChanged {
        interval_secs: f64,
        consecutive_failures: u32,
        manual_refresh_required: bool,
    },
    #[serde(rename_all = "camelCase")]
    TaskListChanged { active: usize, completed: usize },
    #[serde(rename_all = "camelCase")]
    FileListShouldRefresh { device_id: DeviceId },
}

impl CourierEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::DeviceListChanged { .. } => "device-list-changed",
            Self::DeviceDisconnected { .. } => "device-disconnected",
            Self::ScanStateChanged { .. } => "scan-state-changed",
            Self::TaskListChanged { .. } => "task-list-changed",
            Self::FileListShouldRefresh { .. } => "file-list-should-refresh",
        }
    }
}

pub trait EventSink: Send + Sync {
    fn emit(&self, event: CourierEvent);
}

/// Broadcasts events to every subscriber. Emitting with no subscribers is not an error.
pub struct BroadcastEvents {
    tx: broadcast::Sender<CourierEvent>,
}

impl BroadcastEvents {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CourierEvent> {
        self.tx.subscribe()
    }
}

impl EventSink for BroadcastEvents {
    fn emit(&self, event: CourierEvent) {
        let name = event.name();
        match self.tx.send(event) {
            Ok(receivers) => trace!("Emitted {} to {} receiver(s)", name, receivers),
            Err(_) => debug!("Dropped {} (no subscribers)", name),
        }
    }
}
