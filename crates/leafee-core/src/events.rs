//! Sensor event system for connection and state notifications.
//!
//! Every [`crate::MagSensor`] owns an [`EventDispatcher`]. The host service
//! subscribes to it to render entity state as soon as it changes instead of
//! waiting for the next poll.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use leafee_types::{ContactState, MacAddress};

use crate::manager::Stage;

/// Events emitted by a sensor.
///
/// All events are serializable for logging and IPC.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
#[non_exhaustive]
pub enum SensorEvent {
    /// A connection attempt completed and notifications are flowing.
    Connected { address: MacAddress },
    /// A connection attempt failed at `stage`.
    ConnectFailed {
        address: MacAddress,
        stage: Stage,
        error: String,
    },
    /// A live connection was released.
    Disconnected {
        address: MacAddress,
        reason: DisconnectReason,
    },
    /// The open/closed state changed (or became known).
    StateChanged {
        address: MacAddress,
        state: ContactState,
    },
    /// A battery level was read.
    BatteryLevel { address: MacAddress, level: u32 },
}

/// Why a connection was released.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[non_exhaustive]
pub enum DisconnectReason {
    /// Released before a new attempt (retry or periodic refresh).
    Reconnect,
    /// Subscription failed after connecting.
    SubscribeFailed,
    /// Requested by the host, e.g. at shutdown.
    UserRequested,
}

/// Sender for sensor events.
pub type EventSender = broadcast::Sender<SensorEvent>;

/// Receiver for sensor events.
pub type EventReceiver = broadcast::Receiver<SensorEvent>;

/// Event dispatcher for sending events to multiple receivers.
#[derive(Debug, Clone)]
pub struct EventDispatcher {
    sender: EventSender,
}

impl EventDispatcher {
    /// Create a new event dispatcher.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Subscribe to events.
    pub fn subscribe(&self) -> EventReceiver {
        self.sender.subscribe()
    }

    /// Send an event.
    pub fn send(&self, event: SensorEvent) {
        // Ignore error if no receivers
        let _ = self.sender.send(event);
    }

    /// Get the number of active receivers.
    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventDispatcher {
    fn default() -> Self {
        Self::new(64)
    }
}
