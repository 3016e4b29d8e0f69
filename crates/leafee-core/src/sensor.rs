//! The host-facing Mag sensor.
//!
//! [`MagSensor`] ties a [`SensorIdentity`], its [`ObservedState`] and its
//! [`ConnectionManager`] together. The host calls [`MagSensor::poll`] on a
//! fixed cadence and reads [`MagSensor::entity`] whenever it renders.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info};

use leafee_types::{MacAddress, SensorIdentity};

use crate::events::{EventDispatcher, EventReceiver};
use crate::manager::{ConnectReport, ConnectionManager, ConnectionOptions};
use crate::schedule::{PollAction, ScheduleOptions};
use crate::state::{ObservedState, StateSnapshot};
use crate::traits::AdapterSource;

/// Extra attributes exposed alongside the open/closed state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SensorAttributes {
    /// Canonical device address.
    pub mac_address: MacAddress,
    /// Last battery level read, if any.
    pub battery_level: Option<u32>,
}

/// Everything the host needs to render one sensor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityState {
    /// Stable id, `lmag_` followed by the address.
    pub unique_id: String,
    /// Display name.
    pub name: String,
    /// Host device class, `window` unless configured.
    pub device_class: String,
    /// `Some(true)` when open, `None` until the state is known.
    pub is_on: Option<bool>,
    /// When the sensor was last heard from.
    #[serde(with = "time::serde::rfc3339::option")]
    pub last_contact: Option<OffsetDateTime>,
    /// Extra attributes shown alongside the state.
    pub attributes: SensorAttributes,
}

/// A Leafee Mag contact sensor.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use leafee_core::{AdapterSource, ConnectionOptions, MagSensor, MockAdapter, ScheduleOptions};
/// use leafee_types::SensorIdentity;
///
/// #[tokio::main]
/// async fn main() {
///     let identity = SensorIdentity::from_address("aa-bb-cc-dd-ee-ff").unwrap();
///     let adapter = Arc::new(MockAdapter::builder().contact(&[0x00]).build());
///     let sensor = MagSensor::new(
///         identity,
///         AdapterSource::Shared(adapter),
///         ConnectionOptions::default(),
///         ScheduleOptions::default(),
///     );
///
///     assert_eq!(sensor.is_on(), None);
///     assert!(sensor.connect_and_subscribe().await.is_success());
///     assert_eq!(sensor.is_on(), Some(true));
///     assert_eq!(sensor.unique_id(), "lmag_AA:BB:CC:DD:EE:FF");
/// }
/// ```
#[derive(Debug)]
pub struct MagSensor {
    identity: SensorIdentity,
    state: Arc<ObservedState>,
    manager: Mutex<ConnectionManager>,
    schedule: ScheduleOptions,
    events: EventDispatcher,
}

impl MagSensor {
    /// Register a sensor. No I/O happens here; the first connection attempt
    /// belongs to the caller (see [`ScheduleOptions::startup_delay`]).
    pub fn new(
        identity: SensorIdentity,
        adapter: AdapterSource,
        options: ConnectionOptions,
        schedule: ScheduleOptions,
    ) -> Self {
        let events = EventDispatcher::default();
        let state = Arc::new(ObservedState::new(*identity.address(), events.clone()));
        let manager = ConnectionManager::new(
            identity.clone(),
            adapter,
            options,
            Arc::clone(&state),
            events.clone(),
        );

        Self {
            identity,
            state,
            manager: Mutex::new(manager),
            schedule,
            events,
        }
    }

    /// Display name.
    pub fn name(&self) -> &str {
        self.identity.name()
    }

    /// Classification tag, `window` unless configured.
    pub fn device_class(&self) -> &str {
        self.identity.device_class()
    }

    /// Stable identifier derived from the address.
    pub fn unique_id(&self) -> String {
        self.identity.unique_id()
    }

    /// Device address.
    pub fn address(&self) -> &MacAddress {
        self.identity.address()
    }

    /// The sensor's identity.
    pub fn identity(&self) -> &SensorIdentity {
        &self.identity
    }

    /// The timing policy.
    pub fn schedule(&self) -> &ScheduleOptions {
        &self.schedule
    }

    /// `Some(true)` when open, `Some(false)` when closed, `None` if unknown.
    pub fn is_on(&self) -> Option<bool> {
        self.state.snapshot().is_on()
    }

    /// Copy of the observed state.
    pub fn snapshot(&self) -> StateSnapshot {
        self.state.snapshot()
    }

    /// Address and last known battery level.
    pub fn attributes(&self) -> SensorAttributes {
        SensorAttributes {
            mac_address: *self.identity.address(),
            battery_level: self.state.snapshot().battery_level,
        }
    }

    /// Render the sensor for the host.
    pub fn entity(&self) -> EntityState {
        let snapshot = self.state.snapshot();
        EntityState {
            unique_id: self.unique_id(),
            name: self.name().to_string(),
            device_class: self.device_class().to_string(),
            is_on: snapshot.is_on(),
            last_contact: snapshot.last_contact,
            attributes: SensorAttributes {
                mac_address: *self.identity.address(),
                battery_level: snapshot.battery_level,
            },
        }
    }

    /// Subscribe to this sensor's events.
    pub fn subscribe_events(&self) -> EventReceiver {
        self.events.subscribe()
    }

    /// Whether a live connection is held. Waits for any running attempt.
    pub async fn is_connected(&self) -> bool {
        self.manager.lock().await.is_connected()
    }

    /// Connect and subscribe now, regardless of the schedule.
    pub async fn connect_and_subscribe(&self) -> ConnectReport {
        self.connect_and_subscribe_at(Instant::now()).await
    }

    /// Like [`Self::connect_and_subscribe`], recording `now` as the attempt time.
    pub async fn connect_and_subscribe_at(&self, now: Instant) -> ConnectReport {
        self.manager.lock().await.connect_and_subscribe_at(now).await
    }

    /// Run the reconnect policy once. Never fails.
    pub async fn poll(&self) -> PollAction {
        self.poll_at(Instant::now()).await
    }

    /// Run the reconnect policy as if the time were `now`.
    pub async fn poll_at(&self, now: Instant) -> PollAction {
        let mut manager = self.manager.lock().await;
        let action = self
            .schedule
            .decide(manager.is_connected(), manager.last_attempt(), now);

        match action {
            PollAction::Idle => {
                debug!(address = %self.identity.address(), "Nothing to do");
            }
            PollAction::Retry => {
                info!("Retrying connection to {}", self.identity.address());
                manager.connect_and_subscribe_at(now).await;
            }
            PollAction::Refresh => {
                info!("Refreshing connection to {}", self.identity.address());
                manager.connect_and_subscribe_at(now).await;
            }
        }
        action
    }

    /// Release the connection, if any. Never fails.
    pub async fn disconnect(&self) {
        if self.manager.lock().await.disconnect().await {
            info!("Disconnected from {}", self.identity.address());
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::mock::MockAdapter;

    fn sensor(adapter: &Arc<MockAdapter>) -> MagSensor {
        MagSensor::new(
            SensorIdentity::new(
                "aa:bb:cc:dd:ee:ff".parse().unwrap(),
                Some("Kitchen".to_string()),
                None,
            ),
            AdapterSource::Shared(adapter.clone()),
            ConnectionOptions::default(),
            ScheduleOptions::default(),
        )
    }

    #[test]
    fn test_identity_accessors() {
        let sensor = sensor(&Arc::new(MockAdapter::new()));
        assert_eq!(sensor.name(), "Kitchen");
        assert_eq!(sensor.device_class(), "window");
        assert_eq!(sensor.unique_id(), "lmag_AA:BB:CC:DD:EE:FF");
        assert_eq!(sensor.is_on(), None);
    }

    #[tokio::test]
    async fn test_poll_before_first_attempt_is_idle() {
        let adapter = Arc::new(MockAdapter::new());
        let sensor = sensor(&adapter);
        let now = Instant::now();

        assert_eq!(sensor.poll_at(now).await, PollAction::Idle);
        assert_eq!(sensor.poll_at(now + Duration::from_secs(3600)).await, PollAction::Idle);
        assert_eq!(adapter.connect_count(), 0);
    }

    #[tokio::test]
    async fn test_retry_after_failed_attempt() {
        let adapter = Arc::new(MockAdapter::builder().connect_failures(1).build());
        let sensor = sensor(&adapter);
        let t0 = Instant::now();

        assert!(!sensor.connect_and_subscribe_at(t0).await.is_success());
        assert_eq!(sensor.poll_at(t0 + Duration::from_secs(29)).await, PollAction::Idle);
        assert_eq!(adapter.connect_count(), 1);

        let t1 = t0 + Duration::from_secs(31);
        assert_eq!(sensor.poll_at(t1).await, PollAction::Retry);
        assert_eq!(adapter.connect_count(), 2);
        assert!(sensor.is_connected().await);

        // A successful retry is not retried again
        assert_eq!(sensor.poll_at(t1 + Duration::from_secs(31)).await, PollAction::Idle);
    }

    #[tokio::test]
    async fn test_refresh_after_interval() {
        let adapter = Arc::new(MockAdapter::new());
        let sensor = sensor(&adapter);
        let t0 = Instant::now();

        assert!(sensor.connect_and_subscribe_at(t0).await.is_success());
        assert_eq!(sensor.poll_at(t0 + Duration::from_secs(7199)).await, PollAction::Idle);
        assert_eq!(sensor.poll_at(t0 + Duration::from_secs(7201)).await, PollAction::Refresh);
        assert_eq!(adapter.connect_count(), 2);
        assert_eq!(adapter.disconnect_count(), 1);
        assert_eq!(adapter.live_connections(), 1);
    }

    #[tokio::test]
    async fn test_entity_rendering() {
        let adapter = Arc::new(MockAdapter::builder().contact(&[0x01]).battery(&[0x64]).build());
        let sensor = sensor(&adapter);
        sensor.connect_and_subscribe().await;

        let entity = sensor.entity();
        assert_eq!(entity.unique_id, "lmag_AA:BB:CC:DD:EE:FF");
        assert_eq!(entity.is_on, Some(false));
        assert_eq!(entity.attributes.battery_level, Some(100));
        assert!(entity.last_contact.is_some());
        assert_eq!(sensor.attributes(), entity.attributes);

        let json = serde_json::to_value(&entity).unwrap();
        assert_eq!(json["attributes"]["mac_address"], "AA:BB:CC:DD:EE:FF");
        assert_eq!(json["is_on"], false);
    }

    #[test]
    fn test_entity_before_first_contact() {
        let sensor = sensor(&Arc::new(MockAdapter::new()));
        let entity = sensor.entity();

        assert_eq!(entity.name, "Kitchen");
        assert_eq!(entity.device_class, "window");
        assert_eq!(entity.is_on, None);
        assert_eq!(entity.last_contact, None);
        assert_eq!(entity.attributes.battery_level, None);

        let json = serde_json::to_value(&entity).unwrap();
        assert!(json["last_contact"].is_null());
        assert_eq!(json["unique_id"], "lmag_AA:BB:CC:DD:EE:FF");
    }

    #[tokio::test]
    async fn test_disconnect_is_idempotent() {
        let adapter = Arc::new(MockAdapter::new());
        let sensor = sensor(&adapter);

        sensor.disconnect().await;
        sensor.connect_and_subscribe().await;
        sensor.disconnect().await;
        sensor.disconnect().await;

        assert!(!sensor.is_connected().await);
        assert_eq!(adapter.disconnect_count(), 1);
    }
}
