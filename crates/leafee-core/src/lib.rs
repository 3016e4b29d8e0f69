//! Connection lifecycle for Leafee Mag BLE contact sensors.
//!
//! A Mag reports open/closed over a single GATT characteristic and only
//! pushes a notification when the state changes. Keeping the state fresh
//! therefore means keeping a subscription alive, which this crate does:
//!
//! - **Connection management**: connect, read the current state and battery
//!   level, subscribe, and release the previous link on every re-entry
//! - **Reconnect policy**: retry a failed link after a fixed interval and
//!   tear down and rebuild a live link periodically
//! - **Thread-safe state**: notifications arrive on an adapter task and
//!   update a lock-protected state cell read by the host
//! - **Events**: connection and state changes are broadcast to subscribers
//!
//! # Adapters
//!
//! All Bluetooth I/O goes through the [`BleAdapter`] / [`BleConnection`]
//! traits. [`BtleplugAdapter`] talks to the system Bluetooth stack;
//! [`MockAdapter`] is an in-memory implementation for tests.
//!
//! # Platform Differences
//!
//! Mags are addressed by MAC. On macOS CoreBluetooth hides MAC addresses
//! behind per-host UUIDs, so the btleplug backend cannot match a configured
//! address there; use Linux or Windows.
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use leafee_core::{AdapterSource, BtleplugAdapter, ConnectionOptions, MagSensor, ScheduleOptions};
//! use leafee_types::SensorIdentity;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let identity = SensorIdentity::from_address("AA:BB:CC:DD:EE:FF")?;
//!     let sensor = MagSensor::new(
//!         identity,
//!         AdapterSource::Shared(Arc::new(BtleplugAdapter::new())),
//!         ConnectionOptions::default(),
//!         ScheduleOptions::default(),
//!     );
//!
//!     sensor.connect_and_subscribe().await;
//!     loop {
//!         tokio::time::sleep(sensor.schedule().poll_interval).await;
//!         sensor.poll().await;
//!         println!("{} open: {:?}", sensor.name(), sensor.is_on());
//!     }
//! }
//! ```

pub mod device;
pub mod error;
pub mod events;
pub mod manager;
pub mod mock;
pub mod scan;
pub mod schedule;
pub mod sensor;
pub mod state;
pub mod traits;
pub mod util;

// Core exports
pub use device::BtleplugConnection;
pub use error::{ConnectionFailureReason, DeviceNotFoundReason, Error, Result};
pub use events::{DisconnectReason, EventDispatcher, EventReceiver, EventSender, SensorEvent};
pub use manager::{
    AttemptOutcome, ConnectReport, ConnectionManager, ConnectionOptions, Stage, StageFailure,
};
pub use mock::{MockAdapter, MockAdapterBuilder, MockAdapterFactory};
pub use scan::{BtleplugAdapter, BtleplugAdapterFactory, get_adapter, scan_with_adapter};
pub use schedule::{PollAction, ScheduleOptions};
pub use sensor::{EntityState, MagSensor, SensorAttributes};
pub use state::{ObservedState, StateSnapshot};
pub use traits::{
    AdapterFactory, AdapterSource, BleAdapter, BleConnection, DiscoveredDevice,
    NotificationCallback,
};
pub use util::{format_peripheral_id, to_mac_address};

// Re-export from leafee-types
pub use leafee_types::uuids;
pub use leafee_types::{AddressType, ContactState, MacAddress, SensorIdentity};

/// Type alias for a sensor shared between the poll task and the renderer.
pub type SharedSensor = std::sync::Arc<MagSensor>;
