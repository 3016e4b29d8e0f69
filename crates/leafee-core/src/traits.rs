//! Trait abstractions for the BLE adapter.
//!
//! The connection manager never talks to a Bluetooth stack directly. It goes
//! through [`BleAdapter`] and [`BleConnection`], which are implemented by the
//! btleplug backend ([`crate::BtleplugAdapter`]) and by the mock adapter used
//! in tests ([`crate::MockAdapter`]).

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use uuid::Uuid;

use leafee_types::{AddressType, MacAddress};

use crate::error::Result;

/// Callback invoked by an adapter for each notification on a subscribed
/// characteristic.
///
/// Receives the UUID of the characteristic that produced the value and the
/// raw payload. It runs on an adapter-owned task and must not block or
/// perform BLE I/O.
pub type NotificationCallback = Arc<dyn Fn(Uuid, &[u8]) + Send + Sync>;

/// A device seen during a scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredDevice {
    /// Device address.
    pub address: MacAddress,
    /// Advertised local name, if any.
    pub name: Option<String>,
    /// RSSI signal strength.
    pub rssi: Option<i16>,
}

/// BLE adapter operations needed to reach a Mag.
///
/// # Example
///
/// ```ignore
/// use leafee_core::{BleAdapter, Result};
///
/// async fn is_visible<A: BleAdapter>(adapter: &A, address: &MacAddress) -> Result<bool> {
///     let devices = adapter.scan(Duration::from_secs(10)).await?;
///     Ok(devices.iter().any(|d| &d.address == address))
/// }
/// ```
#[async_trait]
pub trait BleAdapter: Send + Sync {
    /// Initialise the adapter. Calling it again is harmless; `reset`
    /// requests a fresh handle to the underlying radio.
    async fn start(&self, reset: bool) -> Result<()>;

    /// Scan for advertising devices for `timeout`.
    async fn scan(&self, timeout: Duration) -> Result<Vec<DiscoveredDevice>>;

    /// Connect to a device, failing if it cannot be reached within `timeout`.
    async fn connect(
        &self,
        address: &MacAddress,
        timeout: Duration,
        address_type: AddressType,
    ) -> Result<Box<dyn BleConnection>>;
}

/// A live BLE session with one device.
#[async_trait]
pub trait BleConnection: Send + Sync {
    /// Read a characteristic value.
    async fn char_read(&self, uuid: Uuid, timeout: Duration) -> Result<Vec<u8>>;

    /// Subscribe to notifications on a characteristic.
    async fn subscribe(&self, uuid: Uuid, callback: NotificationCallback) -> Result<()>;

    /// Tear down the session. Must be safe to call on a dead link.
    async fn disconnect(&self) -> Result<()>;
}

/// Creates a fresh adapter for each connection attempt.
#[async_trait]
pub trait AdapterFactory: Send + Sync {
    /// Build a new adapter instance.
    async fn create(&self) -> Result<Arc<dyn BleAdapter>>;
}

/// Where the connection manager gets its adapter from.
#[derive(Clone)]
pub enum AdapterSource {
    /// Reuse one injected adapter for every attempt.
    Shared(Arc<dyn BleAdapter>),
    /// Build a new adapter for every attempt.
    PerAttempt(Arc<dyn AdapterFactory>),
}

impl AdapterSource {
    /// Get the adapter to use for the next attempt.
    pub async fn acquire(&self) -> Result<Arc<dyn BleAdapter>> {
        match self {
            AdapterSource::Shared(adapter) => Ok(Arc::clone(adapter)),
            AdapterSource::PerAttempt(factory) => factory.create().await,
        }
    }
}

impl fmt::Debug for AdapterSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AdapterSource::Shared(_) => f.write_str("AdapterSource::Shared"),
            AdapterSource::PerAttempt(_) => f.write_str("AdapterSource::PerAttempt"),
        }
    }
}
