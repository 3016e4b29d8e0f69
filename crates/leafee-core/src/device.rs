//! btleplug-backed connection to a Mag.
//!
//! [`BtleplugConnection`] is the live session returned by
//! [`crate::BtleplugAdapter`]. It implements [`BleConnection`] so the
//! connection manager can read characteristics, subscribe to notifications
//! and disconnect without knowing about btleplug.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use btleplug::api::{Characteristic, Peripheral as _};
use btleplug::platform::{Adapter, Peripheral};
use futures::StreamExt;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, warn};
use uuid::Uuid;

use leafee_types::MacAddress;

use crate::error::{Error, Result};
use crate::traits::{BleConnection, NotificationCallback};

/// A live connection to a Mag through btleplug.
///
/// # Cleanup
///
/// Call [`BleConnection::disconnect`] before dropping the connection. If it
/// is dropped while still connected, notification tasks are aborted and a
/// best-effort disconnect is spawned on the current runtime.
pub struct BtleplugConnection {
    /// Kept alive for the lifetime of the peripheral connection.
    #[allow(dead_code)]
    adapter: Adapter,
    peripheral: Peripheral,
    address: MacAddress,
    /// Characteristics discovered after connecting, by UUID.
    characteristics: HashMap<Uuid, Characteristic>,
    service_count: usize,
    /// Notification forwarding tasks, aborted on disconnect.
    notification_tasks: Mutex<Vec<JoinHandle<()>>>,
    disconnected: AtomicBool,
}

impl std::fmt::Debug for BtleplugConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BtleplugConnection")
            .field("address", &self.address)
            .field("characteristics", &self.characteristics.len())
            .finish_non_exhaustive()
    }
}

impl BtleplugConnection {
    /// Wrap a peripheral whose services have already been discovered.
    pub(crate) fn new(adapter: Adapter, peripheral: Peripheral, address: MacAddress) -> Self {
        let services = peripheral.services();
        let mut characteristics = HashMap::new();
        for service in &services {
            for characteristic in &service.characteristics {
                characteristics.insert(characteristic.uuid, characteristic.clone());
            }
        }
        debug!(
            "Cached {} characteristics from {} services",
            characteristics.len(),
            services.len()
        );

        Self {
            adapter,
            peripheral,
            address,
            characteristics,
            service_count: services.len(),
            notification_tasks: Mutex::new(Vec::new()),
            disconnected: AtomicBool::new(false),
        }
    }

    /// The address this connection belongs to.
    pub fn address(&self) -> &MacAddress {
        &self.address
    }

    fn find_characteristic(&self, uuid: Uuid) -> Result<&Characteristic> {
        self.characteristics
            .get(&uuid)
            .ok_or_else(|| Error::characteristic_not_found(uuid.to_string(), self.service_count))
    }
}

#[async_trait]
impl BleConnection for BtleplugConnection {
    async fn char_read(&self, uuid: Uuid, read_timeout: Duration) -> Result<Vec<u8>> {
        if self.disconnected.load(Ordering::SeqCst) {
            return Err(Error::NotConnected);
        }
        let characteristic = self.find_characteristic(uuid)?;
        let data = timeout(read_timeout, self.peripheral.read(characteristic))
            .await
            .map_err(|_| Error::timeout(format!("read characteristic {}", uuid), read_timeout))??;
        Ok(data)
    }

    async fn subscribe(&self, uuid: Uuid, callback: NotificationCallback) -> Result<()> {
        if self.disconnected.load(Ordering::SeqCst) {
            return Err(Error::NotConnected);
        }
        let characteristic = self.find_characteristic(uuid)?;

        self.peripheral.subscribe(characteristic).await?;
        let mut stream = self.peripheral.notifications().await?;

        let task = tokio::spawn(async move {
            while let Some(notification) = stream.next().await {
                if notification.uuid == uuid {
                    callback(notification.uuid, &notification.value);
                }
            }
        });
        self.notification_tasks.lock().await.push(task);

        Ok(())
    }

    #[tracing::instrument(level = "debug", skip(self), fields(address = %self.address))]
    async fn disconnect(&self) -> Result<()> {
        if self.disconnected.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        for task in self.notification_tasks.lock().await.drain(..) {
            task.abort();
        }

        self.peripheral.disconnect().await?;
        Ok(())
    }
}

impl Drop for BtleplugConnection {
    fn drop(&mut self) {
        if self.disconnected.swap(true, Ordering::SeqCst) {
            return;
        }

        warn!(
            address = %self.address,
            "Connection dropped without calling disconnect() - performing best-effort cleanup"
        );

        if let Ok(mut tasks) = self.notification_tasks.try_lock() {
            for task in tasks.drain(..) {
                task.abort();
            }
        }

        let peripheral = self.peripheral.clone();
        let address = self.address;
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move {
                if let Err(e) = peripheral.disconnect().await {
                    debug!(
                        address = %address,
                        error = %e,
                        "Best-effort disconnect failed (device may already be disconnected)"
                    );
                }
            });
        }
    }
}
