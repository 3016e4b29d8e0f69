//! btleplug-backed adapter: discovery and connection.
//!
//! [`BtleplugAdapter`] implements [`BleAdapter`] on top of the platform
//! Bluetooth stack. The underlying btleplug adapter is obtained lazily on
//! [`BleAdapter::start`] (or on first use) and replaced when a reset is
//! requested.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use btleplug::api::{Central, Manager as _, Peripheral as _, ScanFilter};
use btleplug::platform::{Adapter, Manager, Peripheral};
use tokio::sync::{Mutex, RwLock};
use tokio::time::{Instant, sleep, timeout};
use tracing::{debug, info, warn};

use leafee_types::{AddressType, MacAddress};

use crate::device::BtleplugConnection;
use crate::error::{ConnectionFailureReason, DeviceNotFoundReason, Error, Result};
use crate::traits::{AdapterFactory, BleAdapter, BleConnection, DiscoveredDevice};
use crate::util::{format_peripheral_id, to_mac_address};

/// How often the known-peripheral list is re-checked while waiting for a
/// device to show up.
const LOCATE_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Held for the whole of every scan this process runs.
///
/// Every [`BtleplugAdapter`] binds the same system adapter, and a
/// `stop_scan` from one caller would end another caller's scan.
static SCAN_LOCK: Mutex<()> = Mutex::const_new(());

/// Get the first available Bluetooth adapter.
pub async fn get_adapter() -> Result<Adapter> {
    let manager = Manager::new().await?;
    let adapters = manager.adapters().await?;

    adapters
        .into_iter()
        .next()
        .ok_or(Error::DeviceNotFound(DeviceNotFoundReason::NoAdapter))
}

/// A [`BleAdapter`] backed by the platform Bluetooth stack.
#[derive(Default)]
pub struct BtleplugAdapter {
    adapter: RwLock<Option<Adapter>>,
}

impl std::fmt::Debug for BtleplugAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BtleplugAdapter").finish_non_exhaustive()
    }
}

impl BtleplugAdapter {
    /// Create an adapter that will bind to the first system adapter on start.
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the bound adapter, binding it first if needed.
    async fn adapter(&self) -> Result<Adapter> {
        if let Some(adapter) = self.adapter.read().await.as_ref() {
            return Ok(adapter.clone());
        }
        let mut guard = self.adapter.write().await;
        if let Some(adapter) = guard.as_ref() {
            return Ok(adapter.clone());
        }
        let adapter = get_adapter().await?;
        *guard = Some(adapter.clone());
        Ok(adapter)
    }
}

#[async_trait]
impl BleAdapter for BtleplugAdapter {
    async fn start(&self, reset: bool) -> Result<()> {
        let mut guard = self.adapter.write().await;
        if reset || guard.is_none() {
            debug!(reset, "Binding Bluetooth adapter");
            *guard = Some(get_adapter().await?);
        }
        Ok(())
    }

    async fn scan(&self, duration: Duration) -> Result<Vec<DiscoveredDevice>> {
        let adapter = self.adapter().await?;
        let _scan = SCAN_LOCK.lock().await;
        scan_with_adapter(&adapter, duration).await
    }

    #[tracing::instrument(level = "debug", skip(self), fields(address = %address))]
    async fn connect(
        &self,
        address: &MacAddress,
        connect_timeout: Duration,
        address_type: AddressType,
    ) -> Result<Box<dyn BleConnection>> {
        // btleplug picks the address type from the advertisement; a random
        // address cannot be requested explicitly.
        if address_type != AddressType::Public {
            return Err(Error::connection_failed(
                Some(address.to_string()),
                ConnectionFailureReason::UnsupportedAddressType,
            ));
        }

        let adapter = self.adapter().await?;
        let peripheral = locate_peripheral(&adapter, address, connect_timeout).await?;

        if let Err(e) = connect_peripheral(&peripheral, address, connect_timeout).await {
            // The link may be up even though discovery failed
            if let Err(disconnect_error) = peripheral.disconnect().await {
                debug!("Cleanup disconnect failed: {}", disconnect_error);
            }
            return Err(e);
        }

        Ok(Box::new(BtleplugConnection::new(adapter, peripheral, *address)))
    }
}

/// Creates a new [`BtleplugAdapter`] for every connection attempt.
#[derive(Debug, Default, Clone, Copy)]
pub struct BtleplugAdapterFactory;

#[async_trait]
impl AdapterFactory for BtleplugAdapterFactory {
    async fn create(&self) -> Result<Arc<dyn BleAdapter>> {
        Ok(Arc::new(BtleplugAdapter::new()))
    }
}

/// Scan for devices using a specific adapter.
pub async fn scan_with_adapter(
    adapter: &Adapter,
    duration: Duration,
) -> Result<Vec<DiscoveredDevice>> {
    info!("Starting BLE scan for {} seconds...", duration.as_secs());

    adapter.start_scan(ScanFilter::default()).await?;
    sleep(duration).await;
    adapter.stop_scan().await?;

    let peripherals = adapter.peripherals().await?;
    let mut discovered = Vec::new();

    for peripheral in peripherals {
        match process_peripheral(&peripheral).await {
            Ok(Some(device)) => discovered.push(device),
            Ok(None) => {}
            Err(e) => {
                debug!("Error processing peripheral: {}", e);
            }
        }
    }

    info!("Scan complete. Found {} device(s)", discovered.len());
    Ok(discovered)
}

async fn process_peripheral(peripheral: &Peripheral) -> Result<Option<DiscoveredDevice>> {
    let Some(properties) = peripheral.properties().await? else {
        return Ok(None);
    };
    let Some(address) = to_mac_address(properties.address) else {
        debug!(
            "Skipping peripheral without a usable address: {}",
            format_peripheral_id(&peripheral.id())
        );
        return Ok(None);
    };

    Ok(Some(DiscoveredDevice {
        address,
        name: properties.local_name,
        rssi: properties.rssi,
    }))
}

/// Search the adapter's known peripherals for `address`.
async fn find_known_peripheral(
    adapter: &Adapter,
    address: &MacAddress,
) -> Result<Option<Peripheral>> {
    for peripheral in adapter.peripherals().await? {
        if to_mac_address(peripheral.address()).as_ref() == Some(address) {
            return Ok(Some(peripheral));
        }
    }
    Ok(None)
}

/// Find the peripheral for `address`, scanning for at most `window`.
///
/// The scan is always stopped before this returns.
async fn locate_peripheral(
    adapter: &Adapter,
    address: &MacAddress,
    window: Duration,
) -> Result<Peripheral> {
    if let Some(peripheral) = find_known_peripheral(adapter, address).await? {
        debug!("Found device in cache (no scan needed)");
        return Ok(peripheral);
    }

    let _scan = SCAN_LOCK.lock().await;
    debug!("Scanning for {} for up to {:?}", address, window);
    adapter.start_scan(ScanFilter::default()).await?;
    let found = poll_until_found(window, LOCATE_POLL_INTERVAL, || {
        find_known_peripheral(adapter, address)
    })
    .await;
    if let Err(e) = adapter.stop_scan().await {
        warn!("Failed to stop scan: {}", e);
    }

    found?.ok_or(Error::DeviceNotFound(DeviceNotFoundReason::ScanTimeout {
        duration: window,
    }))
}

/// Connect and discover services, each step under its own timeout.
async fn connect_peripheral(
    peripheral: &Peripheral,
    address: &MacAddress,
    step_timeout: Duration,
) -> Result<()> {
    info!("Connecting to device...");
    timeout(step_timeout, peripheral.connect())
        .await
        .map_err(|_| Error::timeout(format!("connect to {}", address), step_timeout))??;

    debug!("Discovering services...");
    timeout(step_timeout, peripheral.discover_services())
        .await
        .map_err(|_| Error::timeout("discover services", step_timeout))??;
    Ok(())
}

/// Run `check` every `interval` until it finds something or `window` has
/// elapsed. The last check happens at the end of the window.
async fn poll_until_found<T, F, Fut>(
    window: Duration,
    interval: Duration,
    mut check: F,
) -> Result<Option<T>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Option<T>>>,
{
    let deadline = Instant::now() + window;
    loop {
        if let Some(found) = check().await? {
            return Ok(Some(found));
        }
        let now = Instant::now();
        if now >= deadline {
            return Ok(None);
        }
        sleep(interval.min(deadline - now)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WINDOW: Duration = Duration::from_secs(1);

    #[tokio::test(start_paused = true)]
    async fn test_poll_gives_up_at_window_end() {
        let start = Instant::now();
        let mut checks = 0;

        let found = poll_until_found(WINDOW, LOCATE_POLL_INTERVAL, || {
            checks += 1;
            async { Ok::<Option<()>, Error>(None) }
        })
        .await
        .unwrap();

        assert!(found.is_none());
        assert_eq!(start.elapsed(), WINDOW);
        // Checks at 0, 250, 500, 750 and 1000 ms
        assert_eq!(checks, 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_returns_as_soon_as_found() {
        let start = Instant::now();
        let mut checks = 0;

        let found = poll_until_found(WINDOW, LOCATE_POLL_INTERVAL, || {
            checks += 1;
            let hit = checks == 3;
            async move { Ok::<_, Error>(hit.then_some("mag")) }
        })
        .await
        .unwrap();

        assert_eq!(found, Some("mag"));
        assert_eq!(start.elapsed(), Duration::from_millis(500));
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_stops_on_error() {
        let mut checks = 0;

        let result = poll_until_found(WINDOW, LOCATE_POLL_INTERVAL, || {
            checks += 1;
            async { Err::<Option<()>, _>(Error::NotConnected) }
        })
        .await;

        assert!(matches!(result, Err(Error::NotConnected)));
        assert_eq!(checks, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_with_zero_window_checks_once() {
        let mut checks = 0;

        let found = poll_until_found(Duration::ZERO, LOCATE_POLL_INTERVAL, || {
            checks += 1;
            async { Ok::<Option<()>, Error>(None) }
        })
        .await
        .unwrap();

        assert!(found.is_none());
        assert_eq!(checks, 1);
    }
}
