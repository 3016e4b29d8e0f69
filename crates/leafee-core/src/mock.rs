//! Mock adapter implementation for testing.
//!
//! This module provides an in-memory BLE adapter that can be used for unit
//! testing the connection lifecycle without Bluetooth hardware.
//!
//! [`MockAdapter`] implements [`BleAdapter`] and hands out connections that
//! implement [`BleConnection`], so it can be injected anywhere the btleplug
//! backend is used.
//!
//! # Features
//!
//! - **Failure injection**: fail start, scan visibility, connect (for N
//!   attempts), either read, subscribe or disconnect
//! - **Latency simulation**: delay connects to widen race windows
//! - **Notifications**: push payloads to every live subscription with
//!   [`MockAdapter::notify`]
//! - **Leak detection**: count handles that were never disconnected

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use uuid::Uuid;

use leafee_types::uuids::{BATTERY_LEVEL, CONTACT_STATE};
use leafee_types::{AddressType, MacAddress};

use crate::error::{ConnectionFailureReason, DeviceNotFoundReason, Error, Result};
use crate::traits::{
    AdapterFactory, BleAdapter, BleConnection, DiscoveredDevice, NotificationCallback,
};

/// Address served by a mock adapter unless configured otherwise.
const DEFAULT_MOCK_ADDRESS: [u8; 6] = [0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0xFF];

struct Subscription {
    connection_id: u64,
    uuid: Uuid,
    callback: NotificationCallback,
}

/// State shared between the adapter and the connections it hands out.
struct Shared {
    address: MacAddress,
    name: String,

    start_count: AtomicU32,
    reset_count: AtomicU32,
    scan_count: AtomicU32,
    connect_count: AtomicU32,
    disconnect_count: AtomicU32,
    reads: Mutex<HashMap<Uuid, u32>>,

    visible: AtomicBool,
    fail_start: AtomicBool,
    fail_contact_read: AtomicBool,
    fail_battery_read: AtomicBool,
    fail_subscribe: AtomicBool,
    fail_disconnect: AtomicBool,
    /// Number of connects to fail before succeeding.
    remaining_connect_failures: AtomicU32,
    /// Simulated connect latency in milliseconds (0 = no delay).
    connect_latency_ms: AtomicU64,

    contact: Mutex<Vec<u8>>,
    battery: Mutex<Vec<u8>>,

    next_connection_id: AtomicU64,
    live: Mutex<Vec<u64>>,
    subscriptions: Mutex<Vec<Subscription>>,
}

impl Shared {
    fn bump_read(&self, uuid: Uuid) {
        *lock(&self.reads).entry(uuid).or_insert(0) += 1;
    }

    fn release(&self, connection_id: u64) {
        lock(&self.live).retain(|id| *id != connection_id);
        lock(&self.subscriptions).retain(|s| s.connection_id != connection_id);
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A mock BLE adapter for testing.
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use leafee_core::{BleAdapter, BleConnection, MockAdapter};
/// use leafee_types::AddressType;
///
/// #[tokio::main]
/// async fn main() {
///     let adapter = MockAdapter::builder().contact(&[0x00]).build();
///     let address = "AA:BB:CC:DD:EE:FF".parse().unwrap();
///
///     let connection = adapter
///         .connect(&address, Duration::from_secs(1), AddressType::Public)
///         .await
///         .unwrap();
///     assert_eq!(adapter.live_connections(), 1);
///
///     connection.disconnect().await.unwrap();
///     assert_eq!(adapter.live_connections(), 0);
/// }
/// ```
pub struct MockAdapter {
    shared: Arc<Shared>,
}

impl std::fmt::Debug for MockAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockAdapter")
            .field("address", &self.shared.address)
            .field("connects", &self.connect_count())
            .field("live", &self.live_connections())
            .finish()
    }
}

impl Default for MockAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl MockAdapter {
    /// Create a mock adapter with default behaviour: visible, closed, 100%
    /// battery, every operation succeeds.
    pub fn new() -> Self {
        MockAdapterBuilder::new().build()
    }

    /// Start building a mock adapter.
    pub fn builder() -> MockAdapterBuilder {
        MockAdapterBuilder::new()
    }

    /// The address this adapter reports when scanning.
    pub fn address(&self) -> &MacAddress {
        &self.shared.address
    }

    // --- Counters ---

    /// Number of `start` calls.
    pub fn start_count(&self) -> u32 {
        self.shared.start_count.load(Ordering::SeqCst)
    }

    /// Number of `start` calls that requested a reset.
    pub fn reset_count(&self) -> u32 {
        self.shared.reset_count.load(Ordering::SeqCst)
    }

    /// Number of `scan` calls.
    pub fn scan_count(&self) -> u32 {
        self.shared.scan_count.load(Ordering::SeqCst)
    }

    /// Number of `connect` calls, failed ones included.
    pub fn connect_count(&self) -> u32 {
        self.shared.connect_count.load(Ordering::SeqCst)
    }

    /// Number of `disconnect` calls on live handles, failed ones included.
    pub fn disconnect_count(&self) -> u32 {
        self.shared.disconnect_count.load(Ordering::SeqCst)
    }

    /// Number of reads of `uuid`.
    pub fn read_count(&self, uuid: Uuid) -> u32 {
        lock(&self.shared.reads).get(&uuid).copied().unwrap_or(0)
    }

    /// Handles that were handed out and not yet disconnected.
    pub fn live_connections(&self) -> usize {
        lock(&self.shared.live).len()
    }

    /// Active notification subscriptions.
    pub fn subscription_count(&self) -> usize {
        lock(&self.shared.subscriptions).len()
    }

    // --- Test control methods ---

    /// Show or hide the device from scans and connects.
    pub fn set_visible(&self, visible: bool) {
        self.shared.visible.store(visible, Ordering::SeqCst);
    }

    /// Fail the next `count` connects.
    pub fn set_connect_failures(&self, count: u32) {
        self.shared
            .remaining_connect_failures
            .store(count, Ordering::SeqCst);
    }

    /// Delay every connect by `latency`.
    pub fn set_connect_latency(&self, latency: Duration) {
        self.shared
            .connect_latency_ms
            .store(latency.as_millis() as u64, Ordering::SeqCst);
    }

    /// Make `start` fail.
    pub fn set_fail_start(&self, fail: bool) {
        self.shared.fail_start.store(fail, Ordering::SeqCst);
    }

    /// Make subscribing fail.
    pub fn set_fail_subscribe(&self, fail: bool) {
        self.shared.fail_subscribe.store(fail, Ordering::SeqCst);
    }

    /// Make disconnecting fail (the handle is still released).
    pub fn set_fail_disconnect(&self, fail: bool) {
        self.shared.fail_disconnect.store(fail, Ordering::SeqCst);
    }

    /// Set the payload returned by contact state reads.
    pub fn set_contact(&self, payload: &[u8]) {
        *lock(&self.shared.contact) = payload.to_vec();
    }

    /// Set the payload returned by battery level reads.
    pub fn set_battery(&self, payload: &[u8]) {
        *lock(&self.shared.battery) = payload.to_vec();
    }

    /// Deliver a contact state notification to every live subscriber.
    ///
    /// Returns the number of callbacks invoked. Callbacks run on the calling
    /// thread after the subscription lock is released.
    pub fn notify(&self, payload: &[u8]) -> usize {
        let callbacks: Vec<NotificationCallback> = lock(&self.shared.subscriptions)
            .iter()
            .filter(|s| s.uuid == CONTACT_STATE)
            .map(|s| Arc::clone(&s.callback))
            .collect();

        for callback in &callbacks {
            callback(CONTACT_STATE, payload);
        }
        callbacks.len()
    }
}

#[async_trait]
impl BleAdapter for MockAdapter {
    async fn start(&self, reset: bool) -> Result<()> {
        self.shared.start_count.fetch_add(1, Ordering::SeqCst);
        if reset {
            self.shared.reset_count.fetch_add(1, Ordering::SeqCst);
        }
        if self.shared.fail_start.load(Ordering::SeqCst) {
            return Err(Error::DeviceNotFound(DeviceNotFoundReason::NoAdapter));
        }
        Ok(())
    }

    async fn scan(&self, _timeout: Duration) -> Result<Vec<DiscoveredDevice>> {
        self.shared.scan_count.fetch_add(1, Ordering::SeqCst);
        if !self.shared.visible.load(Ordering::SeqCst) {
            return Ok(Vec::new());
        }
        Ok(vec![DiscoveredDevice {
            address: self.shared.address,
            name: Some(self.shared.name.clone()),
            rssi: Some(-60),
        }])
    }

    async fn connect(
        &self,
        address: &MacAddress,
        _timeout: Duration,
        _address_type: AddressType,
    ) -> Result<Box<dyn BleConnection>> {
        self.shared.connect_count.fetch_add(1, Ordering::SeqCst);

        let latency = self.shared.connect_latency_ms.load(Ordering::SeqCst);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }

        if !self.shared.visible.load(Ordering::SeqCst) || *address != self.shared.address {
            return Err(Error::device_not_found(address.to_string()));
        }

        // Check for transient failures
        let failing = self
            .shared
            .remaining_connect_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(Error::connection_failed(
                Some(address.to_string()),
                ConnectionFailureReason::Other("Mock connect failure".to_string()),
            ));
        }

        let id = self.shared.next_connection_id.fetch_add(1, Ordering::SeqCst);
        lock(&self.shared.live).push(id);
        Ok(Box::new(MockConnection {
            id,
            shared: Arc::clone(&self.shared),
            disconnected: AtomicBool::new(false),
        }))
    }
}

/// A connection handed out by [`MockAdapter`].
struct MockConnection {
    id: u64,
    shared: Arc<Shared>,
    disconnected: AtomicBool,
}

#[async_trait]
impl BleConnection for MockConnection {
    async fn char_read(&self, uuid: Uuid, timeout: Duration) -> Result<Vec<u8>> {
        if self.disconnected.load(Ordering::SeqCst) {
            return Err(Error::NotConnected);
        }
        self.shared.bump_read(uuid);

        if uuid == CONTACT_STATE {
            if self.shared.fail_contact_read.load(Ordering::SeqCst) {
                return Err(Error::timeout(format!("read characteristic {}", uuid), timeout));
            }
            Ok(lock(&self.shared.contact).clone())
        } else if uuid == BATTERY_LEVEL {
            if self.shared.fail_battery_read.load(Ordering::SeqCst) {
                return Err(Error::timeout(format!("read characteristic {}", uuid), timeout));
            }
            Ok(lock(&self.shared.battery).clone())
        } else {
            Err(Error::characteristic_not_found(uuid.to_string(), 2))
        }
    }

    async fn subscribe(&self, uuid: Uuid, callback: NotificationCallback) -> Result<()> {
        if self.disconnected.load(Ordering::SeqCst) {
            return Err(Error::NotConnected);
        }
        if self.shared.fail_subscribe.load(Ordering::SeqCst) {
            return Err(Error::characteristic_not_found(uuid.to_string(), 2));
        }
        lock(&self.shared.subscriptions).push(Subscription {
            connection_id: self.id,
            uuid,
            callback,
        });
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        if self.disconnected.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.shared.disconnect_count.fetch_add(1, Ordering::SeqCst);
        self.shared.release(self.id);

        if self.shared.fail_disconnect.load(Ordering::SeqCst) {
            return Err(Error::NotConnected);
        }
        Ok(())
    }
}

/// Builder for creating mock adapters with custom settings.
#[derive(Debug, Clone)]
pub struct MockAdapterBuilder {
    address: MacAddress,
    name: String,
    contact: Vec<u8>,
    battery: Vec<u8>,
    visible: bool,
    fail_start: bool,
    fail_contact_read: bool,
    fail_battery_read: bool,
    fail_subscribe: bool,
    fail_disconnect: bool,
    connect_failures: u32,
    connect_latency: Duration,
}

impl Default for MockAdapterBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl MockAdapterBuilder {
    /// Create a new builder with default values.
    pub fn new() -> Self {
        Self {
            address: MacAddress::new(DEFAULT_MOCK_ADDRESS),
            name: "Mag".to_string(),
            contact: vec![0x01],
            battery: vec![100],
            visible: true,
            fail_start: false,
            fail_contact_read: false,
            fail_battery_read: false,
            fail_subscribe: false,
            fail_disconnect: false,
            connect_failures: 0,
            connect_latency: Duration::ZERO,
        }
    }

    /// Set the address reported by scans.
    #[must_use]
    pub fn address(mut self, address: MacAddress) -> Self {
        self.address = address;
        self
    }

    /// Set the advertised name.
    #[must_use]
    pub fn name(mut self, name: &str) -> Self {
        self.name = name.to_string();
        self
    }

    /// Set the contact state payload.
    #[must_use]
    pub fn contact(mut self, payload: &[u8]) -> Self {
        self.contact = payload.to_vec();
        self
    }

    /// Set the battery level payload.
    #[must_use]
    pub fn battery(mut self, payload: &[u8]) -> Self {
        self.battery = payload.to_vec();
        self
    }

    /// Show or hide the device.
    #[must_use]
    pub fn visible(mut self, visible: bool) -> Self {
        self.visible = visible;
        self
    }

    /// Make `start` fail.
    #[must_use]
    pub fn fail_start(mut self, fail: bool) -> Self {
        self.fail_start = fail;
        self
    }

    /// Make contact state reads fail.
    #[must_use]
    pub fn fail_contact_read(mut self, fail: bool) -> Self {
        self.fail_contact_read = fail;
        self
    }

    /// Make battery reads fail.
    #[must_use]
    pub fn fail_battery_read(mut self, fail: bool) -> Self {
        self.fail_battery_read = fail;
        self
    }

    /// Make subscribing fail.
    #[must_use]
    pub fn fail_subscribe(mut self, fail: bool) -> Self {
        self.fail_subscribe = fail;
        self
    }

    /// Make disconnecting fail.
    #[must_use]
    pub fn fail_disconnect(mut self, fail: bool) -> Self {
        self.fail_disconnect = fail;
        self
    }

    /// Fail the first `count` connects.
    #[must_use]
    pub fn connect_failures(mut self, count: u32) -> Self {
        self.connect_failures = count;
        self
    }

    /// Delay every connect.
    #[must_use]
    pub fn connect_latency(mut self, latency: Duration) -> Self {
        self.connect_latency = latency;
        self
    }

    /// Build the mock adapter.
    pub fn build(self) -> MockAdapter {
        MockAdapter {
            shared: Arc::new(Shared {
                address: self.address,
                name: self.name,
                start_count: AtomicU32::new(0),
                reset_count: AtomicU32::new(0),
                scan_count: AtomicU32::new(0),
                connect_count: AtomicU32::new(0),
                disconnect_count: AtomicU32::new(0),
                reads: Mutex::new(HashMap::new()),
                visible: AtomicBool::new(self.visible),
                fail_start: AtomicBool::new(self.fail_start),
                fail_contact_read: AtomicBool::new(self.fail_contact_read),
                fail_battery_read: AtomicBool::new(self.fail_battery_read),
                fail_subscribe: AtomicBool::new(self.fail_subscribe),
                fail_disconnect: AtomicBool::new(self.fail_disconnect),
                remaining_connect_failures: AtomicU32::new(self.connect_failures),
                connect_latency_ms: AtomicU64::new(self.connect_latency.as_millis() as u64),
                contact: Mutex::new(self.contact),
                battery: Mutex::new(self.battery),
                next_connection_id: AtomicU64::new(0),
                live: Mutex::new(Vec::new()),
                subscriptions: Mutex::new(Vec::new()),
            }),
        }
    }
}

/// An [`AdapterFactory`] that builds a fresh [`MockAdapter`] per attempt.
#[derive(Debug)]
pub struct MockAdapterFactory {
    template: MockAdapterBuilder,
    created: AtomicU32,
    fail: AtomicBool,
    last: Mutex<Option<Arc<MockAdapter>>>,
}

impl MockAdapterFactory {
    /// Create a factory producing adapters from `template`.
    pub fn new(template: MockAdapterBuilder) -> Self {
        Self {
            template,
            created: AtomicU32::new(0),
            fail: AtomicBool::new(false),
            last: Mutex::new(None),
        }
    }

    /// Number of adapters built.
    pub fn created_count(&self) -> u32 {
        self.created.load(Ordering::SeqCst)
    }

    /// Make `create` fail.
    pub fn set_fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    /// The most recently built adapter.
    pub fn last_adapter(&self) -> Option<Arc<MockAdapter>> {
        lock(&self.last).clone()
    }
}

#[async_trait]
impl AdapterFactory for MockAdapterFactory {
    async fn create(&self) -> Result<Arc<dyn BleAdapter>> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(Error::DeviceNotFound(DeviceNotFoundReason::NoAdapter));
        }
        self.created.fetch_add(1, Ordering::SeqCst);
        let adapter = Arc::new(self.template.clone().build());
        *lock(&self.last) = Some(Arc::clone(&adapter));
        Ok(adapter)
    }
}
