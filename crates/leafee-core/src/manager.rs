//! Connection lifecycle for one Mag.
//!
//! [`ConnectionManager::connect_and_subscribe`] is a sequential pipeline:
//!
//! 1. record the attempt time (so retry timers advance even on failure)
//! 2. release any live handle (best effort)
//! 3. acquire an adapter from the [`AdapterSource`]
//! 4. start the adapter (best effort)
//! 5. optionally scan for the address
//! 6. connect
//! 7. read the contact state (best effort)
//! 8. read the battery level (best effort, optional)
//! 9. subscribe to contact state notifications
//!
//! Only steps 3, 5, 6 and 9 can fail an attempt. Every failure is recorded
//! in the returned [`ConnectReport`]; nothing is propagated to the caller.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use leafee_types::uuids::{BATTERY_LEVEL, CONTACT_STATE};
use leafee_types::{AddressType, MacAddress, SensorIdentity};

use crate::error::{DeviceNotFoundReason, Error, Result};
use crate::events::{DisconnectReason, EventDispatcher, SensorEvent};
use crate::state::ObservedState;
use crate::traits::{AdapterSource, BleAdapter, BleConnection, NotificationCallback};

/// Default timeout for connecting to the sensor.
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Default timeout for characteristic reads.
const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(5);

/// Default duration of the optional pre-connect scan.
const DEFAULT_SCAN_TIMEOUT: Duration = Duration::from_secs(10);

/// Configuration for connection attempts.
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use leafee_core::ConnectionOptions;
///
/// let options = ConnectionOptions::default()
///     .scan_before_connect(true)
///     .connect_timeout(Duration::from_secs(15));
/// assert!(options.validate().is_ok());
/// ```
#[derive(Debug, Clone)]
pub struct ConnectionOptions {
    /// Timeout for establishing the BLE link.
    pub connect_timeout: Duration,
    /// Timeout for each characteristic read.
    pub read_timeout: Duration,
    /// Duration of the pre-connect scan.
    pub scan_timeout: Duration,
    /// Scan for the address before connecting.
    pub scan_before_connect: bool,
    /// Read the battery level after connecting.
    pub read_battery: bool,
    /// Ask the adapter for a fresh radio handle on every attempt.
    pub reset_adapter: bool,
    /// Address type used when connecting.
    pub address_type: AddressType,
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self {
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            read_timeout: DEFAULT_READ_TIMEOUT,
            scan_timeout: DEFAULT_SCAN_TIMEOUT,
            scan_before_connect: false,
            read_battery: true,
            reset_adapter: false,
            address_type: AddressType::Public,
        }
    }
}

impl ConnectionOptions {
    /// Create connection options with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the connect timeout.
    #[must_use]
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set the read timeout.
    #[must_use]
    pub fn read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    /// Set the scan duration.
    #[must_use]
    pub fn scan_timeout(mut self, timeout: Duration) -> Self {
        self.scan_timeout = timeout;
        self
    }

    /// Enable or disable the pre-connect scan.
    #[must_use]
    pub fn scan_before_connect(mut self, enabled: bool) -> Self {
        self.scan_before_connect = enabled;
        self
    }

    /// Enable or disable the battery read.
    #[must_use]
    pub fn read_battery(mut self, enabled: bool) -> Self {
        self.read_battery = enabled;
        self
    }

    /// Enable or disable adapter reset on start.
    #[must_use]
    pub fn reset_adapter(mut self, enabled: bool) -> Self {
        self.reset_adapter = enabled;
        self
    }

    /// Validate the options and return an error if invalid.
    pub fn validate(&self) -> Result<()> {
        if self.connect_timeout.is_zero() {
            return Err(Error::invalid_config("connect_timeout must be > 0"));
        }
        if self.read_timeout.is_zero() {
            return Err(Error::invalid_config("read_timeout must be > 0"));
        }
        if self.scan_before_connect && self.scan_timeout.is_zero() {
            return Err(Error::invalid_config(
                "scan_timeout must be > 0 when scanning before connect",
            ));
        }
        Ok(())
    }
}

/// A step of a connection attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Releasing a previous handle.
    Disconnect,
    /// Obtaining an adapter from the adapter source.
    AcquireAdapter,
    /// Starting the adapter.
    StartAdapter,
    /// Scanning for the device.
    Scan,
    /// Connecting to the device.
    Connect,
    /// Reading the contact state.
    ReadState,
    /// Reading the battery level.
    ReadBattery,
    /// Subscribing to contact state notifications.
    Subscribe,
}

impl Stage {
    /// Whether a failure at this stage aborts the attempt.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Stage::AcquireAdapter | Stage::Scan | Stage::Connect | Stage::Subscribe
        )
    }

    fn as_str(&self) -> &'static str {
        match self {
            Stage::Disconnect => "disconnect",
            Stage::AcquireAdapter => "acquire adapter",
            Stage::StartAdapter => "start adapter",
            Stage::Scan => "scan",
            Stage::Connect => "connect",
            Stage::ReadState => "read state",
            Stage::ReadBattery => "read battery",
            Stage::Subscribe => "subscribe",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A failed step and the error it produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageFailure {
    /// The step that failed.
    pub stage: Stage,
    /// Error message.
    pub error: String,
}

/// How a connection attempt ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptOutcome {
    /// Connected and subscribed.
    Ready,
    /// Aborted at the given stage.
    Failed(Stage),
}

/// Everything that happened during one connection attempt.
#[derive(Debug, Clone)]
pub struct ConnectReport {
    /// When the attempt started.
    pub started_at: Instant,
    /// How the attempt ended.
    pub outcome: AttemptOutcome,
    /// Every step that failed, fatal or not, in order.
    pub failures: Vec<StageFailure>,
}

impl ConnectReport {
    fn new(started_at: Instant) -> Self {
        Self {
            started_at,
            outcome: AttemptOutcome::Ready,
            failures: Vec::new(),
        }
    }

    fn record(&mut self, stage: Stage, error: &Error) {
        self.failures.push(StageFailure {
            stage,
            error: error.to_string(),
        });
    }

    /// Whether the sensor is connected and subscribed.
    pub fn is_success(&self) -> bool {
        self.outcome == AttemptOutcome::Ready
    }

    /// The stage that aborted the attempt, if any.
    pub fn failed_stage(&self) -> Option<Stage> {
        match self.outcome {
            AttemptOutcome::Ready => None,
            AttemptOutcome::Failed(stage) => Some(stage),
        }
    }

    /// The recorded failure for `stage`, if it failed.
    pub fn failure(&self, stage: Stage) -> Option<&StageFailure> {
        self.failures.iter().find(|f| f.stage == stage)
    }
}

/// Owns the connection handle and attempt timing of one sensor.
pub struct ConnectionManager {
    identity: SensorIdentity,
    adapter: AdapterSource,
    options: ConnectionOptions,
    state: Arc<ObservedState>,
    events: EventDispatcher,
    handle: Option<Box<dyn BleConnection>>,
    last_attempt: Option<Instant>,
}

impl fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("address", self.identity.address())
            .field("adapter", &self.adapter)
            .field("connected", &self.handle.is_some())
            .field("last_attempt", &self.last_attempt)
            .finish_non_exhaustive()
    }
}

impl ConnectionManager {
    /// Create a manager. No I/O happens until the first attempt.
    pub fn new(
        identity: SensorIdentity,
        adapter: AdapterSource,
        options: ConnectionOptions,
        state: Arc<ObservedState>,
        events: EventDispatcher,
    ) -> Self {
        Self {
            identity,
            adapter,
            options,
            state,
            events,
            handle: None,
            last_attempt: None,
        }
    }

    /// Whether a live handle is held.
    pub fn is_connected(&self) -> bool {
        self.handle.is_some()
    }

    /// When the last attempt started, successful or not.
    pub fn last_attempt(&self) -> Option<Instant> {
        self.last_attempt
    }

    /// The connection options in use.
    pub fn options(&self) -> &ConnectionOptions {
        &self.options
    }

    /// Connect and subscribe, releasing any existing handle first.
    pub async fn connect_and_subscribe(&mut self) -> ConnectReport {
        self.connect_and_subscribe_at(Instant::now()).await
    }

    /// Like [`Self::connect_and_subscribe`], recording `now` as the attempt time.
    #[tracing::instrument(level = "info", skip_all, fields(address = %self.identity.address()))]
    pub async fn connect_and_subscribe_at(&mut self, now: Instant) -> ConnectReport {
        self.last_attempt = Some(now);
        let mut report = ConnectReport::new(now);

        if let Err(e) = self.release(DisconnectReason::Reconnect).await {
            report.record(Stage::Disconnect, &e);
        }

        match self.establish(&mut report).await {
            Ok(connection) => {
                self.handle = Some(connection);
                self.state.touch();
                info!("Ready for detecting changes: {}", self.identity.address());
                self.events.send(SensorEvent::Connected {
                    address: *self.identity.address(),
                });
            }
            Err(stage) => {
                report.outcome = AttemptOutcome::Failed(stage);
                let error = report
                    .failure(stage)
                    .map(|f| f.error.clone())
                    .unwrap_or_default();
                self.events.send(SensorEvent::ConnectFailed {
                    address: *self.identity.address(),
                    stage,
                    error,
                });
            }
        }

        report
    }

    /// Release the live handle, if any. Never fails.
    ///
    /// Returns whether a handle was released.
    pub async fn disconnect(&mut self) -> bool {
        let had_handle = self.handle.is_some();
        let _ = self.release(DisconnectReason::UserRequested).await;
        had_handle
    }

    /// Take the handle and disconnect it. The handle is gone afterwards
    /// whatever the outcome.
    async fn release(&mut self, reason: DisconnectReason) -> Result<()> {
        let Some(handle) = self.handle.take() else {
            return Ok(());
        };

        debug!("Disconnecting from Mag... {}", self.identity.address());
        let result = handle.disconnect().await;
        if let Err(e) = &result {
            debug!("Error occurred during disconnecting: {}; ignored", e);
        }

        self.events.send(SensorEvent::Disconnected {
            address: *self.identity.address(),
            reason,
        });
        result
    }

    /// Steps 3-9. Returns the live connection or the stage that failed.
    async fn establish(
        &self,
        report: &mut ConnectReport,
    ) -> std::result::Result<Box<dyn BleConnection>, Stage> {
        let address = *self.identity.address();

        let adapter = match self.adapter.acquire().await {
            Ok(adapter) => adapter,
            Err(e) => {
                error!("Failed to acquire BLE adapter for {}: {}; waiting for retry", address, e);
                report.record(Stage::AcquireAdapter, &e);
                return Err(Stage::AcquireAdapter);
            }
        };

        debug!("Initializing BLE adapter...");
        if let Err(e) = adapter.start(self.options.reset_adapter).await {
            debug!("Error occurred during initializing: {}; ignored", e);
            report.record(Stage::StartAdapter, &e);
        }

        if self.options.scan_before_connect
            && let Err(e) = self.scan_for(adapter.as_ref(), &address).await
        {
            error!("Error occurred during scanning for {}: {}; waiting for retry", address, e);
            report.record(Stage::Scan, &e);
            return Err(Stage::Scan);
        }

        debug!("Connecting to Mag... {}", address);
        let connection = match adapter
            .connect(
                &address,
                self.options.connect_timeout,
                self.options.address_type,
            )
            .await
        {
            Ok(connection) => connection,
            Err(e) => {
                error!("Error occurred during connecting to {}: {}; waiting for retry", address, e);
                report.record(Stage::Connect, &e);
                return Err(Stage::Connect);
            }
        };

        debug!("Getting latest state... {}", address);
        let read = connection
            .char_read(CONTACT_STATE, self.options.read_timeout)
            .await
            .and_then(|value| Ok(self.state.apply_contact_payload(&value)?));
        if let Err(e) = read {
            debug!("Error occurred during getting latest state from {}: {}; ignored", address, e);
            report.record(Stage::ReadState, &e);
        }

        if self.options.read_battery {
            let read = connection
                .char_read(BATTERY_LEVEL, self.options.read_timeout)
                .await
                .and_then(|value| Ok(self.state.apply_battery_payload(&value)?));
            if let Err(e) = read {
                debug!("Error occurred during getting battery level from {}: {}; ignored", address, e);
                report.record(Stage::ReadBattery, &e);
            }
        }

        debug!("Subscribing notification... {}", address);
        let callback = notification_callback(Arc::clone(&self.state), address);
        if let Err(e) = connection.subscribe(CONTACT_STATE, callback).await {
            error!("Error occurred during subscribing with {}: {}; waiting for retry", address, e);
            report.record(Stage::Subscribe, &e);

            if let Err(e) = connection.disconnect().await {
                debug!("Error occurred during disconnecting: {}; ignored", e);
                report.record(Stage::Disconnect, &e);
            }
            self.events.send(SensorEvent::Disconnected {
                address,
                reason: DisconnectReason::SubscribeFailed,
            });
            return Err(Stage::Subscribe);
        }

        Ok(connection)
    }

    async fn scan_for(&self, adapter: &dyn BleAdapter, address: &MacAddress) -> Result<()> {
        debug!("Scanning for Mag... {}", address);
        let devices = adapter.scan(self.options.scan_timeout).await?;
        if devices.iter().any(|device| &device.address == address) {
            Ok(())
        } else {
            Err(Error::DeviceNotFound(DeviceNotFoundReason::ScanTimeout {
                duration: self.options.scan_timeout,
            }))
        }
    }
}

/// Build the notification callback. It captures only the state cell, so the
/// adapter task never holds the manager or the sensor.
fn notification_callback(state: Arc<ObservedState>, address: MacAddress) -> NotificationCallback {
    Arc::new(move |characteristic, value| {
        if let Err(e) = state.apply_contact_payload(value) {
            warn!(
                address = %address,
                characteristic = %characteristic,
                error = %e,
                "Dropping malformed notification"
            );
        }
    })
}
