//! Background sensor driver.
//!
//! The [`Host`] stands in for the home automation platform: it registers one
//! [`MagSensor`] per configured sensor and runs each on its own task, so a
//! sensor stuck in a 30-second connect never delays another.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval, sleep};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use leafee_core::{
    AdapterSource, BtleplugAdapter, BtleplugAdapterFactory, MagSensor, PollAction, SharedSensor,
};

use crate::config::{AdapterMode, Config, ConfigError, ValidationError};

/// Owns the registered sensors and their driver tasks.
pub struct Host {
    sensors: Vec<SharedSensor>,
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl Host {
    /// Build a host from configuration using the system Bluetooth adapter.
    pub fn from_config(config: &Config) -> Result<Self, ConfigError> {
        let adapter = match config.adapter.mode {
            AdapterMode::Shared => AdapterSource::Shared(Arc::new(BtleplugAdapter::new())),
            AdapterMode::PerAttempt => AdapterSource::PerAttempt(Arc::new(BtleplugAdapterFactory)),
        };
        Self::with_adapter(config, adapter)
    }

    /// Build a host from configuration with an explicit adapter source.
    ///
    /// Every sensor shares `adapter`. The configuration is validated first.
    pub fn with_adapter(config: &Config, adapter: AdapterSource) -> Result<Self, ConfigError> {
        config.validate()?;

        let options = config.connection_options();
        let schedule = config.schedule_options();

        let mut sensors = Vec::with_capacity(config.sensors.len());
        for (i, sensor) in config.sensors.iter().enumerate() {
            let identity = sensor.identity().map_err(|e| {
                ConfigError::Validation(vec![ValidationError {
                    field: format!("sensors[{}].address", i),
                    message: e.to_string(),
                }])
            })?;
            sensors.push(Arc::new(MagSensor::new(
                identity,
                adapter.clone(),
                options.clone(),
                schedule.clone(),
            )));
        }

        Ok(Self::new(sensors))
    }

    /// Build a host around already registered sensors.
    pub fn new(sensors: Vec<SharedSensor>) -> Self {
        Self {
            sensors,
            cancel: CancellationToken::new(),
            tasks: Vec::new(),
        }
    }

    /// The registered sensors.
    pub fn sensors(&self) -> &[SharedSensor] {
        &self.sensors
    }

    /// Token cancelled when the host shuts down.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Spawn one driver task per sensor. Returns immediately.
    pub fn start(&mut self) {
        if self.sensors.is_empty() {
            info!("No sensors configured");
            return;
        }

        info!("Starting driver for {} sensor(s)", self.sensors.len());
        for sensor in &self.sensors {
            let sensor = Arc::clone(sensor);
            let cancel = self.cancel.clone();
            self.tasks.push(tokio::spawn(drive_sensor(sensor, cancel)));
        }
    }

    /// Stop every driver task and release every connection.
    pub async fn shutdown(mut self) {
        info!("Shutting down");
        self.cancel.cancel();

        for task in self.tasks.drain(..) {
            if let Err(e) = task.await {
                warn!("Sensor task ended abnormally: {}", e);
            }
        }
        for sensor in &self.sensors {
            sensor.disconnect().await;
        }
    }
}

/// Drive one sensor until `cancel` fires.
///
/// Waits a random startup delay, makes the initial connection attempt on the
/// first tick, then polls on every following tick.
pub async fn drive_sensor(sensor: SharedSensor, cancel: CancellationToken) {
    let schedule = sensor.schedule().clone();
    let delay = schedule.startup_delay();

    info!(
        "Starting driver for {} (name: {}, delay: {}ms, interval: {}s)",
        sensor.address(),
        sensor.name(),
        delay.as_millis(),
        schedule.poll_interval.as_secs()
    );

    tokio::select! {
        biased;
        _ = cancel.cancelled() => return,
        _ = sleep(delay) => {}
    }

    let mut ticker = interval(schedule.poll_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut initial = true;

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!("Driver for {} cancelled", sensor.address());
                break;
            }
            _ = ticker.tick() => {
                if initial {
                    initial = false;
                    let report = sensor.connect_and_subscribe().await;
                    if !report.is_success() {
                        warn!(
                            "Initial connection to {} failed; retrying in {}s",
                            sensor.address(),
                            schedule.retry_interval.as_secs()
                        );
                    }
                } else {
                    let action = sensor.poll().await;
                    if action != PollAction::Idle {
                        debug!("Poll of {} took action {:?}", sensor.address(), action);
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use leafee_core::{MockAdapter, MockAdapterFactory, SensorIdentity};

    use super::*;
    use crate::config::{SensorConfig, TimingConfig};

    fn config(addresses: &[&str]) -> Config {
        Config {
            timing: TimingConfig {
                startup_jitter: 2,
                ..Default::default()
            },
            sensors: addresses
                .iter()
                .map(|address| SensorConfig {
                    address: address.to_string(),
                    name: None,
                    device_class: None,
                })
                .collect(),
            ..Default::default()
        }
    }

    #[test]
    fn test_invalid_config_rejected() {
        let adapter = AdapterSource::Shared(Arc::new(MockAdapter::new()));
        let result = Host::with_adapter(&config(&["nope"]), adapter);
        assert!(matches!(result, Err(ConfigError::Validation(_))));
    }

    #[test]
    fn test_one_sensor_per_entry() {
        let adapter = AdapterSource::Shared(Arc::new(MockAdapter::new()));
        let host =
            Host::with_adapter(&config(&["AA:BB:CC:DD:EE:FF", "11:22:33:44:55:66"]), adapter)
                .unwrap();
        assert_eq!(host.sensors().len(), 2);
        assert_eq!(host.sensors()[1].unique_id(), "lmag_11:22:33:44:55:66");
    }

    #[tokio::test(start_paused = true)]
    async fn test_initial_attempt_after_startup_delay() {
        let mock = Arc::new(MockAdapter::new());
        let mut host = Host::with_adapter(
            &config(&["AA:BB:CC:DD:EE:FF"]),
            AdapterSource::Shared(mock.clone()),
        )
        .unwrap();

        host.start();

        // Jitter is at most 2s
        sleep(Duration::from_secs(3)).await;
        assert_eq!(mock.connect_count(), 1);
        assert!(host.sensors()[0].is_connected().await);

        // Live link, nothing to do for a while
        sleep(Duration::from_secs(120)).await;
        assert_eq!(mock.connect_count(), 1);

        host.shutdown().await;
        assert_eq!(mock.live_connections(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_initial_attempt_is_retried() {
        let mock = Arc::new(MockAdapter::builder().connect_failures(1).build());
        let mut host = Host::with_adapter(
            &config(&["AA:BB:CC:DD:EE:FF"]),
            AdapterSource::Shared(mock.clone()),
        )
        .unwrap();

        host.start();
        sleep(Duration::from_secs(3)).await;
        assert_eq!(mock.connect_count(), 1);
        assert!(!host.sensors()[0].is_connected().await);

        // Poll ticks every 30s; the retry needs more than 30s since the attempt
        sleep(Duration::from_secs(61)).await;
        assert_eq!(mock.connect_count(), 2);
        assert!(host.sensors()[0].is_connected().await);

        host.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_sensors_driven_independently() {
        let slow = Arc::new(
            MockAdapter::builder()
                .connect_latency(Duration::from_secs(30))
                .build(),
        );
        let fast = Arc::new(
            MockAdapter::builder()
                .address("11:22:33:44:55:66".parse().unwrap())
                .build(),
        );

        let schedule = config(&[]).schedule_options();
        let options = config(&[]).connection_options();
        let sensors = vec![
            Arc::new(MagSensor::new(
                SensorIdentity::from_address("AA:BB:CC:DD:EE:FF").unwrap(),
                AdapterSource::Shared(slow.clone()),
                options.clone(),
                schedule.clone(),
            )),
            Arc::new(MagSensor::new(
                SensorIdentity::from_address("11:22:33:44:55:66").unwrap(),
                AdapterSource::Shared(fast.clone()),
                options,
                schedule,
            )),
        ];
        let mut host = Host::new(sensors);

        host.start();
        sleep(Duration::from_secs(3)).await;
        assert_eq!(fast.live_connections(), 1);
        assert_eq!(slow.live_connections(), 0);

        sleep(Duration::from_secs(30)).await;
        assert_eq!(slow.live_connections(), 1);

        host.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_per_attempt_mode() {
        let factory = Arc::new(MockAdapterFactory::new(MockAdapter::builder()));
        let mut host = Host::with_adapter(
            &config(&["AA:BB:CC:DD:EE:FF"]),
            AdapterSource::PerAttempt(factory.clone()),
        )
        .unwrap();

        host.start();
        sleep(Duration::from_secs(3)).await;
        assert_eq!(factory.created_count(), 1);

        host.shutdown().await;
        let adapter = factory.last_adapter().unwrap();
        assert_eq!(adapter.disconnect_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_before_first_attempt() {
        let mock = Arc::new(MockAdapter::new());
        let mut host = Host::with_adapter(
            &config(&["AA:BB:CC:DD:EE:FF"]),
            AdapterSource::Shared(mock.clone()),
        )
        .unwrap();

        host.start();
        host.shutdown().await;
        assert_eq!(mock.connect_count(), 0);
    }
}
