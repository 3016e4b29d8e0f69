//! Service configuration.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use leafee_core::{ConnectionOptions, ScheduleOptions};
use leafee_types::{MacAddress, ParseError, SensorIdentity};

/// Service configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Adapter settings.
    pub adapter: AdapterConfig,
    /// Timeouts and intervals.
    pub timing: TimingConfig,
    /// Sensors to monitor.
    #[serde(default)]
    pub sensors: Vec<SensorConfig>,
}

impl Config {
    /// Load configuration from the default path.
    pub fn load_default() -> Result<Self, ConfigError> {
        let path = default_config_path();
        if path.exists() {
            Self::load(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load configuration from a file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| ConfigError::Read {
            path: path.as_ref().to_path_buf(),
            source: e,
        })?;
        toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.as_ref().to_path_buf(),
            source: e,
        })
    }

    /// Save configuration to a file.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self).map_err(ConfigError::Serialize)?;

        // Create parent directories if needed
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::Write {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }

        std::fs::write(path.as_ref(), content).map_err(|e| ConfigError::Write {
            path: path.as_ref().to_path_buf(),
            source: e,
        })
    }

    /// Validate the configuration and return any errors.
    ///
    /// This checks:
    /// - Timeouts and intervals are non-zero
    /// - The refresh interval is longer than the retry interval
    /// - Sensor addresses parse as MAC addresses
    /// - Names and device classes, when given, are not empty
    /// - No duplicate sensor addresses (compared after normalisation)
    ///
    /// # Example
    ///
    /// ```
    /// use leafee_service::Config;
    ///
    /// let config = Config::default();
    /// config.validate().expect("Default config should be valid");
    /// ```
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errors = Vec::new();

        errors.extend(self.timing.validate(self.adapter.scan_before_connect));

        let mut seen_addresses = HashSet::new();
        for (i, sensor) in self.sensors.iter().enumerate() {
            let prefix = format!("sensors[{}]", i);
            errors.extend(sensor.validate(&prefix));

            // Check for duplicate addresses
            if let Ok(address) = sensor.address.parse::<MacAddress>()
                && !seen_addresses.insert(address)
            {
                errors.push(ValidationError {
                    field: format!("{}.address", prefix),
                    message: format!("duplicate sensor address '{}'", sensor.address),
                });
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Validation(errors))
        }
    }

    /// Load and validate configuration from a file.
    ///
    /// This is a convenience method that combines `load()` and `validate()`.
    pub fn load_validated<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let config = Self::load(path)?;
        config.validate()?;
        Ok(config)
    }

    /// Connection options derived from the adapter and timing sections.
    pub fn connection_options(&self) -> ConnectionOptions {
        ConnectionOptions::new()
            .connect_timeout(Duration::from_secs(self.timing.connect_timeout))
            .read_timeout(Duration::from_secs(self.timing.read_timeout))
            .scan_timeout(Duration::from_secs(self.timing.scan_timeout))
            .scan_before_connect(self.adapter.scan_before_connect)
            .read_battery(self.adapter.read_battery)
            .reset_adapter(self.adapter.reset_on_start)
    }

    /// Schedule options derived from the timing section.
    pub fn schedule_options(&self) -> ScheduleOptions {
        ScheduleOptions::new()
            .retry_interval(Duration::from_secs(self.timing.retry_interval))
            .refresh_interval(Duration::from_secs(self.timing.refresh_interval))
            .poll_interval(Duration::from_secs(self.timing.poll_interval))
            .startup_jitter(Duration::from_secs(self.timing.startup_jitter))
    }
}

/// How the connection manager obtains its adapter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdapterMode {
    /// One adapter shared by every sensor and attempt.
    #[default]
    Shared,
    /// A fresh adapter for every connection attempt.
    PerAttempt,
}

/// Adapter configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AdapterConfig {
    pub mode: AdapterMode,
    /// Rebind the system adapter before each attempt.
    pub reset_on_start: bool,
    /// Scan for the sensor before connecting.
    pub scan_before_connect: bool,
    /// Read the battery level after connecting.
    pub read_battery: bool,
}

impl Default for AdapterConfig {
    fn default() -> Self {
        Self {
            mode: AdapterMode::Shared,
            reset_on_start: false,
            scan_before_connect: false,
            read_battery: true,
        }
    }
}

/// Timeouts and intervals, all in seconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    pub connect_timeout: u64,
    pub read_timeout: u64,
    pub scan_timeout: u64,
    /// Delay before retrying a failed attempt.
    pub retry_interval: u64,
    /// Age at which a live link is rebuilt.
    pub refresh_interval: u64,
    /// How often each sensor is polled.
    pub poll_interval: u64,
    /// Maximum random delay before a sensor's first attempt.
    pub startup_jitter: u64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            connect_timeout: 10,
            read_timeout: 5,
            scan_timeout: 10,
            retry_interval: 30,
            refresh_interval: 7200,
            poll_interval: 30,
            startup_jitter: 5,
        }
    }
}

impl TimingConfig {
    /// Validate timing configuration.
    pub fn validate(&self, scan_before_connect: bool) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        let mut non_zero = |field: &str, value: u64| {
            if value == 0 {
                errors.push(ValidationError {
                    field: format!("timing.{}", field),
                    message: "must be greater than 0".to_string(),
                });
            }
        };
        non_zero("connect_timeout", self.connect_timeout);
        non_zero("read_timeout", self.read_timeout);
        non_zero("retry_interval", self.retry_interval);
        non_zero("poll_interval", self.poll_interval);
        if scan_before_connect {
            non_zero("scan_timeout", self.scan_timeout);
        }

        if self.refresh_interval <= self.retry_interval {
            errors.push(ValidationError {
                field: "timing.refresh_interval".to_string(),
                message: format!(
                    "refresh interval {} must be greater than retry interval {}",
                    self.refresh_interval, self.retry_interval
                ),
            });
        }

        errors
    }
}

/// Configuration for a sensor to monitor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SensorConfig {
    /// MAC address, `:`/`-` separated or bare.
    pub address: String,
    /// Display name; defaults to the address.
    #[serde(default)]
    pub name: Option<String>,
    /// Classification tag; defaults to `window`.
    #[serde(default)]
    pub device_class: Option<String>,
}

impl SensorConfig {
    /// Validate sensor configuration.
    pub fn validate(&self, prefix: &str) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        if self.address.is_empty() {
            errors.push(ValidationError {
                field: format!("{}.address", prefix),
                message: "sensor address cannot be empty".to_string(),
            });
        } else if let Err(e) = self.address.parse::<MacAddress>() {
            errors.push(ValidationError {
                field: format!("{}.address", prefix),
                message: e.to_string(),
            });
        }

        if let Some(name) = &self.name
            && name.trim().is_empty()
        {
            errors.push(ValidationError {
                field: format!("{}.name", prefix),
                message: "name cannot be empty string (use null/omit instead)".to_string(),
            });
        }

        if let Some(class) = &self.device_class
            && class.trim().is_empty()
        {
            errors.push(ValidationError {
                field: format!("{}.device_class", prefix),
                message: "device class cannot be empty string (use null/omit instead)"
                    .to_string(),
            });
        }

        errors
    }

    /// Build the sensor identity.
    pub fn identity(&self) -> Result<SensorIdentity, ParseError> {
        Ok(SensorIdentity::new(
            self.address.parse()?,
            self.name.clone(),
            self.device_class.clone(),
        ))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("Failed to serialize config: {0}")]
    Serialize(toml::ser::Error),
    #[error("Failed to write config file {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Configuration validation failed:\n{}", format_validation_errors(.0))]
    Validation(Vec<ValidationError>),
}

/// A single validation error with context.
#[derive(Debug, Clone)]
pub struct ValidationError {
    /// The field path (e.g., `timing.retry_interval` or `sensors[0].address`).
    pub field: String,
    /// Description of the validation failure.
    pub message: String,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

fn format_validation_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(|e| format!("  - {}", e))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Default configuration file path.
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("leafee")
        .join("mag.toml")
}
