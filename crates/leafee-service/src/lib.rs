//! Host service for Leafee Mag contact sensors.
//!
//! This crate provides a service that:
//! - Registers one sensor per configured address
//! - Makes each sensor's first connection attempt after a random startup delay
//! - Polls every sensor on a fixed cadence so failed links are retried and
//!   live links are refreshed
//! - Renders each sensor's entity state whenever it changes
//!
//! # Configuration
//!
//! The service reads configuration from `~/.config/leafee/mag.toml`:
//!
//! ```toml
//! [adapter]
//! mode = "shared"            # or "per_attempt"
//! reset_on_start = false
//! scan_before_connect = false
//! read_battery = true
//!
//! [timing]                   # all values in seconds
//! connect_timeout = 10
//! read_timeout = 5
//! scan_timeout = 10
//! retry_interval = 30
//! refresh_interval = 7200
//! poll_interval = 30
//! startup_jitter = 5
//!
//! [[sensors]]
//! address = "AA:BB:CC:DD:EE:FF"
//! name = "Kitchen window"
//! device_class = "window"
//! ```

pub mod config;
pub mod host;
pub mod render;

pub use config::{
    AdapterConfig, AdapterMode, Config, ConfigError, SensorConfig, TimingConfig, ValidationError,
    default_config_path,
};
pub use host::{Host, drive_sensor};
pub use render::{OutputFormat, format_entity, render, spawn_renderer};
