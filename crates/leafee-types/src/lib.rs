//! Platform-agnostic types for Leafee Mag contact sensors.
//!
//! This crate provides the types shared by the BLE core and the host
//! service: sensor identity, address normalisation, characteristic UUIDs
//! and payload decoding.
//!
//! # Example
//!
//! ```
//! use leafee_types::{ContactState, SensorIdentity};
//!
//! let identity = SensorIdentity::from_address("aa:bb:cc:dd:ee:ff").unwrap();
//! assert_eq!(identity.unique_id(), "lmag_AA:BB:CC:DD:EE:FF");
//! assert_eq!(ContactState::from_payload(&[0]).unwrap(), ContactState::Open);
//! ```

pub mod error;
pub mod types;
pub mod uuid;

pub use error::{ParseError, ParseResult};
pub use types::{
    AddressType, ContactState, DEFAULT_DEVICE_CLASS, MacAddress, SensorIdentity,
    UNIQUE_ID_PREFIX, decode_battery_level,
};
pub use uuid as uuids;
