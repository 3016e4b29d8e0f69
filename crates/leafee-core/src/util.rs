//! Utility functions for leafee-core.
//!
//! This module contains helpers for turning btleplug identifiers into the
//! crate's own address type.

use btleplug::api::BDAddr;
use btleplug::platform::PeripheralId;

use leafee_types::MacAddress;

/// Address reported by CoreBluetooth, which hides real MAC addresses.
const HIDDEN_ADDRESS: &str = "00:00:00:00:00:00";

/// Format a peripheral ID as a string.
///
/// On macOS, peripheral IDs are UUIDs. On other platforms, they wrap the
/// BlueZ/WinRT device path or address.
pub fn format_peripheral_id(id: &PeripheralId) -> String {
    format!("{:?}", id)
        .trim_start_matches("PeripheralId(")
        .trim_end_matches(')')
        .to_string()
}

/// Convert a btleplug address into a [`MacAddress`].
///
/// Returns `None` for the all-zero address that macOS reports in place of
/// the real one, since such a peripheral can never match a configured
/// address.
pub fn to_mac_address(address: BDAddr) -> Option<MacAddress> {
    address_from_str(&address.to_string())
}

fn address_from_str(address: &str) -> Option<MacAddress> {
    if address == HIDDEN_ADDRESS {
        return None;
    }
    address.parse().ok()
}
