//! Bluetooth UUIDs for Leafee Mag sensors.
//!
//! A Mag exposes exactly two characteristics that matter here: the contact
//! state (readable and notifying) and the standard battery level.

use uuid::{Uuid, uuid};

// --- Mag Characteristic UUIDs ---

/// Contact state characteristic: one byte, `0x00` when the magnet is away.
pub const CONTACT_STATE: Uuid = uuid!("3c113000-c75c-50c4-1f1a-6789e2afde4e");

// --- Standard BLE UUIDs ---

/// Battery level characteristic.
pub const BATTERY_LEVEL: Uuid = uuid!("00002a19-0000-1000-8000-00805f9b34fb");
