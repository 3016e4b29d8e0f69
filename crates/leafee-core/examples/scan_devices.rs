//! Example: Scanning for BLE Devices
//!
//! This example lists nearby BLE devices with their addresses, so the
//! address of a Mag can be copied into the service configuration.
//!
//! Run with: `cargo run --example scan_devices`

use std::time::Duration;

use leafee_core::{BleAdapter, BtleplugAdapter};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt::init();

    println!("Scanning for BLE devices...");
    println!();

    let adapter = BtleplugAdapter::new();
    adapter.start(false).await?;
    let devices = adapter.scan(Duration::from_secs(10)).await?;

    if devices.is_empty() {
        println!("No devices found.");
        println!();
        println!("Make sure:");
        println!("  - Bluetooth is enabled on this computer");
        println!("  - The Mag is within range");
    } else {
        println!("Found {} device(s):", devices.len());
        println!();

        for device in &devices {
            let name = device.name.as_deref().unwrap_or("Unknown");
            let rssi = device
                .rssi
                .map(|r| format!("{} dBm", r))
                .unwrap_or_else(|| "N/A".to_string());

            println!("  {}", name);
            println!("    Address: {}", device.address);
            println!("    RSSI: {}", rssi);
            println!();
        }
    }

    Ok(())
}
