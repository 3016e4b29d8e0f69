//! Hardware integration tests for leafee-core
//!
//! These tests require actual BLE hardware and should be run with:
//! ```text
//! cargo test --package leafee-core --test hardware_tests -- --ignored --nocapture
//! ```
//!
//! Set the `LEAFEE_DEVICE` environment variable to the Mag's address:
//! ```text
//! LEAFEE_DEVICE="AA:BB:CC:DD:EE:FF" cargo test --package leafee-core --test hardware_tests -- --ignored
//! ```

use std::env;
use std::sync::Arc;
use std::time::Duration;

use leafee_core::uuids::{BATTERY_LEVEL, CONTACT_STATE};
use leafee_core::{
    AdapterSource, AddressType, BleAdapter, BleConnection, BtleplugAdapter, ConnectionOptions,
    DeviceNotFoundReason, Error, MacAddress, MagSensor, MockAdapter, ScheduleOptions,
    SensorIdentity,
};
use tokio::time::timeout;

/// Default timeout for BLE operations
const BLE_TIMEOUT: Duration = Duration::from_secs(30);

/// Get the device address from the environment, skipping the test if unset.
fn device_address() -> Option<String> {
    match env::var("LEAFEE_DEVICE") {
        Ok(address) => Some(address),
        Err(_) => {
            println!("LEAFEE_DEVICE not set, skipping");
            None
        }
    }
}

#[tokio::test]
#[ignore = "requires BLE hardware"]
async fn test_scan_for_devices() {
    let adapter = BtleplugAdapter::new();
    adapter.start(false).await.expect("no Bluetooth adapter");

    let devices = timeout(BLE_TIMEOUT, adapter.scan(Duration::from_secs(10)))
        .await
        .expect("scan timed out")
        .expect("scan failed");

    println!("Found {} devices", devices.len());
    for device in devices {
        println!(
            "  {} ({})",
            device.name.as_deref().unwrap_or("Unknown"),
            device.address
        );
    }
}

#[tokio::test]
#[ignore = "requires BLE hardware"]
async fn test_absent_device_scan_is_bounded() {
    let adapter = BtleplugAdapter::new();
    adapter.start(false).await.expect("no Bluetooth adapter");

    // Locally administered address, not expected to be nearby
    let absent = MacAddress::new([0x02, 0x00, 0x00, 0x00, 0x00, 0x01]);
    let window = Duration::from_secs(3);
    let result = timeout(
        BLE_TIMEOUT,
        adapter.connect(&absent, window, AddressType::Public),
    )
    .await
    .expect("connect was not bounded by its timeout");

    assert!(matches!(
        result,
        Err(Error::DeviceNotFound(DeviceNotFoundReason::ScanTimeout { .. }))
    ));

    // The locate scan was stopped, so a fresh scan can start
    timeout(BLE_TIMEOUT, adapter.scan(Duration::from_secs(2)))
        .await
        .expect("scan timed out")
        .expect("scan failed");
}

#[tokio::test]
#[ignore = "requires BLE hardware"]
async fn test_read_characteristics() {
    let Some(address) = device_address() else {
        return;
    };
    let address = address.parse().expect("invalid LEAFEE_DEVICE");

    let adapter = BtleplugAdapter::new();
    let connection = adapter
        .connect(&address, BLE_TIMEOUT, AddressType::Public)
        .await
        .expect("connect failed");

    let state = connection
        .char_read(CONTACT_STATE, Duration::from_secs(5))
        .await
        .expect("state read failed");
    println!("Contact state payload: {:02X?}", state);
    assert_eq!(state.len(), 1);

    match connection.char_read(BATTERY_LEVEL, Duration::from_secs(5)).await {
        Ok(battery) => println!("Battery payload: {:02X?}", battery),
        Err(e) => println!("Battery read failed: {}", e),
    }

    connection.disconnect().await.expect("disconnect failed");
}

#[tokio::test]
#[ignore = "requires BLE hardware"]
async fn test_sensor_lifecycle() {
    let Some(address) = device_address() else {
        return;
    };
    let identity = SensorIdentity::from_address(&address).expect("invalid LEAFEE_DEVICE");

    let sensor = MagSensor::new(
        identity,
        AdapterSource::Shared(Arc::new(BtleplugAdapter::new())),
        ConnectionOptions::default(),
        ScheduleOptions::default(),
    );

    let report = sensor.connect_and_subscribe().await;
    println!("Attempt: {:?}", report);
    assert!(report.is_success());
    println!("Entity: {:?}", sensor.entity());

    // Reconnecting must release the first link
    assert!(sensor.connect_and_subscribe().await.is_success());

    sensor.disconnect().await;
    assert!(!sensor.is_connected().await);
}

#[tokio::test]
async fn test_mock_matches_hardware_contract() {
    let adapter = MockAdapter::new();
    let connection = adapter
        .connect(adapter.address(), BLE_TIMEOUT, AddressType::Public)
        .await
        .unwrap();
    let state = connection
        .char_read(CONTACT_STATE, Duration::from_secs(5))
        .await
        .unwrap();
    assert_eq!(state.len(), 1);
    connection.disconnect().await.unwrap();
}
