//! Example: Watching a Mag
//!
//! Connects to one Mag, prints every state change as it is notified and
//! keeps the link alive with the default reconnect policy.
//!
//! Run with: `cargo run --example watch_sensor -- AA:BB:CC:DD:EE:FF`

use std::env;
use std::sync::Arc;

use leafee_core::{
    AdapterSource, BtleplugAdapter, ConnectionOptions, MagSensor, ScheduleOptions, SensorEvent,
    SensorIdentity,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let address = env::args()
        .nth(1)
        .ok_or("usage: watch_sensor <ADDRESS>")?;
    let identity = SensorIdentity::from_address(&address)?;

    let sensor = Arc::new(MagSensor::new(
        identity,
        AdapterSource::Shared(Arc::new(BtleplugAdapter::new())),
        ConnectionOptions::default(),
        ScheduleOptions::default(),
    ));

    let mut events = sensor.subscribe_events();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event {
                SensorEvent::StateChanged { state, .. } => println!("State: {}", state),
                SensorEvent::BatteryLevel { level, .. } => println!("Battery: {}%", level),
                SensorEvent::Connected { address } => println!("Connected to {}", address),
                SensorEvent::ConnectFailed { stage, error, .. } => {
                    println!("Attempt failed at {}: {}", stage, error)
                }
                other => println!("{:?}", other),
            }
        }
    });

    sensor.connect_and_subscribe().await;

    let mut ticker = tokio::time::interval(sensor.schedule().poll_interval);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                sensor.poll().await;
            }
            _ = tokio::signal::ctrl_c() => {
                println!("Disconnecting...");
                sensor.disconnect().await;
                return Ok(());
            }
        }
    }
}
