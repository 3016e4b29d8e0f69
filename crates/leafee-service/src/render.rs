//! Entity rendering.
//!
//! Prints a sensor's entity state every time one of its events changes it,
//! either as a human-readable log line or as one JSON object per line.

use time::format_description::well_known::Rfc3339;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use leafee_core::{EntityState, SensorEvent, SharedSensor};

/// Output format for rendered entities.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OutputFormat {
    /// Log lines through `tracing`.
    #[default]
    Text,
    /// One JSON object per line on stdout.
    Json,
}

/// Format an entity as a single human-readable line.
pub fn format_entity(entity: &EntityState) -> String {
    let state = match entity.is_on {
        Some(true) => "open",
        Some(false) => "closed",
        None => "unknown",
    };
    let battery = entity
        .attributes
        .battery_level
        .map(|level| format!("{}%", level))
        .unwrap_or_else(|| "N/A".to_string());
    let last_contact = entity
        .last_contact
        .and_then(|t| t.format(&Rfc3339).ok())
        .unwrap_or_else(|| "never".to_string());

    format!(
        "{} [{}] {} (battery: {}, last contact: {})",
        entity.name, entity.device_class, state, battery, last_contact
    )
}

/// Whether an event changes what the entity renders as.
fn changes_entity(event: &SensorEvent) -> bool {
    matches!(
        event,
        SensorEvent::StateChanged { .. }
            | SensorEvent::BatteryLevel { .. }
            | SensorEvent::Connected { .. }
    )
}

/// Render one entity in the given format.
pub fn render(entity: &EntityState, format: OutputFormat) {
    match format {
        OutputFormat::Text => info!("{}", format_entity(entity)),
        OutputFormat::Json => match serde_json::to_string(entity) {
            Ok(line) => println!("{}", line),
            Err(e) => warn!("Failed to serialize entity {}: {}", entity.unique_id, e),
        },
    }
}

/// Spawn a task that renders `sensor` whenever its events change it.
///
/// The task ends when `cancel` fires.
pub fn spawn_renderer(
    sensor: SharedSensor,
    format: OutputFormat,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    let mut events = sensor.subscribe_events();
    tokio::spawn(async move {
        render(&sensor.entity(), format);
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                event = events.recv() => match event {
                    Ok(event) if changes_entity(&event) => render(&sensor.entity(), format),
                    Ok(_) => {}
                    Err(RecvError::Lagged(skipped)) => {
                        warn!("Renderer for {} skipped {} events", sensor.address(), skipped);
                        render(&sensor.entity(), format);
                    }
                    Err(RecvError::Closed) => break,
                },
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use leafee_core::{MacAddress, SensorAttributes};
    use time::OffsetDateTime;

    use super::*;

    fn entity(is_on: Option<bool>, battery_level: Option<u32>) -> EntityState {
        EntityState {
            unique_id: "lmag_AA:BB:CC:DD:EE:FF".to_string(),
            name: "Kitchen".to_string(),
            device_class: "window".to_string(),
            is_on,
            last_contact: None,
            attributes: SensorAttributes {
                mac_address: MacAddress::new([0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0xFF]),
                battery_level,
            },
        }
    }

    #[test]
    fn test_format_unknown_entity() {
        assert_eq!(
            format_entity(&entity(None, None)),
            "Kitchen [window] unknown (battery: N/A, last contact: never)"
        );
    }

    #[test]
    fn test_format_known_entity() {
        let mut entity = entity(Some(true), Some(90));
        entity.last_contact = Some(OffsetDateTime::from_unix_timestamp(1_714_564_800).unwrap());
        assert_eq!(
            format_entity(&entity),
            "Kitchen [window] open (battery: 90%, last contact: 2024-05-01T12:00:00Z)"
        );
    }

    #[test]
    fn test_closed_entity() {
        assert!(format_entity(&entity(Some(false), None)).contains("closed"));
    }

    #[test]
    fn test_changes_entity() {
        let address = MacAddress::new([0; 6]);
        assert!(changes_entity(&SensorEvent::Connected { address }));
        assert!(changes_entity(&SensorEvent::BatteryLevel { address, level: 1 }));
        assert!(!changes_entity(&SensorEvent::Disconnected {
            address,
            reason: leafee_core::DisconnectReason::UserRequested,
        }));
    }
}
