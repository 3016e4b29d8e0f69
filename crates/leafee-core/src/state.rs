//! Observed sensor state.
//!
//! [`ObservedState`] is the single place where the open/closed state, the
//! battery level and the last-contact timestamp live. It is shared between
//! the poll path (initial reads after connecting) and the notification
//! callback running on an adapter task, so every update is one short write
//! under a lock and readers always see a complete [`StateSnapshot`].

use std::sync::{PoisonError, RwLock};

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tracing::debug;

use leafee_types::{ContactState, MacAddress, ParseResult, decode_battery_level};

use crate::events::{EventDispatcher, SensorEvent};

/// A consistent copy of the observed state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateSnapshot {
    /// Open/closed state, unknown until the first successful decode.
    pub contact: Option<ContactState>,
    /// Battery level as reported by the sensor.
    pub battery_level: Option<u32>,
    /// Last time the sensor was heard from.
    #[serde(with = "time::serde::rfc3339::option")]
    pub last_contact: Option<OffsetDateTime>,
}

impl StateSnapshot {
    /// Host-facing tri-state: `Some(true)` when open.
    pub fn is_on(&self) -> Option<bool> {
        self.contact.map(|state| state.is_open())
    }
}

/// Shared, lock-protected observed state of one sensor.
#[derive(Debug)]
pub struct ObservedState {
    address: MacAddress,
    inner: RwLock<StateSnapshot>,
    events: EventDispatcher,
}

impl ObservedState {
    /// Create an empty state for the sensor at `address`.
    pub fn new(address: MacAddress, events: EventDispatcher) -> Self {
        Self {
            address,
            inner: RwLock::new(StateSnapshot::default()),
            events,
        }
    }

    /// Copy of the current state.
    pub fn snapshot(&self) -> StateSnapshot {
        *self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Decode a contact state payload and record it.
    ///
    /// On a decode error the state is left untouched.
    pub fn apply_contact_payload(&self, payload: &[u8]) -> ParseResult<ContactState> {
        let state = ContactState::from_payload(payload)?;
        let previous = {
            let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
            let previous = inner.contact.replace(state);
            inner.last_contact = Some(OffsetDateTime::now_utc());
            previous
        };

        debug!(address = %self.address, state = %state, "Contact state received");
        if previous != Some(state) {
            self.events.send(SensorEvent::StateChanged {
                address: self.address,
                state,
            });
        }
        Ok(state)
    }

    /// Decode a battery level payload and record it.
    pub fn apply_battery_payload(&self, payload: &[u8]) -> ParseResult<u32> {
        let level = decode_battery_level(payload)?;
        {
            let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
            inner.battery_level = Some(level);
            inner.last_contact = Some(OffsetDateTime::now_utc());
        }

        debug!(address = %self.address, level, "Battery level received");
        self.events.send(SensorEvent::BatteryLevel {
            address: self.address,
            level,
        });
        Ok(level)
    }

    /// Record contact without a payload (a successful connection).
    pub fn touch(&self) {
        self.inner
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .last_contact = Some(OffsetDateTime::now_utc());
    }
}
