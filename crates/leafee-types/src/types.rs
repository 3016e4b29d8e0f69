//! Core types for Leafee Mag sensor data.

use core::fmt;
use core::str::FromStr;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::error::{ParseError, ParseResult};

/// Device classification used when none is configured.
pub const DEFAULT_DEVICE_CLASS: &str = "window";

/// Prefix of the unique identifier exposed to the host platform.
pub const UNIQUE_ID_PREFIX: &str = "lmag_";

/// A Bluetooth device address in canonical form.
///
/// Parsing accepts `:` or `-` separated octets as well as twelve bare hex
/// digits, in any case. Display always produces `AA:BB:CC:DD:EE:FF`.
///
/// # Examples
///
/// ```
/// use leafee_types::MacAddress;
///
/// let addr: MacAddress = "aa-bb-cc-dd-ee-0f".parse().unwrap();
/// assert_eq!(addr.to_string(), "AA:BB:CC:DD:EE:0F");
/// ```
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(
    feature = "serde",
    derive(Serialize, Deserialize),
    serde(try_from = "String", into = "String")
)]
pub struct MacAddress([u8; 6]);

impl MacAddress {
    /// Create an address from its six octets, most significant first.
    #[must_use]
    pub const fn new(octets: [u8; 6]) -> Self {
        Self(octets)
    }

    /// The six octets of the address.
    #[must_use]
    pub const fn octets(&self) -> [u8; 6] {
        self.0
    }
}

impl FromStr for MacAddress {
    type Err = ParseError;

    fn from_str(s: &str) -> ParseResult<Self> {
        let invalid = || ParseError::InvalidAddress(s.to_string());
        let trimmed = s.trim();

        let digits: String = trimmed
            .chars()
            .filter(|c| *c != ':' && *c != '-')
            .collect();
        if digits.len() != 12 || !digits.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(invalid());
        }

        // Separated input must be six groups of two digits
        if digits.len() != trimmed.len() {
            let groups: Vec<&str> = trimmed.split([':', '-']).collect();
            if groups.len() != 6 || groups.iter().any(|g| g.len() != 2) {
                return Err(invalid());
            }
        }

        let mut octets = [0u8; 6];
        for (i, octet) in octets.iter_mut().enumerate() {
            *octet = u8::from_str_radix(&digits[i * 2..i * 2 + 2], 16).map_err(|_| invalid())?;
        }
        Ok(Self(octets))
    }
}

impl TryFrom<String> for MacAddress {
    type Error = ParseError;

    fn try_from(value: String) -> ParseResult<Self> {
        value.parse()
    }
}

impl From<MacAddress> for String {
    fn from(value: MacAddress) -> Self {
        value.to_string()
    }
}

impl fmt::Display for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(f, "{a:02X}:{b:02X}:{c:02X}:{d:02X}:{e:02X}:{g:02X}")
    }
}

impl fmt::Debug for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MacAddress({self})")
    }
}

/// BLE address type used when connecting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum AddressType {
    /// IEEE-assigned public address. Mag sensors always use this.
    #[default]
    Public,
    /// Random (static or private) address.
    Random,
}

/// Open/closed state reported by a Mag.
///
/// This is a closed two-way enumeration: the sensor payload is a single
/// byte where `0x00` means the magnet is away (open) and anything else
/// means closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum ContactState {
    /// Magnet separated from the sensor body.
    Open,
    /// Magnet next to the sensor body.
    Closed,
}

impl ContactState {
    /// Decode a contact state characteristic payload.
    ///
    /// # Examples
    ///
    /// ```
    /// use leafee_types::ContactState;
    ///
    /// assert_eq!(ContactState::from_payload(&[0x00]), Ok(ContactState::Open));
    /// assert_eq!(ContactState::from_payload(&[0x01]), Ok(ContactState::Closed));
    /// assert!(ContactState::from_payload(&[]).is_err());
    /// ```
    pub fn from_payload(payload: &[u8]) -> ParseResult<Self> {
        match payload {
            [] => Err(ParseError::Empty),
            [0x00] => Ok(ContactState::Open),
            [_] => Ok(ContactState::Closed),
            _ => Err(ParseError::UnexpectedLength {
                expected: "1 byte",
                actual: payload.len(),
            }),
        }
    }

    /// Whether this state means open.
    #[must_use]
    pub fn is_open(&self) -> bool {
        matches!(self, ContactState::Open)
    }

    /// Lowercase name of the state.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            ContactState::Open => "open",
            ContactState::Closed => "closed",
        }
    }
}

impl fmt::Display for ContactState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Decode a battery level characteristic payload.
///
/// The payload is read as a big-endian unsigned integer. Mag sensors send a
/// single byte in the 0-100 range, but the value is neither validated nor
/// clamped.
///
/// # Examples
///
/// ```
/// use leafee_types::decode_battery_level;
///
/// assert_eq!(decode_battery_level(&[0x64]), Ok(100));
/// assert_eq!(decode_battery_level(&[0x01, 0x00]), Ok(256));
/// ```
pub fn decode_battery_level(payload: &[u8]) -> ParseResult<u32> {
    match payload.len() {
        0 => Err(ParseError::Empty),
        1..=4 => Ok(payload
            .iter()
            .fold(0u32, |acc, byte| (acc << 8) | u32::from(*byte))),
        actual => Err(ParseError::UnexpectedLength {
            expected: "1 to 4 bytes",
            actual,
        }),
    }
}

/// Immutable identity of one configured sensor.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SensorIdentity {
    address: MacAddress,
    name: String,
    device_class: String,
}

impl SensorIdentity {
    /// Create an identity, falling back to the address for the name and to
    /// [`DEFAULT_DEVICE_CLASS`] for the classification.
    pub fn new(
        address: MacAddress,
        name: Option<String>,
        device_class: Option<String>,
    ) -> Self {
        Self {
            name: name.unwrap_or_else(|| address.to_string()),
            device_class: device_class.unwrap_or_else(|| DEFAULT_DEVICE_CLASS.to_string()),
            address,
        }
    }

    /// Parse the address and build an identity with default name and class.
    pub fn from_address(address: &str) -> ParseResult<Self> {
        Ok(Self::new(address.parse()?, None, None))
    }

    /// The normalised device address.
    pub fn address(&self) -> &MacAddress {
        &self.address
    }

    /// Display name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Device classification tag (e.g. `window`, `door`).
    pub fn device_class(&self) -> &str {
        &self.device_class
    }

    /// Identifier derived from the address, stable across restarts.
    pub fn unique_id(&self) -> String {
        format!("{}{}", UNIQUE_ID_PREFIX, self.address)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // --- MacAddress tests ---

    #[test]
    fn test_mac_address_colon_lowercase() {
        let addr: MacAddress = "aa:bb:cc:dd:ee:ff".parse().unwrap();
        assert_eq!(addr.to_string(), "AA:BB:CC:DD:EE:FF");
        assert_eq!(addr.octets(), [0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0xFF]);
    }

    #[test]
    fn test_mac_address_dash_and_bare() {
        let dashed: MacAddress = "01-23-45-67-89-ab".parse().unwrap();
        let bare: MacAddress = "0123456789AB".parse().unwrap();
        assert_eq!(dashed, bare);
        assert_eq!(bare.to_string(), "01:23:45:67:89:AB");
    }

    #[test]
    fn test_mac_address_trims_whitespace() {
        let addr: MacAddress = "  aa:bb:cc:dd:ee:ff \n".parse().unwrap();
        assert_eq!(addr.to_string(), "AA:BB:CC:DD:EE:FF");
    }

    #[test]
    fn test_mac_address_rejects_malformed() {
        for bad in [
            "",
            "AA:BB:CC:DD:EE",
            "AA:BB:CC:DD:EE:FF:00",
            "GG:BB:CC:DD:EE:FF",
            "AAB:B:CC:DD:EE:FF",
            "Mag 1234",
        ] {
            let err = bad.parse::<MacAddress>().unwrap_err();
            assert!(matches!(err, ParseError::InvalidAddress(_)), "{bad}");
        }
    }

    #[test]
    fn test_mac_address_debug() {
        let addr = MacAddress::new([1, 2, 3, 4, 5, 6]);
        assert_eq!(format!("{:?}", addr), "MacAddress(01:02:03:04:05:06)");
    }

    // --- ContactState tests ---

    #[test]
    fn test_contact_state_open() {
        assert_eq!(ContactState::from_payload(&[0x00]), Ok(ContactState::Open));
        assert!(ContactState::Open.is_open());
    }

    #[test]
    fn test_contact_state_closed() {
        assert_eq!(ContactState::from_payload(&[0x01]), Ok(ContactState::Closed));
        assert_eq!(ContactState::from_payload(&[0xFF]), Ok(ContactState::Closed));
        assert!(!ContactState::Closed.is_open());
    }

    #[test]
    fn test_contact_state_rejects_bad_lengths() {
        assert_eq!(ContactState::from_payload(&[]), Err(ParseError::Empty));
        assert_eq!(
            ContactState::from_payload(&[0x00, 0x00]),
            Err(ParseError::UnexpectedLength {
                expected: "1 byte",
                actual: 2
            })
        );
    }

    #[test]
    fn test_contact_state_display() {
        assert_eq!(ContactState::Open.to_string(), "open");
        assert_eq!(ContactState::Closed.to_string(), "closed");
    }

    // --- Battery tests ---

    #[test]
    fn test_battery_level_single_byte() {
        assert_eq!(decode_battery_level(&[0x64]), Ok(100));
        assert_eq!(decode_battery_level(&[0x00]), Ok(0));
    }

    #[test]
    fn test_battery_level_not_clamped() {
        assert_eq!(decode_battery_level(&[0xC8]), Ok(200));
    }

    #[test]
    fn test_battery_level_big_endian() {
        assert_eq!(decode_battery_level(&[0x00, 0x64]), Ok(100));
        assert_eq!(decode_battery_level(&[0x01, 0x00, 0x00, 0x00]), Ok(1 << 24));
    }

    #[test]
    fn test_battery_level_errors() {
        assert_eq!(decode_battery_level(&[]), Err(ParseError::Empty));
        assert!(matches!(
            decode_battery_level(&[0; 5]),
            Err(ParseError::UnexpectedLength { actual: 5, .. })
        ));
    }

    // --- SensorIdentity tests ---

    #[test]
    fn test_identity_defaults() {
        let identity = SensorIdentity::from_address("aa:bb:cc:dd:ee:ff").unwrap();
        assert_eq!(identity.name(), "AA:BB:CC:DD:EE:FF");
        assert_eq!(identity.device_class(), "window");
        assert_eq!(identity.unique_id(), "lmag_AA:BB:CC:DD:EE:FF");
    }

    #[test]
    fn test_identity_explicit_fields() {
        let identity = SensorIdentity::new(
            "11:22:33:44:55:66".parse().unwrap(),
            Some("Front door".to_string()),
            Some("door".to_string()),
        );
        assert_eq!(identity.name(), "Front door");
        assert_eq!(identity.device_class(), "door");
        assert_eq!(identity.unique_id(), "lmag_11:22:33:44:55:66");
    }

    #[test]
    fn test_unique_id_independent_of_input_form() {
        let a = SensorIdentity::from_address("aabbccddeeff").unwrap();
        let b = SensorIdentity::from_address("AA-BB-CC-DD-EE-FF").unwrap();
        assert_eq!(a.unique_id(), b.unique_id());
    }
}
