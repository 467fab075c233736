use crate::error::{StickError, StickResult};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

static MAC_PATTERN: Lazy<Option<Regex>> = Lazy::new(|| Regex::new("^[0-9A-F]{16}$").ok());

/// Device address of a mesh node
///
/// Stored as the 16 uppercase ASCII hex digits that travel on the wire, so encoding
/// a frame never needs a conversion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct MacAddress {
    bytes: [u8; 16],
}

impl MacAddress {
    /// Address reported by a coordinator scan for an empty slot
    pub const UNSET: MacAddress = MacAddress { bytes: [b'F'; 16] };

    /// Parse an address from its textual form
    ///
    /// # Arguments
    ///
    /// * `s` - 16 hex digits, case-insensitive
    ///
    /// # Returns
    ///
    /// Returns `Ok(MacAddress)` if the string is a valid address,
    /// `Err(StickError::InvalidMac)` otherwise
    pub fn from_string(s: &str) -> StickResult<Self> {
        let upper = s.trim().to_ascii_uppercase();
        if !Self::is_valid(&upper) {
            return Err(StickError::InvalidMac(s.to_string()));
        }
        let mut bytes = [0u8; 16];
        bytes.copy_from_slice(upper.as_bytes());
        Ok(Self { bytes })
    }

    /// Build an address from wire bytes
    pub fn from_wire(data: &[u8]) -> StickResult<Self> {
        let text = std::str::from_utf8(data)
            .map_err(|_| StickError::InvalidMac(format!("{:?}", data)))?;
        if !Self::is_valid(text) {
            return Err(StickError::InvalidMac(text.to_string()));
        }
        let mut bytes = [0u8; 16];
        bytes.copy_from_slice(data);
        Ok(Self { bytes })
    }

    /// Check the textual form without building an address
    pub fn is_valid(s: &str) -> bool {
        match MAC_PATTERN.as_ref() {
            Some(pattern) => pattern.is_match(s),
            None => {
                s.len() == 16 && s.bytes().all(|b| b.is_ascii_digit() || (b'A'..=b'F').contains(&b))
            }
        }
    }

    /// Wire representation
    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.bytes
    }

    /// True for the all-`F` placeholder returned for empty network slots
    pub fn is_unset(&self) -> bool {
        *self == Self::UNSET
    }

    /// Address of the coordinator derived from the address reported by the stick
    ///
    /// The stick reports the coordinator with a different two-digit prefix; the
    /// node itself answers on `00` + the remaining 14 digits.
    pub fn coordinator_address(&self) -> Self {
        let mut bytes = self.bytes;
        bytes[0] = b'0';
        bytes[1] = b'0';
        Self { bytes }
    }
}

impl fmt::Display for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Always valid ASCII, checked at construction.
        f.write_str(std::str::from_utf8(&self.bytes).unwrap_or("????????????????"))
    }
}

impl FromStr for MacAddress {
    type Err = StickError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_string(s)
    }
}

impl TryFrom<String> for MacAddress {
    type Error = StickError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::from_string(&value)
    }
}

impl From<MacAddress> for String {
    fn from(mac: MacAddress) -> Self {
        mac.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mac_from_string() {
        let mac = MacAddress::from_string("0123456789abcdef").unwrap();
        assert_eq!(mac.to_string(), "0123456789ABCDEF");
        assert_eq!(mac.as_bytes(), b"0123456789ABCDEF");
    }

    #[test]
    fn test_mac_rejects_invalid() {
        assert!(MacAddress::from_string("0123").is_err());
        assert!(MacAddress::from_string("0123456789ABCDEG").is_err());
        assert!(MacAddress::from_wire(b"0123456789abcdef").is_err());
    }

    #[test]
    fn test_coordinator_address() {
        let mac: MacAddress = "AB0D6F0000468F71".parse().unwrap();
        assert_eq!(mac.coordinator_address().to_string(), "000D6F0000468F71");
    }

    #[test]
    fn test_unset_address() {
        let mac = MacAddress::from_wire(b"FFFFFFFFFFFFFFFF").unwrap();
        assert!(mac.is_unset());
        assert!(!"000D6F0000468F71".parse::<MacAddress>().unwrap().is_unset());
    }
}
