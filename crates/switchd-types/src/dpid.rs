//! Datapath identifier type.

use crate::{MacAddress, ParseError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A 64-bit forwarding-plane datapath identifier.
///
/// Rendered as exactly 16 hexadecimal digits, the format persisted into the
/// configuration store.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(try_from = "String", into = "String")]
pub struct DatapathId(u64);

impl DatapathId {
    /// Creates a datapath ID from a raw u64.
    pub const fn new(id: u64) -> Self {
        DatapathId(id)
    }

    /// Derives a datapath ID from an Ethernet address.
    ///
    /// The low 48 bits carry the address, the high 16 bits are zero.
    pub const fn from_mac(mac: MacAddress) -> Self {
        DatapathId(mac.to_u64())
    }

    /// Returns the raw u64 value.
    pub const fn as_u64(&self) -> u64 {
        self.0
    }

    /// Returns true if this is the all-zero identifier.
    pub const fn is_zero(&self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for DatapathId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

impl FromStr for DatapathId {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() || s.len() > 16 {
            return Err(ParseError::InvalidDatapathId(s.to_string()));
        }
        u64::from_str_radix(s, 16)
            .map(DatapathId)
            .map_err(|_| ParseError::InvalidDatapathId(s.to_string()))
    }
}

impl TryFrom<String> for DatapathId {
    type Error = ParseError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<DatapathId> for String {
    fn from(dpid: DatapathId) -> String {
        dpid.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_from_mac() {
        let mac: MacAddress = "00:11:22:33:44:55".parse().unwrap();
        let dpid = DatapathId::from_mac(mac);
        assert_eq!(dpid.as_u64(), 0x0000_0011_2233_4455);
    }

    #[test]
    fn test_display_sixteen_digits() {
        let dpid = DatapathId::new(0x1122_3344_5566);
        assert_eq!(dpid.to_string(), "0000112233445566");
    }

    #[test]
    fn test_parse_roundtrip() {
        let dpid: DatapathId = "0000112233445566".parse().unwrap();
        assert_eq!(dpid.as_u64(), 0x1122_3344_5566);

        // Short forms are accepted on input
        let short: DatapathId = "1f".parse().unwrap();
        assert_eq!(short.as_u64(), 0x1f);
    }

    #[test]
    fn test_parse_invalid() {
        assert!("".parse::<DatapathId>().is_err());
        assert!("zz".parse::<DatapathId>().is_err());
        assert!("00001122334455667".parse::<DatapathId>().is_err());
    }
}
