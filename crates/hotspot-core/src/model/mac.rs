// ── MacAddress ──
//
// Gateways report MACs in whatever format their firmware prefers. Every
// form is parsed once at the boundary into a validated 48-bit value.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// MAC address, rendered lowercase colon-separated (aa:bb:cc:dd:ee:ff).
///
/// Accepts colon-separated, dash-separated, Cisco dotted (`aabb.ccdd.eeff`)
/// and bare hex input. All-zero and broadcast addresses are rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct MacAddress([u8; 6]);

impl MacAddress {
    pub fn octets(&self) -> [u8; 6] {
        self.0
    }

    /// Parse leniently, returning `None` for anything malformed.
    pub fn parse(raw: &str) -> Option<Self> {
        raw.parse().ok()
    }
}

impl FromStr for MacAddress {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || CoreError::InvalidMac {
            value: s.to_owned(),
        };
        let trimmed = s.trim();

        let hex: String = match trimmed.len() {
            // aa:bb:cc:dd:ee:ff / aa-bb-cc-dd-ee-ff
            17 => {
                let sep = trimmed.chars().nth(2).ok_or_else(invalid)?;
                if sep != ':' && sep != '-' {
                    return Err(invalid());
                }
                let groups: Vec<&str> = trimmed.split(sep).collect();
                if groups.len() != 6 || groups.iter().any(|g| g.len() != 2) {
                    return Err(invalid());
                }
                groups.concat()
            }
            // aabb.ccdd.eeff
            14 => {
                let groups: Vec<&str> = trimmed.split('.').collect();
                if groups.len() != 3 || groups.iter().any(|g| g.len() != 4) {
                    return Err(invalid());
                }
                groups.concat()
            }
            12 => trimmed.to_owned(),
            _ => return Err(invalid()),
        };
        if !hex.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(invalid());
        }

        let mut octets = [0_u8; 6];
        for (i, octet) in octets.iter_mut().enumerate() {
            let pair = hex.get(i * 2..i * 2 + 2).ok_or_else(invalid)?;
            *octet = u8::from_str_radix(pair, 16).map_err(|_| invalid())?;
        }

        if octets == [0; 6] || octets == [0xff; 6] {
            return Err(invalid());
        }
        Ok(Self(octets))
    }
}

impl TryFrom<String> for MacAddress {
    type Error = CoreError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<MacAddress> for String {
    fn from(mac: MacAddress) -> Self {
        mac.to_string()
    }
}

impl fmt::Display for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(f, "{a:02x}:{b:02x}:{c:02x}:{d:02x}:{e:02x}:{g:02x}")
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_common_forms() {
        for raw in [
            "AA:BB:CC:DD:EE:01",
            "aa-bb-cc-dd-ee-01",
            "aabb.ccdd.ee01",
            "AABBCCDDEE01",
        ] {
            let mac: MacAddress = raw.parse().unwrap();
            assert_eq!(mac.to_string(), "aa:bb:cc:dd:ee:01", "input {raw}");
        }
    }

    #[test]
    fn rejects_malformed_and_reserved() {
        for raw in [
            "",
            "00:00:00:00:00:00",
            "ff:ff:ff:ff:ff:ff",
            "aa:bb:cc:dd:ee",
            "aa:bb-cc:dd:ee:ff",
            "zz:bb:cc:dd:ee:ff",
            "aabb.ccdd",
        ] {
            assert!(MacAddress::parse(raw).is_none(), "input {raw:?} should be rejected");
        }
    }

    #[test]
    fn serde_uses_canonical_string() {
        let mac: MacAddress = serde_json::from_str(r#""AA-BB-CC-DD-EE-01""#).unwrap();
        assert_eq!(serde_json::to_string(&mac).unwrap(), r#""aa:bb:cc:dd:ee:01""#);
        assert!(serde_json::from_str::<MacAddress>(r#""nope""#).is_err());
    }
}
