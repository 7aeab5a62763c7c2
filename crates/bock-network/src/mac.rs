//! MAC address handling.

use std::fmt;
use std::str::FromStr;

use bock_common::BockError;

/// A 48-bit MAC address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MacAddress([u8; 6]);

impl MacAddress {
    /// Raw octets.
    #[must_use]
    pub const fn octets(&self) -> [u8; 6] {
        self.0
    }

    /// Hyphen-separated upper-case form (`02-42-AC-11-00-02`), as the
    /// compute-system API expects it.
    #[must_use]
    pub fn to_hyphenated(&self) -> String {
        self.0
            .iter()
            .map(|b| format!("{b:02X}"))
            .collect::<Vec<_>>()
            .join("-")
    }
}

impl FromStr for MacAddress {
    type Err = BockError;

    /// Accepts colon- or hyphen-separated hex octets.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || BockError::Config {
            message: format!("invalid MAC address: {s}"),
        };

        let parts: Vec<&str> = s.split([':', '-']).collect();
        if parts.len() != 6 {
            return Err(invalid());
        }

        let mut octets = [0u8; 6];
        for (octet, part) in octets.iter_mut().zip(parts) {
            if part.len() != 2 {
                return Err(invalid());
            }
            *octet = u8::from_str_radix(part, 16).map_err(|_| invalid())?;
        }
        Ok(Self(octets))
    }
}

impl fmt::Display for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(f, "{a:02x}:{b:02x}:{c:02x}:{d:02x}:{e:02x}:{g:02x}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_colon_form() {
        let mac: MacAddress = "02:42:ac:11:00:02".parse().unwrap();
        assert_eq!(mac.octets(), [0x02, 0x42, 0xac, 0x11, 0x00, 0x02]);
        assert_eq!(mac.to_string(), "02:42:ac:11:00:02");
        assert_eq!(mac.to_hyphenated(), "02-42-AC-11-00-02");
    }

    #[test]
    fn parses_hyphen_form() {
        let mac: MacAddress = "00-15-5D-01-02-03".parse().unwrap();
        assert_eq!(mac.to_hyphenated(), "00-15-5D-01-02-03");
    }

    #[test]
    fn rejects_malformed() {
        for bad in ["", "02:42:ac:11:00", "02:42:ac:11:00:02:03", "zz:42:ac:11:00:02", "2:42:ac:11:00:02"] {
            assert!(bad.parse::<MacAddress>().is_err(), "{bad} should be rejected");
        }
    }
}
