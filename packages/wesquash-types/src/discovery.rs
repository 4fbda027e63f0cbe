//! Discovery beacon text format: `"<PREFIX>|<port>|<version>"`.

use serde::{Deserialize, Serialize};

pub const SERVICE_PREFIX: &str = "WESQUASH";
pub const PROTOCOL_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Announcement {
    /// UDP port of the primary transport
    pub port: u16,
    pub version: u32,
}

impl Announcement {
    pub fn new(port: u16) -> Self {
        Self { port, version: PROTOCOL_VERSION }
    }

    pub fn to_line(&self) -> String {
        format!("{SERVICE_PREFIX}|{}|{}", self.port, self.version)
    }

    /// Parse one beacon line. Anything that is not exactly three `|`-separated
    /// fields with the right prefix and numeric port/version yields `None`.
    pub fn parse(line: &str) -> Option<Self> {
        let mut fields = line.trim().split('|');
        let prefix = fields.next()?;
        let port = fields.next()?;
        let version = fields.next()?;
        if fields.next().is_some() || prefix != SERVICE_PREFIX {
            return None;
        }
        Some(Self {
            port: port.trim().parse().ok()?,
            version: version.trim().parse().ok()?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format() {
        assert_eq!(Announcement::new(9081).to_line(), "WESQUASH|9081|1");
    }

    #[test]
    fn test_parse_valid() {
        assert_eq!(
            Announcement::parse("WESQUASH|9081|1"),
            Some(Announcement { port: 9081, version: 1 })
        );
        assert_eq!(
            Announcement::parse("WESQUASH|9081|2\n"),
            Some(Announcement { port: 9081, version: 2 })
        );
    }

    #[test]
    fn test_parse_rejects_malformed() {
        for line in [
            "",
            "9081|1",
            "OTHERGAME|9081|1",
            "wesquash|9081|1",
            "WESQUASH|abc|1",
            "WESQUASH|9081",
            "WESQUASH|9081|1|extra",
            "WESQUASH|70000|1",
            "WESQUASH|9081|v1",
            "WESQUASH||1",
        ] {
            assert_eq!(Announcement::parse(line), None, "{line:?}");
        }
    }
}
