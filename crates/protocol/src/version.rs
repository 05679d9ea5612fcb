//! Protocol version management

use crate::error::{ProtocolError, Result};
use std::fmt;

/// Protocol version string carried in every advertisement.
pub const PROTOCOL_VERSION: &str = "2.0";

/// Parsed form of [`PROTOCOL_VERSION`]
pub const CURRENT_VERSION: ProtocolVersion = ProtocolVersion { major: 2, minor: 0 };

/// Two-part protocol version as advertised (`"major.minor"`)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProtocolVersion {
    pub major: u8,
    pub minor: u8,
}

impl ProtocolVersion {
    /// Parse a `"major.minor"` string
    pub fn parse(s: &str) -> Result<Self> {
        let (major, minor) = s
            .trim()
            .split_once('.')
            .ok_or_else(|| ProtocolError::InvalidVersion(s.to_string()))?;
        let major = major
            .parse()
            .map_err(|_| ProtocolError::InvalidVersion(s.to_string()))?;
        let minor = minor
            .parse()
            .map_err(|_| ProtocolError::InvalidVersion(s.to_string()))?;
        Ok(Self { major, minor })
    }

    /// Check if this version is compatible with another version
    pub fn is_compatible_with(&self, other: &ProtocolVersion) -> bool {
        self.major == other.major && self.minor >= other.minor
    }
}

impl fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_current_version_matches_string() {
        assert_eq!(ProtocolVersion::parse(PROTOCOL_VERSION).unwrap(), CURRENT_VERSION);
        assert_eq!(CURRENT_VERSION.to_string(), PROTOCOL_VERSION);
    }

    #[test]
    fn test_version_compatibility() {
        let v2_0 = ProtocolVersion { major: 2, minor: 0 };
        let v2_1 = ProtocolVersion { major: 2, minor: 1 };
        let v3_0 = ProtocolVersion { major: 3, minor: 0 };

        assert!(v2_1.is_compatible_with(&v2_0));
        assert!(!v2_0.is_compatible_with(&v2_1));
        assert!(!v3_0.is_compatible_with(&v2_0));
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(ProtocolVersion::parse("2").is_err());
        assert!(ProtocolVersion::parse("two.zero").is_err());
        assert!(ProtocolVersion::parse("").is_err());
    }
}
