//! Protocol error types

use thiserror::Error;

/// Protocol-level errors
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// JSON encoding or decoding failed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Datagram payload was not valid UTF-8
    #[error("Payload is not UTF-8: {0}")]
    Utf8(#[from] std::str::Utf8Error),

    /// A required field was present but empty
    #[error("Missing field: {0}")]
    MissingField(&'static str),

    /// Version string could not be parsed
    #[error("Invalid protocol version: {0:?}")]
    InvalidVersion(String),

    /// Incompatible protocol version detected
    #[error("Incompatible protocol version: {found} (expected {expected})")]
    IncompatibleVersion { found: String, expected: String },

    /// Encoded datagram exceeds what fits in a single UDP packet
    #[error("Datagram too large: {size} bytes (max: {max})")]
    DatagramTooLarge { size: usize, max: usize },
}

/// Type alias for protocol results
pub type Result<T> = std::result::Result<T, ProtocolError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ProtocolError::IncompatibleVersion {
            found: "3.0".to_string(),
            expected: "2.0".to_string(),
        };
        let msg = format!("{}", err);
        assert!(msg.contains("Incompatible protocol version"));
        assert!(msg.contains("3.0"));
        assert!(msg.contains("2.0"));
    }

    #[test]
    fn test_missing_field_error() {
        let msg = ProtocolError::MissingField("deviceAddress").to_string();
        assert_eq!(msg, "Missing field: deviceAddress");
    }
}
