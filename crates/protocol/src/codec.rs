//! JSON encoding and decoding of datagrams
//!
//! Advertisements are serialized once and the resulting [`Bytes`] buffer is
//! reused by the sender until something in it changes, so encoding hands back
//! a cheaply clonable buffer rather than a `Vec`.

use crate::error::{ProtocolError, Result};
use crate::messages::{Advertisement, BookRequest};
use crate::version::{CURRENT_VERSION, PROTOCOL_VERSION, ProtocolVersion};
use bytes::Bytes;

/// Largest payload a single IPv4 UDP datagram can carry
pub const MAX_DATAGRAM_SIZE: usize = 65_507;

/// Serialize an advertisement to UTF-8 JSON
pub fn encode_advertisement(advert: &Advertisement) -> Result<Bytes> {
    let bytes = serde_json::to_vec(advert)?;
    check_size(bytes.len())?;
    Ok(Bytes::from(bytes))
}

/// Parse an advertisement datagram
///
/// Advertisements from a different major protocol version are rejected.
pub fn decode_advertisement(bytes: &[u8]) -> Result<Advertisement> {
    let text = std::str::from_utf8(bytes)?;
    let advert: Advertisement = serde_json::from_str(text)?;

    let version = ProtocolVersion::parse(&advert.protocol_version)?;
    if !version.is_compatible_with(&CURRENT_VERSION) {
        return Err(ProtocolError::IncompatibleVersion {
            found: advert.protocol_version,
            expected: PROTOCOL_VERSION.to_string(),
        });
    }
    Ok(advert)
}

/// Serialize a book request to UTF-8 JSON
pub fn encode_book_request(request: &BookRequest) -> Result<Bytes> {
    let bytes = serde_json::to_vec(request)?;
    check_size(bytes.len())?;
    Ok(Bytes::from(bytes))
}

/// Parse a book request received on the ack port
///
/// A request with an empty `deviceAddress` is rejected, since there would be
/// nowhere to send the book.
pub fn decode_book_request(bytes: &[u8]) -> Result<BookRequest> {
    let text = std::str::from_utf8(bytes)?;
    let request: BookRequest = serde_json::from_str(text)?;
    if request.device_address.trim().is_empty() {
        return Err(ProtocolError::MissingField("deviceAddress"));
    }
    Ok(request)
}

fn check_size(size: usize) -> Result<()> {
    if size > MAX_DATAGRAM_SIZE {
        return Err(ProtocolError::DatagramTooLarge {
            size,
            max: MAX_DATAGRAM_SIZE,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_book_request_rejects_empty_address() {
        let err = decode_book_request(br#"{"deviceAddress":"  ","deviceName":"Tab"}"#).unwrap_err();
        assert!(matches!(err, ProtocolError::MissingField("deviceAddress")));
    }

    #[test]
    fn test_decode_book_request_rejects_invalid_utf8() {
        let err = decode_book_request(&[0xff, 0xfe, 0x00]).unwrap_err();
        assert!(matches!(err, ProtocolError::Utf8(_)));
    }

    #[test]
    fn test_oversized_advertisement_rejected() {
        let advert = Advertisement {
            title: "x".repeat(MAX_DATAGRAM_SIZE),
            version: String::new(),
            language: String::new(),
            protocol_version: String::new(),
            sender: String::new(),
            sender_ip: None,
        };
        let err = encode_advertisement(&advert).unwrap_err();
        assert!(matches!(err, ProtocolError::DatagramTooLarge { .. }));
    }
}
