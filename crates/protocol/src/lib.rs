//! Wire contract between the authoring machine and Bloom Reader devices
//!
//! This crate defines what goes over the local network for the WiFi delivery
//! channel: the UDP ports, the advertisement datagram that offers a book, and
//! the book request a reader sends back when it wants the offered book.
//! Everything on the wire is UTF-8 JSON.
//!
//! # Example
//!
//! ```
//! use protocol::{Advertisement, PROTOCOL_VERSION, decode_advertisement, encode_advertisement};
//!
//! let advert = Advertisement {
//!     title: "The Moon and the Cap".to_string(),
//!     version: "1a2b3c4d".to_string(),
//!     language: "en".to_string(),
//!     protocol_version: PROTOCOL_VERSION.to_string(),
//!     sender: "AUTHOR-PC".to_string(),
//!     sender_ip: Some("192.168.1.20".to_string()),
//! };
//!
//! let bytes = encode_advertisement(&advert).unwrap();
//! let decoded = decode_advertisement(&bytes).unwrap();
//! assert_eq!(decoded, advert);
//! ```

pub mod codec;
pub mod error;
pub mod messages;
pub mod version;

pub use codec::{
    MAX_DATAGRAM_SIZE, decode_advertisement, decode_book_request, encode_advertisement,
    encode_book_request,
};
pub use error::{ProtocolError, Result};
pub use messages::{Advertisement, BookRequest};
pub use version::{CURRENT_VERSION, PROTOCOL_VERSION, ProtocolVersion};

/// UDP port the advertisement is broadcast to.
///
/// Bloom Reader listens for offers on this port.
pub const ADVERTISE_PORT: u16 = 5913;

/// HTTP port a reader device serves `/putfile` on once it has asked for a book.
pub const READER_HTTP_PORT: u16 = 5914;

/// UDP port on which book requests from readers arrive.
pub const ACK_PORT: u16 = 5915;
