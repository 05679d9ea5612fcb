//! Message definitions
//!
//! Two messages make up the WiFi handshake:
//! - [`Advertisement`]: broadcast once per second by the authoring machine
//! - [`BookRequest`]: sent by a reader to the ack port when the user wants the book
//!
//! Field names on the wire are camelCase; they must match what Bloom Reader
//! parses, so they are pinned with `serde(rename)` rather than derived.

use serde::{Deserialize, Serialize};

/// Offer of a single book to any reader on the local network
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Advertisement {
    /// Book title, identical to the file name the book will be sent as
    pub title: String,
    /// Version code of the bundle; readers skip books they already have
    pub version: String,
    /// Language code of the title
    pub language: String,
    /// Protocol version, see [`crate::PROTOCOL_VERSION`]
    #[serde(rename = "protocolVersion")]
    pub protocol_version: String,
    /// Machine name of the sender
    pub sender: String,
    /// Address the sender believes it is reachable at
    #[serde(rename = "senderIP", default, skip_serializing_if = "Option::is_none")]
    pub sender_ip: Option<String>,
}

/// Request from a reader device asking for the advertised book
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookRequest {
    /// IP address of the reader's HTTP receiver
    #[serde(rename = "deviceAddress")]
    pub device_address: String,
    /// Human-readable name of the reader device
    #[serde(rename = "deviceName", default)]
    pub device_name: String,
}
