//! WiFi (local network) delivery channel
//!
//! Runs on the tokio runtime. The advertiser and the listener are independent
//! background tasks; [`WifiPublisher`] wires them to a [`BookSender`].

pub mod address;
pub mod advertiser;
pub mod listener;
pub mod publisher;
pub mod sender;

pub use address::{
    COULD_NOT_DETERMINE, HostAddressResolver, LocalAddressResolver, LocalInterface,
    broadcast_address, select_interface,
};
pub use advertiser::{
    AdvertisedBook, AdvertisementCache, AdvertiserControl, AdvertiserOptions, WifiAdvertiser,
};
pub use listener::{AckListener, PacketHandler};
pub use publisher::{WIFI_PROGRESS_PREFIX, WifiOptions, WifiPublisher};
pub use sender::{BookSender, HttpBookSender};
