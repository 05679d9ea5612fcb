//! book-courier
//!
//! Delivers a packaged book to a nearby reader device over one of two
//! channels:
//!
//! - **USB**: [`usb::UsbCoordinator`] polls the connected portable devices,
//!   waits until exactly one of them shows the reader's marker folder, and
//!   copies the bundle into it.
//! - **WiFi**: [`wifi::WifiAdvertiser`] broadcasts a small JSON description
//!   of the book once per interval while [`wifi::AckListener`] waits for
//!   readers asking for it; [`wifi::WifiPublisher`] ties the two to a
//!   [`wifi::BookSender`].
//!
//! Both channels report through a [`common::ProgressSink`] and never touch a
//! UI directly.

pub mod bundle;
pub mod config;
pub mod usb;
pub mod wifi;

pub use bundle::{Book, Bundle, BundleProducer, PrebuiltBundleProducer};
pub use config::CourierConfig;
