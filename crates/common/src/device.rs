//! Portable device abstractions
//!
//! The USB channel talks to devices only through the [`DeviceTransport`]
//! contract: list devices, list a device's storage roots, test a path, open a
//! write stream. Paths on a device are `/`-separated strings relative to the
//! device, the way MTP object paths are presented to users
//! (`Internal shared storage/Bloom/My Book.bloompub`).

use std::fmt;
use std::io::{self, Write};

/// Name of the folder Bloom Reader creates on a device's storage root.
///
/// Its presence is how a device signals it is ready to receive books.
pub const MARKER_DIRECTORY: &str = "Bloom";

/// Opaque, transport-assigned identity of a connected device
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DeviceHandle(pub String);

impl fmt::Display for DeviceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A device as reported by the transport's enumeration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortableDevice {
    pub handle: DeviceHandle,
    /// Display name shown to the user
    pub name: String,
}

/// A connected device together with its storage roots
///
/// Built fresh on every enumeration pass and never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateDevice {
    pub handle: DeviceHandle,
    pub name: String,
    /// Root storage object paths, e.g. `Internal shared storage`, `SD card`
    pub roots: Vec<String>,
}

/// A candidate device on which the marker directory was found
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadyDevice {
    pub device: CandidateDevice,
    /// Device path of the marker directory, e.g. `Internal shared storage/Bloom`
    pub marker_path: String,
}

impl ReadyDevice {
    pub fn name(&self) -> &str {
        &self.device.name
    }
}

/// Tag of a [`DiscoveryOutcome`], used to suppress repeated identical reports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OutcomeKind {
    NoDeviceFound,
    NoBloomDirectory,
    MoreThanOneReadyDevice,
    OneReadyDeviceFound,
}

/// Result of classifying one enumeration pass
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiscoveryOutcome {
    /// Nothing is connected
    NoDeviceFound,
    /// Devices are connected but none has the marker directory
    NoBloomDirectory(Vec<String>),
    /// More than one device has the marker directory; the user must unplug all but one
    MoreThanOneReadyDevice(Vec<String>),
    /// Exactly one device is ready
    OneReadyDeviceFound(ReadyDevice),
}

impl DiscoveryOutcome {
    pub fn kind(&self) -> OutcomeKind {
        match self {
            DiscoveryOutcome::NoDeviceFound => OutcomeKind::NoDeviceFound,
            DiscoveryOutcome::NoBloomDirectory(_) => OutcomeKind::NoBloomDirectory,
            DiscoveryOutcome::MoreThanOneReadyDevice(_) => OutcomeKind::MoreThanOneReadyDevice,
            DiscoveryOutcome::OneReadyDeviceFound(_) => OutcomeKind::OneReadyDeviceFound,
        }
    }

    /// Names of the devices the outcome is about
    pub fn device_names(&self) -> Vec<String> {
        match self {
            DiscoveryOutcome::NoDeviceFound => Vec::new(),
            DiscoveryOutcome::NoBloomDirectory(names)
            | DiscoveryOutcome::MoreThanOneReadyDevice(names) => names.clone(),
            DiscoveryOutcome::OneReadyDeviceFound(ready) => vec![ready.device.name.clone()],
        }
    }
}

/// Join a child name onto a device path
pub fn join_device_path(parent: &str, child: &str) -> String {
    let parent = parent.trim_end_matches('/');
    if parent.is_empty() {
        child.to_string()
    } else {
        format!("{}/{}", parent, child)
    }
}

/// Access to connected portable devices
///
/// Implementations are called from the USB session thread and may block.
/// Errors are plain [`io::Error`]s so that platform error codes (disk full in
/// particular) survive the trip up to the code that classifies them.
pub trait DeviceTransport: Send + Sync {
    /// List the devices connected right now
    fn devices(&self) -> io::Result<Vec<PortableDevice>>;

    /// List the root storage objects of a device
    fn storage_roots(&self, device: &DeviceHandle) -> io::Result<Vec<String>>;

    /// Whether a file or directory exists at `path` on the device
    fn exists(&self, device: &DeviceHandle, path: &str) -> bool;

    /// Open a stream that creates or replaces the file at `path`
    ///
    /// `expected_len` is the number of bytes that will be written; MTP needs
    /// the object size before any data is sent.
    fn open_write(
        &self,
        device: &DeviceHandle,
        path: &str,
        expected_len: u64,
    ) -> io::Result<Box<dyn Write + Send>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_join_device_path() {
        assert_eq!(join_device_path("Internal shared storage", "Bloom"), "Internal shared storage/Bloom");
        assert_eq!(join_device_path("Card/", "Bloom"), "Card/Bloom");
        assert_eq!(join_device_path("", "Bloom"), "Bloom");
    }

    #[test]
    fn test_outcome_kind_and_names() {
        let outcome = DiscoveryOutcome::NoBloomDirectory(vec!["A".into(), "B".into()]);
        assert_eq!(outcome.kind(), OutcomeKind::NoBloomDirectory);
        assert_eq!(outcome.device_names(), vec!["A", "B"]);
        assert!(DiscoveryOutcome::NoDeviceFound.device_names().is_empty());
    }
}
