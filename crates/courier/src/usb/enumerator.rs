//! Device enumeration and readiness classification

use common::{
    CandidateDevice, DeviceTransport, DiscoveryOutcome, MARKER_DIRECTORY, ReadyDevice,
    join_device_path,
};
use std::io;
use std::sync::Arc;
use tracing::{debug, trace};

/// Lists connected devices and decides which of them is ready to receive a book
///
/// A device is ready when a folder named exactly like the marker exists as a
/// direct child of one of its storage roots. Deeper matches never count.
#[derive(Clone)]
pub struct DeviceEnumerator {
    transport: Arc<dyn DeviceTransport>,
    marker: String,
}

impl DeviceEnumerator {
    pub fn new(transport: Arc<dyn DeviceTransport>) -> Self {
        Self {
            transport,
            marker: MARKER_DIRECTORY.to_string(),
        }
    }

    /// Use a different marker folder name
    pub fn with_marker(mut self, marker: impl Into<String>) -> Self {
        self.marker = marker.into();
        self
    }

    pub fn transport(&self) -> &Arc<dyn DeviceTransport> {
        &self.transport
    }

    /// Build a fresh candidate list from the transport
    ///
    /// A device that disappears between listing and reading its storage
    /// roots is left out of this pass.
    pub fn enumerate(&self) -> io::Result<Vec<CandidateDevice>> {
        let devices = self.transport.devices()?;
        let mut candidates = Vec::with_capacity(devices.len());

        for device in devices {
            match self.transport.storage_roots(&device.handle) {
                Ok(roots) => candidates.push(CandidateDevice {
                    handle: device.handle,
                    name: device.name,
                    roots,
                }),
                Err(e) => {
                    debug!("Skipping device {} ({}): {}", device.name, device.handle, e);
                }
            }
        }

        trace!("Enumerated {} candidate device(s)", candidates.len());
        Ok(candidates)
    }

    /// Device path of the marker folder, if the device has one
    pub fn find_marker(&self, device: &CandidateDevice) -> Option<String> {
        device
            .roots
            .iter()
            .map(|root| join_device_path(root, &self.marker))
            .find(|path| self.transport.exists(&device.handle, path))
    }

    /// Classify one enumeration pass
    pub fn classify(&self, devices: &[CandidateDevice]) -> DiscoveryOutcome {
        let mut ready = Vec::new();
        let mut not_ready = Vec::new();

        for device in devices {
            match self.find_marker(device) {
                Some(marker_path) => ready.push(ReadyDevice {
                    device: device.clone(),
                    marker_path,
                }),
                None => not_ready.push(device.name.clone()),
            }
        }

        match ready.len() {
            0 if not_ready.is_empty() => DiscoveryOutcome::NoDeviceFound,
            0 => DiscoveryOutcome::NoBloomDirectory(not_ready),
            1 => match ready.pop() {
                Some(device) => DiscoveryOutcome::OneReadyDeviceFound(device),
                None => DiscoveryOutcome::NoDeviceFound,
            },
            _ => DiscoveryOutcome::MoreThanOneReadyDevice(
                ready.into_iter().map(|r| r.device.name).collect(),
            ),
        }
    }

    /// Enumerate and classify in one step
    pub fn discover(&self) -> io::Result<DiscoveryOutcome> {
        let devices = self.enumerate()?;
        Ok(self.classify(&devices))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::test_utils::{MockDevice, MockTransport};

    fn enumerator(transport: &MockTransport) -> DeviceEnumerator {
        DeviceEnumerator::new(Arc::new(transport.clone()))
    }

    #[test]
    fn test_no_devices() {
        let transport = MockTransport::new();
        assert_eq!(
            enumerator(&transport).discover().unwrap(),
            DiscoveryOutcome::NoDeviceFound
        );
    }

    #[test]
    fn test_marker_on_second_root() {
        let transport = MockTransport::new();
        transport.add_device(
            MockDevice::new("Tablet")
                .with_root("SD card")
                .with_marker_on("SD card"),
        );

        match enumerator(&transport).discover().unwrap() {
            DiscoveryOutcome::OneReadyDeviceFound(ready) => {
                assert_eq!(ready.name(), "Tablet");
                assert_eq!(ready.marker_path, "SD card/Bloom");
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
    }

    #[test]
    fn test_nested_marker_does_not_count() {
        let transport = MockTransport::new();
        transport.add_device(
            MockDevice::new("Phone").with_path("Internal shared storage/Documents/Bloom"),
        );

        assert_eq!(
            enumerator(&transport).discover().unwrap(),
            DiscoveryOutcome::NoBloomDirectory(vec!["Phone".to_string()])
        );
    }

    #[test]
    fn test_custom_marker() {
        let transport = MockTransport::new();
        transport.add_device(MockDevice::new("Phone").with_path("Internal shared storage/Reader"));

        let outcome = enumerator(&transport).with_marker("Reader").discover().unwrap();
        assert!(matches!(outcome, DiscoveryOutcome::OneReadyDeviceFound(_)));
    }

    #[test]
    fn test_enumeration_error_propagates() {
        let transport = MockTransport::new();
        transport.fail_enumeration(io::ErrorKind::PermissionDenied);

        let err = enumerator(&transport).discover().unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::PermissionDenied);
    }
}
