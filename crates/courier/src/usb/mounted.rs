//! Device transport over a mounted MTP filesystem
//!
//! Desktop environments expose MTP devices as directories, e.g. gvfs mounts
//! each phone at `$XDG_RUNTIME_DIR/gvfs/mtp:host=SAMSUNG_Galaxy_A12_R58R...`
//! with one child directory per storage (`Internal shared storage`,
//! `SD card`). [`MountedTransport`] treats every such directory as a device.

use common::{DeviceHandle, DeviceTransport, PortableDevice};
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Component, Path, PathBuf};
use tracing::{debug, trace};

const MTP_SCHEME: &str = "mtp:";
const GVFS_HOST_PREFIX: &str = "mtp:host=";

/// [`DeviceTransport`] backed by directories under a mount root
#[derive(Debug, Clone)]
pub struct MountedTransport {
    root: PathBuf,
}

impl MountedTransport {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Map a device path onto the local filesystem
    fn resolve(&self, device: &DeviceHandle, path: &str) -> io::Result<PathBuf> {
        let mut resolved = self.device_dir(device)?;
        for part in path.split('/').filter(|p| !p.is_empty()) {
            if is_plain_component(part) {
                resolved.push(part);
            } else {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!("Invalid device path: {}", path),
                ));
            }
        }
        Ok(resolved)
    }

    fn device_dir(&self, device: &DeviceHandle) -> io::Result<PathBuf> {
        if !is_plain_component(&device.0) {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("Invalid device handle: {}", device),
            ));
        }
        Ok(self.root.join(&device.0))
    }
}

fn is_plain_component(part: &str) -> bool {
    let mut components = Path::new(part).components();
    matches!(components.next(), Some(Component::Normal(_))) && components.next().is_none()
}

/// Whether a mount directory looks like a portable device
///
/// Other gvfs mounts (`smb-share:`, `sftp:`) carry a scheme too and are skipped.
fn is_device_mount(name: &str) -> bool {
    name.starts_with(MTP_SCHEME) || !name.contains(':')
}

/// Human-readable name for a mount directory
pub fn display_name(mount_name: &str) -> String {
    match mount_name.strip_prefix(GVFS_HOST_PREFIX) {
        Some(host) => host.replace('_', " "),
        None => mount_name.to_string(),
    }
}

fn sorted_dir_names(dir: &Path) -> io::Result<Vec<String>> {
    let mut names = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
    }
    names.sort();
    Ok(names)
}

impl DeviceTransport for MountedTransport {
    fn devices(&self) -> io::Result<Vec<PortableDevice>> {
        if !self.root.exists() {
            trace!("Mount root {} does not exist", self.root.display());
            return Ok(Vec::new());
        }

        let devices = sorted_dir_names(&self.root)?
            .into_iter()
            .filter(|name| is_device_mount(name))
            .map(|name| PortableDevice {
                name: display_name(&name),
                handle: DeviceHandle(name),
            })
            .collect::<Vec<_>>();

        debug!(
            "Found {} mounted device(s) under {}",
            devices.len(),
            self.root.display()
        );
        Ok(devices)
    }

    fn storage_roots(&self, device: &DeviceHandle) -> io::Result<Vec<String>> {
        sorted_dir_names(&self.device_dir(device)?)
    }

    fn exists(&self, device: &DeviceHandle, path: &str) -> bool {
        self.resolve(device, path).is_ok_and(|p| p.exists())
    }

    fn open_write(
        &self,
        device: &DeviceHandle,
        path: &str,
        expected_len: u64,
    ) -> io::Result<Box<dyn Write + Send>> {
        let target = self.resolve(device, path)?;
        debug!("Writing {} bytes to {}", expected_len, target.display());
        let file = File::create(&target)?;
        Ok(Box::new(file))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_display_name() {
        assert_eq!(display_name("mtp:host=Google_Pixel_7_2A1B"), "Google Pixel 7 2A1B");
        assert_eq!(display_name("Tablet"), "Tablet");
    }

    #[test]
    fn test_devices_skip_other_mounts() {
        let dir = tempdir().unwrap();
        fs::create_dir(dir.path().join("mtp:host=Phone")).unwrap();
        fs::create_dir(dir.path().join("smb-share:server=nas,share=books")).unwrap();
        fs::write(dir.path().join("stray-file"), b"").unwrap();

        let devices = MountedTransport::new(dir.path()).devices().unwrap();
        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].name, "Phone");
        assert_eq!(devices[0].handle.0, "mtp:host=Phone");
    }

    #[test]
    fn test_missing_root_means_no_devices() {
        let dir = tempdir().unwrap();
        let transport = MountedTransport::new(dir.path().join("gvfs"));
        assert!(transport.devices().unwrap().is_empty());
    }

    #[test]
    fn test_rejects_escaping_paths() {
        let dir = tempdir().unwrap();
        fs::create_dir(dir.path().join("Phone")).unwrap();
        let transport = MountedTransport::new(dir.path());
        let handle = DeviceHandle("Phone".to_string());

        let err = transport.open_write(&handle, "../outside.bloompub", 1).err().unwrap();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
        assert!(!transport.exists(&DeviceHandle("..".to_string()), ""));
    }
}
