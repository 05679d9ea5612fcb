//! Test utilities for book-courier
//!
//! Provides an in-memory device transport, a recording progress sink and
//! timeout helpers for tests across crates. Built for this crate's own
//! tests and, through the `test-utils` feature, for dependents' tests.

use crate::device::{DeviceHandle, DeviceTransport, MARKER_DIRECTORY, PortableDevice, join_device_path};
use crate::progress::{ProgressKind, ProgressMessage, ProgressSink};
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::io::{self, Write};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

/// Default test timeout (5 seconds)
pub const DEFAULT_TEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Storage root every [`MockDevice`] starts with
pub const DEFAULT_STORAGE_ROOT: &str = "Internal shared storage";

/// Timeout wrapper for async tests
///
/// Wraps an async operation with a timeout to prevent tests from hanging.
pub async fn with_timeout<T, F>(duration: Duration, future: F) -> Result<T, TimeoutError>
where
    F: Future<Output = T>,
{
    tokio::time::timeout(duration, future)
        .await
        .map_err(|_| TimeoutError { duration })
}

/// Error returned when a test operation times out
#[derive(Debug, Clone)]
pub struct TimeoutError {
    pub duration: Duration,
}

impl std::fmt::Display for TimeoutError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Operation timed out after {:?}", self.duration)
    }
}

impl std::error::Error for TimeoutError {}

/// Poll `condition` until it holds or `timeout` elapses (blocking)
pub fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = std::time::Instant::now() + timeout;
    while std::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    condition()
}

/// How writes to a [`MockTransport`] should fail
#[derive(Debug, Clone)]
pub enum WriteFailure {
    /// Fail with a raw OS error code (e.g. `ENOSPC`)
    RawOs(i32),
    /// Fail with an error of the given kind and message
    Kind(io::ErrorKind, String),
}

impl WriteFailure {
    fn to_error(&self) -> io::Error {
        match self {
            WriteFailure::RawOs(code) => io::Error::from_raw_os_error(*code),
            WriteFailure::Kind(kind, msg) => io::Error::new(*kind, msg.clone()),
        }
    }
}

/// A simulated portable device
#[derive(Debug, Clone)]
pub struct MockDevice {
    pub name: String,
    pub roots: Vec<String>,
    /// Every directory and file path that exists on the device
    pub paths: HashSet<String>,
    pub files: HashMap<String, Vec<u8>>,
}

impl MockDevice {
    /// A device with one storage root and no marker directory
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            roots: vec![DEFAULT_STORAGE_ROOT.to_string()],
            paths: HashSet::new(),
            files: HashMap::new(),
        }
    }

    /// Add a further storage root
    pub fn with_root(mut self, root: &str) -> Self {
        self.roots.push(root.to_string());
        self
    }

    /// Create the marker directory under the first storage root
    pub fn with_marker(self) -> Self {
        let root = self.roots[0].clone();
        self.with_marker_on(&root)
    }

    /// Create the marker directory under a specific storage root
    pub fn with_marker_on(mut self, root: &str) -> Self {
        self.paths.insert(join_device_path(root, MARKER_DIRECTORY));
        self
    }

    /// Create an arbitrary directory (or file placeholder) path
    pub fn with_path(mut self, path: &str) -> Self {
        self.paths.insert(path.to_string());
        self
    }

    pub fn handle(&self) -> DeviceHandle {
        DeviceHandle(format!("mock:{}", self.name))
    }
}

#[derive(Debug, Default)]
struct MockState {
    devices: Vec<MockDevice>,
    enumerations: usize,
    enumeration_failure: Option<io::ErrorKind>,
    write_failure: Option<WriteFailure>,
    discard_writes: bool,
    write_delay: Option<Duration>,
    opened: Vec<(String, u64)>,
}

/// In-memory [`DeviceTransport`]
///
/// Cloning yields another handle onto the same simulated devices, so a test
/// can keep one clone while the code under test owns another.
#[derive(Debug, Clone, Default)]
pub struct MockTransport {
    state: Arc<Mutex<MockState>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn add_device(&self, device: MockDevice) {
        self.lock().devices.push(device);
    }

    pub fn remove_device(&self, name: &str) {
        self.lock().devices.retain(|d| d.name != name);
    }

    pub fn clear_devices(&self) {
        self.lock().devices.clear();
    }

    /// Number of times `devices()` has been called
    pub fn enumerations(&self) -> usize {
        self.lock().enumerations
    }

    /// Make `devices()` fail with the given kind
    pub fn fail_enumeration(&self, kind: io::ErrorKind) {
        self.lock().enumeration_failure = Some(kind);
    }

    /// Make every write fail
    pub fn fail_writes(&self, failure: WriteFailure) {
        self.lock().write_failure = Some(failure);
    }

    /// Accept writes but never make the file appear on the device
    pub fn discard_writes(&self) {
        self.lock().discard_writes = true;
    }

    /// Sleep this long inside every `write` call
    pub fn slow_writes(&self, delay: Duration) {
        self.lock().write_delay = Some(delay);
    }

    /// Contents of a file on a device
    pub fn file(&self, device_name: &str, path: &str) -> Option<Vec<u8>> {
        self.lock()
            .devices
            .iter()
            .find(|d| d.name == device_name)
            .and_then(|d| d.files.get(path).cloned())
    }

    /// Every `(path, expected_len)` passed to `open_write`
    pub fn opened(&self) -> Vec<(String, u64)> {
        self.lock().opened.clone()
    }
}

impl DeviceTransport for MockTransport {
    fn devices(&self) -> io::Result<Vec<PortableDevice>> {
        let mut state = self.lock();
        state.enumerations += 1;
        if let Some(kind) = state.enumeration_failure {
            return Err(io::Error::new(kind, "simulated enumeration failure"));
        }
        Ok(state
            .devices
            .iter()
            .map(|d| PortableDevice {
                handle: d.handle(),
                name: d.name.clone(),
            })
            .collect())
    }

    fn storage_roots(&self, device: &DeviceHandle) -> io::Result<Vec<String>> {
        self.lock()
            .devices
            .iter()
            .find(|d| &d.handle() == device)
            .map(|d| d.roots.clone())
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "device disconnected"))
    }

    fn exists(&self, device: &DeviceHandle, path: &str) -> bool {
        self.lock()
            .devices
            .iter()
            .find(|d| &d.handle() == device)
            .is_some_and(|d| d.paths.contains(path))
    }

    fn open_write(
        &self,
        device: &DeviceHandle,
        path: &str,
        expected_len: u64,
    ) -> io::Result<Box<dyn Write + Send>> {
        let mut state = self.lock();
        if !state.devices.iter().any(|d| &d.handle() == device) {
            return Err(io::Error::new(io::ErrorKind::NotFound, "device disconnected"));
        }
        state.opened.push((path.to_string(), expected_len));
        Ok(Box::new(MockWriter {
            state: self.state.clone(),
            device: device.clone(),
            path: path.to_string(),
            buffer: Vec::new(),
            failure: state.write_failure.clone(),
            delay: state.write_delay,
        }))
    }
}

struct MockWriter {
    state: Arc<Mutex<MockState>>,
    device: DeviceHandle,
    path: String,
    buffer: Vec<u8>,
    failure: Option<WriteFailure>,
    delay: Option<Duration>,
}

impl Write for MockWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if let Some(delay) = self.delay {
            std::thread::sleep(delay);
        }
        if let Some(failure) = &self.failure {
            return Err(failure.to_error());
        }
        self.buffer.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if state.discard_writes {
            return Ok(());
        }
        if let Some(device) = state.devices.iter_mut().find(|d| d.handle() == self.device) {
            device.paths.insert(self.path.clone());
            device.files.insert(self.path.clone(), self.buffer.clone());
        }
        Ok(())
    }
}

/// Progress sink that records everything it receives
#[derive(Debug, Default)]
pub struct RecordingProgress {
    messages: Mutex<Vec<ProgressMessage>>,
}

impl RecordingProgress {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn messages(&self) -> Vec<ProgressMessage> {
        self.messages.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Ids of localizable messages, in order
    pub fn ids(&self) -> Vec<String> {
        self.messages().into_iter().filter_map(|m| m.id).collect()
    }

    /// Number of messages whose id ends with `suffix`
    pub fn count(&self, suffix: &str) -> usize {
        self.ids().iter().filter(|id| id.ends_with(suffix)).count()
    }

    /// First message whose id ends with `suffix`
    pub fn find(&self, suffix: &str) -> Option<ProgressMessage> {
        self.messages()
            .into_iter()
            .find(|m| m.id.as_deref().is_some_and(|id| id.ends_with(suffix)))
    }

    pub fn of_kind(&self, kind: ProgressKind) -> Vec<ProgressMessage> {
        self.messages().into_iter().filter(|m| m.kind == kind).collect()
    }
}

impl ProgressSink for RecordingProgress {
    fn report(&self, message: ProgressMessage) {
        self.messages
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(message);
    }
}
