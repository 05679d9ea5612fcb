//! USB discovery and transfer coordinator
//!
//! One session at a time runs on a dedicated OS thread:
//!
//! ```text
//! Idle -> Searching -> Connected -> Sending -> Done | Error
//!            |             |
//!            +-------------+--> Stopped
//! ```
//!
//! The session polls the [`DeviceEnumerator`] until exactly one device is
//! ready, then produces the bundle and copies it into the device's marker
//! folder. Transient discovery results are reported through the progress
//! sink, each kind only once in a row. Whatever happens, the session ends by
//! releasing the coordinator's slot and then sending exactly one
//! [`SessionEvent::Stopped`].

use crate::bundle::{Book, BundleProducer};
use crate::config::CourierConfig;
use crate::usb::enumerator::DeviceEnumerator;
use crate::usb::transfer::{NOT_FOUND_AFTER_WRITE, SendError, copy_to_device};
use common::{
    DeviceTransport, DiscoveryOutcome, OutcomeKind, PrefixedProgress, ProgressKind, ProgressSink,
    ReadyDevice, SessionEvent, SessionEventSender, SessionEvents, SessionOutcome,
    create_session_channel, join_device_path,
};
use std::fs::File;
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Id prefix of every progress message from a USB session
pub const USB_PROGRESS_PREFIX: &str = "PublishTab.Android.Usb.Progress.";

/// Longest uninterrupted sleep while waiting for the next poll
const CANCEL_CHECK_SLICE: Duration = Duration::from_millis(50);

/// Lifecycle of a USB session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Searching,
    Connected,
    Sending,
    Done,
    Error,
    Stopped,
}

impl SessionState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            SessionState::Done | SessionState::Error | SessionState::Stopped
        )
    }

    pub fn can_transition_to(self, next: SessionState) -> bool {
        use SessionState::*;
        match (self, next) {
            (Idle | Done | Error | Stopped, Searching) => true,
            (Searching, Connected | Stopped | Error) => true,
            (Connected, Sending | Stopped | Error) => true,
            (Sending, Done | Error) => true,
            _ => false,
        }
    }

    fn for_outcome(outcome: SessionOutcome) -> Self {
        match outcome {
            SessionOutcome::Done => SessionState::Done,
            SessionOutcome::Stopped => SessionState::Stopped,
            SessionOutcome::DeviceOutOfSpace
            | SessionOutcome::FailureToSend
            | SessionOutcome::UnableToConnect => SessionState::Error,
        }
    }
}

/// What a call to [`UsbCoordinator::connect`] did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectStatus {
    /// A new session is running
    Started,
    /// A session was already running; it has been asked to stop
    StopRequested,
    /// The session could not be started; `Stopped` has already been sent
    Failed,
}

/// Tunables for a USB session
#[derive(Debug, Clone)]
pub struct UsbOptions {
    pub marker_dir: String,
    pub poll_interval: Duration,
    pub copy_buffer_bytes: usize,
    /// Where bundles are produced before copying
    pub staging_dir: PathBuf,
}

impl Default for UsbOptions {
    fn default() -> Self {
        Self::from_config(&CourierConfig::default())
    }
}

impl UsbOptions {
    pub fn from_config(config: &CourierConfig) -> Self {
        Self {
            marker_dir: config.usb.marker_dir.clone(),
            poll_interval: config.usb.poll_interval(),
            copy_buffer_bytes: config.usb.copy_buffer_bytes(),
            staging_dir: config.bundle.staging_path(),
        }
    }
}

struct ActiveSession {
    id: u64,
    cancel: Arc<AtomicBool>,
    // Detached when the session releases its slot
    _thread: Option<JoinHandle<()>>,
}

type SessionSlot = Arc<Mutex<Option<ActiveSession>>>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

/// Drives discover, connect, send and report for one book at a time
pub struct UsbCoordinator {
    enumerator: DeviceEnumerator,
    producer: Arc<dyn BundleProducer>,
    progress: Arc<dyn ProgressSink>,
    events: SessionEventSender,
    options: UsbOptions,
    slot: SessionSlot,
    state: Arc<Mutex<SessionState>>,
    next_id: AtomicU64,
}

impl UsbCoordinator {
    /// Create a coordinator and the receiving end of its session events
    pub fn new(
        transport: Arc<dyn DeviceTransport>,
        producer: Arc<dyn BundleProducer>,
        progress: Arc<dyn ProgressSink>,
        options: UsbOptions,
    ) -> (Self, SessionEvents) {
        let (events, rx) = create_session_channel();
        let enumerator = DeviceEnumerator::new(transport).with_marker(options.marker_dir.clone());
        let coordinator = Self {
            enumerator,
            producer,
            progress: Arc::new(PrefixedProgress::new(progress, USB_PROGRESS_PREFIX)),
            events,
            options,
            slot: Arc::new(Mutex::new(None)),
            state: Arc::new(Mutex::new(SessionState::Idle)),
            next_id: AtomicU64::new(1),
        };
        (coordinator, rx)
    }

    /// Start looking for a device to send `book` to
    ///
    /// If a session is already running this only asks it to stop; the
    /// caller can connect again once `Stopped` has arrived.
    pub fn connect(&self, book: Book) -> ConnectStatus {
        let mut slot = lock(&self.slot);
        if let Some(active) = slot.as_ref() {
            info!("USB session {} already running, requesting stop", active.id);
            active.cancel.store(true, Ordering::SeqCst);
            return ConnectStatus::StopRequested;
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let cancel = Arc::new(AtomicBool::new(false));
        set_state(&self.state, SessionState::Searching);

        let session = Session {
            id,
            book,
            enumerator: self.enumerator.clone(),
            producer: self.producer.clone(),
            progress: self.progress.clone(),
            events: self.events.clone(),
            options: self.options.clone(),
            cancel: cancel.clone(),
            slot: self.slot.clone(),
            state: self.state.clone(),
        };

        let spawned = thread::Builder::new()
            .name(format!("usb-session-{}", id))
            .spawn(move || session.run());

        match spawned {
            Ok(handle) => {
                debug!("USB session {} started", id);
                *slot = Some(ActiveSession {
                    id,
                    cancel,
                    _thread: Some(handle),
                });
                ConnectStatus::Started
            }
            Err(e) => {
                error!("Failed to spawn USB session thread: {}", e);
                drop(slot);
                report_unable_to_connect(&*self.progress, &e.to_string());
                set_state(&self.state, SessionState::Error);
                self.events.send(SessionEvent::Stopped {
                    outcome: SessionOutcome::UnableToConnect,
                });
                ConnectStatus::Failed
            }
        }
    }

    /// Ask the running session, if any, to stop
    ///
    /// Takes effect at the next poll; a copy already in progress is allowed
    /// to finish. Returns whether a session was running.
    pub fn stop(&self) -> bool {
        match lock(&self.slot).as_ref() {
            Some(active) => {
                debug!("Stop requested for USB session {}", active.id);
                active.cancel.store(true, Ordering::SeqCst);
                true
            }
            None => false,
        }
    }

    pub fn is_active(&self) -> bool {
        lock(&self.slot).is_some()
    }

    pub fn state(&self) -> SessionState {
        *lock(&self.state)
    }
}

impl Drop for UsbCoordinator {
    fn drop(&mut self) {
        self.stop();
    }
}

fn set_state(state: &Mutex<SessionState>, next: SessionState) {
    let mut current = lock(state);
    if !current.can_transition_to(next) {
        warn!("Unexpected USB session transition {:?} -> {:?}", *current, next);
    }
    *current = next;
}

fn report_unable_to_connect(progress: &dyn ProgressSink, detail: &str) {
    progress.error(
        "UnableToConnect",
        "Unable to connect to any Android device which has Bloom Reader.",
    );
    progress.error_without_localizing(detail);
}

/// Everything a session thread owns
struct Session {
    id: u64,
    book: Book,
    enumerator: DeviceEnumerator,
    producer: Arc<dyn BundleProducer>,
    progress: Arc<dyn ProgressSink>,
    events: SessionEventSender,
    options: UsbOptions,
    cancel: Arc<AtomicBool>,
    slot: SessionSlot,
    state: Arc<Mutex<SessionState>>,
}

impl Session {
    fn run(self) {
        let outcome = match panic::catch_unwind(AssertUnwindSafe(|| self.drive())) {
            Ok(outcome) => outcome,
            Err(e) => {
                error!("Panic in USB session {}: {:?}", self.id, e);
                self.progress
                    .error_without_localizing("Internal error while sending the book.");
                SessionOutcome::FailureToSend
            }
        };
        self.finish(outcome);
    }

    fn drive(&self) -> SessionOutcome {
        self.progress.message(
            "LookingForDevice",
            "Looking for an Android device connected by USB cable and set up for MTP...",
            &[],
        );

        let ready = match self.discover() {
            Ok(Some(ready)) => ready,
            Ok(None) => return SessionOutcome::Stopped,
            Err(e) => {
                error!("USB device enumeration failed: {}", e);
                report_unable_to_connect(&*self.progress, &e.to_string());
                return SessionOutcome::UnableToConnect;
            }
        };

        set_state(&self.state, SessionState::Connected);
        self.progress
            .message("Connected", "Connected to {0}...", &[ready.name()]);
        self.events.send(SessionEvent::OneReadyDeviceFound {
            device: ready.device.clone(),
        });

        if self.cancelled() {
            return SessionOutcome::Stopped;
        }

        set_state(&self.state, SessionState::Sending);
        let mut bundle_size = None;
        match self.send_book(&ready, &mut bundle_size) {
            Ok(()) => SessionOutcome::Done,
            Err(e) => {
                error!("Sending to {} failed: {}", ready.name(), e);
                e.report(&*self.progress);
                match e {
                    SendError::OutOfSpace { .. } => SessionOutcome::DeviceOutOfSpace,
                    SendError::Failed(_) => SessionOutcome::FailureToSend,
                }
            }
        }
    }

    /// Poll until exactly one device is ready; `None` if stopped first
    fn discover(&self) -> io::Result<Option<ReadyDevice>> {
        let mut last_report: Option<OutcomeKind> = None;

        loop {
            if self.cancelled() {
                return Ok(None);
            }

            match self.enumerator.discover()? {
                DiscoveryOutcome::OneReadyDeviceFound(ready) => return Ok(Some(ready)),
                outcome => {
                    let kind = outcome.kind();
                    if last_report != Some(kind) {
                        self.report_not_ready(&outcome);
                        self.events.send(SessionEvent::OneReadyDeviceNotFound {
                            report: kind,
                            device_names: outcome.device_names(),
                        });
                        last_report = Some(kind);
                    }
                }
            }

            if !self.sleep_unless_cancelled(self.options.poll_interval) {
                return Ok(None);
            }
        }
    }

    fn report_not_ready(&self, outcome: &DiscoveryOutcome) {
        match outcome {
            DiscoveryOutcome::NoDeviceFound => self.progress.message(
                "NoDeviceFound",
                "Please connect the device by USB cable, unlock it, and allow file transfer (MTP).",
                &[],
            ),
            DiscoveryOutcome::NoBloomDirectory(names) => self.progress.message_of_kind(
                "NoBloomDirectory",
                "The following devices are connected but do not seem to have Bloom Reader set up: {0}. Please install Bloom Reader and run it once.",
                &[names.join(", ").as_str()],
                ProgressKind::Warning,
            ),
            DiscoveryOutcome::MoreThanOneReadyDevice(names) => self.progress.message_of_kind(
                "MoreThanOneReadyDevice",
                "The following devices are connected and ready: {0}. Please disconnect all but one.",
                &[names.join(", ").as_str()],
                ProgressKind::Warning,
            ),
            DiscoveryOutcome::OneReadyDeviceFound(_) => {}
        }
    }

    fn send_book(&self, ready: &ReadyDevice, bundle_size: &mut Option<u64>) -> Result<(), SendError> {
        let title = self.book.title.as_str();
        self.progress.message(
            "PackagingBook",
            "Packaging \"{0}\" for use with Bloom Reader...",
            &[title],
        );

        let bundle = self
            .producer
            .produce(&self.book, &self.options.staging_dir)
            .map_err(|e| SendError::Failed(e.to_string()))?;
        *bundle_size = Some(bundle.size_bytes);

        let handle = &ready.device.handle;
        let target = join_device_path(&ready.marker_path, &bundle.file_name);
        let transport = self.enumerator.transport();

        if transport.exists(handle, &target) {
            self.progress
                .message("Replacing", "Replacing existing \"{0}\"...", &[title]);
        } else {
            self.progress.message(
                "Sending",
                "Sending \"{0}\" to device {1}",
                &[title, ready.name()],
            );
        }

        let mut source = File::open(&bundle.path)
            .map_err(|e| SendError::Failed(format!("Failed to open bundle: {}", e)))?;
        let mut dest = transport
            .open_write(handle, &target, bundle.size_bytes)
            .map_err(|e| SendError::from_device_io(&e, *bundle_size))?;

        let copied = copy_to_device(
            &mut source,
            dest.as_mut(),
            self.options.copy_buffer_bytes,
            *bundle_size,
        )?;
        drop(dest);
        debug!("Copied {} bytes to {} on {}", copied, target, ready.name());

        if !transport.exists(handle, &target) {
            return Err(SendError::Failed(NOT_FOUND_AFTER_WRITE.to_string()));
        }

        self.progress.message_of_kind(
            "BookSent",
            "You can now read \"{0}\" in Bloom Reader!",
            &[title],
            ProgressKind::Note,
        );
        Ok(())
    }

    fn cancelled(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
    }

    /// Sleep for `duration`; false if cancelled meanwhile
    fn sleep_unless_cancelled(&self, duration: Duration) -> bool {
        let deadline = Instant::now() + duration;
        loop {
            if self.cancelled() {
                return false;
            }
            let now = Instant::now();
            if now >= deadline {
                return true;
            }
            thread::sleep(CANCEL_CHECK_SLICE.min(deadline - now));
        }
    }

    fn finish(self, outcome: SessionOutcome) {
        info!("USB session {} finished: {:?}", self.id, outcome);
        set_state(&self.state, SessionState::for_outcome(outcome));

        {
            let mut slot = lock(&self.slot);
            if slot.as_ref().is_some_and(|active| active.id == self.id) {
                *slot = None;
            }
        }

        self.events.send(SessionEvent::Stopped { outcome });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_transitions() {
        use SessionState::*;
        assert!(Idle.can_transition_to(Searching));
        assert!(Searching.can_transition_to(Connected));
        assert!(Connected.can_transition_to(Sending));
        assert!(Sending.can_transition_to(Done));
        assert!(Searching.can_transition_to(Stopped));
        assert!(Connected.can_transition_to(Stopped));
        assert!(Done.can_transition_to(Searching));

        assert!(!Sending.can_transition_to(Stopped));
        assert!(!Idle.can_transition_to(Sending));
        assert!(!Searching.can_transition_to(Done));
    }

    #[test]
    fn test_terminal_states() {
        assert!(SessionState::Done.is_terminal());
        assert!(SessionState::Stopped.is_terminal());
        assert!(!SessionState::Sending.is_terminal());
        assert_eq!(
            SessionState::for_outcome(SessionOutcome::DeviceOutOfSpace),
            SessionState::Error
        );
    }
}
