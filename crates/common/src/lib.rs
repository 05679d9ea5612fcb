//! Common utilities for book-courier
//!
//! This crate provides the plumbing shared by both delivery channels:
//! error handling, logging setup, the progress feed that stands in for a UI,
//! the device transport contract the USB channel is written against, and the
//! channel that carries USB session events back to the caller.

pub mod channel;
pub mod device;
pub mod error;
pub mod logging;
pub mod progress;
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use channel::{SessionEvent, SessionEventSender, SessionEvents, SessionOutcome, create_session_channel};
pub use device::{
    CandidateDevice, DeviceHandle, DeviceTransport, DiscoveryOutcome, MARKER_DIRECTORY,
    OutcomeKind, PortableDevice, ReadyDevice, join_device_path,
};
pub use error::{Error, Result};
pub use logging::setup_logging;
pub use progress::{
    PrefixedProgress, ProgressKind, ProgressMessage, ProgressSink, TracingProgress,
    render_template,
};
