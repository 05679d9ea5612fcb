//! USB (MTP) delivery channel
//!
//! Device I/O is blocking, so each session runs on its own OS thread and
//! talks back to the caller through [`common::SessionEvents`].

pub mod coordinator;
pub mod enumerator;
pub mod mounted;
pub mod transfer;

pub use coordinator::{ConnectStatus, SessionState, USB_PROGRESS_PREFIX, UsbCoordinator, UsbOptions};
pub use enumerator::DeviceEnumerator;
pub use mounted::MountedTransport;
pub use transfer::{SendError, format_size_mb, is_disk_full};
