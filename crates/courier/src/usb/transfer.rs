//! Writing a bundle to a device, and classifying what went wrong
//!
//! Running out of space on the device is the one failure with a remedy the
//! user can act on, so it is told apart from everything else by platform
//! error code. A device that stops responding surfaces as a timeout and is
//! reported like any other failure.

use common::{ProgressKind, ProgressSink};
use std::io::{self, Read, Write};
use thiserror::Error;

/// Raw OS codes meaning "no space left"
#[cfg(unix)]
const DISK_FULL_CODES: &[i32] = &[
    28, // ENOSPC
];

#[cfg(windows)]
const DISK_FULL_CODES: &[i32] = &[
    112,                      // ERROR_DISK_FULL
    39,                       // ERROR_HANDLE_DISK_FULL
    0x8007_0070_u32 as i32,   // HRESULT_FROM_WIN32(ERROR_DISK_FULL), as returned by WPD
];

#[cfg(not(any(unix, windows)))]
const DISK_FULL_CODES: &[i32] = &[];

/// Error text when the written file cannot be found afterwards
pub const NOT_FOUND_AFTER_WRITE: &str = "Book does not exist after write operation.";

#[derive(Debug, Error)]
pub enum SendError {
    #[error("Device is out of space (book is {})", format_size_mb(*.size_bytes))]
    OutOfSpace { size_bytes: Option<u64> },

    #[error("{0}")]
    Failed(String),
}

impl SendError {
    /// Classify an I/O error raised while writing to the device
    pub fn from_device_io(err: &io::Error, size_bytes: Option<u64>) -> Self {
        if is_disk_full(err) {
            SendError::OutOfSpace { size_bytes }
        } else {
            SendError::Failed(err.to_string())
        }
    }

    /// Report this error through a progress sink
    pub fn report(&self, progress: &dyn ProgressSink) {
        match self {
            SendError::OutOfSpace { size_bytes } => {
                let size = format_size_mb(*size_bytes);
                progress.message_of_kind(
                    "DeviceOutOfSpace",
                    "The device does not have enough space for this book, which is {0}. Please free up some space on the device and try again.",
                    &[size.as_str()],
                    ProgressKind::Error,
                );
            }
            SendError::Failed(detail) => {
                progress.error(
                    "FailureToSend",
                    "There was an error while sending the book. Possibly the device was disconnected? If you can't see a reason for this the following may be helpful to report to the developers:",
                );
                progress.error_without_localizing(detail);
            }
        }
    }
}

/// Whether an I/O error means the destination is full
///
/// Looks through wrapped `io::Error`s, since device transports often wrap
/// the platform error in one of their own.
pub fn is_disk_full(err: &io::Error) -> bool {
    if err.kind() == io::ErrorKind::StorageFull {
        return true;
    }
    if let Some(code) = err.raw_os_error() {
        return DISK_FULL_CODES.contains(&code);
    }
    err.get_ref()
        .and_then(|inner| inner.downcast_ref::<io::Error>())
        .is_some_and(is_disk_full)
}

/// Size in megabytes with one decimal, e.g. `12.3 MB`
pub fn format_size_mb(size_bytes: Option<u64>) -> String {
    match size_bytes {
        Some(bytes) => format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0)),
        None => "of unknown size".to_string(),
    }
}

/// Copy `source` into a device stream using a fixed-size buffer, then flush
///
/// Read errors come from the local bundle and are never treated as disk full.
pub fn copy_to_device(
    source: &mut dyn Read,
    dest: &mut dyn Write,
    buffer_size: usize,
    size_bytes: Option<u64>,
) -> Result<u64, SendError> {
    let mut buf = vec![0u8; buffer_size.max(1)];
    let mut total = 0u64;

    loop {
        let n = match source.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(SendError::Failed(format!("Failed to read bundle: {}", e))),
        };
        dest.write_all(&buf[..n])
            .map_err(|e| SendError::from_device_io(&e, size_bytes))?;
        total += n as u64;
    }

    dest.flush()
        .map_err(|e| SendError::from_device_io(&e, size_bytes))?;
    Ok(total)
}
