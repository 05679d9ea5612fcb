//! Errors shared by both delivery channels

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// Socket setup or a transfer to a reader failed
    #[error("Network error: {0}")]
    Network(String),

    /// A reader stopped answering
    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("Session channel closed: {0}")]
    Channel(String),

    #[error("Configuration error: {0}")]
    Config(String),

    /// The bundle could not be produced or read
    #[error("Bundle error: {0}")]
    Bundle(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, Error>;
