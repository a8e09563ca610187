//! Error types for mpdweb
//!
//! One crate-level error enum built with thiserror. Background refresh
//! failures are logged where they happen and never abort the event router;
//! request handlers translate these variants into JSON error responses.

use thiserror::Error;

/// Main error type for mpdweb
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration file loading or validation errors
    #[error("configuration error: {0}")]
    Config(String),

    /// Errors from the MPD connection or protocol
    #[error(transparent)]
    Mpd(#[from] crate::mpd::MpdError),

    /// Snapshot serialization errors; the previous snapshot stays authoritative
    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    /// File I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A cover rescan was requested while one is already running
    #[error("update already started")]
    AlreadyUpdating,

    /// Malformed or incomplete request body
    #[error("{0}")]
    BadRequest(String),
}

/// Convenience Result type using the mpdweb Error
pub type Result<T> = std::result::Result<T, Error>;
