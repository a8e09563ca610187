//! MPD client library
//!
//! Minimal asynchronous client for the MPD wire protocol: one connection for
//! request/response commands and a second, idle-based connection that watches
//! for subsystem change events. Request framing is line oriented; responses
//! are `key: value` pairs terminated by `OK` or an `ACK` error line.

pub mod client;
pub mod proto;
pub mod watcher;

pub use client::{Client, CommandList};
pub use proto::MpdOutput;
pub use watcher::{MpdEvent, Watcher};

use thiserror::Error;

/// Errors from the MPD connection or protocol
#[derive(Error, Debug)]
pub enum MpdError {
    /// Connection level failures; the connection is dropped and redialed
    #[error("mpd: {0}")]
    Io(#[from] std::io::Error),

    /// The server replied with something the protocol does not allow here
    #[error("mpd: unexpected response: {0}")]
    Protocol(String),

    /// The server rejected a command with an ACK line
    #[error("mpd: {message}")]
    Command {
        code: u64,
        index: u64,
        command: String,
        message: String,
    },

    /// The server closed the connection
    #[error("mpd: connection closed")]
    Closed,
}

/// ACK error code MPD uses for commands it does not know.
const ACK_ERROR_UNKNOWN: u64 = 5;

impl MpdError {
    /// True when the daemon rejected the command as unknown, which the
    /// storage and neighbors resources treat as "feature absent".
    pub fn is_command_error(&self) -> bool {
        matches!(self, MpdError::Command { .. })
    }

    /// True for `unknown command` ACKs specifically.
    pub fn is_unknown_command(&self) -> bool {
        matches!(
            self,
            MpdError::Command {
                code: ACK_ERROR_UNKNOWN,
                ..
            }
        )
    }
}
