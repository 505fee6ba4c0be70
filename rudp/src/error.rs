//! Engine error taxonomy.

use thiserror::Error;

use crate::state::CloseReason;

/// Errors reported by [`crate::engine`] operations.
///
/// Every variant except [`Error::PayloadTooLarge`] is terminal: it is
/// reported by every later `send` / `recv` on the same session.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("session closed locally")]
    LocalClose,

    #[error("session closed by peer")]
    RemoteClose,

    #[error("session aborted by peer")]
    Aborted,

    #[error("malformed datagram received")]
    MalformedInput,

    #[error("no input from peer within the corrupt timeout")]
    TimedOut,

    #[error("payload of {len} bytes exceeds the {max}-byte message limit")]
    PayloadTooLarge { len: usize, max: usize },
}

impl From<CloseReason> for Error {
    fn from(reason: CloseReason) -> Self {
        match reason {
            CloseReason::LocalClose => Error::LocalClose,
            CloseReason::RemoteClose => Error::RemoteClose,
            CloseReason::Aborted => Error::Aborted,
            CloseReason::MalformedInput => Error::MalformedInput,
            CloseReason::TimedOut => Error::TimedOut,
        }
    }
}

/// Result alias for engine operations.
pub type Result<T> = std::result::Result<T, Error>;
